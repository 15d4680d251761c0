//! Daily population of content items.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use contentmill_config::SystemConfig;
use contentmill_core::{ContentItem, Error, MediaFormat, Result, Stage};
use contentmill_db::ItemRepo;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::queue::JobQueue;
use crate::rotation::VariantRotation;
use crate::worker::sleep_unless_shutdown;

/// `count` instants evenly spaced over `[start, end]`, rounded to the
/// millisecond. A single slot sits at `start`.
pub fn slot_times(start: DateTime<Utc>, end: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    if count == 0 {
        return Vec::new();
    }

    let span_ms = (end - start).num_milliseconds() as f64;
    let interval_ms = if count > 1 {
        span_ms / (count - 1) as f64
    } else {
        0.0
    };

    (0..count)
        .map(|i| start + Duration::milliseconds((interval_ms * i as f64).round() as i64))
        .collect()
}

/// Formats alternate by slot index.
pub fn format_for_slot(formats: &[MediaFormat], index: usize) -> Option<MediaFormat> {
    if formats.is_empty() {
        return None;
    }
    Some(formats[index % formats.len()])
}

fn local_instant(date: NaiveDate, time: NaiveTime, tz: FixedOffset) -> Result<DateTime<Utc>> {
    date.and_time(time)
        .and_local_timezone(tz)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| Error::Internal(format!("{date} {time} has no single instant in {tz}")))
}

/// The UTC half-open range covering calendar day `date` in `tz`.
pub fn day_bounds(date: NaiveDate, tz: FixedOffset) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = local_instant(date, NaiveTime::default(), tz)?;
    Ok((start, start + Duration::days(1)))
}

/// The first instant after `now` at which the local clock in `tz` reads
/// `run_at`.
pub fn next_run_after(
    now: DateTime<Utc>,
    run_at: NaiveTime,
    tz: FixedOffset,
) -> Result<DateTime<Utc>> {
    let today = now.with_timezone(&tz).date_naive();
    let candidate = local_instant(today, run_at, tz)?;
    if candidate > now {
        return Ok(candidate);
    }
    let tomorrow = today
        .succ_opt()
        .ok_or_else(|| Error::Internal(format!("no day after {today}")))?;
    local_instant(tomorrow, run_at, tz)
}

/// One slot of a day's plan, before any item exists for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedSlot {
    pub index: usize,
    pub scheduled_at: DateTime<Utc>,
    pub format: MediaFormat,
    pub topic: Option<String>,
}

/// Slots for `date` under `config`. Pure; touches no storage.
pub fn plan_day(config: &SystemConfig, date: NaiveDate) -> Result<Vec<PlannedSlot>> {
    let schedule = &config.schedule;
    let start = local_instant(date, schedule.window_start, config.timezone)?;
    let end = local_instant(date, schedule.window_end, config.timezone)?;
    let day_ordinal = date.num_days_from_ce().unsigned_abs() as usize;

    slot_times(start, end, schedule.count)
        .into_iter()
        .enumerate()
        .map(|(index, scheduled_at)| {
            let format = format_for_slot(&schedule.formats, index)
                .ok_or_else(|| Error::Validation("no media formats configured".to_string()))?;
            let topic = (!schedule.topics.is_empty())
                .then(|| schedule.topics[(day_ordinal + index) % schedule.topics.len()].clone());
            Ok(PlannedSlot {
                index,
                scheduled_at,
                format,
                topic,
            })
        })
        .collect()
}

/// What a scheduling run did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Created {
        date: NaiveDate,
        items: Vec<ContentItem>,
    },
    /// Items already existed for the date; nothing was created.
    AlreadyScheduled { date: NaiveDate },
}

impl ScheduleOutcome {
    pub fn created(&self) -> usize {
        match self {
            ScheduleOutcome::Created { items, .. } => items.len(),
            ScheduleOutcome::AlreadyScheduled { .. } => 0,
        }
    }
}

/// Creates each day's items and seeds the content stage.
pub struct DailyScheduler {
    items: Arc<dyn ItemRepo>,
    queue: Arc<dyn JobQueue>,
    config: Arc<SystemConfig>,
    rotation: Mutex<Option<VariantRotation>>,
}

impl DailyScheduler {
    pub fn new(items: Arc<dyn ItemRepo>, queue: Arc<dyn JobQueue>, config: Arc<SystemConfig>) -> Self {
        Self {
            items,
            queue,
            config,
            rotation: Mutex::new(None),
        }
    }

    /// Today's date in the configured timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.config.timezone).date_naive()
    }

    /// Load the rotation from the variants of the most recent items. Called
    /// lazily by [`schedule_day`](Self::schedule_day); calling it again
    /// discards in-memory state in favour of storage.
    pub async fn seed_rotation(&self) -> Result<()> {
        let limit = self.config.variants.max_consecutive;
        let recent = self
            .items
            .recent_variants(i64::try_from(limit).unwrap_or(i64::MAX))
            .await?;
        let rotation = VariantRotation::seeded(limit, recent);
        *self.rotation.lock().unwrap_or_else(|e| e.into_inner()) = Some(rotation);
        Ok(())
    }

    fn next_variant(&self) -> Option<String> {
        let candidates = &self.config.variants.candidates;
        if candidates.is_empty() {
            return None;
        }

        let mut guard = self.rotation.lock().unwrap_or_else(|e| e.into_inner());
        let rotation = guard
            .get_or_insert_with(|| VariantRotation::new(self.config.variants.max_consecutive));
        rotation.select(candidates, &mut rand::thread_rng())
    }

    /// Populate `date` with the configured number of `pending` items and
    /// enqueue a content job for each.
    ///
    /// A no-op when any scheduled item already exists for the date.
    /// On-demand items falling on the date are ignored. A day left partially
    /// populated by an earlier run that failed midway stays short and is not
    /// topped up.
    pub async fn schedule_day(&self, date: NaiveDate) -> Result<ScheduleOutcome> {
        let (day_start, day_end) = day_bounds(date, self.config.timezone)?;
        if self
            .items
            .scheduled_exists_between(day_start, day_end)
            .await?
        {
            info!(%date, "scheduled items already exist for date, skipping");
            return Ok(ScheduleOutcome::AlreadyScheduled { date });
        }

        let seeded = self
            .rotation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        if !seeded {
            self.seed_rotation().await?;
        }

        let slots = plan_day(&self.config, date)?;
        let mut created = Vec::with_capacity(slots.len());

        for slot in slots {
            let item = ContentItem::pending(&self.config.schedule.channel, slot.format, slot.scheduled_at)
                .with_variant(self.next_variant())
                .with_topic(slot.topic);

            if let Err(e) = self.insert_and_enqueue(&item).await {
                warn!(
                    %date,
                    created = created.len(),
                    error = %e,
                    "scheduling aborted partway through the day"
                );
                return Err(e);
            }
            created.push(item);
        }

        info!(%date, count = created.len(), "scheduled day");
        Ok(ScheduleOutcome::Created {
            date,
            items: created,
        })
    }

    async fn insert_and_enqueue(&self, item: &ContentItem) -> Result<()> {
        self.items.insert(item).await?;
        self.queue.enqueue(Stage::Content, item.id).await?;
        Ok(())
    }

    async fn schedule_today(&self) {
        let date = self.today();
        if let Err(e) = self.schedule_day(date).await {
            error!(%date, error = %e, "daily scheduling failed");
        }
    }

    /// Schedule today right away, then again every day at `run-at` local
    /// time, until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let run_at = self.config.schedule.run_at;
        info!(run_at = %run_at.format("%H:%M"), "Starting daily scheduler");
        self.schedule_today().await;

        loop {
            let now = Utc::now();
            let next = match next_run_after(now, run_at, self.config.timezone) {
                Ok(next) => next,
                Err(e) => {
                    error!(error = %e, "cannot compute next scheduling run");
                    break;
                }
            };
            let wait = (next - now).to_std().unwrap_or_default();
            if sleep_unless_shutdown(wait, &mut shutdown).await {
                break;
            }
            self.schedule_today().await;
        }
        info!("Daily scheduler stopped");
    }
}
