//! Content items and their status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::sanitize_error;
use crate::stage::Stage;
use crate::{Error, ItemId, Result};

/// Media type of a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    /// Single still image post.
    Image,
    /// Multi-slide still image post.
    Carousel,
    /// Short video post rendered from a template.
    Video,
    /// Video with an AI voice-over track.
    NarratedVideo,
}

impl MediaFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::Image => "image",
            MediaFormat::Carousel => "carousel",
            MediaFormat::Video => "video",
            MediaFormat::NarratedVideo => "narrated_video",
        }
    }

    /// Video-bearing formats always stop for a human before publishing,
    /// whatever the channel.
    pub fn is_video_bearing(&self) -> bool {
        matches!(self, MediaFormat::Video | MediaFormat::NarratedVideo)
    }

    /// File extension of the rendered asset.
    pub fn asset_extension(&self) -> &'static str {
        if self.is_video_bearing() { "mp4" } else { "png" }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaFormat::Image),
            "carousel" => Ok(MediaFormat::Carousel),
            "video" => Ok(MediaFormat::Video),
            "narrated_video" | "narrated-video" => Ok(MediaFormat::NarratedVideo),
            other => Err(format!("unknown media format: {other}")),
        }
    }
}

/// Lifecycle status of a content item.
///
/// ```text
/// pending -> generating -> generated ---------------> publishing -> published
///                       \-> awaiting_manual_publish -/
/// (any non-terminal) -> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Generating,
    Generated,
    AwaitingManualPublish,
    Publishing,
    Published,
    Failed,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 7] = [
        ItemStatus::Pending,
        ItemStatus::Generating,
        ItemStatus::Generated,
        ItemStatus::AwaitingManualPublish,
        ItemStatus::Publishing,
        ItemStatus::Published,
        ItemStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Generating => "generating",
            ItemStatus::Generated => "generated",
            ItemStatus::AwaitingManualPublish => "awaiting_manual_publish",
            ItemStatus::Publishing => "publishing",
            ItemStatus::Published => "published",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Published | ItemStatus::Failed)
    }

    /// Whether the automatic pipeline may publish an item in this status.
    pub fn is_publishable(&self) -> bool {
        matches!(self, ItemStatus::Generated)
    }

    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Pending, Generating)
                | (Generating, Generated)
                | (Generating, AwaitingManualPublish)
                | (Generated, Publishing)
                | (AwaitingManualPublish, Publishing)
                | (Publishing, Published)
        )
    }

    /// Status a successfully rendered item of `format` moves to.
    pub fn after_render(format: MediaFormat) -> ItemStatus {
        if format.is_video_bearing() {
            ItemStatus::AwaitingManualPublish
        } else {
            ItemStatus::Generated
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ItemStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown item status: {s}"))
    }
}

/// How an item came to exist. Only `Scheduled` items count towards a
/// day's population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOrigin {
    #[default]
    Scheduled,
    OnDemand,
}

impl ItemOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemOrigin::Scheduled => "scheduled",
            ItemOrigin::OnDemand => "on_demand",
        }
    }
}

impl fmt::Display for ItemOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemOrigin {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(ItemOrigin::Scheduled),
            "on_demand" => Ok(ItemOrigin::OnDemand),
            other => Err(format!("unknown item origin: {other}")),
        }
    }
}

/// Stage outputs accumulated on an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Subject the generator is asked to write about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Generated quote or script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Generator's label for the text (mood, category, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    /// Number of generation attempts the accepted text took.
    #[serde(default)]
    pub attempts: u32,
    /// The accepted text is the local fallback, not generator output.
    #[serde(default)]
    pub used_fallback: bool,
}

/// Any schedulable unit of output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ItemId,
    pub channel: String,
    pub format: MediaFormat,
    pub status: ItemStatus,
    #[serde(default)]
    pub origin: ItemOrigin,
    pub scheduled_at: DateTime<Utc>,
    /// Visual variant (palette, avatar) chosen at scheduling time.
    pub variant: Option<String>,
    pub payload: Payload,
    /// Local path or URL of the rendered asset.
    pub asset_ref: Option<String>,
    /// Identifier returned by the publish collaborator.
    pub platform_ref: Option<String>,
    /// Sanitized description of the last failure.
    pub error: Option<String>,
    /// Stage that owned the item when it failed.
    pub failed_stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    /// A new item in `pending`, as the daily scheduler creates them.
    pub fn pending(
        channel: impl Into<String>,
        format: MediaFormat,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ItemId::new(),
            channel: channel.into(),
            format,
            status: ItemStatus::Pending,
            origin: ItemOrigin::Scheduled,
            scheduled_at,
            variant: None,
            payload: Payload::default(),
            asset_ref: None,
            platform_ref: None,
            error: None,
            failed_stage: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A new on-demand item that starts in `generating` because its
    /// creator runs generation itself.
    pub fn self_seeded(
        channel: impl Into<String>,
        format: MediaFormat,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: ItemStatus::Generating,
            origin: ItemOrigin::OnDemand,
            ..Self::pending(channel, format, scheduled_at)
        }
    }

    /// In `generating` with no text stored: generation started but its
    /// result was never saved.
    pub fn awaits_text(&self) -> bool {
        self.status == ItemStatus::Generating && self.payload.text.is_none()
    }

    pub fn with_variant(mut self, variant: Option<String>) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_topic(mut self, topic: Option<String>) -> Self {
        self.payload.topic = topic;
        self
    }

    /// Move to `next`, rejecting edges outside the status graph.
    pub fn transition(&mut self, next: ItemStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a failure raised while `stage` owned the item.
    pub fn fail(&mut self, stage: Stage, error: &str) -> Result<()> {
        self.transition(ItemStatus::Failed)?;
        self.error = Some(sanitize_error(error));
        self.failed_stage = Some(stage);
        Ok(())
    }

    /// Operator re-invocation: put a failed item back at the entry status
    /// of the stage it failed in. Returns that stage.
    ///
    /// A publish failure of a format that is published by hand returns the
    /// item to `awaiting_manual_publish` rather than `generated`.
    pub fn reset_for_retry(&mut self) -> Result<Stage> {
        let stage = match (self.status, self.failed_stage) {
            (ItemStatus::Failed, Some(stage)) => stage,
            (ItemStatus::Failed, None) => Stage::Content,
            (status, _) => {
                return Err(Error::InvalidTransition {
                    from: status,
                    to: Stage::Content.entry_status(),
                });
            }
        };

        self.status = match stage {
            Stage::Publish => ItemStatus::after_render(self.format),
            _ => stage.entry_status(),
        };
        self.error = None;
        self.failed_stage = None;
        self.updated_at = Utc::now();
        Ok(stage)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }

    /// Caption sent to the publish collaborator.
    pub fn caption(&self) -> String {
        self.payload.text.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(format: MediaFormat) -> ContentItem {
        ContentItem::pending("quotes", format, Utc::now())
    }

    #[test]
    fn test_happy_path_image() {
        let mut it = item(MediaFormat::Image);
        it.transition(ItemStatus::Generating).unwrap();
        it.transition(ItemStatus::after_render(it.format)).unwrap();
        assert_eq!(it.status, ItemStatus::Generated);
        it.transition(ItemStatus::Publishing).unwrap();
        it.transition(ItemStatus::Published).unwrap();
        assert!(it.status.is_terminal());
    }

    #[test]
    fn test_video_formats_wait_for_operator() {
        for format in [MediaFormat::Video, MediaFormat::NarratedVideo] {
            assert_eq!(
                ItemStatus::after_render(format),
                ItemStatus::AwaitingManualPublish
            );
        }
        for format in [MediaFormat::Image, MediaFormat::Carousel] {
            assert_eq!(ItemStatus::after_render(format), ItemStatus::Generated);
        }
    }

    #[test]
    fn test_no_skipping_statuses() {
        let mut it = item(MediaFormat::Image);
        let err = it.transition(ItemStatus::Generated).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(it.status, ItemStatus::Pending);

        assert!(!ItemStatus::AwaitingManualPublish.can_transition_to(ItemStatus::Published));
        assert!(!ItemStatus::Generated.can_transition_to(ItemStatus::Published));
        assert!(!ItemStatus::Pending.can_transition_to(ItemStatus::Publishing));
    }

    #[test]
    fn test_any_non_terminal_can_fail() {
        for status in ItemStatus::ALL {
            assert_eq!(
                status.can_transition_to(ItemStatus::Failed),
                !status.is_terminal(),
                "{status}"
            );
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in ItemStatus::ALL {
            assert!(!ItemStatus::Published.can_transition_to(next));
            assert!(!ItemStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_fail_records_sanitized_error() {
        let mut it = item(MediaFormat::Image);
        it.transition(ItemStatus::Generating).unwrap();
        it.fail(Stage::Render, "boom at /tmp/render/out.png\nstack...")
            .unwrap();
        assert_eq!(it.status, ItemStatus::Failed);
        assert_eq!(it.error.as_deref(), Some("boom at <path>"));
        assert_eq!(it.failed_stage, Some(Stage::Render));
    }

    #[test]
    fn test_reset_for_retry_returns_to_stage_entry() {
        let mut it = item(MediaFormat::Image);
        it.transition(ItemStatus::Generating).unwrap();
        it.transition(ItemStatus::Generated).unwrap();
        it.fail(Stage::Publish, "token expired").unwrap();

        let stage = it.reset_for_retry().unwrap();
        assert_eq!(stage, Stage::Publish);
        assert_eq!(it.status, ItemStatus::Generated);
        assert!(it.error.is_none());
    }

    #[test]
    fn test_reset_after_interrupted_manual_publish() {
        let mut it = item(MediaFormat::Video);
        it.status = ItemStatus::Publishing;
        it.fail(Stage::Publish, "publish interrupted").unwrap();

        assert_eq!(it.reset_for_retry().unwrap(), Stage::Publish);
        assert_eq!(it.status, ItemStatus::AwaitingManualPublish);
    }

    #[test]
    fn test_reset_requires_failed() {
        let mut it = item(MediaFormat::Image);
        assert!(it.reset_for_retry().is_err());
    }

    #[test]
    fn test_origin_follows_constructor() {
        let scheduled = item(MediaFormat::Image);
        assert_eq!(scheduled.origin, ItemOrigin::Scheduled);
        assert!(!scheduled.awaits_text());

        let mut on_demand = ContentItem::self_seeded("quotes", MediaFormat::Image, Utc::now());
        assert_eq!(on_demand.origin, ItemOrigin::OnDemand);
        assert!(on_demand.awaits_text());
        on_demand.payload.text = Some("Slow is smooth.".to_string());
        assert!(!on_demand.awaits_text());

        assert_eq!("on_demand".parse::<ItemOrigin>().unwrap(), ItemOrigin::OnDemand);
        assert!("manual".parse::<ItemOrigin>().is_err());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in ItemStatus::ALL {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), status);
        }
        assert!("done".parse::<ItemStatus>().is_err());
    }
}
