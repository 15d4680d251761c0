//! CLI command implementations.

pub mod items;
pub mod pipeline;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{FixedOffset, NaiveDate};
use contentmill_config::{SystemConfig, load_system_config};
use contentmill_pipeline::{PlannedSlot, plan_day};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use url::Url;

/// Thin JSON client for the server's `/api/v1` routes.
pub struct ApiClient {
    client: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let mut base = Url::parse(api_url).with_context(|| format!("invalid API URL {api_url}"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base: base.join("api/v1/")?,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let response = self.client.get(self.url(path)?).send().await?;
        read(response).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        let response = self.client.post(self.url(path)?).json(body).send().await?;
        read(response).await
    }
}

async fn read(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("no error detail");
        bail!("server returned {status}: {message}");
    }
    Ok(body)
}

pub fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn validate(path: &Path) -> Result<()> {
    match load_system_config(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!(
                "  {} items/day between {} and {} ({})",
                config.schedule.count,
                config.schedule.window_start.format("%H:%M"),
                config.schedule.window_end.format("%H:%M"),
                config.timezone
            );
            if config.collaborators.generator.is_none()
                || config.collaborators.renderer.is_none()
                || config.collaborators.publisher.is_none()
            {
                println!("  warning: collaborator endpoints incomplete; the server will not start");
            }
            Ok(())
        }
        Err(e) => Err(anyhow!("configuration error in {}: {e}", path.display())),
    }
}

pub fn plan(date: NaiveDate, config_path: Option<&Path>) -> Result<()> {
    let config = match config_path {
        Some(path) => load_system_config(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SystemConfig::default(),
    };
    let slots = plan_day(&config, date)?;
    for line in plan_lines(&slots, config.timezone) {
        println!("{line}");
    }
    Ok(())
}

fn plan_lines(slots: &[PlannedSlot], timezone: FixedOffset) -> Vec<String> {
    slots
        .iter()
        .map(|slot| {
            let local = slot.scheduled_at.with_timezone(&timezone);
            let mut line = format!(
                "{:>2}  {}  {:<14}",
                slot.index,
                local.format("%Y-%m-%d %H:%M %:z"),
                slot.format.as_str()
            );
            if let Some(topic) = &slot.topic {
                line.push_str(topic);
            }
            line.trim_end().to_string()
        })
        .collect()
}
