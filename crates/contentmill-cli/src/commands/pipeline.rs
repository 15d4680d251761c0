//! Scheduling, status and on-demand generation.

use anyhow::Result;
use chrono::NaiveDate;
use contentmill_core::MediaFormat;
use serde_json::{Value, json};

use super::{ApiClient, print_json};

pub async fn schedule(client: &ApiClient, date: Option<NaiveDate>) -> Result<()> {
    let outcome = client.post("schedule", &json!({ "date": date })).await?;
    let date = outcome.get("date").and_then(Value::as_str).unwrap_or("?");
    match outcome.get("outcome").and_then(Value::as_str) {
        Some("created") => {
            let count = outcome
                .get("items")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            println!("Scheduled {count} items for {date}");
        }
        _ => println!("{date} is already scheduled"),
    }
    Ok(())
}

pub async fn status(client: &ApiClient) -> Result<()> {
    let status = client.get("status").await?;

    println!(
        "{:<10} {:>7} {:>7} {:>7} {:>9} {:>7}",
        "STAGE", "WORKERS", "QUEUED", "ACTIVE", "COMPLETED", "FAILED"
    );
    for stage in status
        .get("stages")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        let n = |name: &str| stage.get(name).and_then(Value::as_u64).unwrap_or(0);
        println!(
            "{:<10} {:>7} {:>7} {:>7} {:>9} {:>7}",
            stage.get("stage").and_then(Value::as_str).unwrap_or("?"),
            n("workers"),
            n("queued"),
            n("active"),
            n("completed"),
            n("failed"),
        );
    }

    println!();
    println!(
        "renders in flight: {}",
        status
            .get("renders_in_flight")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    );
    if let Some(items) = status.get("items").and_then(Value::as_object) {
        for (state, count) in items {
            println!("{state:<24} {count}");
        }
    }
    Ok(())
}

pub async fn generate(
    client: &ApiClient,
    channel: Option<String>,
    format: MediaFormat,
    topic: Option<String>,
    variant: Option<String>,
) -> Result<()> {
    let body = json!({
        "channel": channel,
        "format": format,
        "topic": topic,
        "variant": variant,
    });
    print_json(&client.post("generate", &body).await?)
}
