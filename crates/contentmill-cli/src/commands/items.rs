//! Item commands.

use anyhow::Result;
use contentmill_core::{ItemStatus, Stage};
use serde_json::{Value, json};

use super::{ApiClient, print_json};

pub async fn list(client: &ApiClient, status: Option<ItemStatus>, limit: u32) -> Result<()> {
    let mut path = format!("items?limit={limit}");
    if let Some(status) = status {
        path.push_str(&format!("&status={}", status.as_str()));
    }

    let items = client.get(&path).await?;
    let items = items.as_array().map(Vec::as_slice).unwrap_or_default();
    if items.is_empty() {
        println!("No items");
        return Ok(());
    }
    for item in items {
        println!("{}", summary_line(item));
    }
    Ok(())
}

fn summary_line(item: &Value) -> String {
    let field = |name: &str| item.get(name).and_then(Value::as_str).unwrap_or("-");
    let mut line = format!(
        "{}  {}  {:<14} {:<24}",
        field("id"),
        field("scheduled_at"),
        field("format"),
        field("status"),
    );
    if let Some(error) = item.get("error").and_then(Value::as_str) {
        line.push_str(error);
    }
    line.trim_end().to_string()
}

pub async fn show(client: &ApiClient, id: &str) -> Result<()> {
    print_json(&client.get(&format!("items/{id}")).await?)
}

pub async fn trigger(client: &ApiClient, stage: Stage, id: &str, wait: bool) -> Result<()> {
    let path = if wait {
        format!("items/{id}/stages/{stage}/run")
    } else {
        format!("items/{id}/stages/{stage}")
    };
    print_json(&client.post(&path, &json!({})).await?)
}

pub async fn retry(client: &ApiClient, id: &str) -> Result<()> {
    let job = client.post(&format!("items/{id}/retry"), &json!({})).await?;
    println!(
        "Re-queued {} at stage {}",
        id,
        job.get("stage").and_then(Value::as_str).unwrap_or("?")
    );
    Ok(())
}

pub async fn confirm(client: &ApiClient, id: &str, external_ref: Option<String>) -> Result<()> {
    let item = client
        .post(
            &format!("items/{id}/confirm"),
            &json!({ "external_ref": external_ref }),
        )
        .await?;
    println!("{}", summary_line(&item));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_line_shows_error() {
        let item = json!({
            "id": "0192",
            "scheduled_at": "2026-03-01T02:00:00Z",
            "format": "video",
            "status": "failed",
            "error": "render lock not acquired within 600s",
        });
        let line = summary_line(&item);
        assert!(line.starts_with("0192  2026-03-01T02:00:00Z  video"));
        assert!(line.ends_with("render lock not acquired within 600s"));

        let line = summary_line(&json!({ "id": "0193", "status": "pending" }));
        assert!(line.contains("pending"));
        assert!(!line.ends_with(' '));
    }
}
