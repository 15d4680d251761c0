//! Scheduling and status endpoints.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use contentmill_pipeline::{PipelineStatus, ScheduleOutcome};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedule", post(run_scheduler))
        .route("/status", get(status))
}

#[derive(Debug, Default, Deserialize)]
struct ScheduleRequest {
    /// Local calendar date; today in the configured offset when absent.
    #[serde(default)]
    date: Option<NaiveDate>,
}

async fn run_scheduler(
    State(state): State<AppState>,
    body: Option<Json<ScheduleRequest>>,
) -> Result<Json<ScheduleOutcome>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let outcome = state.pipeline.run_scheduler(req.date).await?;
    Ok(Json(outcome))
}

async fn status(State(state): State<AppState>) -> Result<Json<PipelineStatus>, ApiError> {
    Ok(Json(state.pipeline.status().await?))
}
