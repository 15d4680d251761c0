//! On-demand generation.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use contentmill_pipeline::{OnDemandRequest, OnDemandResult};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/generate", post(generate))
}

/// Creates a self-seeded item and runs the content stage for it before
/// responding. The item then continues through render and publish like
/// any scheduled one.
async fn generate(
    State(state): State<AppState>,
    Json(req): Json<OnDemandRequest>,
) -> Result<Json<OnDemandResult>, ApiError> {
    Ok(Json(state.pipeline.generate_on_demand(req).await?))
}
