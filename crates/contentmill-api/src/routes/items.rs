//! Item endpoints: listing, inspection and operator actions.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use contentmill_core::{ContentItem, ItemId, ItemStatus, Stage};
use contentmill_pipeline::{QueuedJob, StageOutcome};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_items))
        .route("/{id}", get(get_item))
        .route("/{id}/stages/{stage}", post(trigger_stage))
        .route("/{id}/stages/{stage}/run", post(run_stage))
        .route("/{id}/retry", post(retry_item))
        .route("/{id}/confirm", post(confirm_publish))
}

#[derive(Debug, Deserialize)]
struct ListItemsQuery {
    status: Option<String>,
    limit: Option<i64>,
}

async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ListItemsQuery>,
) -> Result<Json<Vec<ContentItem>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ItemStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    Ok(Json(state.pipeline.items(status, limit).await?))
}

async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ContentItem>, ApiError> {
    Ok(Json(state.pipeline.item(ItemId::from_uuid(id)).await?))
}

fn parse_stage(stage: &str) -> Result<Stage, ApiError> {
    stage.parse().map_err(ApiError::BadRequest)
}

async fn trigger_stage(
    State(state): State<AppState>,
    Path((id, stage)): Path<(Uuid, String)>,
) -> Result<Json<QueuedJob>, ApiError> {
    let stage = parse_stage(&stage)?;
    let job = state
        .pipeline
        .trigger_stage(stage, ItemId::from_uuid(id))
        .await?;
    Ok(Json(job))
}

/// Run the stage inline and report what it did.
async fn run_stage(
    State(state): State<AppState>,
    Path((id, stage)): Path<(Uuid, String)>,
) -> Result<Json<StageOutcome>, ApiError> {
    let stage = parse_stage(&stage)?;
    let outcome = state.pipeline.run_stage(stage, ItemId::from_uuid(id)).await?;
    Ok(Json(outcome))
}

async fn retry_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueuedJob>, ApiError> {
    Ok(Json(state.pipeline.retry(ItemId::from_uuid(id)).await?))
}

#[derive(Debug, Default, Deserialize)]
struct ConfirmRequest {
    #[serde(default)]
    external_ref: Option<String>,
}

async fn confirm_publish(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ConfirmRequest>>,
) -> Result<Json<ContentItem>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let item = state
        .pipeline
        .confirm_manual_publish(ItemId::from_uuid(id), req.external_ref)
        .await?;
    Ok(Json(item))
}
