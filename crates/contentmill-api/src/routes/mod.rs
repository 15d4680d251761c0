//! API routes.

pub mod generate;
pub mod health;
pub mod items;
pub mod schedule;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .merge(schedule::router())
        .merge(generate::router())
        .nest("/items", items::router())
}
