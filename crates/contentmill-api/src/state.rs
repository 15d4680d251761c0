//! Application state.

use contentmill_pipeline::ContentPipeline;
use sqlx::PgPool;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// `None` when the pipeline runs on in-memory storage.
    pub pool: Option<PgPool>,
    pub pipeline: Arc<ContentPipeline>,
}

impl AppState {
    pub fn new(pool: PgPool, pipeline: Arc<ContentPipeline>) -> Self {
        Self {
            pool: Some(pool),
            pipeline,
        }
    }

    pub fn in_memory(pipeline: Arc<ContentPipeline>) -> Self {
        Self {
            pool: None,
            pipeline,
        }
    }
}
