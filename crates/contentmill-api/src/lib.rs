//! API server for the contentmill content pipeline.
//!
//! Provides the HTTP REST API for manual triggers, status queries and
//! operator actions.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
