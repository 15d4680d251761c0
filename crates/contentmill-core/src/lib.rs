//! Core domain types and traits for the contentmill content pipeline.
//!
//! This crate contains:
//! - Item and job identifiers
//! - `ContentItem` and the item status state machine
//! - Pipeline stages
//! - The template fitness predicate and generation-history similarity
//! - Collaborator traits (generation, rendering, publishing)
//! - The error taxonomy shared by every stage

pub mod collaborator;
pub mod error;
pub mod fitness;
pub mod history;
pub mod id;
pub mod item;
pub mod stage;

pub use error::{Error, ErrorKind, Result, sanitize_error};
pub use id::{ItemId, JobId};
pub use item::{ContentItem, ItemOrigin, ItemStatus, MediaFormat, Payload};
pub use stage::Stage;
