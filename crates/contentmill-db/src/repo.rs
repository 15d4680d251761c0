//! Repository traits and implementations.

pub mod history;
pub mod item;

pub use history::{HistoryRepo, MemoryHistoryRepo, PgHistoryRepo};
pub use item::{ItemRepo, MemoryItemRepo, PgItemRepo};
