//! Error types for contentmill.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

use crate::item::ItemStatus;
use crate::stage::Stage;

/// Longest error text kept on an item.
pub const MAX_ERROR_LEN: usize = 300;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed configuration needed by a stage.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A generation, render or publish collaborator reported failure.
    #[error("{stage} collaborator failed: {message}")]
    Collaborator { stage: Stage, message: String },

    /// The render lock could not be acquired in time.
    #[error("render lock contention: no render slot freed within {:.1}s", .waited.as_secs_f64())]
    RenderContention { waited: Duration },

    /// No candidate passed the fitness predicate within the attempt budget.
    #[error("generation exhausted after {attempts} attempts: {last_rejection}")]
    GenerationExhausted { attempts: u32, last_rejection: String },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },

    #[error("not found: {0}")]
    NotFound(String),

    /// The stored item changed status under us; another delivery owns it.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`], stable for operators and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Collaborator,
    ResourceContention,
    GenerationExhausted,
    InvalidTransition,
    NotFound,
    Conflict,
    Storage,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Collaborator { .. } => ErrorKind::Collaborator,
            Error::RenderContention { .. } => ErrorKind::ResourceContention,
            Error::GenerationExhausted { .. } => ErrorKind::GenerationExhausted,
            Error::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Contention clears on its own; everything else needs an operator or a fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RenderContention { .. })
    }

    pub fn collaborator(stage: Stage, message: impl Into<String>) -> Self {
        Error::Collaborator {
            stage,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

static ABSOLUTE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|[\s'"(=\[])(/[\w.\-]+(?:/[\w.\-]*)+)"#).expect("valid path regex")
});

/// Reduce an error message to what an operator should see on an item:
/// the first line only, local filesystem paths masked, bounded length.
pub fn sanitize_error(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or("").trim();
    let masked = ABSOLUTE_PATH.replace_all(first_line, "$1<path>");

    if masked.chars().count() <= MAX_ERROR_LEN {
        return masked.into_owned();
    }

    let mut truncated: String = masked.chars().take(MAX_ERROR_LEN - 3).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_first_line() {
        let msg = "render crashed\n    at Renderer.run (index.js:10)\n    at main";
        assert_eq!(sanitize_error(msg), "render crashed");
    }

    #[test]
    fn test_sanitize_masks_paths() {
        let msg = "cannot open /var/lib/contentmill/media/abc.png: no such file";
        assert_eq!(sanitize_error(msg), "cannot open <path>: no such file");
    }

    #[test]
    fn test_sanitize_leaves_urls_alone() {
        let msg = "upload refused for https://media.example.com/a/b.png";
        assert_eq!(sanitize_error(msg), msg);
    }

    #[test]
    fn test_sanitize_truncates() {
        let msg = "x".repeat(1000);
        let clean = sanitize_error(&msg);
        assert_eq!(clean.chars().count(), MAX_ERROR_LEN);
        assert!(clean.ends_with("..."));
    }

    #[test]
    fn test_contention_is_distinct_from_collaborator() {
        let busy = Error::RenderContention {
            waited: Duration::from_secs(2),
        };
        let broke = Error::collaborator(Stage::Render, "engine exited 137");

        assert_eq!(busy.kind(), ErrorKind::ResourceContention);
        assert_eq!(broke.kind(), ErrorKind::Collaborator);
        assert!(busy.is_retryable());
        assert!(!broke.is_retryable());
        assert!(busy.to_string().starts_with("render lock contention"));
    }
}
