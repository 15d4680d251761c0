//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    /// A conditional update found the row in a different state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    Decode(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for contentmill_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => contentmill_core::Error::NotFound(msg),
            DbError::Conflict(msg) => contentmill_core::Error::Conflict(msg),
            other => contentmill_core::Error::Storage(other.to_string()),
        }
    }
}
