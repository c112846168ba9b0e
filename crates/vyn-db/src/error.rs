use thiserror::Error;

use vyn_types::models::MessageId;

/// Errors produced by the message store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Input rejected before touching the database.
    #[error("{0}")]
    Validation(String),

    #[error("message {0} not found")]
    NotFound(MessageId),

    /// SQLite failure. The write did not happen.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    /// The blocking task running the query panicked or was cancelled.
    #[error("database task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// True when the store itself is unavailable, as opposed to a bad request.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Sqlite(_) | Self::LockPoisoned | Self::Task(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
