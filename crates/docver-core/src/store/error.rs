//! Store error handling
//!
//! Typed errors for document store operations, with recovery suggestions.
//! Everything the store reports other than "no document matched" ends up
//! here; the conditional updater passes these through untouched.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during document store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to create data directory
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The request context's deadline passed before the operation committed
    #[error("Deadline exceeded before the store operation completed")]
    DeadlineExceeded,

    /// The request context was cancelled by the caller
    #[error("Store operation cancelled")]
    Cancelled,

    /// A document with the same `_id` already exists
    #[error("Duplicate key: a document with _id '{id}' already exists")]
    DuplicateKey { id: String },

    /// The patch cannot be applied to the matched document
    #[error("Invalid patch on field '{field}': {reason}")]
    InvalidPatch { field: String, reason: String },

    /// Input is not a valid document
    #[error("Invalid document: {details}")]
    InvalidDocument { details: String },

    /// A stored document body could not be decoded
    #[error("Stored document '{id}' is corrupted: {details}")]
    CorruptDocument { id: String, details: String },

    /// A thread panicked while holding the store lock
    #[error("Store lock poisoned by a panicked writer")]
    LockPoisoned,

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON encoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub(crate) fn invalid_patch(field: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidPatch {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if the same request may succeed when issued again
    ///
    /// Timeouts and lock contention are transient; malformed requests are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            StoreError::DeadlineExceeded | StoreError::Cancelled => true,
            StoreError::Database(e) => is_busy(e),
            _ => false,
        }
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StoreError::DeadlineExceeded => {
                Some("Increase the request timeout or retry when the store is less busy.")
            }
            StoreError::DuplicateKey { .. } => {
                Some("Choose a different _id or update the existing document instead.")
            }
            StoreError::InvalidPatch { .. } => {
                Some("Each field may appear in one patch operation only, and _id and version are managed by the store.")
            }
            StoreError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            StoreError::Database(e) if is_busy(e) => {
                Some("Another writer holds the database lock. Raise busy_timeout_ms or retry.")
            }
            _ => None,
        }
    }
}

/// Check if a SQLite error means the database was locked by another writer
pub(crate) fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
