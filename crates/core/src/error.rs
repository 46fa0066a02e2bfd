//! Error types for Vellum
//!
//! Every expected failure mode of the engine is a variant of [`Error`] and is
//! returned as a typed result. Only [`Error::Unrecoverable`] signals that the
//! store is in an unknown shape and the session must be reloaded.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for Vellum operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the storage engine
#[derive(Debug, Error)]
pub enum Error {
    /// The environment cannot persist anything; all writes are refused
    #[error("Storage disabled: {0}")]
    StorageDisabled(String),

    /// A write would exceed the store's capacity bound
    #[error("Capacity exceeded writing '{key}': need {needed} bytes, {available} available")]
    CapacityExceeded {
        /// Key whose write was rejected
        key: String,
        /// Bytes the write required
        needed: u64,
        /// Bytes left in the store at the time of the write
        available: u64,
    },

    /// Unsupported value type, or text that is not a valid record
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Legacy-to-tiered conversion failed part way
    #[error("Migration failed for '{kind}': {reason}")]
    MigrationFailure {
        /// Entity kind being migrated
        kind: String,
        /// What went wrong
        reason: String,
        /// Keys the cleanup pass could not remove or restore
        leftover_keys: Vec<String>,
    },

    /// Restore requested for an entity whose quarantined blob is gone
    #[error("Backup missing for '{0}'")]
    BackupMissing(String),

    /// Entity, entry or key not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid operation or argument
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Write attempted from inside a sync notification on the same call stack
    #[error("Re-entrant write to '{0}' during sync notification")]
    ReentrantWrite(String),

    /// Stored data failed checksum or decoding
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// I/O error from a file-backed store
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Rollback failed; the store is in an unknown state
    #[error("Unrecoverable store state: {0}")]
    Unrecoverable(String),
}

impl Error {
    /// Build a serialization error from any displayable cause
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Error::Serialization(msg.to_string())
    }

    /// Build an invalid-operation error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }

    /// True only for failures that leave the store in an unknown shape
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Unrecoverable(_))
    }

    /// True for errors raised by the write path that trigger a rollback
    pub fn is_write_fault(&self) -> bool {
        matches!(self, Error::CapacityExceeded { .. } | Error::Io(_))
    }

    /// Short message suitable for showing to an end user.
    ///
    /// Capacity and disabled-storage conditions get distinct guidance.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::CapacityExceeded { .. } => {
                "Storage is full. Archive or delete old data to free space."
            }
            Error::StorageDisabled(_) => {
                "This environment cannot persist anything. Changes will not be saved."
            }
            Error::BackupMissing(_) => "The deleted item was already purged and cannot be restored.",
            Error::MigrationFailure { .. } => {
                "Upgrading stored data failed. Your original data is untouched; try again later."
            }
            Error::Unrecoverable(_) => "Storage is in an unknown state. Please reload.",
            _ => "The operation could not be completed.",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
