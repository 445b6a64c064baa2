//! Error types for the disconnectable store layer.

use thiserror::Error;

use crate::types::Uid;

/// Errors that can occur in store, folder and diary operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level connection failure.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The operation requires the store to be online.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The requested resource was never cached while online.
    #[error("Not available offline: {0}")]
    NotAvailableOffline(String),

    /// The folder does not exist.
    #[error("No such folder: {0}")]
    NoSuchFolder(String),

    /// The operation referenced a UID that is not in the folder summary.
    #[error("Invalid UID {uid} in folder {folder}")]
    InvalidUid {
        /// Folder the UID was looked up in.
        folder: String,
        /// The offending UID.
        uid: Uid,
    },

    /// The operation is not supported (e.g. a cross-store transfer).
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Malformed data from a backend or from local storage.
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// A diary entry could not be applied during replay.
    #[error("Replay conflict: {0}")]
    ReplayConflict(String),

    /// The transport aborted the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// The folder outlived the store it was opened from.
    #[error("Store has been released")]
    StoreReleased,

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for an [`Error::InvalidUid`].
    #[must_use]
    pub fn invalid_uid(folder: impl Into<String>, uid: &Uid) -> Self {
        Self::InvalidUid {
            folder: folder.into(),
            uid: uid.clone(),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
