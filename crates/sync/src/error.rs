//! Error types for packaging and publishing.

use depot_core::{SessionId, UploadState, UploadStats};
use depot_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Core(#[from] depot_core::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("source directory not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to publish {key}: {source}")]
    ManifestPublish {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("cannot promote version {version}: {missing} chunk(s) missing from the remote store")]
    PromotionBlocked { version: String, missing: usize },

    #[error("manifest describes version {found}, expected {expected}")]
    VersionMismatch { expected: String, found: String },

    #[error("upload cancelled after {} of {} chunks", .stats.processed(), .stats.total)]
    Cancelled { stats: UploadStats },

    #[error("upload session {id} is {state}, expected idle")]
    SessionState { id: SessionId, state: UploadState },

    #[error("background task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Join(err.to_string())
    }
}

impl SyncError {
    /// True when the caller stopped the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled { .. })
    }
}
