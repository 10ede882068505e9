//! Upload session identifiers, states and counters.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload session state.
///
/// `Idle → Uploading ⇄ Paused → Completed | Failed | Cancelled`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Created, not yet started.
    Idle,
    /// Working through the chunk list.
    Uploading,
    /// Suspended between chunks until resumed.
    Paused,
    /// Chunk pass finished and the manifest was published.
    Completed,
    /// A fatal error ended the session.
    Failed,
    /// Stopped by the caller before publishing.
    Cancelled,
}

impl UploadState {
    /// Check if the session is running or suspended.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Uploading | Self::Paused)
    }

    /// Check if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Uploading => "uploading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Per-session chunk counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStats {
    /// Worklist length.
    pub total: usize,
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_uploaded: u64,
}

impl UploadStats {
    /// Chunks handled so far, whatever the outcome.
    pub fn processed(&self) -> usize {
        self.uploaded + self.skipped + self.failed
    }

    /// True when every chunk is accounted for and none failed.
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.processed() == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(UploadState::Paused.is_active());
        assert!(!UploadState::Idle.is_active());
        assert!(UploadState::Cancelled.is_terminal());
        assert!(!UploadState::Uploading.is_terminal());
    }

    #[test]
    fn test_stats_completeness() {
        let mut stats = UploadStats {
            total: 3,
            uploaded: 2,
            skipped: 1,
            ..Default::default()
        };
        assert!(stats.is_complete());
        stats.failed = 1;
        stats.uploaded = 1;
        assert!(!stats.is_complete());
        assert_eq!(stats.processed(), 3);
    }
}
