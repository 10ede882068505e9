//! Progress reporting for long-running operations.

use crate::chunk::ChunkHash;
use serde::Serialize;
use std::sync::Mutex;

/// What happened to one chunk during upload or verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkOutcome {
    /// Uploaded to the remote store.
    Uploaded,
    /// Already present remotely.
    Skipped,
    /// Could not be read locally or written remotely.
    Failed,
    /// Present remotely (verification).
    Present,
    /// Absent remotely (verification).
    Missing,
}

/// Per-chunk detail attached to a progress event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkStatus {
    /// Zero-based position in the worklist.
    pub index: usize,
    pub total: usize,
    pub hash: ChunkHash,
    pub outcome: ChunkOutcome,
}

/// One progress event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Completion percentage, `0.0..=100.0`.
    pub percentage: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_status: Option<ChunkStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Progress {
    pub fn new(percentage: f64, message: impl Into<String>) -> Self {
        Self {
            percentage,
            message: message.into(),
            chunk_status: None,
            error: None,
        }
    }

    pub fn with_chunk(mut self, status: ChunkStatus) -> Self {
        self.chunk_status = Some(status);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Percentage of `done` out of `total`, treating an empty job as complete.
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}

/// Receiver of progress events.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: Progress);
}

impl<F> ProgressReporter for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, progress: Progress) {
        self(progress)
    }
}

/// Reporter that discards every event.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _progress: Progress) {}
}

/// Wraps a reporter so percentages never go backwards within one operation.
pub struct ProgressTracker<'a> {
    inner: &'a dyn ProgressReporter,
    high_water: Mutex<f64>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(inner: &'a dyn ProgressReporter) -> Self {
        Self {
            inner,
            high_water: Mutex::new(0.0),
        }
    }

    /// Forward `progress`, raising its percentage to the highest seen so far.
    pub fn report(&self, mut progress: Progress) {
        let clamped = progress.percentage.clamp(0.0, 100.0);
        let percentage = match self.high_water.lock() {
            Ok(mut high) => {
                *high = high.max(clamped);
                *high
            }
            Err(poisoned) => poisoned.into_inner().max(clamped),
        };
        progress.percentage = percentage;
        self.inner.report(progress);
    }
}
