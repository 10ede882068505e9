//! Terminal progress output.

use depot_core::{ChunkOutcome, Progress, ProgressReporter};
use std::io::Write;
use std::sync::Mutex;

/// Redraws a single status line on stderr.
pub struct StderrProgress {
    last: Mutex<u32>,
}

impl StderrProgress {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(u32::MAX),
        }
    }

    /// End the status line.
    pub fn finish(&self) {
        eprintln!();
    }
}

impl ProgressReporter for StderrProgress {
    fn report(&self, progress: Progress) {
        let mut stderr = std::io::stderr().lock();

        if let Some(status) = &progress.chunk_status
            && status.outcome == ChunkOutcome::Failed
        {
            let _ = writeln!(
                stderr,
                "\r  ✗ chunk {}/{} ({}) failed",
                status.index + 1,
                status.total,
                status.hash
            );
        }

        // Only redraw when the whole-percent value moves.
        let whole = progress.percentage.floor() as u32;
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if *last == whole && progress.chunk_status.is_some() {
            return;
        }
        *last = whole;
        let _ = write!(stderr, "\r\x1b[2K  [{whole:>3}%] {}", progress.message);
        let _ = stderr.flush();
    }
}
