//! Progress reporting for row scans and request batches.
//!
//! Library code reports through [`ProgressCallback`]; the CLI renders it
//! with `indicatif`, tests and embedders pass [`null_progress`].

use std::sync::Arc;

/// Number of rows processed between progress updates in row scans.
pub const PROGRESS_BATCH: usize = 65_536;

/// Receiver of progress from one scan.
///
/// Shared between concurrent workers, hence `Send + Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Starts a scan under `label`. `total` is the number of units when
    /// known up front (validated rows, queued requests); streamed input
    /// passes `None`.
    fn begin(&self, label: &str, total: Option<u64>);

    /// Records `delta` more finished units.
    fn advance(&self, delta: u64);

    /// Ends the scan with a one-line summary.
    fn finish(&self, summary: String);
}

/// Ignores everything.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn begin(&self, _label: &str, _total: Option<u64>) {}
    fn advance(&self, _delta: u64) {}
    fn finish(&self, _summary: String) {}
}

/// A shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

/// Batches per-row ticks into one [`ProgressCallback::advance`] call every
/// [`PROGRESS_BATCH`] rows.
pub struct RowTicker<'a> {
    progress: &'a dyn ProgressCallback,
    pending: usize,
}

impl<'a> RowTicker<'a> {
    /// Starts counting rows for `progress`.
    #[must_use]
    pub fn new(progress: &'a dyn ProgressCallback) -> Self {
        Self {
            progress,
            pending: 0,
        }
    }

    /// Counts one row.
    pub fn tick(&mut self) {
        self.pending += 1;
        if self.pending == PROGRESS_BATCH {
            self.flush();
        }
    }

    /// Reports any rows counted since the last batch.
    pub fn flush(&mut self) {
        if self.pending > 0 {
            self.progress.advance(self.pending as u64);
            self.pending = 0;
        }
    }
}
