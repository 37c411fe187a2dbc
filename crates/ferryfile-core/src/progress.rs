//! Progress snapshots and cancellation handles.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Callback invoked with progress snapshots. Returning `false` stops the
/// operation with [`crate::OpError::Cancelled`].
pub type ProgressCallback<'a> = dyn FnMut(&ProgressInfo) -> bool + 'a;

/// Progress information for one running operation.
///
/// All accumulation saturates at `u64::MAX`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Bytes of file data processed so far.
    pub bytes_done: u64,
    /// Total bytes to process (0 if unknown).
    pub bytes_total: u64,
    /// Entries processed so far.
    pub files_done: u64,
    /// Total entries to process (0 if unknown).
    pub files_total: u64,
    /// The entry currently being processed.
    pub current_path: PathBuf,
}

impl ProgressInfo {
    /// Create a progress tracker with known totals.
    pub fn new(files_total: u64, bytes_total: u64) -> Self {
        Self {
            files_total,
            bytes_total,
            ..Self::default()
        }
    }

    /// Add processed bytes.
    pub fn add_bytes(&mut self, bytes: u64) {
        self.bytes_done = self.bytes_done.saturating_add(bytes);
    }

    /// Add processed entries.
    pub fn add_files(&mut self, files: u64) {
        self.files_done = self.files_done.saturating_add(files);
    }

    /// Grow the byte total as new work is discovered.
    pub fn grow_bytes_total(&mut self, bytes: u64) {
        self.bytes_total = self.bytes_total.saturating_add(bytes);
    }

    /// Update the entry currently being processed.
    pub fn set_current_path(&mut self, path: impl Into<PathBuf>) {
        self.current_path = path.into();
    }

    /// Copy of this snapshot with `done` clamped to `total` wherever the
    /// total is known.
    pub fn clamped(&self) -> Self {
        let mut out = self.clone();
        if out.bytes_total > 0 {
            out.bytes_done = out.bytes_done.min(out.bytes_total);
        }
        if out.files_total > 0 {
            out.files_done = out.files_done.min(out.files_total);
        }
        out
    }

    /// Check if every known total has been reached.
    pub fn is_complete(&self) -> bool {
        self.bytes_done >= self.bytes_total && self.files_done >= self.files_total
    }

    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_done.min(self.bytes_total) as f64 / self.bytes_total as f64) * 100.0
        } else if self.files_total > 0 {
            (self.files_done.min(self.files_total) as f64 / self.files_total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Shared cancellation flag, set from the caller's thread and observed by
/// the running operation at its callback check points.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a new, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear the flag before a new request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulation_saturates() {
        let mut progress = ProgressInfo::new(u64::MAX, u64::MAX);
        progress.add_bytes(u64::MAX - 1);
        progress.add_bytes(10);
        progress.add_files(u64::MAX);
        progress.add_files(1);
        progress.grow_bytes_total(5);

        assert_eq!(progress.bytes_done, u64::MAX);
        assert_eq!(progress.files_done, u64::MAX);
        assert_eq!(progress.bytes_total, u64::MAX);
    }

    #[test]
    fn test_clamped_only_when_total_known() {
        let mut progress = ProgressInfo::new(1, 10);
        progress.add_files(3);
        progress.add_bytes(25);

        let clamped = progress.clamped();
        assert_eq!(clamped.files_done, 1);
        assert_eq!(clamped.bytes_done, 10);

        let mut unknown = ProgressInfo::default();
        unknown.add_files(3);
        assert_eq!(unknown.clamped().files_done, 3);
    }

    #[test]
    fn test_percentage() {
        let mut progress = ProgressInfo::new(4, 0);
        progress.add_files(1);
        assert!((progress.percentage() - 25.0).abs() < f64::EPSILON);

        let mut progress = ProgressInfo::new(4, 200);
        progress.add_bytes(50);
        assert!((progress.percentage() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cancel_flag_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());

        clone.cancel();
        assert!(flag.is_cancelled());

        flag.reset();
        assert!(!clone.is_cancelled());
    }
}
