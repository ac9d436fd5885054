//! Export progress and cooperative cancellation.
//!
//! [`ExportProgress`] is the only state shared between the engine and the
//! outside world: a percentage that never decreases and a cancellation flag.
//! Clones share the same counters, so a UI thread can hold one clone while the
//! engine polls another. Cancellation is observed at per-term checkpoints and
//! cannot interrupt a query already in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Marker returned by a checkpoint once cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Polled before each unit of work in a per-term loop.
pub trait Checkpoint {
    /// Report that `done` of `total` units are finished and ask whether to go on.
    fn checkpoint(&self, done: usize, total: usize) -> Result<(), Cancelled>;
}

/// A checkpoint that never cancels, for standalone component use.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unchecked;

impl Checkpoint for Unchecked {
    fn checkpoint(&self, _done: usize, _total: usize) -> Result<(), Cancelled> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ProgressInner {
    percent: AtomicU8,
    cancelled: AtomicBool,
}

/// Shared progress counter plus cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct ExportProgress {
    inner: Arc<ProgressInner>,
}

impl ExportProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current percentage (0..=100).
    pub fn percent(&self) -> u8 {
        self.inner.percent.load(Ordering::Acquire)
    }

    /// Raise the percentage to `percent`; lower values are ignored.
    ///
    /// Returns the value after the update.
    pub fn advance_to(&self, percent: u8) -> u8 {
        let target = percent.min(100);
        let previous = self.inner.percent.fetch_max(target, Ordering::AcqRel);
        previous.max(target)
    }

    /// Request cancellation. Safe to call from any thread.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Zero the percentage for a new run. A pending cancellation is kept.
    pub(crate) fn restart(&self) {
        self.inner.percent.store(0, Ordering::Release);
    }

    /// A checkpoint mapping per-unit progress onto `[start, end]`.
    pub fn band(&self, start: u8, end: u8) -> StageBand<'_> {
        StageBand {
            progress: self,
            start: start.min(end),
            end: end.max(start),
        }
    }
}

/// The slice of the percentage scale owned by one pipeline stage.
#[derive(Debug, Clone, Copy)]
pub struct StageBand<'a> {
    progress: &'a ExportProgress,
    start: u8,
    end: u8,
}

impl StageBand<'_> {
    /// Mark the stage finished.
    pub fn complete(&self) {
        self.progress.advance_to(self.end);
    }

    pub fn end(&self) -> u8 {
        self.end
    }
}

impl Checkpoint for StageBand<'_> {
    fn checkpoint(&self, done: usize, total: usize) -> Result<(), Cancelled> {
        if self.progress.is_cancelled() {
            return Err(Cancelled);
        }
        let width = usize::from(self.end - self.start);
        let offset = if total == 0 { width } else { width * done.min(total) / total };
        // offset <= width <= 100
        self.progress.advance_to(self.start + offset as u8);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_never_decreases() {
        let progress = ExportProgress::new();
        assert_eq!(progress.advance_to(40), 40);
        assert_eq!(progress.advance_to(10), 40);
        assert_eq!(progress.percent(), 40);
        assert_eq!(progress.advance_to(250), 100);
    }

    #[test]
    fn clones_share_state() {
        let progress = ExportProgress::new();
        let observer = progress.clone();
        progress.advance_to(12);
        observer.cancel();
        assert_eq!(observer.percent(), 12);
        assert!(progress.is_cancelled());
    }

    #[test]
    fn band_maps_units_onto_range() {
        let progress = ExportProgress::new();
        let band = progress.band(20, 60);
        band.checkpoint(0, 4).unwrap();
        assert_eq!(progress.percent(), 20);
        band.checkpoint(2, 4).unwrap();
        assert_eq!(progress.percent(), 40);
        band.complete();
        assert_eq!(progress.percent(), 60);
    }

    #[test]
    fn band_reports_cancellation() {
        let progress = ExportProgress::new();
        let band = progress.band(0, 10);
        progress.cancel();
        assert_eq!(band.checkpoint(1, 2), Err(Cancelled));
    }

    #[test]
    fn restart_keeps_cancellation() {
        let progress = ExportProgress::new();
        progress.advance_to(90);
        progress.cancel();
        progress.restart();
        assert_eq!(progress.percent(), 0);
        assert!(progress.is_cancelled());
    }

    #[test]
    fn cancel_from_another_thread() {
        let progress = ExportProgress::new();
        let remote = progress.clone();
        std::thread::spawn(move || remote.cancel()).join().unwrap();
        assert!(progress.is_cancelled());
    }
}
