//! Run counters shared across traversal branches and workers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Thread-safe counters updated as a crawl progresses.
#[derive(Debug, Default)]
pub struct CrawlStats {
    written: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    soft_misses: AtomicUsize,
    branches_skipped: AtomicUsize,
    interrupted: AtomicBool,
}

impl CrawlStats {
    /// Creates a tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_written(&self) {
        self.written.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_soft_miss(&self) {
        self.soft_misses.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_branch_skipped(&self) {
        self.branches_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn mark_interrupted(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn summary(&self) -> CrawlSummary {
        CrawlSummary {
            written: self.written.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            soft_misses: self.soft_misses.load(Ordering::SeqCst),
            branches_skipped: self.branches_skipped.load(Ordering::SeqCst),
            interrupted: self.interrupted.load(Ordering::SeqCst),
        }
    }
}

/// Outcome of a finished (or interrupted) crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Files fetched and written this run.
    pub written: usize,
    /// Files already present and left untouched.
    pub skipped: usize,
    /// Tasks abandoned after a fetch or write failure.
    pub failed: usize,
    /// Leaves that produced no download tasks.
    pub soft_misses: usize,
    /// Branches abandoned after a failed or empty selection or listing.
    pub branches_skipped: usize,
    /// Whether the run stopped early on cancellation.
    pub interrupted: bool,
}

impl fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} written, {} skipped, {} failed, {} soft misses, {} branches skipped",
            self.written, self.skipped, self.failed, self.soft_misses, self.branches_skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_reflects_recorded_events() {
        let stats = CrawlStats::new();
        stats.record_written();
        stats.record_written();
        stats.record_skipped();
        stats.record_failed();
        stats.record_soft_miss();
        stats.record_branch_skipped();

        let summary = stats.summary();
        assert_eq!(
            summary,
            CrawlSummary {
                written: 2,
                skipped: 1,
                failed: 1,
                soft_misses: 1,
                branches_skipped: 1,
                interrupted: false,
            }
        );
        assert_eq!(
            summary.to_string(),
            "2 written, 1 skipped, 1 failed, 1 soft misses, 1 branches skipped"
        );
    }

    #[test]
    fn test_mark_interrupted() {
        let stats = CrawlStats::new();
        stats.mark_interrupted();
        assert!(stats.summary().interrupted);
    }
}
