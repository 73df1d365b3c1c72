//! Hierarchical traversal.
//!
//! A [`Traverser`] walks the taxonomy with one of two strategies and drives
//! the classifier, fetcher and sink at every leaf:
//!
//! - [`CascadeTraverser`] iterates district × upazila through a
//!   [`NavigationSession`](crate::session::NavigationSession).
//! - [`TreeTraverser`] descends a static directory listing tree.
//!
//! Failures are contained at the smallest enclosing scope (one task, one
//! leaf, one branch) and turned into log lines and [`CrawlStats`] counters.
//! Only a failed initial discovery is returned as a [`CrawlError`].

mod cancel;
mod cascade;
mod pacing;
mod stats;
mod tree;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::classify::Classifier;
use crate::fetch::{FetchError, ResourceFetcher};
use crate::naming::{DownloadTask, NamingScheme};
use crate::session::SessionError;
use crate::sink::{DownloadSink, SinkError, SinkOutcome};

pub use cancel::CancelToken;
pub use cascade::{CascadeSettings, CascadeTraverser};
pub use pacing::{PacedFetcher, Pacer, PacingPolicy, extract_host};
pub use stats::{CrawlStats, CrawlSummary};
pub use tree::{MAX_WORKERS, TreeSettings, TreeTraverser};

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The top-level option list or root listing is empty or unreadable.
    #[error("discovery failed at {url}: {reason}")]
    Discovery {
        /// Page or listing that was being read.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// The navigation session failed outside any single branch (start page
    /// load).
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl CrawlError {
    /// Creates a discovery failure.
    pub fn discovery(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Discovery {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Collaborators and policies shared by every traversal step.
#[derive(Debug)]
pub struct CrawlContext {
    /// Destination of every download task.
    pub sink: DownloadSink,
    /// Leaf classifier.
    pub classifier: Classifier,
    /// Local naming scheme.
    pub naming: NamingScheme,
    /// Pacing delays.
    pub pacing: PacingPolicy,
    /// Per-host request pacer.
    pub pacer: Pacer,
    /// Run-level cancellation.
    pub cancel: CancelToken,
    /// Run counters.
    pub stats: Arc<CrawlStats>,
}

impl CrawlContext {
    /// Creates a context with fresh stats and a pacer built from `pacing`.
    #[must_use]
    pub fn new(
        classifier: Classifier,
        naming: NamingScheme,
        pacing: PacingPolicy,
        cancel: CancelToken,
    ) -> Self {
        Self {
            sink: DownloadSink::new(),
            classifier,
            naming,
            pacer: Pacer::new(pacing.request_delay),
            pacing,
            cancel,
            stats: Arc::new(CrawlStats::new()),
        }
    }

    /// Delivers `task` and records the outcome. Never fails: every error is
    /// logged with the URL or path involved.
    pub async fn deliver(&self, task: &DownloadTask, fetcher: &dyn ResourceFetcher) {
        let paced = PacedFetcher::new(fetcher, &self.pacer, &self.cancel);
        match self.sink.deliver(task, &paced).await {
            Ok(SinkOutcome::Written { path, bytes }) => {
                info!(path = %path.display(), bytes, "saved");
                self.stats.record_written();
            }
            Ok(SinkOutcome::Skipped { path }) => {
                debug!(path = %path.display(), "exists, skipping");
                self.stats.record_skipped();
            }
            Err(SinkError::Fetch(FetchError::Cancelled { url })) => {
                debug!(url = %url, "fetch cancelled");
                self.stats.mark_interrupted();
            }
            Err(SinkError::Fetch(e)) => {
                error!(url = %task.remote_url(), error = %e, "download failed");
                self.stats.record_failed();
            }
            Err(SinkError::Io { path, source }) => {
                error!(
                    url = %task.remote_url(),
                    path = %path.display(),
                    error = %source,
                    "write failed"
                );
                self.stats.record_failed();
            }
        }
    }

    /// Whether the run has been cancelled; marks the stats interrupted if so.
    pub(crate) fn should_stop(&self) -> bool {
        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            self.stats.mark_interrupted();
        }
        cancelled
    }

    /// Sleeps for `delay`; returns `false` (and marks the run interrupted) if
    /// cancelled first.
    pub(crate) async fn pause(&self, delay: std::time::Duration) -> bool {
        let completed = self.cancel.pause(delay).await;
        if !completed {
            self.stats.mark_interrupted();
        }
        completed
    }
}

/// One traversal strategy.
#[async_trait]
pub trait Traverser: Send {
    /// Walks the whole taxonomy. Consumes the traverser so that owned
    /// collaborators (a navigation session) are released when it returns.
    async fn run(self: Box<Self>, ctx: &CrawlContext) -> Result<CrawlSummary, CrawlError>;
}
