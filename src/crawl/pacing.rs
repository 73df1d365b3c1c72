//! Request pacing.
//!
//! [`Pacer`] enforces a minimum delay between requests to the same host. It
//! is shared by every worker of a run, so parallel subtrees still respect
//! one per-host rate. Requests to different hosts do not wait for each other.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

use super::cancel::CancelToken;
use crate::fetch::{FetchError, FetchedBody, ResourceFetcher};

/// Delays applied between traversal steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    /// Pause after each leaf (upazila).
    pub leaf_delay: Duration,
    /// Pause after each district.
    pub district_delay: Duration,
    /// Minimum gap between requests to one host.
    pub request_delay: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            leaf_delay: Duration::from_millis(1000),
            district_delay: Duration::from_millis(2000),
            request_delay: Duration::from_millis(250),
        }
    }
}

impl PacingPolicy {
    /// A policy with every delay zero.
    #[must_use]
    pub fn none() -> Self {
        Self {
            leaf_delay: Duration::ZERO,
            district_delay: Duration::ZERO,
            request_delay: Duration::ZERO,
        }
    }
}

/// Per-host request pacer.
#[derive(Debug)]
pub struct Pacer {
    delay: Duration,
    /// Arc lets the `DashMap` shard lock be released before awaiting the
    /// inner mutex.
    hosts: DashMap<String, Arc<HostState>>,
}

#[derive(Debug, Default)]
struct HostState {
    /// `None` until the first request to the host.
    last_request: Mutex<Option<Instant>>,
}

impl Pacer {
    /// Creates a pacer enforcing `delay` between requests to one host.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            hosts: DashMap::new(),
        }
    }

    /// Minimum gap between requests to one host.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits until a request to `url`'s host may be issued.
    ///
    /// Returns `false` if the run was cancelled while waiting.
    #[instrument(level = "trace", skip(self, cancel), fields(host))]
    pub async fn acquire(&self, url: &str, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        if self.delay.is_zero() {
            return true;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", host.as_str());

        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostState::default()))
            .clone();

        let mut last_request = state.last_request.lock().await;
        if let Some(previous) = *last_request {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                let wait = self.delay.saturating_sub(elapsed);
                debug!(host = %host, wait_ms = wait.as_millis(), "pacing request");
                if !cancel.pause(wait).await {
                    return false;
                }
            }
        }
        *last_request = Some(Instant::now());
        true
    }
}

/// Lowercased host of `url`, or `"unknown"` for unparsable input.
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// A [`ResourceFetcher`] that paces every fetch and refuses to fetch once
/// the run is cancelled.
pub struct PacedFetcher<'a> {
    inner: &'a dyn ResourceFetcher,
    pacer: &'a Pacer,
    cancel: &'a CancelToken,
}

impl<'a> PacedFetcher<'a> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: &'a dyn ResourceFetcher, pacer: &'a Pacer, cancel: &'a CancelToken) -> Self {
        Self {
            inner,
            pacer,
            cancel,
        }
    }
}

#[async_trait]
impl ResourceFetcher for PacedFetcher<'_> {
    async fn fetch_binary(&self, url: &str) -> Result<FetchedBody, FetchError> {
        if !self.pacer.acquire(url, self.cancel).await {
            return Err(FetchError::cancelled(url));
        }
        self.inner.fetch_binary(url).await
    }
}
