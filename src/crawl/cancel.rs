//! Run-level cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Cloneable flag that stops a crawl from issuing new requests.
///
/// Cancellation is one-way. Pacing sleeps wake as soon as it is flipped.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Cancels the run. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the run is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any token clone, so this cannot fail
        // while `self` is alive.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleeps for `delay` unless cancelled first.
    ///
    /// Returns `true` if the full delay elapsed and the run is still live.
    pub async fn pause(&self, delay: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if delay.is_zero() {
            return true;
        }
        tokio::select! {
            () = tokio::time::sleep(delay) => !self.is_cancelled(),
            () = self.cancelled() => false,
        }
    }
}
