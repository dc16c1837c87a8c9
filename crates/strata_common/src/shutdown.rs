//! Interruptible shutdown signal for background tasks.
//!
//! Replaces bare interval sleeps with watch-channel waits that respond to
//! stop signals within milliseconds instead of waiting for the full sleep
//! duration to elapse.
//!
//! # Usage
//! ```ignore
//! let signal = ShutdownSignal::new();
//! let signal_clone = signal.clone();
//!
//! // In the background task:
//! while !signal_clone.wait_timeout(Duration::from_secs(60)).await {
//!     // do work ...
//! }
//!
//! // From the control plane:
//! signal.shutdown(); // wakes the background task immediately
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// A cooperative shutdown signal backed by a `watch` channel.
///
/// When `shutdown()` is called, any task blocked in `wait_timeout()` or
/// `wait()` is woken immediately.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Create a new signal in the non-shutdown state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(tx),
        }
    }

    /// Signal shutdown. Wakes all waiters immediately.
    pub fn shutdown(&self) {
        let _ = self.inner.send(true);
    }

    /// Check if shutdown has been requested (non-blocking).
    pub fn is_shutdown(&self) -> bool {
        *self.inner.borrow()
    }

    /// Sleep for at most `duration`, but wake immediately if `shutdown()` is
    /// called. Returns `true` if shutdown was requested (caller should exit).
    pub async fn wait_timeout(&self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        let mut rx = self.inner.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_shutdown(),
            res = rx.changed() => res.is_err() || *rx.borrow(),
        }
    }

    /// Wait until shutdown is signalled.
    pub async fn wait(&self) {
        if self.is_shutdown() {
            return;
        }
        let mut rx = self.inner.subscribe();
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
