//! Cooperative cancellation (§5): a shared flag plus a [`Notify`] so
//! sleeping actors wake immediately on shutdown instead of waiting out
//! their full backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Shared shutdown signal checked at every suspension point named in
/// §5: before a sleep, and between items in a batch.
#[derive(Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Construct a signal that has not yet fired.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// `true` once [`Shutdown::trigger`] has been called.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Signal shutdown and wake every sleeper waiting on this handle.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Sleep for `duration`, waking early if shutdown fires first.
    pub async fn sleep(&self, duration: Duration) {
        if self.is_triggered() {
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => {}
            () = self.notify.notified() => {}
        }
    }
}
