//! Deferred removal of entries once their time-to-live has elapsed.

use memora_log::trace;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

/// Extra time a timer waits past an entry's expiry before removing it, so a
/// reader that just passed its freshness check is never raced.
pub const EXPIRY_GRACE: Duration = Duration::from_secs(1);

/// One-shot timers, one per stored entry.
///
/// Timers are never renewed or cancelled. A timer that outlives its entry
/// fires against whatever is stored by then; the callback decides whether
/// that is still the entry it was armed for.
#[derive(Debug, Default)]
pub struct ExpiryScheduler {
    armed: Arc<AtomicUsize>,
}

impl ExpiryScheduler {
    /// Create a scheduler with no timers.
    pub fn new() -> Self {
        Self::default()
    }

    /// When a timer for an entry expiring at `expires_at` fires.
    pub fn deadline(expires_at: Instant) -> Instant {
        expires_at + EXPIRY_GRACE
    }

    /// Run `on_fire` once [`EXPIRY_GRACE`] after `expires_at`.
    pub fn arm<F, Fut>(&self, expires_at: Instant, on_fire: F) -> JoinHandle<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let armed = self.armed.clone();
        armed.fetch_add(1, Ordering::Relaxed);
        let deadline = Self::deadline(expires_at);

        tokio::spawn(async move {
            sleep_until(deadline).await;
            armed.fetch_sub(1, Ordering::Relaxed);
            trace!("Expiry timer fired");
            on_fire().await;
        })
    }

    /// Number of timers that have not fired yet.
    pub fn armed(&self) -> usize {
        self.armed.load(Ordering::Relaxed)
    }
}
