//! Cancellable delays
//!
//! All waits of a recording timeline go through one [`TimeoutSet`], so cleanup
//! can cancel every outstanding wait as a group without running what follows it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Returned by [`TimeoutSet::delay`] when the wait was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("delay cancelled")]
pub struct Cancelled;

/// Set of outstanding scheduled delays
#[derive(Clone, Default)]
pub struct TimeoutSet {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    pending: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    next_id: AtomicU64,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its entry from the set however the wait ends
struct PendingGuard<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending().remove(&self.id);
    }
}

impl TimeoutSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for `duration`, unless [`cancel_all`](Self::cancel_all) runs first
    pub async fn delay(&self, duration: Duration) -> Result<(), Cancelled> {
        self.delay_unless(duration, || false).await
    }

    /// Like [`delay`](Self::delay), but gives up once `is_cancelled` holds
    ///
    /// `is_cancelled` is checked after the wait is registered. An owner that
    /// sets its flag before calling `cancel_all` therefore never leaves a wait
    /// behind, even when the two race on different threads.
    pub async fn delay_unless<F>(&self, duration: Duration, is_cancelled: F) -> Result<(), Cancelled>
    where
        F: Fn() -> bool,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.inner.pending().insert(id, cancel_tx);
        let _guard = PendingGuard {
            inner: &self.inner,
            id,
        };

        if is_cancelled() {
            return Err(Cancelled);
        }

        tokio::select! {
            biased;
            _ = &mut cancel_rx => Err(Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Cancel every outstanding delay. Safe to call repeatedly.
    pub fn cancel_all(&self) {
        let cancelled: Vec<_> = self.inner.pending().drain().collect();
        if !cancelled.is_empty() {
            tracing::debug!(count = cancelled.len(), "Cancelled pending delays");
        }
        // Dropping the senders wakes every waiter with an error.
        drop(cancelled);
    }

    /// Number of delays currently waiting
    pub fn pending(&self) -> usize {
        self.inner.pending().len()
    }
}
