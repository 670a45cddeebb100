// SPDX-License-Identifier: MIT OR Apache-2.0
//! Caller-side cancellation.
//!
//! A caller-initiated cancel (timeout, signal) is modelled as a synthetic
//! veto with reason `"cancelled"`: the boundary stops pulling, drops the
//! token stream, and seals an aborted turn. No orphan backend resources.

use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable cancellation flag for one turn, backed by a watch channel.
///
/// All clones share the same channel; cancelling any of them makes every
/// clone observe it, and pending [`cancelled`](Self::cancelled) waits wake.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// A handle that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { flag: Arc::new(tx) }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves when the handle is cancelled; immediately if it already is.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives in `self`, so the channel cannot close while we
        // hold it; wait_for only returns on a true value.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_cancelled() {
        assert!(!CancelHandle::new().is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let handle = CancelHandle::new();
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let a = CancelHandle::new();
        let b = a.clone();
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_immediately_when_set() {
        let handle = CancelHandle::new();
        handle.cancel();
        handle.cancelled().await;
    }

    #[tokio::test]
    async fn cancelled_future_wakes_on_signal() {
        let handle = CancelHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        tokio::task::yield_now().await;
        handle.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_the_original_keeps_clones_working() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        drop(handle);
        assert!(!clone.is_cancelled());
        clone.cancel();
        assert!(clone.is_cancelled());
        clone.cancelled().await;
    }
}
