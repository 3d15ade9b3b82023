//! Single-slot coalescing trigger
//!
//! Cross-task requests such as "reconcile now" only carry the latest intent.
//! A [`ReconcileSignal`] holds at most one pending trigger: raising it while
//! one is pending is a no-op, and the waiter consumes the pending trigger as
//! a whole.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Coalescing wake-up flag
#[derive(Debug, Default)]
pub struct ReconcileSignal {
    pending: AtomicBool,
    notify: Notify,
}

impl ReconcileSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the trigger.
    ///
    /// Returns `false` when a trigger was already pending and this one was
    /// absorbed.
    pub fn raise(&self) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_one();
        true
    }

    /// Check if a trigger is waiting to be consumed
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Consume a pending trigger without waiting
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Wait until a trigger is raised and consume it
    pub async fn wait(&self) {
        loop {
            // Register interest before checking the flag so a raise in
            // between is not lost.
            let notified = self.notify.notified();
            if self.take() {
                return;
            }
            notified.await;
        }
    }
}
