//! One-shot completion signal for in-flight physical operations.

use std::sync::Arc;

use tokio::sync::watch;

/// A one-shot, broadcast completion signal.
///
/// Each volume owns its own signal. The caller performing a physical mount
/// (or unmount) arms a fresh one, other callers clone it and wait, and the
/// owner fires it once the outcome has been recorded. Waiting on a fired
/// signal returns immediately.
#[derive(Debug, Clone)]
pub struct MountSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl MountSignal {
    /// A signal with an operation in flight.
    #[must_use]
    pub fn armed() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A signal that has already completed.
    #[must_use]
    pub fn fired() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    /// Whether the operation is still in flight.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !*self.tx.borrow()
    }

    /// Mark the operation complete and wake every waiter.
    ///
    /// Returns `false` if the signal had already fired.
    pub fn fire(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Whether both handles refer to the same signal.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }

    /// Wait until the signal fires.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close.
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for MountSignal {
    fn default() -> Self {
        Self::fired()
    }
}
