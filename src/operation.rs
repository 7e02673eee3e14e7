//! Operation handles and cooperative cancellation.
//!
//! Every workflow invocation runs under an `Operation`. The caller keeps an
//! `OperationHandle` and may cancel it at any time, from any thread;
//! cancelling is idempotent and safe after the operation has finished. The
//! workflow observes the signal at its suspension points via
//! `Operation::cancelled()` / `is_cancelled()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Logical identity of one in-flight workflow invocation.
pub type OperationId = u64;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// One in-flight workflow invocation. Owns the cancellation channel.
#[derive(Debug)]
pub struct Operation {
    id: OperationId,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

/// Cloneable caller-side handle used to request cancellation.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    id: OperationId,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl Operation {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            id: NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed),
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn handle(&self) -> OperationHandle {
        OperationHandle {
            id: self.id,
            cancel_tx: self.cancel_tx.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolve once the operation is cancelled. Never resolves otherwise,
    /// which makes it safe to park in a `tokio::select!` branch.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without a cancel; stay pending.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for Operation {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationHandle {
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Request cancellation. Idempotent; a no-op once the operation has
    /// already finished.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }
}
