//! Worker handle: the cancel/join pair for one running execution context
//!
//! Both halves are built on `tokio::sync::watch`, which is safe to signal
//! from any thread and to await from any runtime. The coordinator holds the
//! sending side of the cancel signal and the receiving side of the done
//! signal; the worker thread holds the opposite ends.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::watch;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique handle generation
pub fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Create a connected cancel signal / token pair
pub fn cancel_pair() -> (CancelSignal, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelSignal { tx: Arc::new(tx) }, CancelToken { rx })
}

/// Create a connected done notifier / signal pair
pub fn done_pair() -> (DoneNotifier, DoneSignal) {
    let (tx, rx) = watch::channel(false);
    (DoneNotifier { tx }, DoneSignal { rx })
}

/// Sending half of the one-shot cancellation signal
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving half observed by the worker at its own safe points
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation was requested or the owning handle is gone
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Held by the worker thread; flips the done signal when dropped
///
/// Dropping covers normal return, early error and unwinding alike.
pub struct DoneNotifier {
    tx: watch::Sender<bool>,
}

impl Drop for DoneNotifier {
    fn drop(&mut self) {
        self.tx.send_replace(true);
    }
}

/// Resolves once the worker's execution loop has fully exited
#[derive(Debug, Clone)]
pub struct DoneSignal {
    rx: watch::Receiver<bool>,
}

impl DoneSignal {
    pub fn is_done(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Runtime artifact of a running worker, owned exclusively by its registry entry
pub struct WorkerHandle {
    generation: u64,
    cancel: CancelSignal,
    done: DoneSignal,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn new(generation: u64, cancel: CancelSignal, done: DoneSignal, thread: Option<JoinHandle<()>>) -> Self {
        Self {
            generation,
            cancel,
            done,
            thread,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Clone of the done signal so it can be awaited after the registry lock is released
    pub fn done_signal(&self) -> DoneSignal {
        self.done.clone()
    }

    /// Whether the execution context has exited
    pub fn is_finished(&self) -> bool {
        self.done.is_done() || self.thread.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("generation", &self.generation)
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}
