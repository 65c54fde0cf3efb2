//! State of one in-flight unit of work.

use futures::{channel::oneshot, future::Shared, FutureExt};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

/// A one-time completion future that many waiters can await.
pub type Done = Shared<oneshot::Receiver<()>>;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// One in-flight unit of work.
///
/// A `Flight` is created when a submission is accepted and handed to the
/// work body; the submitter keeps a clone of the `Arc` to observe or cancel
/// it from outside. Cancellation is cooperative: [Flight::cancel] only sets
/// an advisory flag that the work body must poll via [Flight::is_canceled]
/// and act on itself — there is no preemptive interruption. A cancellation
/// callback registered with [Flight::cancel_with] runs strictly after the
/// body has returned, never concurrently with it.
///
/// Once the completion signal fires the flight is never reused.
pub struct Flight {
    canceled: AtomicBool,
    callback: Mutex<Option<Callback>>,
    done_tx: Mutex<Option<oneshot::Sender<()>>>,
    done: Done,
}

impl Flight {
    pub(crate) fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            canceled: AtomicBool::new(false),
            callback: Mutex::new(None),
            done_tx: Mutex::new(Some(tx)),
            done: rx.shared(),
        }
    }

    /// Whether cancellation has been requested. Advisory: the work body
    /// decides when (and whether) to act on it.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// Request cooperative cancellation and register a callback to run once
    /// the body has returned and observed the flag. A later registration
    /// replaces an earlier one.
    pub fn cancel_with<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.callback.lock().unwrap() = Some(Box::new(callback));
        self.cancel();
    }

    /// Block the calling thread until the flight completes.
    pub fn wait(&self) {
        let _ = futures::executor::block_on(self.done.clone());
    }

    /// A cloneable future resolved when the flight completes.
    pub fn done(&self) -> Done {
        self.done.clone()
    }

    pub(crate) fn take_callback(&self) -> Option<Callback> {
        self.callback.lock().unwrap().take()
    }

    /// Signal completion. Single transition; later calls are no-ops.
    pub(crate) fn finish(&self) {
        if let Some(tx) = self.done_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}
