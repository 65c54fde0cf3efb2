//! Execute at most one unit of work at a time, with cooperative cancellation
//! and queued takeover.
//!
//! This crate provides [SingleFlight], an executor that dispatches work to a
//! shared thread pool while guaranteeing that, per executor instance, no two
//! work bodies ever run concurrently. Two submission policies are offered:
//!
//! - [SingleFlight::execute_ready] only starts work on an idle executor and
//!   reports [Error::NotReady] otherwise; it never cancels or queues.
//! - [SingleFlight::execute_always] always wins eventually: when work is in
//!   flight it requests cooperative cancellation and queues the new work to
//!   start immediately after the current body returns and tears down. A
//!   later call replaces a still-queued predecessor (last submission wins).
//!
//! Cancellation is advisory ([Flight::is_canceled]); the work body polls the
//! flag and returns early on its own. Panics in a work body are not caught;
//! they propagate to the pool's panic handler.
//!
//! # Example
//!
//! ```rust
//! use std::sync::{
//!     atomic::{AtomicBool, Ordering},
//!     Arc,
//! };
//! use turnstile_singleflight::{create_pool, SingleFlight};
//!
//! let pool = create_pool(2).unwrap();
//! let executor = SingleFlight::new(pool);
//!
//! let done = Arc::new(AtomicBool::new(false));
//! let flag = done.clone();
//! let flight = executor
//!     .execute_ready(move |_| flag.store(true, Ordering::Release))
//!     .unwrap();
//! flight.wait();
//!
//! assert!(done.load(Ordering::Acquire));
//! assert!(executor.is_ready());
//! ```

use rayon::{ThreadPoolBuildError, ThreadPoolBuilder};
use std::{
    mem,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tracing::debug;

mod flight;
pub use flight::{Done, Flight};

/// A clone-able wrapper around a [rayon]-compatible thread pool.
pub type ThreadPool = Arc<rayon::ThreadPool>;

/// Creates a clone-able [rayon]-compatible thread pool with `concurrency`
/// worker threads, shareable across many executors.
pub fn create_pool(concurrency: usize) -> Result<ThreadPool, ThreadPoolBuildError> {
    let pool = ThreadPoolBuilder::new().num_threads(concurrency).build()?;
    Ok(Arc::new(pool))
}

/// Errors that can occur when submitting work.
#[derive(Error, Debug)]
pub enum Error {
    #[error("executor is not ready")]
    NotReady,
}

type Work = Box<dyn FnOnce(&Flight) + Send + 'static>;

/// Submission state of the executor. A [Flight] is held iff work is in
/// flight.
enum Slot {
    /// No work in flight.
    Ready,
    /// Work executing.
    Running(Arc<Flight>),
    /// Work executing but asked to stop; `next` starts once it unwinds.
    Canceling {
        current: Arc<Flight>,
        next: (Arc<Flight>, Work),
    },
}

struct Inner {
    /// Submission state machine. Held briefly; never while a body runs.
    slot: Mutex<Slot>,
    /// Bounds work-body execution: held for the entire body, so bodies are
    /// totally ordered even if slot transitions race.
    body: Mutex<()>,
    pool: ThreadPool,
}

/// An executor running at most one unit of work at a time.
///
/// State inspection ([SingleFlight::is_ready]) and submission go through a
/// short-held state mutex and never block on a long-running work body; the
/// body itself is serialized by a separate mutex held for its whole
/// duration.
///
/// Dropping the executor detaches: workers own the shared state, so work
/// already in flight (including a queued takeover) runs to completion, and
/// its [Flight] handles remain valid.
pub struct SingleFlight {
    inner: Arc<Inner>,
}

impl SingleFlight {
    /// Create an executor dispatching to `pool`.
    pub fn new(pool: ThreadPool) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Ready),
                body: Mutex::new(()),
                pool,
            }),
        }
    }

    /// Whether no work is currently in flight.
    pub fn is_ready(&self) -> bool {
        matches!(*self.inner.slot.lock().unwrap(), Slot::Ready)
    }

    /// Start `work` only if the executor is idle.
    ///
    /// Returns [Error::NotReady] when work is already in flight; the
    /// in-flight work is unaffected. Never cancels or queues.
    pub fn execute_ready<F>(&self, work: F) -> Result<Arc<Flight>, Error>
    where
        F: FnOnce(&Flight) + Send + 'static,
    {
        let mut slot = self.inner.slot.lock().unwrap();
        if !matches!(*slot, Slot::Ready) {
            return Err(Error::NotReady);
        }
        let flight = Arc::new(Flight::new());
        start(&self.inner, &mut slot, flight.clone(), Box::new(work));
        Ok(flight)
    }

    /// Start `work`, canceling and superseding any work in flight.
    ///
    /// When the executor is idle this behaves like
    /// [SingleFlight::execute_ready]. Otherwise the in-flight [Flight] is
    /// marked canceled and `work` is queued to start immediately after the
    /// current body returns and tears down; a queued predecessor is replaced
    /// (it completes as canceled without ever running).
    pub fn execute_always<F>(&self, work: F) -> Arc<Flight>
    where
        F: FnOnce(&Flight) + Send + 'static,
    {
        let flight = Arc::new(Flight::new());
        let work: Work = Box::new(work);
        let mut slot = self.inner.slot.lock().unwrap();
        match mem::replace(&mut *slot, Slot::Ready) {
            Slot::Ready => start(&self.inner, &mut slot, flight.clone(), work),
            Slot::Running(current) => {
                current.cancel();
                debug!("takeover queued, in-flight work canceled");
                *slot = Slot::Canceling {
                    current,
                    next: (flight.clone(), work),
                };
            }
            Slot::Canceling { current, next } => {
                // Last submission wins: the replaced work never runs and its
                // flight completes as canceled.
                let (replaced, _) = next;
                replaced.cancel();
                replaced.finish();
                debug!("queued takeover replaced");
                *slot = Slot::Canceling {
                    current,
                    next: (flight.clone(), work),
                };
            }
        }
        drop(slot);
        flight
    }
}

/// Install `flight` as the running work and dispatch it. Caller holds the
/// slot lock.
fn start(inner: &Arc<Inner>, slot: &mut Slot, flight: Arc<Flight>, work: Work) {
    *slot = Slot::Running(flight.clone());
    let pool = inner.pool.clone();
    let inner = inner.clone();
    pool.spawn(move || run(inner, flight, work));
}

/// Worker protocol for one unit of work.
fn run(inner: Arc<Inner>, flight: Arc<Flight>, work: Work) {
    // One body at a time, even if slot transitions race.
    let _body = inner.body.lock().unwrap();
    debug!("work started");
    work(&flight);

    // The cancellation callback runs strictly after the body has returned.
    if flight.is_canceled() {
        if let Some(callback) = flight.take_callback() {
            debug!("work canceled, running callback");
            callback();
        }
    }

    {
        let mut slot = inner.slot.lock().unwrap();
        if let Slot::Canceling { next, .. } = mem::replace(&mut *slot, Slot::Ready) {
            // The takeover's body blocks on the body mutex until this worker
            // returns, so bodies never overlap.
            let (next_flight, next_work) = next;
            start(&inner, &mut slot, next_flight, next_work);
        }
    }
    flight.finish();
    debug!("work finished");
}
