//! An upgradable reader/writer lock wrapper with explicit per-thread holds.

use std::{
    collections::HashMap,
    sync::{Condvar, Mutex},
    thread::{self, ThreadId},
};
use tracing::trace;

/// Opaque token produced by upgrading a reader to a writer.
///
/// The token is carried by the [WritePass] that performed the upgrade and is
/// consumed when the pass downgrades back to reader status on drop.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Cookie(u64);

/// Hold level of a single thread.
struct Hold {
    /// Read-level holds (from [Gate::lock], [Gate::try_lock], or read passes).
    reads: u32,
    /// Write-level holds (from write passes). `writes > 0` implies this
    /// thread is the active writer.
    writes: u32,
    /// Set when write access was obtained by upgrading `reads` read holds.
    upgrade: Option<u64>,
    /// Live iterators borrowed from this thread's hold. Write acquisition is
    /// rejected while non-zero so an enumeration can never observe mutation.
    pins: u32,
}

struct State {
    /// Number of threads holding read access (excluding the active writer).
    readers: usize,
    /// Thread holding write access, if any.
    writer: Option<ThreadId>,
    /// Hold level per thread, keyed by thread identity.
    holds: HashMap<ThreadId, Hold>,
    /// Source of upgrade cookies.
    next_cookie: u64,
}

/// A reader/writer lock wrapper with reentrancy-aware acquisition, in-place
/// upgrade from reader to writer, and downgrade back.
///
/// The gate tracks every thread's hold level explicitly, so a thread that
/// already holds access never blocks on itself: [Gate::read_pass] and
/// [Gate::write_pass] detect the existing hold and return immediately.
/// A thread holding write access satisfies any read-access check.
///
/// [Gate::lock] and [Gate::write_pass] wait indefinitely; there is no
/// intermediate timeout. Misuse can deadlock — in particular, two threads
/// that both hold read access and both request an upgrade will wait on each
/// other forever.
///
/// # Example
///
/// ```rust
/// use turnstile_gate::Gate;
///
/// let gate = Gate::new();
///
/// // Read, then upgrade in place to write, then downgrade back.
/// gate.lock();
/// {
///     let pass = gate.write_pass();
///     assert!(pass.cookie().is_some());
/// } // dropped: downgraded back to reader
/// assert!(gate.is_held());
/// gate.unlock();
/// assert!(!gate.is_held());
/// ```
pub struct Gate {
    state: Mutex<State>,
    cond: Condvar,
}

impl Gate {
    /// Create a new gate with no holds.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                readers: 0,
                writer: None,
                holds: HashMap::new(),
                next_cookie: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Acquire read access, waiting indefinitely for any active writer to
    /// release. Reentrant per thread: each call must be paired with exactly
    /// one [Gate::unlock].
    pub fn lock(&self) {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        if let Some(h) = s.holds.get_mut(&me) {
            // Already holding read or write access: no blocking acquisition.
            h.reads += 1;
            return;
        }
        while s.writer.is_some() {
            s = self.cond.wait(s).unwrap();
        }
        s.holds.insert(me, Hold::read());
        s.readers += 1;
    }

    /// Attempt to acquire read access without waiting. Returns `false` when
    /// a writer is active; contention is a normal outcome, not an error.
    pub fn try_lock(&self) -> bool {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        if let Some(h) = s.holds.get_mut(&me) {
            h.reads += 1;
            return true;
        }
        if s.writer.is_some() {
            return false;
        }
        s.holds.insert(me, Hold::read());
        s.readers += 1;
        true
    }

    /// Release one read hold acquired by [Gate::lock] or [Gate::try_lock].
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold read access.
    pub fn unlock(&self) {
        self.release_read();
    }

    /// Whether the calling thread holds any access level.
    pub fn is_held(&self) -> bool {
        let me = thread::current().id();
        self.state.lock().unwrap().holds.contains_key(&me)
    }

    /// Acquire a read pass.
    ///
    /// If the calling thread already holds read or write access, this returns
    /// immediately and [ReadPass::took] is `false`. Otherwise it blocks until
    /// a fresh read hold is granted. The hold is released when the pass is
    /// dropped.
    pub fn read_pass(&self) -> ReadPass<'_> {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        if let Some(h) = s.holds.get_mut(&me) {
            h.reads += 1;
            return ReadPass { gate: self, took: false };
        }
        while s.writer.is_some() {
            s = self.cond.wait(s).unwrap();
        }
        s.holds.insert(me, Hold::read());
        s.readers += 1;
        ReadPass { gate: self, took: true }
    }

    /// Acquire a write pass.
    ///
    /// Three paths, chosen by the calling thread's current hold:
    /// - already a writer: returns immediately, [WritePass::took] is `false`;
    /// - a reader: upgrades in place, waiting for other readers and any
    ///   writer to drain. The thread's read holds stay effective throughout,
    ///   so no other writer can run between the read and the write. The pass
    ///   carries a [Cookie] and downgrades back to reader status on drop;
    /// - no hold: blocks for a fresh write hold, released on drop.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread has a live iterator borrowed from its
    /// hold (see [crate::GateList::iter]).
    pub fn write_pass(&self) -> WritePass<'_> {
        enum Path {
            Writer,
            Reader,
            NoHold,
        }

        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        let (pinned, path) = match s.holds.get(&me) {
            Some(h) if h.writes > 0 => (h.pins > 0, Path::Writer),
            Some(h) => (h.pins > 0, Path::Reader),
            None => (false, Path::NoHold),
        };
        if pinned {
            // Release the state mutex before failing fast so unwinding drops
            // (iterators, passes) do not hit a poisoned lock.
            drop(s);
            panic!("cannot acquire write access while an iterator is live");
        }
        match path {
            Path::Writer => {
                s.holds.get_mut(&me).unwrap().writes += 1;
                WritePass {
                    gate: self,
                    took: false,
                    cookie: None,
                }
            }
            Path::Reader => {
                // Upgrade: our own read holds remain counted while we wait,
                // so a fresh writer cannot slip in during the transition.
                while s.writer.is_some() || s.readers > 1 {
                    s = self.cond.wait(s).unwrap();
                }
                s.readers -= 1;
                s.writer = Some(me);
                let cookie = s.next_cookie;
                s.next_cookie += 1;
                let h = s.holds.get_mut(&me).unwrap();
                h.writes = 1;
                h.upgrade = Some(cookie);
                trace!(cookie, "upgraded reader to writer");
                WritePass {
                    gate: self,
                    took: true,
                    cookie: Some(Cookie(cookie)),
                }
            }
            Path::NoHold => {
                while s.writer.is_some() || s.readers > 0 {
                    s = self.cond.wait(s).unwrap();
                }
                s.writer = Some(me);
                s.holds.insert(me, Hold::write());
                WritePass {
                    gate: self,
                    took: true,
                    cookie: None,
                }
            }
        }
    }

    fn release_read(&self) {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        let act = match s.holds.get_mut(&me) {
            None => Err("unlock called without a hold"),
            Some(h) if h.reads == 0 => Err("unlock called without a read hold"),
            Some(h) if h.reads == 1 && h.writes == 0 && h.pins > 0 => {
                Err("read hold released while an iterator is live")
            }
            Some(h) => {
                h.reads -= 1;
                Ok(h.reads == 0 && h.writes == 0)
            }
        };
        match act {
            Err(msg) => {
                drop(s);
                panic!("{}", msg);
            }
            Ok(true) => {
                s.holds.remove(&me);
                s.readers -= 1;
                self.cond.notify_all();
            }
            Ok(false) => {}
        }
    }

    fn release_write(&self) {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        let act = match s.holds.get_mut(&me) {
            None => Err("write released without a hold"),
            Some(h) if h.writes == 0 => Err("write released without a write hold"),
            Some(h) if h.writes == 1 && h.reads == 0 && h.pins > 0 => {
                Err("write hold released while an iterator is live")
            }
            Some(h) => {
                h.writes -= 1;
                if h.writes > 0 {
                    return;
                }
                Ok((h.upgrade.take(), h.reads > 0))
            }
        };
        let (upgraded, downgrade) = match act {
            Err(msg) => {
                drop(s);
                panic!("{}", msg);
            }
            Ok(outcome) => outcome,
        };
        debug_assert_eq!(s.writer, Some(me));
        if !downgrade {
            s.holds.remove(&me);
        }
        s.writer = None;
        if downgrade {
            // Back to reader status; an upgrade round-trip is
            // indistinguishable from never having upgraded.
            s.readers += 1;
            if let Some(cookie) = upgraded {
                trace!(cookie, "downgraded writer to reader");
            }
        }
        self.cond.notify_all();
    }

    /// Borrow the current thread's hold for the lifetime of an iterator.
    ///
    /// Panics when the thread holds nothing: enumeration performs no locking
    /// of its own, so obtaining an iterator without a hold is a usage error.
    /// The pin keeps a read hold alive for the iterator itself and blocks
    /// write acquisition by this thread until released.
    pub(crate) fn pin(&self) -> IterHold<'_> {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        if !s.holds.contains_key(&me) {
            drop(s);
            panic!("enumeration requires the calling thread to hold the gate");
        }
        let h = s.holds.get_mut(&me).unwrap();
        h.reads += 1;
        h.pins += 1;
        IterHold { gate: self }
    }

    fn unpin(&self) {
        let me = thread::current().id();
        let mut s = self.state.lock().unwrap();
        let remove = {
            let h = s.holds.get_mut(&me).expect("pinned hold disappeared");
            h.pins -= 1;
            h.reads -= 1;
            h.reads == 0 && h.writes == 0
        };
        if remove {
            s.holds.remove(&me);
            s.readers -= 1;
            self.cond.notify_all();
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Hold {
    fn read() -> Self {
        Self {
            reads: 1,
            writes: 0,
            upgrade: None,
            pins: 0,
        }
    }

    fn write() -> Self {
        Self {
            reads: 0,
            writes: 1,
            upgrade: None,
            pins: 0,
        }
    }
}

/// Marker for one read acquisition. Dropping the pass releases exactly what
/// it acquired; the outer hold (if any) is left intact.
pub struct ReadPass<'a> {
    gate: &'a Gate,
    took: bool,
}

impl ReadPass<'_> {
    /// Whether this pass performed a fresh blocking acquisition (`true`) or
    /// piggybacked on an access level the thread already held (`false`).
    pub fn took(&self) -> bool {
        self.took
    }
}

impl Drop for ReadPass<'_> {
    fn drop(&mut self) {
        self.gate.release_read();
    }
}

/// Marker for one write acquisition.
///
/// When the pass performed an upgrade, dropping it downgrades the thread
/// back to its prior reader state instead of fully releasing.
pub struct WritePass<'a> {
    gate: &'a Gate,
    took: bool,
    cookie: Option<Cookie>,
}

impl WritePass<'_> {
    /// Whether this pass performed a fresh blocking acquisition.
    pub fn took(&self) -> bool {
        self.took
    }

    /// The upgrade cookie, present only when this pass upgraded an existing
    /// read hold.
    pub fn cookie(&self) -> Option<Cookie> {
        self.cookie
    }
}

impl Drop for WritePass<'_> {
    fn drop(&mut self) {
        self.gate.release_write();
    }
}

/// Keeps the current thread's hold (and a read on it) alive while an
/// iterator borrowed from a collection is live.
pub(crate) struct IterHold<'a> {
    gate: &'a Gate,
}

impl Drop for IterHold<'_> {
    fn drop(&mut self) {
        self.gate.unpin();
    }
}
