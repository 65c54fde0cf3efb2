//! Arbitrate shared access with upgradable reader/writer passes.
//!
//! This crate provides [Gate], a reader/writer lock wrapper that tracks the
//! hold level of every thread explicitly. A thread that already holds access
//! can re-acquire without blocking, a reader can be upgraded to a writer in
//! place (no fully-unlocked window for another writer to slip through), and
//! an upgraded writer downgrades back to its prior reader state when the
//! pass is dropped.
//!
//! Two collections are built on the gate: [GateList] and [GateMap]. Every
//! accessor runs under read access and every mutator under write access, so
//! the backing store is never touched without the appropriate hold.
//!
//! # Example
//!
//! ```rust
//! use turnstile_gate::GateList;
//!
//! let list = GateList::new();
//! list.push(1);
//! list.push(2);
//! list.push(3);
//!
//! // Probe-and-remove runs under a single write hold.
//! assert!(list.remove(&2));
//! assert_eq!(list.to_vec(), vec![1, 3]);
//!
//! // Enumeration requires the calling thread to hold the gate.
//! list.gate().lock();
//! let sum: i32 = list.iter().sum();
//! list.gate().unlock();
//! assert_eq!(sum, 4);
//! ```

mod gate;
mod list;
mod map;

pub use gate::{Cookie, Gate, ReadPass, WritePass};
pub use list::{GateList, Iter as ListIter};
pub use map::{GateMap, Iter as MapIter};
