//! A growable list whose every access runs under a [Gate] hold.

use crate::gate::{Gate, IterHold};
use std::{cell::UnsafeCell, slice};

/// A `Vec<T>` behind a [Gate].
///
/// Accessors acquire read access and mutators acquire write access for the
/// duration of the operation; the backing store is never touched without the
/// appropriate hold. Panics inside an operation never leave the gate held
/// (passes release on drop).
///
/// Compound operations can hold one pass across several calls: acquire a
/// pass from [GateList::gate] and the individual operations piggyback on it
/// without blocking.
pub struct GateList<T> {
    gate: Gate,
    items: UnsafeCell<Vec<T>>,
}

// Access to `items` is arbitrated by `gate`; same bounds as `RwLock<Vec<T>>`.
unsafe impl<T: Send> Send for GateList<T> {}
unsafe impl<T: Send + Sync> Sync for GateList<T> {}

impl<T> GateList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            gate: Gate::new(),
            items: UnsafeCell::new(Vec::new()),
        }
    }

    /// The gate arbitrating access to this list. Hold a pass across several
    /// operations to make the sequence atomic.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        let _pass = self.gate.read_pass();
        unsafe { (*self.items.get()).len() }
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an element.
    pub fn push(&self, item: T) {
        let _pass = self.gate.write_pass();
        unsafe { (*self.items.get()).push(item) };
    }

    /// Insert an element at `index`, shifting everything after it.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert(&self, index: usize, item: T) {
        let _pass = self.gate.write_pass();
        unsafe { (*self.items.get()).insert(index, item) };
    }

    /// Remove and return the element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn remove_at(&self, index: usize) -> T {
        let _pass = self.gate.write_pass();
        unsafe { (*self.items.get()).remove(index) }
    }

    /// Remove all elements.
    pub fn clear(&self) {
        let _pass = self.gate.write_pass();
        unsafe { (*self.items.get()).clear() };
    }

    /// Iterate over the elements.
    ///
    /// The iterator performs no locking of its own; the calling thread must
    /// already hold the gate (read or write) when the iterator is obtained,
    /// and the hold is kept alive for the iterator's lifetime. Acquiring
    /// write access on this thread while the iterator is live panics.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread holds nothing.
    pub fn iter(&self) -> Iter<'_, T> {
        let hold = self.gate.pin();
        Iter {
            inner: unsafe { (*self.items.get()).iter() },
            _hold: hold,
        }
    }
}

impl<T: PartialEq> GateList<T> {
    /// Whether `item` is present.
    pub fn contains(&self, item: &T) -> bool {
        let _pass = self.gate.read_pass();
        unsafe { (*self.items.get()).contains(item) }
    }

    /// Index of the first element equal to `item`.
    pub fn index_of(&self, item: &T) -> Option<usize> {
        let _pass = self.gate.read_pass();
        unsafe { (*self.items.get()).iter().position(|i| i == item) }
    }

    /// Remove the first element equal to `item`, returning whether one was
    /// removed.
    ///
    /// The index probe and the removal run under a single write hold, so no
    /// other writer can reshuffle the list between the lookup and the
    /// removal.
    pub fn remove(&self, item: &T) -> bool {
        let _pass = self.gate.write_pass();
        let items = unsafe { &mut *self.items.get() };
        match items.iter().position(|i| i == item) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }
}

impl<T: Clone> GateList<T> {
    /// Clone of the element at `index`, or `None` when out of range.
    pub fn get(&self, index: usize) -> Option<T> {
        let _pass = self.gate.read_pass();
        unsafe { (&*self.items.get()).get(index).cloned() }
    }

    /// Replace the element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn set(&self, index: usize, item: T) {
        let _pass = self.gate.write_pass();
        unsafe { (&mut *self.items.get())[index] = item };
    }

    /// Snapshot of the whole list.
    pub fn to_vec(&self) -> Vec<T> {
        let _pass = self.gate.read_pass();
        unsafe { (*self.items.get()).clone() }
    }
}

impl<T> Default for GateList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a [GateList], valid only while the calling thread's hold is
/// alive (see [GateList::iter]).
pub struct Iter<'a, T> {
    inner: slice::Iter<'a, T>,
    _hold: IterHold<'a>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn test_basic_ops() {
        let list = GateList::new();
        assert!(list.is_empty());

        list.push(10);
        list.push(20);
        list.insert(1, 15);
        assert_eq!(list.len(), 3);
        assert_eq!(list.to_vec(), vec![10, 15, 20]);

        assert_eq!(list.get(1), Some(15));
        assert_eq!(list.get(9), None);
        assert!(list.contains(&20));
        assert_eq!(list.index_of(&20), Some(2));

        list.set(0, 11);
        assert_eq!(list.remove_at(1), 15);
        assert!(list.remove(&11));
        assert!(!list.remove(&11));
        assert_eq!(list.to_vec(), vec![20]);

        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    fn test_concurrent_push() {
        let list = Arc::new(GateList::new());

        let mut handles = Vec::new();
        for i in 0..10 {
            let list = list.clone();
            handles.push(thread::spawn(move || list.push(i)));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(list.len(), 10);
        let mut snapshot = list.to_vec();
        snapshot.sort_unstable();
        assert_eq!(snapshot, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_remove_is_atomic() {
        // Writers concurrently removing by value must never remove the wrong
        // element: the probe and the removal share one write hold.
        let list = Arc::new(GateList::new());
        for i in 0..400 {
            list.push(i);
        }

        let mut handles = Vec::new();
        for worker in 0..4 {
            let list = list.clone();
            handles.push(thread::spawn(move || {
                for i in (0..400).filter(|i| i % 4 == worker) {
                    assert!(list.remove(&i));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(list.is_empty());
    }

    #[test]
    fn test_iter_under_hold() {
        let list = GateList::new();
        for i in 1..=4 {
            list.push(i);
        }

        list.gate().lock();
        let sum: i32 = list.iter().sum();
        list.gate().unlock();
        assert_eq!(sum, 10);

        // A pass works too, including a write pass.
        let pass = list.gate().write_pass();
        assert_eq!(list.iter().count(), 4);
        drop(pass);
    }

    #[test]
    #[should_panic(expected = "enumeration requires the calling thread to hold the gate")]
    fn test_iter_without_hold_panics() {
        let list: GateList<u32> = GateList::new();
        let _ = list.iter();
    }

    #[test]
    #[should_panic(expected = "cannot acquire write access while an iterator is live")]
    fn test_mutation_during_iter_panics() {
        let list = GateList::new();
        list.push(1);

        list.gate().lock();
        let iter = list.iter();
        list.push(2); // must fail fast, not mutate under the iterator
        drop(iter);
        list.gate().unlock();
    }
}
