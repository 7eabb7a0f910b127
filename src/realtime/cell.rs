// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Payload storage strategies.
//!
//! Both cells implement the full publish / consume protocol against the
//! slot's pending flag, because the order of flag and payload accesses
//! differs between the two modes.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

use super::exclusion::ExclusionFlag;
use super::payload::AtomicRepr;

/// Storage for a slot payload.
pub trait PayloadCell<T>: Send + Sync {
    /// Whether both operations complete without ever waiting on another thread.
    const IS_ALWAYS_LOCK_FREE: bool;

    /// Create the cell holding `initial`.
    fn new(initial: T) -> Self;

    /// Store `value` and then raise `pending`.
    fn publish(&self, value: T, pending: &AtomicBool);

    /// Copy the payload out and clear `pending`, or return `None` without
    /// waiting if that is not possible right now.
    ///
    /// Returns `None` whenever `pending` is clear, so the initial value is
    /// never reported.
    fn try_consume(&self, pending: &AtomicBool) -> Option<T>;
}

/// Lock-free payload cell.
pub struct AtomicCell<T: AtomicRepr> {
    value: T::Atomic,
}

impl<T: AtomicRepr> PayloadCell<T> for AtomicCell<T> {
    const IS_ALWAYS_LOCK_FREE: bool = T::IS_ALWAYS_LOCK_FREE;

    #[inline]
    fn new(initial: T) -> Self {
        Self {
            value: initial.new_atomic(),
        }
    }

    #[inline]
    fn publish(&self, value: T, pending: &AtomicBool) {
        // The Release store on `pending` orders the payload store before it.
        T::store(&self.value, value, Ordering::Relaxed);
        pending.store(true, Ordering::Release);
    }

    #[inline]
    fn try_consume(&self, pending: &AtomicBool) -> Option<T> {
        // Clear before loading. A publish landing in between re-raises the
        // flag, so the worst case is re-reading the same value next cycle.
        if !pending.swap(false, Ordering::Acquire) {
            return None;
        }
        Some(T::load(&self.value, Ordering::Relaxed))
    }
}

/// Payload cell for types without a lock-free atomic representation.
///
/// Producers wait on the exclusion flag; the consumer only ever tries once.
pub struct GuardedCell<T> {
    access: ExclusionFlag,
    value: UnsafeCell<T>,
}

// SAFETY: `value` is only read or written while `access` is claimed.
unsafe impl<T: Send> Send for GuardedCell<T> {}
unsafe impl<T: Send> Sync for GuardedCell<T> {}

impl<T> GuardedCell<T> {
    #[cfg(test)]
    pub(crate) fn access_for_test(&self) -> &ExclusionFlag {
        &self.access
    }
}

impl<T: Copy + Send> PayloadCell<T> for GuardedCell<T> {
    const IS_ALWAYS_LOCK_FREE: bool = false;

    fn new(initial: T) -> Self {
        Self {
            access: ExclusionFlag::new(),
            value: UnsafeCell::new(initial),
        }
    }

    fn publish(&self, value: T, pending: &AtomicBool) {
        {
            let _guard = self.access.lock();
            // SAFETY: we hold the exclusion flag
            unsafe {
                *self.value.get() = value;
            }
        }
        pending.store(true, Ordering::Release);
    }

    fn try_consume(&self, pending: &AtomicBool) -> Option<T> {
        // A producer is mid-copy; skip this cycle.
        let _guard = self.access.try_lock()?;

        // Producers write the payload under the flag we now hold, so clearing
        // before the copy cannot lose a value.
        if !pending.swap(false, Ordering::Acquire) {
            return None;
        }

        // SAFETY: we hold the exclusion flag
        Some(unsafe { *self.value.get() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_cell_clears_before_reading() {
        let pending = AtomicBool::new(false);
        let cell = AtomicCell::<u32>::new(0);

        cell.publish(7, &pending);
        assert!(pending.load(Ordering::Relaxed));

        assert_eq!(cell.try_consume(&pending), Some(7));
        assert!(!pending.load(Ordering::Relaxed));
        assert_eq!(cell.try_consume(&pending), None);
    }

    #[test]
    fn test_guarded_cell_without_publish_yields_nothing() {
        let pending = AtomicBool::new(false);
        let cell = GuardedCell::<[u8; 2]>::new([1, 2]);
        assert_eq!(cell.try_consume(&pending), None);

        cell.publish([3, 4], &pending);
        assert_eq!(cell.try_consume(&pending), Some([3, 4]));
        assert_eq!(cell.try_consume(&pending), None);
        assert!(!cell.access.is_claimed());
    }

    #[test]
    fn test_atomic_cell_without_publish_yields_nothing() {
        let pending = AtomicBool::new(false);
        let cell = AtomicCell::<u32>::new(9);
        assert_eq!(cell.try_consume(&pending), None);
    }

    #[test]
    fn test_guarded_cell_skips_while_claimed() {
        let pending = AtomicBool::new(false);
        let cell = GuardedCell::<[u64; 4]>::new([0; 4]);

        cell.publish([1, 2, 3, 4], &pending);

        let held = cell.access.try_lock().unwrap();
        assert_eq!(cell.try_consume(&pending), None);
        // Still pending, nothing was taken.
        assert!(pending.load(Ordering::Relaxed));
        drop(held);

        assert_eq!(cell.try_consume(&pending), Some([1, 2, 3, 4]));
        assert!(!pending.load(Ordering::Relaxed));
    }
}
