// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Double-checked one-time initialization.
//!
//! After the first successful fill every read is a single `Acquire` load; the
//! mutex is only touched while the value is still missing.
//!
//! # Example
//!
//! ```ignore
//! use paramslot::memo::MemoCell;
//!
//! static GAIN_TABLE: MemoCell<Vec<f32>> = MemoCell::new();
//!
//! fn gain_table() -> &'static [f32] {
//!     GAIN_TABLE.get_or_init(|| build_gain_table())
//! }
//! ```
//!
//! Calling `get_or_init` on a cell from inside that same cell's filler
//! deadlocks and is not supported.

use std::cell::UnsafeCell;
use std::convert::Infallible;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::realtime::AtomicRepr;

/// Read `cache`, filling it once under `guard` if it still holds `empty`.
///
/// `filler` runs at most once across all threads sharing `cache` and `guard`.
/// If it fails, the error is returned to this caller and `cache` stays empty,
/// so a later call tries again.
pub fn double_checked<T, E, F>(
    cache: &T::Atomic,
    empty: T,
    guard: &Mutex<()>,
    filler: F,
) -> Result<T, E>
where
    T: AtomicRepr + PartialEq,
    F: FnOnce() -> Result<T, E>,
{
    let cached = T::load(cache, Ordering::Acquire);
    if cached != empty {
        return Ok(cached);
    }

    let _lock = guard.lock();

    // Someone may have filled it while we waited for the lock.
    let cached = T::load(cache, Ordering::Relaxed);
    if cached != empty {
        trace!("cache filled by another thread");
        return Ok(cached);
    }

    debug!("filling cache");
    let value = filler()?;
    if value == empty {
        warn!("cache filler returned the empty sentinel; the cache stays empty");
    }
    T::store(cache, value, Ordering::Release);

    Ok(value)
}

/// An atomic cache with an "empty" sentinel and its own fill lock.
pub struct SentinelCache<T: AtomicRepr> {
    value: T::Atomic,
    empty: T,
    fill_lock: Mutex<()>,
}

impl<T: AtomicRepr + PartialEq> SentinelCache<T> {
    /// Create an empty cache. `empty` must never be a legitimate value.
    pub fn new(empty: T) -> Self {
        Self {
            value: empty.new_atomic(),
            empty,
            fill_lock: Mutex::new(()),
        }
    }

    /// The cached value, if filled.
    pub fn get(&self) -> Option<T> {
        let value = T::load(&self.value, Ordering::Acquire);
        (value != self.empty).then_some(value)
    }

    /// The cached value, computing it with `filler` on first use.
    pub fn get_or_init<F>(&self, filler: F) -> T
    where
        F: FnOnce() -> T,
    {
        match self.get_or_try_init(|| Ok::<T, Infallible>(filler())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// The cached value, computing it with a fallible `filler` on first use.
    pub fn get_or_try_init<E, F>(&self, filler: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        double_checked(&self.value, self.empty, &self.fill_lock, filler)
    }
}

impl<T: AtomicRepr + PartialEq + fmt::Debug> fmt::Debug for SentinelCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentinelCache")
            .field("value", &self.get())
            .finish()
    }
}

/// Lazily computed value of any type, filled at most once.
pub struct MemoCell<T> {
    ready: AtomicBool,
    fill_lock: Mutex<()>,
    value: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: `value` is written once, under `fill_lock`, before `ready` is
// released; afterwards it is only read.
unsafe impl<T: Send + Sync> Sync for MemoCell<T> {}
unsafe impl<T: Send> Send for MemoCell<T> {}

impl<T> MemoCell<T> {
    /// Create an empty cell. Usable in `static` items.
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            fill_lock: parking_lot::const_mutex(()),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Whether the value has been computed.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// The value, if computed.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.is_initialized() {
            // SAFETY: `ready` was observed with Acquire, so the write is visible
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// The value, computing it with `filler` on first use.
    pub fn get_or_init<F>(&self, filler: F) -> &T
    where
        F: FnOnce() -> T,
    {
        match self.get_or_try_init(|| Ok::<T, Infallible>(filler())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// The value, computing it with a fallible `filler` on first use.
    ///
    /// A failed fill leaves the cell empty.
    pub fn get_or_try_init<E, F>(&self, filler: F) -> Result<&T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }

        let _lock = self.fill_lock.lock();

        if self.ready.load(Ordering::Relaxed) {
            trace!("memo cell filled by another thread");
        } else {
            debug!(value = std::any::type_name::<T>(), "filling memo cell");
            let value = filler()?;
            // SAFETY: we hold `fill_lock` and `ready` is false, so nobody
            // else is reading or writing the slot
            unsafe {
                (*self.value.get()).write(value);
            }
            self.ready.store(true, Ordering::Release);
        }

        // SAFETY: `ready` is true and was set under the lock we hold
        Ok(unsafe { (*self.value.get()).assume_init_ref() })
    }
}

impl<T> Default for MemoCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for MemoCell<T> {
    fn drop(&mut self) {
        if *self.ready.get_mut() {
            // SAFETY: initialized, and we have exclusive access
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for MemoCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCell")
            .field("value", &self.get())
            .finish()
    }
}
