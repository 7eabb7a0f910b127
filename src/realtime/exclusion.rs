// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Binary exclusion flag with scoped release.
//!
//! A claim is a single compare-exchange on an `AtomicBool`. Waiting callers
//! spin briefly, then park on a condvar until the holder releases. Releasing
//! never takes a lock, so a holder on a real-time thread is not held up by
//! parked waiters.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Mutual exclusion flag used by guarded payload cells.
///
/// Not reentrant: claiming it again from the thread that holds it deadlocks.
#[derive(Debug)]
pub struct ExclusionFlag {
    claimed: AtomicBool,
    /// Number of threads parked in [`lock`](Self::lock).
    waiters: AtomicUsize,
    parking: Mutex<()>,
    released: Condvar,
}

impl ExclusionFlag {
    const SPIN_TRIES: u32 = 64;

    /// Upper bound on how long a parked waiter can miss a release.
    const PARK_SLICE: Duration = Duration::from_micros(250);

    /// Create a new, unclaimed flag.
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
            waiters: AtomicUsize::new(0),
            parking: parking_lot::const_mutex(()),
            released: Condvar::new(),
        }
    }

    /// Claim the flag without waiting.
    #[inline]
    pub fn try_lock(&self) -> Option<ExclusionGuard<'_>> {
        self.claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ExclusionGuard { flag: self })
    }

    /// Claim the flag, waiting until it is free.
    pub fn lock(&self) -> ExclusionGuard<'_> {
        let mut spins = 0;
        loop {
            // test-and-test-and-set
            if !self.claimed.load(Ordering::Relaxed) {
                if let Some(guard) = self.try_lock() {
                    return guard;
                }
            }

            if spins < Self::SPIN_TRIES {
                std::hint::spin_loop();
                spins += 1;
            } else {
                self.park();
            }
        }
    }

    /// Whether some thread currently holds the flag.
    #[inline]
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Relaxed)
    }

    fn park(&self) {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        {
            let mut parking = self.parking.lock();
            while self.claimed.load(Ordering::SeqCst) {
                // `release` notifies without holding `parking`, so a wakeup can
                // fall between the check and the wait. The timeout covers it.
                self.released.wait_for(&mut parking, Self::PARK_SLICE);
            }
        }
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.claimed.store(false, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            self.released.notify_all();
        }
    }
}

impl Default for ExclusionFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds an [`ExclusionFlag`] claimed until dropped.
#[must_use = "the flag is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ExclusionGuard<'a> {
    flag: &'a ExclusionFlag,
}

impl Drop for ExclusionGuard<'_> {
    fn drop(&mut self) {
        self.flag.release();
    }
}
