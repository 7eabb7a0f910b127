// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Notifying single-slot parameter.
//!
//! Built for one specific shape of problem:
//!
//! 1. One periodic consumer thread with hard or fairly hard deadlines needs to
//!    pick up parameter data now and then, but picking it up is not urgent.
//! 2. One or more producer threads update that data with no deadlines of
//!    their own.
//! 3. The data may be larger than a machine word.
//!
//! The typical case is a DSP callback picking up filter coefficients that a
//! UI thread recalculates on user input.
//!
//! # Example
//!
//! ```ignore
//! use paramslot::realtime::NotifyingParam;
//!
//! let (writer, mut reader) = NotifyingParam::new(0.0f32).split();
//!
//! // UI thread
//! writer.publish(0.8);
//!
//! // Audio thread, once per period
//! let mut gain = 1.0;
//! if reader.try_consume(&mut gain) {
//!     // new gain picked up
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::cell::PayloadCell;
use super::payload::Payload;

/// Latest-value-wins parameter shared between producers and one consumer.
///
/// Publishing twice before a consume loses the first value; only the most
/// recent publish is ever observed.
///
/// # Contract
///
/// - Any number of threads may call [`publish`](Self::publish).
/// - Exactly one thread may call [`try_consume`](Self::try_consume). Use
///   [`split`](Self::split) to have the compiler hold you to that.
/// - Neither operation may be called recursively on the same slot.
pub struct NotifyingParam<T: Payload> {
    /// Set by publish, cleared by a consume that copies a value out.
    pending: AtomicBool,
    payload: T::Cell,
}

impl<T: Payload> NotifyingParam<T> {
    /// True when publish and consume never wait on another thread for `T`.
    pub const IS_ALWAYS_LOCK_FREE: bool = <T::Cell as PayloadCell<T>>::IS_ALWAYS_LOCK_FREE;

    /// Create a slot holding `initial`.
    ///
    /// `initial` is never reported by [`try_consume`](Self::try_consume);
    /// the first successful consume returns the first published value.
    pub fn new(initial: T) -> Self {
        trace!(
            payload = std::any::type_name::<T>(),
            lock_free = Self::IS_ALWAYS_LOCK_FREE,
            "created notifying parameter"
        );
        Self {
            pending: AtomicBool::new(false),
            payload: T::Cell::new(initial),
        }
    }

    /// Same as [`IS_ALWAYS_LOCK_FREE`](Self::IS_ALWAYS_LOCK_FREE).
    #[inline]
    pub const fn is_always_lock_free() -> bool {
        Self::IS_ALWAYS_LOCK_FREE
    }

    /// Publish a new value.
    ///
    /// Lock-free payloads never block here. Guarded payloads wait until no
    /// other producer, and no consumer copy, is in progress.
    #[inline]
    pub fn publish(&self, value: T) {
        self.payload.publish(value, &self.pending);
    }

    /// Copy the latest published value into `out` if one is pending.
    ///
    /// Returns `false`, leaving `out` untouched, when nothing new was
    /// published or when a producer is mid-copy on a guarded payload. Never
    /// waits; call again next period.
    #[inline]
    pub fn try_consume(&self, out: &mut T) -> bool {
        match self.try_take() {
            Some(value) => {
                *out = value;
                true
            }
            None => false,
        }
    }

    /// Like [`try_consume`](Self::try_consume), returning the value.
    #[inline]
    pub fn try_take(&self) -> Option<T> {
        if !self.pending.load(Ordering::Acquire) {
            return None;
        }
        self.payload.try_consume(&self.pending)
    }

    /// Whether an unconsumed publish exists. Only a hint: it can change
    /// before the caller acts on it.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Relaxed)
    }

    /// Split into producer and consumer handles.
    pub fn split(self) -> (ParamWriter<T>, ParamReader<T>) {
        let shared = Arc::new(self);
        (
            ParamWriter {
                inner: Arc::clone(&shared),
            },
            ParamReader { inner: shared },
        )
    }
}

impl<T: Payload + Default> Default for NotifyingParam<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Payload> fmt::Debug for NotifyingParam<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyingParam")
            .field("pending", &self.is_pending())
            .field("lock_free", &Self::IS_ALWAYS_LOCK_FREE)
            .finish_non_exhaustive()
    }
}

/// Producer handle. Clone one per producer thread.
pub struct ParamWriter<T: Payload> {
    inner: Arc<NotifyingParam<T>>,
}

impl<T: Payload> ParamWriter<T> {
    /// Publish a new value. See [`NotifyingParam::publish`].
    #[inline]
    pub fn publish(&self, value: T) {
        self.inner.publish(value);
    }

    /// Whether the last publish has not been consumed yet.
    pub fn is_pending(&self) -> bool {
        self.inner.is_pending()
    }
}

impl<T: Payload> Clone for ParamWriter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Consumer handle. There is exactly one per slot.
pub struct ParamReader<T: Payload> {
    inner: Arc<NotifyingParam<T>>,
}

impl<T: Payload> ParamReader<T> {
    /// See [`NotifyingParam::try_consume`].
    #[inline]
    pub fn try_consume(&mut self, out: &mut T) -> bool {
        self.inner.try_consume(out)
    }

    /// See [`NotifyingParam::try_take`].
    #[inline]
    pub fn try_take(&mut self) -> Option<T> {
        self.inner.try_take()
    }

    /// Whether an unconsumed publish exists.
    pub fn is_pending(&self) -> bool {
        self.inner.is_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::Packed;
    use bytemuck::{Pod, Zeroable};
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Mixed {
        gain: f32,
        phase: f64,
        frames: i64,
    }

    crate::guarded_payload!(Mixed);

    #[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Ramp {
        target: f32,
        millis: f32,
    }

    const _: () = assert!(NotifyingParam::<i32>::IS_ALWAYS_LOCK_FREE);
    const _: () = assert!(!NotifyingParam::<Mixed>::IS_ALWAYS_LOCK_FREE);

    #[test]
    fn test_lock_free_classification() {
        assert!(NotifyingParam::<i32>::IS_ALWAYS_LOCK_FREE);
        assert!(NotifyingParam::<f32>::IS_ALWAYS_LOCK_FREE);
        assert!(NotifyingParam::<bool>::IS_ALWAYS_LOCK_FREE);
        assert_eq!(
            NotifyingParam::<Packed<Ramp>>::is_always_lock_free(),
            cfg!(target_has_atomic = "64")
        );

        assert!(!NotifyingParam::<Mixed>::IS_ALWAYS_LOCK_FREE);
        assert!(!NotifyingParam::<u128>::IS_ALWAYS_LOCK_FREE);
        assert!(!NotifyingParam::<[f32; 2]>::IS_ALWAYS_LOCK_FREE);
    }

    #[test]
    fn test_fresh_slot_yields_nothing() {
        let param = NotifyingParam::<i32>::default();
        let mut out = -1;
        assert!(!param.try_consume(&mut out));
        assert_eq!(out, -1);

        let param = NotifyingParam::<Mixed>::default();
        let mut out = Mixed {
            gain: 9.0,
            phase: 9.0,
            frames: 9,
        };
        assert!(!param.try_consume(&mut out));
        assert_eq!(out.frames, 9);
    }

    #[test]
    fn test_publish_then_consume() {
        let param = NotifyingParam::<i32>::default();
        param.publish(5);

        let mut out = 0;
        assert!(param.try_consume(&mut out));
        assert_eq!(out, 5);
    }

    #[test]
    fn test_second_consume_leaves_output_alone() {
        let param = NotifyingParam::<i32>::default();
        param.publish(5);

        let mut out = 0;
        assert!(param.try_consume(&mut out));
        out = 42;
        assert!(!param.try_consume(&mut out));
        assert_eq!(out, 42);

        let param = NotifyingParam::<Mixed>::default();
        param.publish(Mixed {
            gain: 1.0,
            phase: 0.5,
            frames: 128,
        });
        let mut out = Mixed::default();
        assert!(param.try_consume(&mut out));
        let before = out;
        assert!(!param.try_consume(&mut out));
        assert_eq!(out, before);
    }

    #[test]
    fn test_last_publish_wins() {
        let param = NotifyingParam::<u64>::default();
        for v in 1..=10 {
            param.publish(v);
        }
        assert_eq!(param.try_take(), Some(10));
        assert_eq!(param.try_take(), None);

        let param = NotifyingParam::<Mixed>::default();
        for frames in 0..5 {
            param.publish(Mixed {
                gain: frames as f32,
                phase: 0.0,
                frames,
            });
        }
        assert_eq!(param.try_take().map(|m| m.frames), Some(4));
        assert_eq!(param.try_take(), None);
    }

    #[test]
    fn test_packed_roundtrip() {
        let param = NotifyingParam::new(Packed(Ramp::default()));
        let ramp = Ramp {
            target: -6.0,
            millis: 15.0,
        };
        param.publish(Packed(ramp));

        let mut out = Packed(Ramp::default());
        assert!(param.try_consume(&mut out));
        assert_eq!(out.into_inner(), ramp);
    }

    #[test]
    fn test_is_pending_tracks_publish() {
        let param = NotifyingParam::new(0.0f32);
        assert!(!param.is_pending());
        param.publish(1.5);
        assert!(param.is_pending());
        assert_eq!(param.try_take(), Some(1.5));
        assert!(!param.is_pending());
    }

    #[test]
    fn test_guarded_consume_skips_while_producer_holds_flag() {
        let param = NotifyingParam::<Mixed>::default();
        param.publish(Mixed {
            gain: 2.0,
            phase: 0.0,
            frames: 1,
        });

        let mut out = Mixed {
            gain: -1.0,
            phase: -1.0,
            frames: -1,
        };
        {
            let _held = param.payload.access_for_test().try_lock().unwrap();
            assert!(!param.try_consume(&mut out));
            assert_eq!(out.frames, -1);
        }
        assert!(param.try_consume(&mut out));
        assert_eq!(out.frames, 1);
    }

    #[test]
    fn test_consumer_sees_delayed_publish() {
        let (writer, mut reader) = NotifyingParam::<i32>::default().split();

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.publish(1234);
        });

        let mut out = 0;
        while !reader.try_consume(&mut out) {
            thread::yield_now();
        }
        producer.join().unwrap();
        assert_eq!(out, 1234);
    }

    #[test]
    fn test_guarded_consumer_sees_delayed_publish() {
        let (writer, mut reader) = NotifyingParam::<Mixed>::default().split();
        let sent = Mixed {
            gain: 0.25,
            phase: 3.5,
            frames: 4096,
        };

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.publish(sent);
        });

        let mut out = Mixed::default();
        while !reader.try_consume(&mut out) {
            thread::yield_now();
        }
        producer.join().unwrap();
        assert_eq!(out, sent);
    }

    #[test]
    fn test_guarded_racing_producers_never_tear() {
        let a = Mixed {
            gain: 1.0,
            phase: 1.0,
            frames: 1,
        };
        let b = Mixed {
            gain: 2.0,
            phase: 2.0,
            frames: 2,
        };

        for _ in 0..200 {
            let (writer, mut reader) = NotifyingParam::<Mixed>::default().split();
            let writer_b = writer.clone();

            let ta = thread::spawn(move || writer.publish(a));
            let tb = thread::spawn(move || writer_b.publish(b));
            ta.join().unwrap();
            tb.join().unwrap();

            let got = reader.try_take().unwrap();
            assert!(got == a || got == b, "torn value: {got:?}");
        }
    }

    #[test]
    fn test_stress_values_are_never_torn() {
        let (writer, mut reader) = NotifyingParam::<[u64; 8]>::new([0; 8]).split();

        let producers: Vec<_> = (1..=3u64)
            .map(|id| {
                let writer = writer.clone();
                thread::spawn(move || {
                    for i in 0..2000u64 {
                        writer.publish([id * 1_000_000 + i; 8]);
                    }
                })
            })
            .collect();

        let mut seen = 0;
        let mut out = [0; 8];
        while producers.iter().any(|p| !p.is_finished()) {
            if reader.try_consume(&mut out) {
                assert!(out.iter().all(|&v| v == out[0]), "torn value: {out:?}");
                seen += 1;
            }
        }
        for producer in producers {
            producer.join().unwrap();
        }

        // Whatever was published last is still waiting or was already seen.
        if reader.try_consume(&mut out) {
            seen += 1;
        }
        assert!(seen >= 1);
        assert!(out.iter().all(|&v| v == out[0]));
        assert_eq!(out[0] % 1_000_000, 1999);
    }

    #[test]
    fn test_fast_producers_are_seen_in_order() {
        const PRODUCERS: u64 = 4;
        const PUBLISHES: u64 = 5000;

        let (writer, mut reader) = NotifyingParam::<u64>::new(0).split();
        assert_eq!(
            NotifyingParam::<u64>::IS_ALWAYS_LOCK_FREE,
            cfg!(target_has_atomic = "64")
        );

        let producers: Vec<_> = (1..=PRODUCERS)
            .map(|id| {
                let writer = writer.clone();
                thread::spawn(move || {
                    for seq in 1..=PUBLISHES {
                        writer.publish((id << 32) | seq);
                    }
                })
            })
            .collect();
        drop(writer);

        // Highest sequence number seen so far, per producer.
        let mut last_seq = [0u64; PRODUCERS as usize + 1];
        let mut check = |value: u64| {
            let id = (value >> 32) as usize;
            let seq = value & 0xffff_ffff;
            assert!((1..=PRODUCERS as usize).contains(&id), "bad producer id in {value:#x}");
            assert!(
                seq >= last_seq[id],
                "producer {id} went backwards: {seq} after {}",
                last_seq[id]
            );
            last_seq[id] = seq;
        };

        let mut out = 0;
        while producers.iter().any(|p| !p.is_finished()) {
            if reader.try_consume(&mut out) {
                check(out);
            }
        }
        for producer in producers {
            producer.join().unwrap();
        }

        // After the joins every store is visible, so a value still waiting is
        // some producer's final publish.
        if reader.try_consume(&mut out) {
            check(out);
            assert_eq!(out & 0xffff_ffff, PUBLISHES);
        }
        assert!(!reader.is_pending());
        assert!(last_seq[1..].iter().any(|&seq| seq > 0));
    }
}
