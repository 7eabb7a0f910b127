// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Payload capability traits.
//!
//! Whether a [`NotifyingParam`](super::NotifyingParam) runs lock-free is
//! decided by its payload type alone:
//!
//! - Primitive integers, `bool`, `f32` and `f64` map onto a std atomic of the
//!   same width and get the fast, lock-free cell.
//! - [`Packed<T>`] explicitly opts a small `Pod` struct into a 64-bit atomic.
//! - Everything else (arrays, `u128`, user structs declared with
//!   [`guarded_payload!`](crate::guarded_payload)) goes through the guarded
//!   cell.
//!
//! # Usage
//!
//! ```ignore
//! use paramslot::guarded_payload;
//! use paramslot::realtime::{NotifyingParam, Packed};
//!
//! #[derive(Clone, Copy, Default)]
//! struct Coeffs { b: [f64; 3], a: [f64; 2] }
//! guarded_payload!(Coeffs);
//!
//! const _: () = assert!(NotifyingParam::<f32>::IS_ALWAYS_LOCK_FREE);
//! const _: () = assert!(!NotifyingParam::<Coeffs>::IS_ALWAYS_LOCK_FREE);
//! ```

use std::mem::size_of;
use std::sync::atomic::Ordering;

use bytemuck::Pod;

use super::cell::{AtomicCell, GuardedCell, PayloadCell};

/// A value type that can be handed through a [`NotifyingParam`](super::NotifyingParam).
///
/// The associated [`Cell`](Payload::Cell) picks the storage strategy, and
/// with it the lock-free classification.
pub trait Payload: Copy + Send + 'static {
    /// Storage used for this payload inside the slot.
    type Cell: PayloadCell<Self>;
}

/// A `Copy` type with a lock-free atomic representation.
pub trait AtomicRepr: Copy + Send + Sync + 'static {
    /// The std atomic holding the value's bits.
    type Atomic: Send + Sync;

    /// Whether operations on [`Self::Atomic`] never fall back to a lock.
    const IS_ALWAYS_LOCK_FREE: bool;

    fn new_atomic(self) -> Self::Atomic;
    fn load(atomic: &Self::Atomic, order: Ordering) -> Self;
    fn store(atomic: &Self::Atomic, value: Self, order: Ordering);
}

macro_rules! atomic_repr {
    ($($(#[$meta:meta])* $ty:ty => $atomic:ident;)*) => {
        $(
            $(#[$meta])*
            impl AtomicRepr for $ty {
                type Atomic = std::sync::atomic::$atomic;

                const IS_ALWAYS_LOCK_FREE: bool = true;

                #[inline]
                fn new_atomic(self) -> Self::Atomic {
                    std::sync::atomic::$atomic::new(self)
                }

                #[inline]
                fn load(atomic: &Self::Atomic, order: Ordering) -> Self {
                    atomic.load(order)
                }

                #[inline]
                fn store(atomic: &Self::Atomic, value: Self, order: Ordering) {
                    atomic.store(value, order)
                }
            }

            $(#[$meta])*
            impl Payload for $ty {
                type Cell = AtomicCell<$ty>;
            }
        )*
    };
}

atomic_repr! {
    #[cfg(target_has_atomic = "8")] bool => AtomicBool;
    #[cfg(target_has_atomic = "8")] u8 => AtomicU8;
    #[cfg(target_has_atomic = "8")] i8 => AtomicI8;
    #[cfg(target_has_atomic = "16")] u16 => AtomicU16;
    #[cfg(target_has_atomic = "16")] i16 => AtomicI16;
    #[cfg(target_has_atomic = "32")] u32 => AtomicU32;
    #[cfg(target_has_atomic = "32")] i32 => AtomicI32;
    #[cfg(target_has_atomic = "64")] u64 => AtomicU64;
    #[cfg(target_has_atomic = "64")] i64 => AtomicI64;
    #[cfg(target_has_atomic = "ptr")] usize => AtomicUsize;
    #[cfg(target_has_atomic = "ptr")] isize => AtomicIsize;
}

/// Floats travel as their bit patterns.
macro_rules! float_repr {
    ($($(#[$meta:meta])* $ty:ty => $atomic:ident;)*) => {
        $(
            $(#[$meta])*
            impl AtomicRepr for $ty {
                type Atomic = std::sync::atomic::$atomic;

                const IS_ALWAYS_LOCK_FREE: bool = true;

                #[inline]
                fn new_atomic(self) -> Self::Atomic {
                    std::sync::atomic::$atomic::new(self.to_bits())
                }

                #[inline]
                fn load(atomic: &Self::Atomic, order: Ordering) -> Self {
                    <$ty>::from_bits(atomic.load(order))
                }

                #[inline]
                fn store(atomic: &Self::Atomic, value: Self, order: Ordering) {
                    atomic.store(value.to_bits(), order)
                }
            }

            $(#[$meta])*
            impl Payload for $ty {
                type Cell = AtomicCell<$ty>;
            }
        )*
    };
}

float_repr! {
    #[cfg(target_has_atomic = "32")] f32 => AtomicU32;
    #[cfg(target_has_atomic = "64")] f64 => AtomicU64;
}

// Without native 64-bit atomics these still work, just not lock-free.
#[cfg(not(target_has_atomic = "64"))]
mod no_atomic_64 {
    use super::{GuardedCell, Payload};

    impl Payload for u64 {
        type Cell = GuardedCell<u64>;
    }

    impl Payload for i64 {
        type Cell = GuardedCell<i64>;
    }

    impl Payload for f64 {
        type Cell = GuardedCell<f64>;
    }
}

impl Payload for u128 {
    type Cell = GuardedCell<u128>;
}

impl Payload for i128 {
    type Cell = GuardedCell<i128>;
}

impl<T: Copy + Send + 'static, const N: usize> Payload for [T; N] {
    type Cell = GuardedCell<[T; N]>;
}

/// Declare a `Copy + Send` type as a guarded (lock-protected) payload.
///
/// ```ignore
/// #[derive(Clone, Copy)]
/// struct Big { x: f32, y: f64, z: i64 }
/// paramslot::guarded_payload!(Big);
/// ```
#[macro_export]
macro_rules! guarded_payload {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::realtime::Payload for $ty {
                type Cell = $crate::realtime::GuardedCell<$ty>;
            }
        )+
    };
}

/// Explicit lock-free wrapper for a small plain-old-data type.
///
/// The value is stored bit-for-bit in an `AtomicU64`, so `T` must be at most
/// eight bytes. Larger types fail to compile as soon as they are used.
///
/// On targets without 64-bit atomics the wrapper falls back to a guarded
/// cell and the slot reports itself as not lock-free.
///
/// ```ignore
/// #[derive(Clone, Copy, Pod, Zeroable)]
/// #[repr(C)]
/// struct Ramp { target: f32, millis: f32 }
///
/// let slot = NotifyingParam::new(Packed(Ramp { target: 1.0, millis: 20.0 }));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(transparent)]
pub struct Packed<T>(pub T);

#[cfg_attr(not(target_has_atomic = "64"), allow(dead_code))]
impl<T: Pod> Packed<T> {
    const FITS: () = assert!(
        size_of::<T>() <= size_of::<u64>(),
        "Packed<T> requires T to fit in 64 bits"
    );

    /// Unwrap the value.
    #[inline]
    pub fn into_inner(self) -> T {
        let () = Self::FITS;
        self.0
    }

    #[inline]
    fn to_bits(self) -> u64 {
        let () = Self::FITS;
        let mut bytes = [0u8; size_of::<u64>()];
        bytes[..size_of::<T>()].copy_from_slice(bytemuck::bytes_of(&self.0));
        u64::from_ne_bytes(bytes)
    }

    #[inline]
    fn from_bits(bits: u64) -> Self {
        let () = Self::FITS;
        let bytes = bits.to_ne_bytes();
        Packed(bytemuck::pod_read_unaligned(&bytes[..size_of::<T>()]))
    }
}

impl<T> From<T> for Packed<T> {
    fn from(value: T) -> Self {
        Packed(value)
    }
}

#[cfg(target_has_atomic = "64")]
impl<T: Pod + Send + Sync> AtomicRepr for Packed<T> {
    type Atomic = std::sync::atomic::AtomicU64;

    const IS_ALWAYS_LOCK_FREE: bool = true;

    #[inline]
    fn new_atomic(self) -> Self::Atomic {
        std::sync::atomic::AtomicU64::new(self.to_bits())
    }

    #[inline]
    fn load(atomic: &Self::Atomic, order: Ordering) -> Self {
        Self::from_bits(atomic.load(order))
    }

    #[inline]
    fn store(atomic: &Self::Atomic, value: Self, order: Ordering) {
        atomic.store(value.to_bits(), order)
    }
}

#[cfg(target_has_atomic = "64")]
impl<T: Pod + Send + Sync> Payload for Packed<T> {
    type Cell = AtomicCell<Packed<T>>;
}

#[cfg(not(target_has_atomic = "64"))]
impl<T: Pod + Send + Sync> Payload for Packed<T> {
    type Cell = GuardedCell<Packed<T>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Ramp {
        target: f32,
        millis: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Rgb {
        r: u8,
        g: u8,
        b: u8,
    }

    #[test]
    fn test_float_bits_roundtrip() {
        let atomic = (-0.25f32).new_atomic();
        assert_eq!(f32::load(&atomic, Ordering::Relaxed), -0.25);

        f32::store(&atomic, f32::INFINITY, Ordering::Relaxed);
        assert_eq!(f32::load(&atomic, Ordering::Relaxed), f32::INFINITY);
    }

    #[test]
    #[cfg(target_has_atomic = "64")]
    fn test_f64_bits_roundtrip() {
        let atomic = f64::MIN_POSITIVE.new_atomic();
        assert_eq!(f64::load(&atomic, Ordering::Relaxed), f64::MIN_POSITIVE);
    }

    #[test]
    #[cfg(target_has_atomic = "64")]
    fn test_packed_struct() {
        let ramp = Packed(Ramp {
            target: 0.5,
            millis: 20.0,
        });
        let atomic = ramp.new_atomic();
        assert_eq!(Packed::<Ramp>::load(&atomic, Ordering::Relaxed), ramp);
        assert!(<Packed<Ramp> as AtomicRepr>::IS_ALWAYS_LOCK_FREE);
    }

    #[test]
    #[cfg(target_has_atomic = "64")]
    fn test_packed_narrower_than_word() {
        let rgb = Packed(Rgb { r: 1, g: 2, b: 255 });
        let atomic = rgb.new_atomic();
        Packed::<Rgb>::store(&atomic, Packed(Rgb { r: 9, g: 8, b: 7 }), Ordering::Relaxed);
        assert_eq!(
            Packed::<Rgb>::load(&atomic, Ordering::Relaxed).into_inner(),
            Rgb { r: 9, g: 8, b: 7 }
        );
    }

    #[test]
    fn test_packed_classification_follows_target() {
        assert_eq!(
            <<Packed<Ramp> as Payload>::Cell as PayloadCell<Packed<Ramp>>>::IS_ALWAYS_LOCK_FREE,
            cfg!(target_has_atomic = "64")
        );

        // Either cell carries the value unchanged.
        let pending = std::sync::atomic::AtomicBool::new(false);
        type RgbCell = <Packed<Rgb> as Payload>::Cell;
        let cell = <RgbCell as PayloadCell<_>>::new(Packed(Rgb { r: 0, g: 0, b: 0 }));
        cell.publish(Packed(Rgb { r: 3, g: 2, b: 1 }), &pending);
        assert_eq!(
            cell.try_consume(&pending).map(Packed::into_inner),
            Some(Rgb { r: 3, g: 2, b: 1 })
        );
    }
}
