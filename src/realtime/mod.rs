// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Real-time safe parameter handoff.
//!
//! This module provides a single-slot, "latest value wins" exchange between
//! any number of producer threads and one periodic consumer thread.
//!
//! # Real-Time Safety
//!
//! The consumer side has strict requirements:
//! - No memory allocation
//! - No waiting on locks held by other threads
//! - Bounded execution time
//!
//! [`NotifyingParam::try_consume`] meets these for every payload type. The
//! producer side only meets them when the payload is lock-free, which
//! [`NotifyingParam::IS_ALWAYS_LOCK_FREE`] reports at compile time.

pub mod cell;
pub mod exclusion;
pub mod notifying;
pub mod payload;

pub use cell::{AtomicCell, GuardedCell, PayloadCell};
pub use exclusion::{ExclusionFlag, ExclusionGuard};
pub use notifying::{NotifyingParam, ParamReader, ParamWriter};
pub use payload::{AtomicRepr, Packed, Payload};
