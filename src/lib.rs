// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Paramslot - latest-value-wins parameter handoff for real-time threads.
//!
//! - [`realtime`]: [`NotifyingParam`], a single slot that producer threads
//!   publish into and one periodic consumer picks up from without blocking.
//! - [`memo`]: double-checked one-time initialization.

pub mod memo;
pub mod realtime;

pub use memo::{double_checked, MemoCell, SentinelCache};
pub use realtime::{NotifyingParam, Packed, ParamReader, ParamWriter, Payload};
