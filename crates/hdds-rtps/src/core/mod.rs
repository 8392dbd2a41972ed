// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core RTPS value types shared by every layer.

pub mod change;
pub mod guid;
pub mod locator;
pub mod seq;
pub mod ser;
pub mod time;

pub use change::{CacheChange, ChangeKind, FragmentInfo, InstanceHandle, SampleIdentity, WriteParams};
pub use guid::{EntityId, Guid, GuidPrefix};
pub use locator::Locator;
pub use seq::{SeqNumGenerator, SequenceNumber};
pub use time::Time;
