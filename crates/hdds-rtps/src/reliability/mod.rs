// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Reliability state machines
//!
//! Per matched remote endpoint bookkeeping for the RTPS reliability protocol.
//!
//! ## Protocol Flow
//!
//! ```text
//! Writer                                    Reader
//!   |                                          |
//!   |--- DATA (seq=1) ------------------------>|
//!   |--- DATA (seq=2) ----------X (lost)       |
//!   |--- DATA (seq=3) ------------------------>|
//!   |                                          |
//!   |--- HEARTBEAT (first=1, last=3) -------->|
//!   |                                          | (seq=2 missing)
//!   |<-- ACKNACK (base=2, set={2}) ------------|
//!   |                                          |
//!   |--- DATA (seq=2) [retransmit] ---------->|
//!   |<-- ACKNACK (base=4, set={}) -------------|
//! ```
//!
//! | Component | Side | Role |
//! |-----------|------|------|
//! | [`ReaderProxy`] | writer | status of every change for one remote reader |
//! | [`WriterProxy`] | reader | contiguous mark and missing set for one remote writer |
//!
//! Proxies hold sequence numbers only; the changes themselves stay in the
//! owning endpoint's history and are looked up there.

mod reader_proxy;
mod writer_proxy;

pub use reader_proxy::{ChangeStatus, ReaderProxy};
pub use writer_proxy::{HeartbeatOutcome, WriterProxy};
