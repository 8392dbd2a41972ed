// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader-side view of one matched remote writer.
//!
//! `available_changes_max` is the highest sequence number such that it and
//! everything below it were received or declared irrelevant. Numbers above
//! it that already arrived sit in `received` until the hole below them
//! closes. Anything between the mark and the highest number announced by a
//! HEARTBEAT that is not in `received` is missing.
//!
//! # Example
//!
//! ```text
//! DATA 1, DATA 3, DATA 5, HEARTBEAT(1..5)
//!   available_changes_max = 1, received = {3, 5}, missing = {2, 4}
//! GAP {2, 4}
//!   available_changes_max = 5, received = {}, missing = {}
//! ```

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::core::{Guid, Locator, SequenceNumber};
use crate::messages::SequenceNumberSet;
use crate::qos::Reliability;
use crate::reader::RemoteWriterInfo;

/// What a HEARTBEAT asks of the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Count already seen; nothing to do.
    Duplicate,
    /// Everything announced is held and the writer did not ask for a reply.
    UpToDate,
    /// An ACKNACK should be scheduled.
    ResponseRequired,
}

/// Reader-side state for one remote writer.
#[derive(Debug)]
pub struct WriterProxy {
    info: RemoteWriterInfo,
    available_changes_max: SequenceNumber,
    received: BTreeSet<SequenceNumber>,
    highest_known: SequenceNumber,
    last_heartbeat_count: Option<u32>,
    last_heartbeat_frag_count: Option<u32>,
    acknack_count: u32,
    nackfrag_count: u32,
    acknack_pending: bool,
    ownership_strength: i32,
    last_alive: Instant,
}

impl WriterProxy {
    #[must_use]
    pub fn new(info: RemoteWriterInfo, now: Instant) -> Self {
        let ownership_strength = info.ownership_strength;
        Self {
            info,
            available_changes_max: SequenceNumber::ZERO,
            received: BTreeSet::new(),
            highest_known: SequenceNumber::ZERO,
            last_heartbeat_count: None,
            last_heartbeat_frag_count: None,
            acknack_count: 0,
            nackfrag_count: 0,
            acknack_pending: false,
            ownership_strength,
            last_alive: now,
        }
    }

    #[must_use]
    pub fn guid(&self) -> Guid {
        self.info.guid
    }

    #[must_use]
    pub fn info(&self) -> &RemoteWriterInfo {
        &self.info
    }

    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.info.reliability == Reliability::Reliable
    }

    /// Where ACKNACK / NACK_FRAG for this writer go.
    #[must_use]
    pub fn reply_locators(&self) -> &[Locator] {
        if self.info.unicast_locators.is_empty() {
            &self.info.multicast_locators
        } else {
            &self.info.unicast_locators
        }
    }

    #[must_use]
    pub fn available_changes_max(&self) -> SequenceNumber {
        self.available_changes_max
    }

    #[must_use]
    pub fn highest_known(&self) -> SequenceNumber {
        self.highest_known
    }

    /// Received already, or declared irrelevant.
    #[must_use]
    pub fn is_duplicate(&self, seq: SequenceNumber) -> bool {
        seq <= self.available_changes_max || self.received.contains(&seq)
    }

    /// Record a received change. Returns false for duplicates.
    pub fn received_change_set(&mut self, seq: SequenceNumber) -> bool {
        if self.is_duplicate(seq) {
            return false;
        }
        self.highest_known = self.highest_known.max(seq);
        self.received.insert(seq);
        self.advance();
        true
    }

    /// The writer declared `seq` irrelevant (GAP).
    pub fn irrelevant_change_set(&mut self, seq: SequenceNumber) {
        if self.is_duplicate(seq) {
            return;
        }
        self.received.insert(seq);
        self.advance();
    }

    /// Changes below `first_available` are no longer available from the
    /// writer (HEARTBEAT firstSN).
    pub fn lost_changes_update(&mut self, first_available: SequenceNumber) {
        let lost_up_to = first_available.prev();
        if lost_up_to <= self.available_changes_max {
            return;
        }
        self.available_changes_max = lost_up_to;
        self.received = self.received.split_off(&first_available);
        self.highest_known = self.highest_known.max(lost_up_to);
        self.advance();
    }

    /// The writer holds changes up to `last_available` (HEARTBEAT lastSN).
    pub fn missing_changes_update(&mut self, last_available: SequenceNumber) {
        self.highest_known = self.highest_known.max(last_available);
    }

    fn advance(&mut self) {
        while let Some(&first) = self.received.first() {
            if first != self.available_changes_max.next() {
                break;
            }
            self.received.pop_first();
            self.available_changes_max = first;
        }
    }

    /// Sequence numbers announced but not held, ascending.
    pub fn missing_changes(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        let start = self.available_changes_max.next().value();
        let end = self.highest_known.value();
        (start..=end)
            .map(SequenceNumber)
            .filter(move |seq| !self.received.contains(seq))
    }

    #[must_use]
    pub fn has_missing_changes(&self) -> bool {
        self.missing_changes().next().is_some()
    }

    /// Apply a HEARTBEAT. `count` deduplicates repeats of the same
    /// heartbeat; only strictly newer counts are processed.
    pub fn on_heartbeat(
        &mut self,
        first_sn: SequenceNumber,
        last_sn: SequenceNumber,
        count: u32,
        final_flag: bool,
        now: Instant,
    ) -> HeartbeatOutcome {
        if matches!(self.last_heartbeat_count, Some(last) if count <= last) {
            return HeartbeatOutcome::Duplicate;
        }
        self.last_heartbeat_count = Some(count);
        self.assert_liveliness(now);
        self.missing_changes_update(last_sn);
        self.lost_changes_update(first_sn);
        if !final_flag || self.has_missing_changes() {
            self.acknack_pending = true;
            HeartbeatOutcome::ResponseRequired
        } else {
            HeartbeatOutcome::UpToDate
        }
    }

    /// Apply a HEARTBEAT_FRAG count; false for repeats.
    pub fn check_heartbeat_frag_count(&mut self, count: u32) -> bool {
        if matches!(self.last_heartbeat_frag_count, Some(last) if count <= last) {
            return false;
        }
        self.last_heartbeat_frag_count = Some(count);
        true
    }

    /// Build the next ACKNACK: base is the first number not yet held, the
    /// set lists the missing numbers within the 256-bit window.
    pub fn build_acknack_set(&mut self) -> (SequenceNumberSet, u32) {
        self.build_acknack_set_skipping(|_| false)
    }

    /// Like [`build_acknack_set`](Self::build_acknack_set), leaving out the
    /// numbers `skip` selects (samples being repaired through NACK_FRAG).
    pub fn build_acknack_set_skipping(
        &mut self,
        skip: impl Fn(SequenceNumber) -> bool,
    ) -> (SequenceNumberSet, u32) {
        let base = self.available_changes_max.next();
        let window = i64::from(SequenceNumberSet::MAX_BITS);
        let set = SequenceNumberSet::from_sequences_capped(
            base,
            self.missing_changes()
                .take_while(|seq| *seq - base < window)
                .filter(|seq| !skip(*seq)),
        );
        self.acknack_count = self.acknack_count.wrapping_add(1);
        self.acknack_pending = false;
        (set, self.acknack_count)
    }

    pub fn next_nackfrag_count(&mut self) -> u32 {
        self.nackfrag_count = self.nackfrag_count.wrapping_add(1);
        self.nackfrag_count
    }

    #[must_use]
    pub fn acknack_pending(&self) -> bool {
        self.acknack_pending
    }

    #[must_use]
    pub fn ownership_strength(&self) -> i32 {
        self.ownership_strength
    }

    /// Strength announced in inline QoS.
    pub fn set_ownership_strength(&mut self, strength: i32) {
        self.ownership_strength = strength;
    }

    pub fn assert_liveliness(&mut self, now: Instant) {
        self.last_alive = now;
    }

    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        self.info.liveliness.lease_duration
    }

    /// False once the lease elapsed without any sign of life.
    #[must_use]
    pub fn is_alive(&self, now: Instant) -> bool {
        if !self.info.liveliness.has_lease() {
            return true;
        }
        now.saturating_duration_since(self.last_alive) <= self.info.liveliness.lease_duration
    }
}
