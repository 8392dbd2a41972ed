// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer-side view of one matched remote reader.
//!
//! Every change the writer holds above `acked_up_to` has a status record:
//!
//! ```text
//! Unsent --send--> Underway --window--> Unacknowledged --ack--> Acknowledged
//!                     |                       |
//!                     +-------- nack ---------+--> Requested --send--> Underway
//! ```
//!
//! Best-effort proxies go straight from Unsent to Acknowledged on send.
//! Acknowledged records at the front are folded into `acked_up_to`, so the
//! map only covers the window that still matters.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use crate::core::{Guid, Locator, SequenceNumber};
use crate::messages::SequenceNumberSet;
use crate::qos::Reliability;
use crate::writer::RemoteReaderInfo;

/// Delivery status of one change for one reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    /// Not yet put on the wire.
    Unsent,
    /// Sent at the given instant; NACKs are ignored until the suppression
    /// window elapses.
    Underway(Instant),
    /// Sent, waiting for an acknowledgement.
    Unacknowledged,
    /// NACKed by the reader, waiting for retransmission.
    Requested,
    /// Acknowledged (or irrelevant to this reader).
    Acknowledged,
}

/// Writer-side state for one remote reader.
#[derive(Debug)]
pub struct ReaderProxy {
    info: RemoteReaderInfo,
    changes: BTreeMap<SequenceNumber, ChangeStatus>,
    /// Every change up to and including this one is acknowledged.
    acked_up_to: SequenceNumber,
    highest_added: SequenceNumber,
    nack_suppression: Duration,
    last_acknack_count: Option<u32>,
    last_nackfrag_count: Option<u32>,
    requested_fragments: HashMap<SequenceNumber, BTreeSet<u32>>,
    last_seen: Instant,
}

impl ReaderProxy {
    /// Proxy for a newly matched reader. Changes up to `acked_up_to` are
    /// considered delivered (late joiners start from the writer's current
    /// position unless the history is replayed).
    #[must_use]
    pub fn new(info: RemoteReaderInfo, acked_up_to: SequenceNumber, nack_suppression: Duration) -> Self {
        Self {
            info,
            changes: BTreeMap::new(),
            acked_up_to,
            highest_added: acked_up_to,
            nack_suppression,
            last_acknack_count: None,
            last_nackfrag_count: None,
            requested_fragments: HashMap::new(),
            last_seen: Instant::now(),
        }
    }

    #[must_use]
    pub fn guid(&self) -> Guid {
        self.info.guid
    }

    #[must_use]
    pub fn info(&self) -> &RemoteReaderInfo {
        &self.info
    }

    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.info.reliability == Reliability::Reliable
    }

    #[must_use]
    pub fn expects_inline_qos(&self) -> bool {
        self.info.expects_inline_qos
    }

    /// Locators to use for traffic addressed to this reader only.
    #[must_use]
    pub fn unicast_locators(&self) -> &[Locator] {
        if self.info.unicast_locators.is_empty() {
            &self.info.multicast_locators
        } else {
            &self.info.unicast_locators
        }
    }

    /// Locators to use for traffic shared with other readers.
    #[must_use]
    pub fn multicast_or_unicast_locators(&self) -> &[Locator] {
        if self.info.multicast_locators.is_empty() {
            &self.info.unicast_locators
        } else {
            &self.info.multicast_locators
        }
    }

    /// Track a change the writer just admitted.
    pub fn add_change(&mut self, seq: SequenceNumber) {
        if seq <= self.acked_up_to {
            return;
        }
        self.changes.entry(seq).or_insert(ChangeStatus::Unsent);
        self.highest_added = self.highest_added.max(seq);
    }

    /// Track an already-admitted change for replay to a late joiner.
    pub fn add_replayed_change(&mut self, seq: SequenceNumber) {
        self.add_change(seq);
    }

    #[must_use]
    pub fn status(&self, seq: SequenceNumber) -> Option<ChangeStatus> {
        if seq <= self.acked_up_to {
            return Some(ChangeStatus::Acknowledged);
        }
        self.changes.get(&seq).copied()
    }

    /// The change was put on the wire for this reader.
    pub fn mark_sent(&mut self, seq: SequenceNumber, now: Instant) {
        let reliable = self.is_reliable();
        let suppress = !self.nack_suppression.is_zero();
        if let Some(status) = self.changes.get_mut(&seq) {
            *status = if !reliable {
                ChangeStatus::Acknowledged
            } else if suppress {
                ChangeStatus::Underway(now)
            } else {
                ChangeStatus::Unacknowledged
            };
        }
        self.requested_fragments.remove(&seq);
        self.compact();
    }

    /// Move changes whose suppression window elapsed to Unacknowledged.
    pub fn update_underway(&mut self, now: Instant) {
        let window = self.nack_suppression;
        for status in self.changes.values_mut() {
            if let ChangeStatus::Underway(sent) = *status {
                if now.saturating_duration_since(sent) >= window {
                    *status = ChangeStatus::Unacknowledged;
                }
            }
        }
    }

    /// Accept an ACKNACK count; false for duplicates and stale counts.
    pub fn check_acknack_count(&mut self, count: u32) -> bool {
        match self.last_acknack_count {
            Some(last) if count <= last => false,
            _ => {
                self.last_acknack_count = Some(count);
                true
            }
        }
    }

    pub fn check_nackfrag_count(&mut self, count: u32) -> bool {
        match self.last_nackfrag_count {
            Some(last) if count <= last => false,
            _ => {
                self.last_nackfrag_count = Some(count);
                true
            }
        }
    }

    /// Everything below `base` is acknowledged. Returns true when the
    /// acknowledged mark moved.
    pub fn acked_changes_set(&mut self, base: SequenceNumber) -> bool {
        let before = self.acked_up_to;
        let up_to = base.prev().min(self.highest_added);
        if up_to > self.acked_up_to {
            let keep = self.changes.split_off(&up_to.next());
            self.changes = keep;
            self.requested_fragments.retain(|seq, _| *seq > up_to);
            self.acked_up_to = up_to;
        }
        self.compact();
        self.acked_up_to > before
    }

    /// Record NACKed sequence numbers. Returns the requested numbers above
    /// the acknowledged mark, including ones this proxy does not track so the
    /// writer can answer them with GAP.
    pub fn requested_changes_set(&mut self, set: &SequenceNumberSet, now: Instant) -> Vec<SequenceNumber> {
        let mut requested = Vec::new();
        for seq in set.iter() {
            if seq <= self.acked_up_to || seq > self.highest_added {
                continue;
            }
            match self.changes.get_mut(&seq) {
                Some(ChangeStatus::Underway(sent))
                    if now.saturating_duration_since(*sent) < self.nack_suppression =>
                {
                    continue;
                }
                Some(status) => *status = ChangeStatus::Requested,
                None => {}
            }
            requested.push(seq);
        }
        requested
    }

    /// Mark a change the writer still holds as requested (it was NACKed
    /// before this proxy started tracking it).
    pub fn set_requested(&mut self, seq: SequenceNumber) {
        if seq > self.acked_up_to {
            self.changes.insert(seq, ChangeStatus::Requested);
            self.highest_added = self.highest_added.max(seq);
        }
    }

    /// The change left the writer history: it can no longer be delivered,
    /// so it stops blocking acknowledgement.
    pub fn change_removed(&mut self, seq: SequenceNumber) {
        if let Some(status) = self.changes.get_mut(&seq) {
            *status = ChangeStatus::Acknowledged;
        }
        self.requested_fragments.remove(&seq);
        self.compact();
    }

    /// Fragments the reader asked for again (NACK_FRAG).
    pub fn request_fragments(&mut self, seq: SequenceNumber, fragments: impl IntoIterator<Item = u32>) {
        if seq <= self.acked_up_to {
            return;
        }
        self.requested_fragments
            .entry(seq)
            .or_default()
            .extend(fragments);
    }

    /// Drain the fragments requested for `seq`, ascending.
    pub fn take_requested_fragments(&mut self, seq: SequenceNumber) -> Option<Vec<u32>> {
        self.requested_fragments
            .remove(&seq)
            .map(|frags| frags.into_iter().collect())
    }

    #[must_use]
    pub fn has_requested_fragments(&self, seq: SequenceNumber) -> bool {
        self.requested_fragments.contains_key(&seq)
    }

    /// Any sign of life from the reader (ACKNACK, NACK_FRAG).
    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    /// False once the reader's lease elapsed without an ACKNACK.
    #[must_use]
    pub fn is_alive(&self, now: Instant) -> bool {
        if !self.info.liveliness.has_lease() {
            return true;
        }
        now.saturating_duration_since(self.last_seen) <= self.info.liveliness.lease_duration
    }

    fn compact(&mut self) {
        while let Some(entry) = self.changes.first_entry() {
            if *entry.get() != ChangeStatus::Acknowledged {
                break;
            }
            let seq = *entry.key();
            entry.remove();
            self.acked_up_to = self.acked_up_to.max(seq);
        }
        match self.changes.keys().next() {
            // Holes below the first tracked change are irrelevant to this reader.
            Some(first) => self.acked_up_to = self.acked_up_to.max(first.prev()),
            None => self.acked_up_to = self.acked_up_to.max(self.highest_added),
        }
    }

    /// Highest sequence number such that it and everything below it are
    /// acknowledged.
    #[must_use]
    pub fn changes_low_mark(&self) -> SequenceNumber {
        self.acked_up_to
    }

    #[must_use]
    pub fn is_acked(&self, seq: SequenceNumber) -> bool {
        self.status(seq).map_or(true, |s| s == ChangeStatus::Acknowledged)
    }

    /// Changes never sent to this reader, ascending.
    #[must_use]
    pub fn unsent_changes(&self) -> Vec<SequenceNumber> {
        self.with_status(|s| s == ChangeStatus::Unsent)
    }

    /// Changes NACKed and waiting for retransmission, ascending.
    #[must_use]
    pub fn requested_changes(&self) -> Vec<SequenceNumber> {
        self.with_status(|s| s == ChangeStatus::Requested)
    }

    fn with_status(&self, pred: impl Fn(ChangeStatus) -> bool) -> Vec<SequenceNumber> {
        self.changes
            .iter()
            .filter(|(_, s)| pred(**s))
            .map(|(seq, _)| *seq)
            .collect()
    }

    #[must_use]
    pub fn has_unsent_changes(&self) -> bool {
        self.changes.values().any(|s| *s == ChangeStatus::Unsent)
    }

    #[must_use]
    pub fn has_requested_changes(&self) -> bool {
        self.changes.values().any(|s| *s == ChangeStatus::Requested)
    }

    /// Sent changes still waiting for an acknowledgement.
    #[must_use]
    pub fn has_unacknowledged_changes(&self) -> bool {
        self.changes.values().any(|s| *s != ChangeStatus::Acknowledged)
    }
}
