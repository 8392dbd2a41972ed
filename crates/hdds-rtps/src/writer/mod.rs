// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS writers.
//!
//! | Variant | Reader knowledge | Reliability | Repair |
//! |---------|------------------|-------------|--------|
//! | [`StatelessWriter`] | locator list | best-effort | none; `unsent_changes_reset` replays the history |
//! | [`StatefulWriter`] | one [`ReaderProxy`](crate::reliability::ReaderProxy) per reader | best-effort or reliable | HEARTBEAT / ACKNACK / GAP / NACK_FRAG |
//!
//! Both admit changes into a [`WriterHistory`] and let their
//! [`FlowController`](crate::flow::FlowController) decide when a change goes
//! on the wire.
//!
//! ## Write path
//!
//! ```text
//! write(change)
//!   -> history.add_change_with_timeout   (sequence number assigned, may block)
//!   -> proxies / reader locators         (change tracked as UNSENT)
//!   -> flow.add_new_sample               (sent now, queued, or deferred)
//!        -> FlowClient::deliver_sample   (DATA / DATA_FRAG [+ HEARTBEAT])
//! ```

mod base;
mod stateful;
mod stateless;

pub use stateful::StatefulWriter;
pub use stateless::StatelessWriter;

pub(crate) use base::WriterContext;

use std::time::Duration;

use crate::config::{
    DEFAULT_HEARTBEAT_PERIOD, DEFAULT_MAX_BLOCKING_TIME, DEFAULT_NACK_RESPONSE_DELAY,
    DEFAULT_NACK_SUPPRESSION_DURATION, MAX_FRAGMENT_SIZE,
};
use crate::core::{
    CacheChange, ChangeKind, Guid, GuidPrefix, InstanceHandle, Locator, SequenceNumber, WriteParams,
};
use crate::flow::{WriterFlowParams, DEFAULT_FLOW_CONTROLLER};
use crate::history::{HistoryAttributes, WriterHistory};
use crate::messages::{AckNackSubmessage, NackFragSubmessage};
use crate::qos::{Deadline, Durability, Liveliness, Ownership, Reliability};
use crate::{Error, Result};

/// Discovery data of one remote reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteReaderInfo {
    pub guid: Guid,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    pub expects_inline_qos: bool,
    pub reliability: Reliability,
    pub durability: Durability,
    /// Lease of the reader's participant; expired readers are unmatched.
    pub liveliness: Liveliness,
}

impl RemoteReaderInfo {
    #[must_use]
    pub fn new(guid: Guid) -> Self {
        Self {
            guid,
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
            expects_inline_qos: false,
            reliability: Reliability::BestEffort,
            durability: Durability::Volatile,
            liveliness: Liveliness::default(),
        }
    }

    #[must_use]
    pub fn with_unicast_locator(mut self, locator: Locator) -> Self {
        self.unicast_locators.push(locator);
        self
    }

    #[must_use]
    pub fn with_multicast_locator(mut self, locator: Locator) -> Self {
        self.multicast_locators.push(locator);
        self
    }

    #[must_use]
    pub fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = reliability;
        self
    }

    #[must_use]
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    #[must_use]
    pub fn with_inline_qos(mut self, expects_inline_qos: bool) -> Self {
        self.expects_inline_qos = expects_inline_qos;
        self
    }

    #[must_use]
    pub fn with_liveliness(mut self, liveliness: Liveliness) -> Self {
        self.liveliness = liveliness;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.guid.prefix.is_unknown() || !self.guid.entity_id.is_reader() {
            return Err(Error::InvalidState(format!("{} is not a reader GUID", self.guid)));
        }
        for locator in self.unicast_locators.iter().chain(&self.multicast_locators) {
            locator.validate()?;
        }
        Ok(())
    }
}

/// Data-sharing slots for a writer whose readers live on the same host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSharingSettings {
    pub slot_count: u32,
    pub slot_size: u32,
}

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct WriterAttributes {
    /// Keyed topic (instances distinguished by key hash).
    pub with_key: bool,
    pub reliability: Reliability,
    pub durability: Durability,
    pub history: HistoryAttributes,
    pub ownership: Ownership,
    /// Announced with every sample when ownership is exclusive.
    pub ownership_strength: i32,
    pub liveliness: Liveliness,
    pub deadline: Deadline,
    pub heartbeat_period: Duration,
    pub nack_response_delay: Duration,
    pub nack_suppression_duration: Duration,
    /// Bound for a blocking write (full KEEP_ALL history, PURE_SYNC budget).
    pub max_blocking_time: Duration,
    /// Name of the flow controller registered on the participant.
    pub flow_controller: String,
    pub flow_params: WriterFlowParams,
    /// Payloads above this size go out as DATA_FRAG; `None` derives it
    /// from the maximum message size.
    pub fragment_size: Option<usize>,
    pub data_sharing: Option<DataSharingSettings>,
    /// Locators announced for this writer (replies are routed by prefix).
    pub unicast_locators: Vec<Locator>,
}

impl Default for WriterAttributes {
    fn default() -> Self {
        Self {
            with_key: false,
            reliability: Reliability::Reliable,
            durability: Durability::Volatile,
            history: HistoryAttributes::keep_last(1),
            ownership: Ownership::shared(),
            ownership_strength: 0,
            liveliness: Liveliness::default(),
            deadline: Deadline::default(),
            heartbeat_period: DEFAULT_HEARTBEAT_PERIOD,
            nack_response_delay: DEFAULT_NACK_RESPONSE_DELAY,
            nack_suppression_duration: DEFAULT_NACK_SUPPRESSION_DURATION,
            max_blocking_time: DEFAULT_MAX_BLOCKING_TIME,
            flow_controller: DEFAULT_FLOW_CONTROLLER.to_string(),
            flow_params: WriterFlowParams::default(),
            fragment_size: None,
            data_sharing: None,
            unicast_locators: Vec::new(),
        }
    }
}

impl WriterAttributes {
    #[must_use]
    pub fn reliable() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn best_effort() -> Self {
        Self {
            reliability: Reliability::BestEffort,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_key(mut self, with_key: bool) -> Self {
        self.with_key = with_key;
        self
    }

    #[must_use]
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: HistoryAttributes) -> Self {
        self.history = history;
        self
    }

    /// Exclusive ownership with the given strength.
    #[must_use]
    pub fn with_ownership_strength(mut self, strength: i32) -> Self {
        self.ownership = Ownership::exclusive();
        self.ownership_strength = strength;
        self
    }

    #[must_use]
    pub fn with_liveliness(mut self, liveliness: Liveliness) -> Self {
        self.liveliness = liveliness;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_heartbeat_period(mut self, period: Duration) -> Self {
        self.heartbeat_period = period;
        self
    }

    #[must_use]
    pub fn with_nack_response_delay(mut self, delay: Duration) -> Self {
        self.nack_response_delay = delay;
        self
    }

    #[must_use]
    pub fn with_nack_suppression(mut self, window: Duration) -> Self {
        self.nack_suppression_duration = window;
        self
    }

    #[must_use]
    pub fn with_max_blocking_time(mut self, max_blocking_time: Duration) -> Self {
        self.max_blocking_time = max_blocking_time;
        self
    }

    #[must_use]
    pub fn with_flow_controller(mut self, name: &str, params: WriterFlowParams) -> Self {
        self.flow_controller = name.to_string();
        self.flow_params = params;
        self
    }

    #[must_use]
    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_data_sharing(mut self, slot_count: u32, slot_size: u32) -> Self {
        self.data_sharing = Some(DataSharingSettings {
            slot_count,
            slot_size,
        });
        self
    }

    #[must_use]
    pub fn with_unicast_locator(mut self, locator: Locator) -> Self {
        self.unicast_locators.push(locator);
        self
    }

    /// Reject combinations a writer cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.history.validate()?;
        if self.reliability == Reliability::Reliable && self.heartbeat_period.is_zero() {
            return Err(Error::InvalidQos("heartbeat_period must be non-zero".into()));
        }
        if let Some(size) = self.fragment_size {
            if size == 0 || size > MAX_FRAGMENT_SIZE {
                return Err(Error::InvalidQos(format!(
                    "fragment_size {} outside 1..={}",
                    size, MAX_FRAGMENT_SIZE
                )));
            }
        }
        if !(-10..=10).contains(&self.flow_params.priority) {
            return Err(Error::InvalidQos(format!(
                "flow priority {} outside -10..=10",
                self.flow_params.priority
            )));
        }
        if self.flow_params.reservation_pct > 100 {
            return Err(Error::InvalidQos(format!(
                "bandwidth reservation {}% above 100%",
                self.flow_params.reservation_pct
            )));
        }
        if let Some(ds) = self.data_sharing {
            if ds.slot_count == 0 || ds.slot_size == 0 {
                return Err(Error::InvalidQos("data sharing needs slots".into()));
            }
        }
        for locator in &self.unicast_locators {
            locator.validate()?;
        }
        Ok(())
    }
}

/// Notifications from a writer. Called from engine threads without any
/// writer lock held.
pub trait WriterListener: Send + Sync {
    /// Every matched reader acknowledged the changes up to `up_to`.
    fn on_changes_acknowledged(&self, writer: Guid, up_to: SequenceNumber) {
        let _ = (writer, up_to);
    }

    fn on_offered_deadline_missed(&self, writer: Guid, instance: InstanceHandle) {
        let _ = (writer, instance);
    }

    /// A matched reader's lease expired and it was unmatched.
    fn on_reader_lost(&self, writer: Guid, reader: Guid) {
        let _ = (writer, reader);
    }
}

/// Operations common to stateless and stateful writers.
pub trait RtpsWriter: Send + Sync {
    fn guid(&self) -> Guid;

    fn attributes(&self) -> &WriterAttributes;

    fn history(&self) -> &WriterHistory;

    /// New change of this writer, payload copied into the writer's pool.
    /// The sequence number is assigned by [`write`](Self::write).
    fn new_change(&self, kind: ChangeKind, data: &[u8], instance: InstanceHandle) -> Result<CacheChange>;

    /// Admit `change` into the history and schedule it for sending.
    fn write(&self, change: CacheChange) -> Result<SequenceNumber> {
        self.write_with_params(change, WriteParams::default())
    }

    fn write_with_params(&self, change: CacheChange, params: WriteParams) -> Result<SequenceNumber>;

    /// Drop a change before it was acknowledged; readers that still need
    /// it get a GAP.
    fn remove_change(&self, seq: SequenceNumber) -> bool;

    fn matched_reader_add(&self, reader: RemoteReaderInfo) -> Result<()>;

    fn matched_reader_remove(&self, reader: &Guid) -> bool;

    fn matched_reader_count(&self) -> usize;

    /// Every matched reader has `seq` (true with no readers).
    fn is_acked_by_all(&self, seq: SequenceNumber) -> bool;

    /// Wait until every change written so far is acknowledged by every
    /// matched reader. `Ok(false)` on timeout.
    fn wait_for_acknowledgments(&self, timeout: Duration) -> Result<bool>;

    /// Tell matched readers this writer is alive.
    fn assert_liveliness(&self);

    fn on_acknack(&self, source: GuidPrefix, acknack: &AckNackSubmessage) {
        let _ = (source, acknack);
    }

    fn on_nack_frag(&self, source: GuidPrefix, nack_frag: &NackFragSubmessage) {
        let _ = (source, nack_frag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EntityId;
    use std::net::Ipv4Addr;

    #[test]
    fn test_default_attributes_validate() {
        WriterAttributes::default().validate().expect("defaults are valid");
        WriterAttributes::best_effort()
            .with_ownership_strength(10)
            .validate()
            .expect("best effort exclusive is valid");
    }

    #[test]
    fn test_invalid_attributes_are_rejected() {
        let zero_hb = WriterAttributes::reliable().with_heartbeat_period(Duration::ZERO);
        assert!(matches!(zero_hb.validate(), Err(Error::InvalidQos(_))));
        let bad_priority = WriterAttributes::default().with_flow_controller(
            "default",
            WriterFlowParams {
                priority: 11,
                reservation_pct: 0,
            },
        );
        assert!(bad_priority.validate().is_err());
        assert!(WriterAttributes::default().with_fragment_size(0).validate().is_err());
    }

    #[test]
    fn test_remote_reader_validation() {
        let prefix = GuidPrefix([1; 12]);
        let reader = RemoteReaderInfo::new(Guid::new(prefix, EntityId::new(1, 0x07)))
            .with_unicast_locator(Locator::udpv4(Ipv4Addr::LOCALHOST, 7411));
        reader.validate().expect("valid reader");
        let writer_guid = RemoteReaderInfo::new(Guid::new(prefix, EntityId::new(1, 0x02)));
        assert!(writer_guid.validate().is_err());
        let bad_locator = RemoteReaderInfo::new(Guid::new(prefix, EntityId::new(1, 0x07)))
            .with_unicast_locator(Locator::INVALID);
        assert!(matches!(bad_locator.validate(), Err(Error::InvalidLocator(_))));
    }
}
