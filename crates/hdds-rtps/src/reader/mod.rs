// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS readers.
//!
//! | Variant | Writer knowledge | Reliability | Repair |
//! |---------|------------------|-------------|--------|
//! | [`StatelessReader`] | none, any writer accepted | best-effort | none |
//! | [`StatefulReader`] | one [`WriterProxy`](crate::reliability::WriterProxy) per writer | best-effort or reliable | ACKNACK / NACK_FRAG |
//!
//! ## Data path
//!
//! ```text
//! DATA / DATA_FRAG (routed by the MessageReceiver)
//!   -> writer matched?            (stateful only)
//!   -> duplicate / old sequence?
//!   -> content filter
//!   -> exclusive ownership        (strength >= owner's)
//!   -> history.add_change         (KEEP_LAST eviction)
//!   -> ReaderListener::on_data_available
//! ```

mod fragments;
mod ownership;
mod stateful;
mod stateless;

pub use stateful::StatefulReader;
pub use stateless::StatelessReader;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{DEFAULT_HEARTBEAT_RESPONSE_DELAY, MAX_PARTIAL_SAMPLES};
use crate::core::{
    CacheChange, ChangeKind, Guid, GuidPrefix, InstanceHandle, Locator, SequenceNumber, Time,
};
use crate::events::EventService;
use crate::history::{HistoryAttributes, ReaderHistory, SampleInfo};
use crate::messages::{
    DataFragSubmessage, DataSubmessage, GapSubmessage, HeartbeatFragSubmessage, HeartbeatSubmessage,
    InlineQos,
};
use crate::pool::SerializedPayload;
use crate::qos::{Deadline, DestinationOrder, Durability, Liveliness, Ownership, Reliability};
use crate::sender::MessageSender;
use crate::{Error, Result};

/// Discovery data of one remote writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteWriterInfo {
    pub guid: Guid,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    pub reliability: Reliability,
    pub durability: Durability,
    /// Announced strength; inline QoS on the samples overrides it.
    pub ownership_strength: i32,
    pub liveliness: Liveliness,
}

impl RemoteWriterInfo {
    #[must_use]
    pub fn new(guid: Guid) -> Self {
        Self {
            guid,
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
            reliability: Reliability::BestEffort,
            durability: Durability::Volatile,
            ownership_strength: 0,
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
    pub fn with_ownership_strength(mut self, strength: i32) -> Self {
        self.ownership_strength = strength;
        self
    }

    #[must_use]
    pub fn with_liveliness(mut self, liveliness: Liveliness) -> Self {
        self.liveliness = liveliness;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.guid.prefix.is_unknown() || !self.guid.entity_id.is_writer() {
            return Err(Error::InvalidState(format!("{} is not a writer GUID", self.guid)));
        }
        for locator in self.unicast_locators.iter().chain(&self.multicast_locators) {
            locator.validate()?;
        }
        Ok(())
    }
}

/// Reader configuration.
#[derive(Debug, Clone)]
pub struct ReaderAttributes {
    pub with_key: bool,
    pub reliability: Reliability,
    pub durability: Durability,
    pub history: HistoryAttributes,
    pub destination_order: DestinationOrder,
    pub ownership: Ownership,
    pub deadline: Deadline,
    /// Delay before a HEARTBEAT is answered; zero answers at once.
    pub heartbeat_response_delay: Duration,
    pub expects_inline_qos: bool,
    /// Samples reassembled concurrently from DATA_FRAG.
    pub max_partial_samples: usize,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
}

impl Default for ReaderAttributes {
    fn default() -> Self {
        Self {
            with_key: false,
            reliability: Reliability::BestEffort,
            durability: Durability::Volatile,
            history: HistoryAttributes::keep_last(1),
            destination_order: DestinationOrder::ByReceptionTimestamp,
            ownership: Ownership::shared(),
            deadline: Deadline::default(),
            heartbeat_response_delay: DEFAULT_HEARTBEAT_RESPONSE_DELAY,
            expects_inline_qos: false,
            max_partial_samples: MAX_PARTIAL_SAMPLES,
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
        }
    }
}

impl ReaderAttributes {
    #[must_use]
    pub fn reliable() -> Self {
        Self {
            reliability: Reliability::Reliable,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn best_effort() -> Self {
        Self::default()
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

    #[must_use]
    pub fn with_destination_order(mut self, order: DestinationOrder) -> Self {
        self.destination_order = order;
        self
    }

    #[must_use]
    pub fn with_exclusive_ownership(mut self) -> Self {
        self.ownership = Ownership::exclusive();
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_heartbeat_response_delay(mut self, delay: Duration) -> Self {
        self.heartbeat_response_delay = delay;
        self
    }

    #[must_use]
    pub fn with_inline_qos(mut self, expects_inline_qos: bool) -> Self {
        self.expects_inline_qos = expects_inline_qos;
        self
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

    pub fn validate(&self) -> Result<()> {
        self.history.validate()?;
        if self.max_partial_samples == 0 {
            return Err(Error::InvalidQos("max_partial_samples must be non-zero".into()));
        }
        for locator in self.unicast_locators.iter().chain(&self.multicast_locators) {
            locator.validate()?;
        }
        Ok(())
    }
}

/// Application-supplied predicate; samples it rejects are dropped before
/// the history but still count as received for reliability.
pub trait ContentFilter: Send + Sync {
    fn accepts(&self, change: &CacheChange) -> bool;
}

impl<F> ContentFilter for F
where
    F: Fn(&CacheChange) -> bool + Send + Sync,
{
    fn accepts(&self, change: &CacheChange) -> bool {
        self(change)
    }
}

/// Why a sample did not reach the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// KEEP_ALL history or instance limit full.
    ResourceLimit,
}

/// Notifications from a reader. Called from engine threads without any
/// reader lock held.
pub trait ReaderListener: Send + Sync {
    fn on_data_available(&self, reader: Guid) {
        let _ = reader;
    }

    fn on_requested_deadline_missed(&self, reader: Guid, instance: InstanceHandle) {
        let _ = (reader, instance);
    }

    /// A matched writer's lease expired (`alive == false`) or it showed a
    /// sign of life again.
    fn on_liveliness_changed(&self, reader: Guid, writer: Guid, alive: bool) {
        let _ = (reader, writer, alive);
    }

    fn on_sample_rejected(&self, reader: Guid, writer: Guid, seq: SequenceNumber, reason: RejectReason) {
        let _ = (reader, writer, seq, reason);
    }
}

/// Receiver state a submessage is interpreted in (INFO_SRC, INFO_TS,
/// INFO_REPLY seen so far in the same message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    pub source_prefix: GuidPrefix,
    pub source_timestamp: Option<Time>,
    pub reception_timestamp: Time,
    pub unicast_reply_locators: Vec<Locator>,
    pub multicast_reply_locators: Vec<Locator>,
}

impl MessageContext {
    #[must_use]
    pub fn new(source_prefix: GuidPrefix) -> Self {
        Self {
            source_prefix,
            source_timestamp: None,
            reception_timestamp: Time::now(),
            unicast_reply_locators: Vec::new(),
            multicast_reply_locators: Vec::new(),
        }
    }
}

/// Participant services a reader is created with.
pub(crate) struct ReaderContext<'a> {
    pub sender: Arc<MessageSender>,
    pub events: &'a EventService,
    pub listener: Option<Arc<dyn ReaderListener>>,
    pub filter: Option<Arc<dyn ContentFilter>>,
}

/// Instance of a serialized key (payload after the encapsulation header).
fn key_handle(payload: &[u8]) -> InstanceHandle {
    match payload.get(4..) {
        Some(key) if !key.is_empty() => InstanceHandle::from_key(key),
        _ => InstanceHandle::NIL,
    }
}

/// Change carried by a DATA or DATA_FRAG, minus the payload.
pub(crate) fn change_header(
    writer: Guid,
    seq: SequenceNumber,
    inline_qos: Option<&InlineQos>,
    key_only: bool,
    ctx: &MessageContext,
) -> CacheChange {
    let qos = inline_qos.copied().unwrap_or_default();
    let kind = match qos.status_info {
        Some(status) => ChangeKind::from_status_info(status),
        None if key_only => ChangeKind::NotAliveDisposed,
        None => ChangeKind::Alive,
    };
    let mut change = CacheChange::new(
        kind,
        writer,
        qos.key_hash.unwrap_or(InstanceHandle::NIL),
        SerializedPayload::empty(),
    );
    change.sequence_number = seq;
    change.source_timestamp = ctx.source_timestamp;
    change.reception_timestamp = Some(ctx.reception_timestamp);
    change.related_sample_identity = qos.related_sample_identity;
    change.ownership_strength = qos.ownership_strength;
    change
}

/// Complete change of a DATA submessage.
pub(crate) fn change_from_data(writer: Guid, data: &DataSubmessage<'_>, ctx: &MessageContext) -> CacheChange {
    let mut change = change_header(writer, data.writer_sn, data.inline_qos.as_ref(), data.key_only, ctx);
    if let Some(payload) = data.serialized_payload {
        change.serialized_payload = SerializedPayload::from_vec(payload.to_vec());
    }
    fill_key_from_payload(&mut change, data.key_only);
    change
}

/// Key-only samples without a key hash carry the key as payload.
pub(crate) fn fill_key_from_payload(change: &mut CacheChange, key_only: bool) {
    if key_only && change.instance_handle.is_nil() {
        change.instance_handle = key_handle(change.serialized_payload.as_slice());
    }
}

/// Operations common to stateless and stateful readers.
pub trait RtpsReader: Send + Sync {
    fn guid(&self) -> Guid;

    fn attributes(&self) -> &ReaderAttributes;

    fn history(&self) -> &ReaderHistory;

    /// Run a received change through the reader's filters and admit it.
    /// Returns true when it reached the history.
    fn process_data_message(&self, change: CacheChange) -> bool;

    /// DATA submessage from `ctx.source_prefix`.
    fn process_data(&self, data: &DataSubmessage<'_>, ctx: &MessageContext) -> bool {
        let writer = Guid::new(ctx.source_prefix, data.writer_id);
        self.process_data_message(change_from_data(writer, data, ctx))
    }

    /// DATA_FRAG submessage; true when it completed a sample that was
    /// admitted.
    fn process_data_frag(&self, frag: &DataFragSubmessage<'_>, ctx: &MessageContext) -> bool;

    fn process_heartbeat(&self, heartbeat: &HeartbeatSubmessage, ctx: &MessageContext) {
        let _ = (heartbeat, ctx);
    }

    fn process_gap(&self, gap: &GapSubmessage, ctx: &MessageContext) {
        let _ = (gap, ctx);
    }

    fn process_heartbeat_frag(&self, heartbeat_frag: &HeartbeatFragSubmessage, ctx: &MessageContext) {
        let _ = (heartbeat_frag, ctx);
    }

    fn matched_writer_add(&self, writer: RemoteWriterInfo) -> Result<()>;

    fn matched_writer_remove(&self, writer: &Guid) -> bool;

    fn matched_writer_count(&self) -> usize;

    /// Whether data from `writer` is processed by this reader.
    fn accepts_writer(&self, writer: &Guid) -> bool;

    fn read_next_sample(&self) -> Option<(CacheChange, SampleInfo)> {
        self.history().read_next_sample()
    }

    fn take_next_sample(&self) -> Option<(CacheChange, SampleInfo)> {
        self.history().take_next_sample()
    }

    /// Wait until an unread sample is available. `Ok(false)` on timeout.
    fn wait_for_unread_message(&self, timeout: Duration) -> Result<bool> {
        Ok(self.history().wait_for_unread_message(timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EntityId;
    use crate::messages::params::status_info;
    use std::net::Ipv4Addr;

    fn writer_guid() -> Guid {
        Guid::new(GuidPrefix([4; 12]), EntityId::new(1, 0x02))
    }

    #[test]
    fn test_remote_writer_validation() {
        RemoteWriterInfo::new(writer_guid())
            .with_unicast_locator(Locator::udpv4(Ipv4Addr::LOCALHOST, 7411))
            .validate()
            .expect("valid writer");
        let reader_guid = Guid::new(GuidPrefix([4; 12]), EntityId::new(1, 0x07));
        assert!(RemoteWriterInfo::new(reader_guid).validate().is_err());
        assert!(RemoteWriterInfo::new(writer_guid())
            .with_unicast_locator(Locator::INVALID)
            .validate()
            .is_err());
    }

    #[test]
    fn test_reader_attributes_validate() {
        ReaderAttributes::reliable().validate().expect("defaults valid");
        let mut attrs = ReaderAttributes::default();
        attrs.max_partial_samples = 0;
        assert!(matches!(attrs.validate(), Err(Error::InvalidQos(_))));
    }

    #[test]
    fn test_change_from_data_decodes_inline_qos() {
        let ctx = MessageContext::new(writer_guid().prefix);
        let key = InstanceHandle::from_key(&[0, 0, 0, 9]);
        let data = DataSubmessage {
            reader_id: EntityId::UNKNOWN,
            writer_id: writer_guid().entity_id,
            writer_sn: SequenceNumber(4),
            inline_qos: Some(InlineQos {
                key_hash: Some(key),
                status_info: Some(status_info::UNREGISTERED),
                ownership_strength: Some(7),
                ..InlineQos::default()
            }),
            key_only: true,
            serialized_payload: Some(&[0, 1, 0, 0, 0, 0, 0, 9]),
        };
        let change = change_from_data(writer_guid(), &data, &ctx);
        assert_eq!(change.kind, ChangeKind::NotAliveUnregistered);
        assert_eq!(change.instance_handle, key);
        assert_eq!(change.ownership_strength, Some(7));
        assert_eq!(change.sequence_number, SequenceNumber(4));
    }

    #[test]
    fn test_key_only_without_hash_uses_payload_key() {
        let ctx = MessageContext::new(writer_guid().prefix);
        let data = DataSubmessage {
            reader_id: EntityId::UNKNOWN,
            writer_id: writer_guid().entity_id,
            writer_sn: SequenceNumber(1),
            inline_qos: None,
            key_only: true,
            serialized_payload: Some(&[0, 1, 0, 0, 0, 0, 0, 3]),
        };
        let change = change_from_data(writer_guid(), &data, &ctx);
        assert_eq!(change.kind, ChangeKind::NotAliveDisposed);
        assert_eq!(change.instance_handle, InstanceHandle::from_key(&[0, 0, 0, 3]));
    }

    #[test]
    fn test_closure_is_a_content_filter() {
        let filter: Arc<dyn ContentFilter> = Arc::new(|c: &CacheChange| c.payload_len() > 4);
        let small = CacheChange::new(
            ChangeKind::Alive,
            writer_guid(),
            InstanceHandle::NIL,
            SerializedPayload::from_vec(vec![0, 1, 0, 0]),
        );
        assert!(!filter.accepts(&small));
    }
}
