// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound message demultiplexing.
//!
//! [`MessageReceiver::on_receive`] runs on the caller's receive thread:
//!
//! ```text
//! datagram -> SecurityTransform::decode_message -> header
//!   -> per submessage:
//!        INFO_*           update the receiver state (source, timestamp,
//!                         destination, reply locators)
//!        protected kinds  SecurityTransform::decode_submessage, then
//!        DATA, DATA_FRAG, HEARTBEAT, GAP, HEARTBEAT_FRAG  -> readers
//!        ACKNACK, NACK_FRAG                               -> writers
//! ```
//!
//! A malformed submessage is dropped on its own; a malformed header or a
//! truncated submessage ends the message. Nothing here panics on network
//! input.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::core::{EntityId, Guid, GuidPrefix, Locator, Time};
use crate::messages::{parse_message, parse_submessage, RawSubmessage, Submessage, SUBMESSAGE_HEADER_LEN};
use crate::reader::{MessageContext, RtpsReader};
use crate::security::{is_protected_kind, SecurityTransform};
use crate::writer::RtpsWriter;

/// Receive path counters.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub messages: AtomicU64,
    pub submessages: AtomicU64,
    /// Bad header, truncated or undecodable submessages.
    pub malformed: AtomicU64,
    /// Messages and submessages the security transform refused.
    pub security_rejected: AtomicU64,
    /// Submessages addressed to another participant.
    pub foreign: AtomicU64,
    /// Submessages for a local entity that does not exist.
    pub unknown_entity: AtomicU64,
}

/// Point-in-time copy of [`ReceiverStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverSnapshot {
    pub messages: u64,
    pub submessages: u64,
    pub malformed: u64,
    pub security_rejected: u64,
    pub foreign: u64,
    pub unknown_entity: u64,
}

impl ReceiverStats {
    #[must_use]
    pub fn snapshot(&self) -> ReceiverSnapshot {
        ReceiverSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            submessages: self.submessages.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            security_rejected: self.security_rejected.load(Ordering::Relaxed),
            foreign: self.foreign.load(Ordering::Relaxed),
            unknown_entity: self.unknown_entity.load(Ordering::Relaxed),
        }
    }
}

/// State carried across the submessages of one message.
struct ReceiveState {
    ctx: MessageContext,
    destination: GuidPrefix,
}

/// Routes inbound datagrams to the local endpoints of one participant.
pub struct MessageReceiver {
    guid_prefix: GuidPrefix,
    security: Arc<dyn SecurityTransform>,
    readers: DashMap<EntityId, Arc<dyn RtpsReader>>,
    writers: DashMap<EntityId, Arc<dyn RtpsWriter>>,
    stats: ReceiverStats,
}

impl MessageReceiver {
    #[must_use]
    pub fn new(guid_prefix: GuidPrefix, security: Arc<dyn SecurityTransform>) -> Self {
        Self {
            guid_prefix,
            security,
            readers: DashMap::new(),
            writers: DashMap::new(),
            stats: ReceiverStats::default(),
        }
    }

    #[must_use]
    pub fn guid_prefix(&self) -> GuidPrefix {
        self.guid_prefix
    }

    pub fn register_reader(&self, reader: Arc<dyn RtpsReader>) {
        self.readers.insert(reader.guid().entity_id, reader);
    }

    pub fn unregister_reader(&self, entity_id: &EntityId) -> bool {
        self.readers.remove(entity_id).is_some()
    }

    pub fn register_writer(&self, writer: Arc<dyn RtpsWriter>) {
        self.writers.insert(writer.guid().entity_id, writer);
    }

    pub fn unregister_writer(&self, entity_id: &EntityId) -> bool {
        self.writers.remove(entity_id).is_some()
    }

    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    #[must_use]
    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }

    #[must_use]
    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// Process one datagram received from `source` on `destination`.
    pub fn on_receive(&self, bytes: &[u8], source: &Locator, destination: &Locator) {
        self.stats.messages.fetch_add(1, Ordering::Relaxed);
        let message = match self.security.decode_message(bytes) {
            Ok(message) => message,
            Err(e) => {
                self.stats.security_rejected.fetch_add(1, Ordering::Relaxed);
                log::debug!("[MessageReceiver::on_receive] {} -> {}: message rejected: {}", source, destination, e);
                return;
            }
        };
        let (header, submessages) = match parse_message(&message) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                log::debug!("[MessageReceiver::on_receive] {} -> {}: {}", source, destination, e);
                return;
            }
        };
        let mut state = ReceiveState {
            ctx: MessageContext::new(header.guid_prefix),
            destination: self.guid_prefix,
        };
        for raw in submessages {
            let raw = match raw {
                Ok(raw) => raw,
                Err(e) => {
                    self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                    log::debug!("[MessageReceiver::on_receive] {}: {}", source, e);
                    break;
                }
            };
            self.stats.submessages.fetch_add(1, Ordering::Relaxed);
            if is_protected_kind(raw.kind) && self.security.is_active() {
                self.receive_protected(&message, &raw, &mut state);
            } else {
                self.decode_and_dispatch(&raw, &mut state);
            }
        }
    }

    fn receive_protected(&self, message: &[u8], raw: &RawSubmessage<'_>, state: &mut ReceiveState) {
        let whole = &message[raw.offset - SUBMESSAGE_HEADER_LEN..raw.offset + raw.body.len()];
        let clear: Cow<'_, [u8]> = match self.security.decode_submessage(&state.ctx.source_prefix, whole) {
            Ok(clear) => clear,
            Err(e) => {
                self.stats.security_rejected.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "[MessageReceiver::receive_protected] kind=0x{:02x} from {} rejected: {}",
                    raw.kind,
                    state.ctx.source_prefix,
                    e
                );
                return;
            }
        };
        match parse_submessage(&clear) {
            Ok(inner) => self.decode_and_dispatch(&inner, state),
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                log::debug!("[MessageReceiver::receive_protected] decoded submessage: {}", e);
            }
        }
    }

    fn decode_and_dispatch(&self, raw: &RawSubmessage<'_>, state: &mut ReceiveState) {
        match raw.decode() {
            Ok(Some(submessage)) => self.dispatch(submessage, state),
            Ok(None) => {
                log::trace!("[MessageReceiver::dispatch] unknown kind 0x{:02x} skipped", raw.kind);
            }
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "[MessageReceiver::dispatch] kind=0x{:02x} from {}: {}",
                    raw.kind,
                    state.ctx.source_prefix,
                    e
                );
            }
        }
    }

    fn dispatch(&self, submessage: Submessage<'_>, state: &mut ReceiveState) {
        match submessage {
            Submessage::InfoTimestamp(timestamp) => state.ctx.source_timestamp = timestamp,
            Submessage::InfoSource(info) => {
                state.ctx.source_prefix = info.guid_prefix;
                state.ctx.source_timestamp = None;
                state.ctx.unicast_reply_locators.clear();
                state.ctx.multicast_reply_locators.clear();
            }
            Submessage::InfoDestination(prefix) => {
                state.destination = if prefix.is_unknown() { self.guid_prefix } else { prefix };
            }
            Submessage::InfoReply(reply) => {
                state.ctx.unicast_reply_locators = reply.unicast_locators;
                state.ctx.multicast_reply_locators = reply.multicast_locators;
            }
            Submessage::Pad => {}
            other => {
                if state.destination != self.guid_prefix {
                    self.stats.foreign.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                state.ctx.reception_timestamp = Time::now();
                self.route(other, &state.ctx);
            }
        }
    }

    /// Local readers a submessage from `writer` addressed to `reader_id`
    /// goes to.
    fn target_readers(&self, reader_id: EntityId, writer: &Guid) -> Vec<Arc<dyn RtpsReader>> {
        if reader_id == EntityId::UNKNOWN {
            self.readers
                .iter()
                .filter(|r| r.accepts_writer(writer))
                .map(|r| Arc::clone(r.value()))
                .collect()
        } else {
            self.readers
                .get(&reader_id)
                .map(|r| vec![Arc::clone(r.value())])
                .unwrap_or_default()
        }
    }

    fn target_writer(&self, writer_id: EntityId) -> Option<Arc<dyn RtpsWriter>> {
        let writer = self.writers.get(&writer_id).map(|w| Arc::clone(w.value()));
        if writer.is_none() {
            self.stats.unknown_entity.fetch_add(1, Ordering::Relaxed);
            log::trace!("[MessageReceiver::route] no local writer {:?}", writer_id);
        }
        writer
    }

    fn readers_for(&self, reader_id: EntityId, writer_id: EntityId, ctx: &MessageContext) -> Vec<Arc<dyn RtpsReader>> {
        let readers = self.target_readers(reader_id, &Guid::new(ctx.source_prefix, writer_id));
        if readers.is_empty() {
            self.stats.unknown_entity.fetch_add(1, Ordering::Relaxed);
        }
        readers
    }

    fn route(&self, submessage: Submessage<'_>, ctx: &MessageContext) {
        match submessage {
            Submessage::Data(data) => {
                for reader in self.readers_for(data.reader_id, data.writer_id, ctx) {
                    reader.process_data(&data, ctx);
                }
            }
            Submessage::DataFrag(frag) => {
                for reader in self.readers_for(frag.reader_id, frag.writer_id, ctx) {
                    reader.process_data_frag(&frag, ctx);
                }
            }
            Submessage::Heartbeat(heartbeat) => {
                for reader in self.readers_for(heartbeat.reader_id, heartbeat.writer_id, ctx) {
                    reader.process_heartbeat(&heartbeat, ctx);
                }
            }
            Submessage::Gap(gap) => {
                for reader in self.readers_for(gap.reader_id, gap.writer_id, ctx) {
                    reader.process_gap(&gap, ctx);
                }
            }
            Submessage::HeartbeatFrag(heartbeat_frag) => {
                for reader in self.readers_for(heartbeat_frag.reader_id, heartbeat_frag.writer_id, ctx) {
                    reader.process_heartbeat_frag(&heartbeat_frag, ctx);
                }
            }
            Submessage::AckNack(acknack) => {
                if let Some(writer) = self.target_writer(acknack.writer_id) {
                    writer.on_acknack(ctx.source_prefix, &acknack);
                }
            }
            Submessage::NackFrag(nack_frag) => {
                if let Some(writer) = self.target_writer(nack_frag.writer_id) {
                    writer.on_nack_frag(ctx.source_prefix, &nack_frag);
                }
            }
            Submessage::InfoTimestamp(_)
            | Submessage::InfoSource(_)
            | Submessage::InfoDestination(_)
            | Submessage::InfoReply(_)
            | Submessage::Pad => {}
        }
    }
}
