// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stateful writer: one [`ReaderProxy`] per matched reader.
//!
//! Reliable readers are driven by a periodic HEARTBEAT (armed while any of
//! them has unacknowledged changes), answer with ACKNACKs, and get
//! retransmissions or GAPs in return. Lock order is writer state, then
//! history; the flow controller is never called with the state lock held.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::base::{WriterBase, WriterContext};
use super::{RemoteReaderInfo, RtpsWriter, WriterAttributes};
use crate::config::LIVELINESS_ASSERT_FRACTION;
use crate::core::{
    CacheChange, ChangeKind, EntityId, Guid, GuidPrefix, InstanceHandle, Locator, SequenceNumber,
    WriteParams,
};
use crate::events::{TimedEvent, TimerAction};
use crate::flow::{DeliveryResult, FlowClient};
use crate::history::WriterHistory;
use crate::messages::{AckNackSubmessage, GapSubmessage, MessageBuilder, NackFragSubmessage, Submessage};
use crate::qos::LivelinessKind;
use crate::reliability::{ChangeStatus, ReaderProxy};
use crate::Result;

struct WriterState {
    proxies: BTreeMap<Guid, ReaderProxy>,
    heartbeat_count: u32,
}

impl WriterState {
    fn next_heartbeat_count(&mut self) -> u32 {
        self.heartbeat_count = self.heartbeat_count.wrapping_add(1);
        self.heartbeat_count
    }
}

/// One reader a sample goes to, copied out of its proxy.
struct Target {
    guid: Guid,
    locators: Vec<Locator>,
    expects_inline_qos: bool,
    reliable: bool,
    low_mark: SequenceNumber,
    /// Newer changes still wait to be sent to this reader.
    more_unsent: bool,
    fragments: Option<Vec<u32>>,
}

pub struct StatefulWriter {
    base: WriterBase,
    state: Mutex<WriterState>,
    acked: Condvar,
    heartbeat: TimedEvent,
    nack_response: TimedEvent,
    liveliness: Option<TimedEvent>,
    deadline: Option<TimedEvent>,
}

impl StatefulWriter {
    pub(crate) fn new(guid: Guid, attrs: WriterAttributes, ctx: &WriterContext<'_>) -> Result<Arc<Self>> {
        let mut base = WriterBase::new(guid, attrs, ctx)?;
        let events = ctx.events;
        let writer = Arc::new_cyclic(|weak: &Weak<Self>| {
            let client: Weak<dyn FlowClient> = weak.clone();
            base.register_flow(client);

            let w = weak.clone();
            let heartbeat = events.register(base.attrs.heartbeat_period, move || {
                w.upgrade().map_or(TimerAction::Done, |w| w.on_heartbeat_timer())
            });
            let w = weak.clone();
            let nack_response = events.register(base.attrs.nack_response_delay, move || {
                w.upgrade().map_or(TimerAction::Done, |w| w.on_nack_response_timer())
            });
            let liveliness = (base.attrs.liveliness.has_lease()
                && base.attrs.liveliness.kind == LivelinessKind::Automatic)
                .then(|| {
                    let w = weak.clone();
                    let period = base.attrs.liveliness.lease_duration / LIVELINESS_ASSERT_FRACTION;
                    let event = events.register(period, move || match w.upgrade() {
                        Some(w) => {
                            w.assert_liveliness();
                            TimerAction::Restart
                        }
                        None => TimerAction::Done,
                    });
                    event.restart();
                    event
                });
            let deadline = base.attrs.deadline.is_enforced().then(|| {
                let w = weak.clone();
                let event = events.register(base.attrs.deadline.period, move || {
                    w.upgrade()
                        .map_or(TimerAction::Done, |w| w.base.check_deadlines())
                });
                event.restart();
                event
            });

            Self {
                base,
                state: Mutex::new(WriterState {
                    proxies: BTreeMap::new(),
                    heartbeat_count: 0,
                }),
                acked: Condvar::new(),
                heartbeat,
                nack_response,
                liveliness,
                deadline,
            }
        });
        log::debug!(
            "[StatefulWriter::new] {} reliability={:?} durability={:?} fragment_size={}",
            guid,
            writer.base.attrs.reliability,
            writer.base.attrs.durability,
            writer.base.fragment_size
        );
        Ok(writer)
    }

    fn low_mark(&self, state: &WriterState) -> SequenceNumber {
        state
            .proxies
            .values()
            .map(ReaderProxy::changes_low_mark)
            .min()
            .unwrap_or_else(|| self.base.history.last_sequence_number())
    }

    fn publish_ack_progress(&self, mark: SequenceNumber) {
        self.base.apply_ack_progress(mark);
        self.acked.notify_all();
    }

    /// Acknowledged mark of one matched reader.
    #[must_use]
    pub fn reader_low_mark(&self, reader: &Guid) -> Option<SequenceNumber> {
        self.state.lock().proxies.get(reader).map(ReaderProxy::changes_low_mark)
    }

    #[must_use]
    pub fn is_matched(&self, reader: &Guid) -> bool {
        self.state.lock().proxies.contains_key(reader)
    }

    /// Offered deadline misses reported so far.
    #[must_use]
    pub fn deadline_missed_total(&self) -> u64 {
        self.base.deadline_missed_total()
    }

    /// True while the periodic deadline check runs.
    #[must_use]
    pub fn deadline_check_armed(&self) -> bool {
        self.deadline.as_ref().is_some_and(TimedEvent::is_armed)
    }

    /// True while automatic liveliness is asserted periodically.
    #[must_use]
    pub fn liveliness_armed(&self) -> bool {
        self.liveliness.as_ref().is_some_and(TimedEvent::is_armed)
    }

    fn send_all(&self, outgoing: Vec<(MessageBuilder, Vec<Locator>)>) {
        for (builder, locators) in outgoing {
            self.base.sender.send(builder, &locators);
        }
    }

    fn on_heartbeat_timer(&self) -> TimerAction {
        let now = Instant::now();
        let mut lost = Vec::new();
        let mut outgoing = Vec::new();
        let (mark, pending) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.proxies.retain(|guid, proxy| {
                let alive = proxy.is_alive(now);
                if !alive {
                    lost.push(*guid);
                }
                alive
            });
            let mut pending = false;
            let mut count = state.heartbeat_count;
            for proxy in state.proxies.values_mut() {
                proxy.update_underway(now);
                if !proxy.is_reliable() || !proxy.has_unacknowledged_changes() {
                    continue;
                }
                pending = true;
                count = count.wrapping_add(1);
                let hb = self.base.heartbeat(
                    proxy.guid().entity_id,
                    proxy.changes_low_mark(),
                    count,
                    false,
                    false,
                );
                let mut builder = self.base.sender.builder();
                builder.set_destination(proxy.guid().prefix);
                match builder.add(&Submessage::Heartbeat(hb)) {
                    Ok(()) => outgoing.push((builder, proxy.unicast_locators().to_vec())),
                    Err(e) => log::warn!("[StatefulWriter::on_heartbeat_timer] {}", e),
                }
            }
            state.heartbeat_count = count;
            (self.low_mark(state), pending)
        };
        self.send_all(outgoing);
        for reader in lost {
            log::info!(
                "[StatefulWriter::on_heartbeat_timer] {} lost reader {} (lease expired)",
                self.base.guid,
                reader
            );
            if let Some(listener) = &self.base.listener {
                listener.on_reader_lost(self.base.guid, reader);
            }
        }
        self.publish_ack_progress(mark);
        if pending {
            TimerAction::Restart
        } else {
            TimerAction::Done
        }
    }

    fn on_nack_response_timer(&self) -> TimerAction {
        let requested: BTreeSet<SequenceNumber> = self
            .state
            .lock()
            .proxies
            .values()
            .flat_map(ReaderProxy::requested_changes)
            .collect();
        for seq in requested {
            self.base.flow.add_old_sample(self.base.flow_id, seq);
        }
        TimerAction::Done
    }

    /// Encode `change` for one group of readers sharing a participant and
    /// locators, with a piggyback HEARTBEAT once they are caught up.
    fn build_group(
        &self,
        change: &CacheChange,
        members: &[Target],
        state: &mut WriterState,
    ) -> Result<MessageBuilder> {
        let prefix = members[0].guid.prefix;
        let reader_id = if members.len() == 1 {
            members[0].guid.entity_id
        } else {
            EntityId::UNKNOWN
        };
        let mut builder = self.base.sender.builder();
        builder.set_destination(prefix);
        let inline = members.iter().any(|t| t.expects_inline_qos);
        self.base.encode_change(
            &mut builder,
            change,
            reader_id,
            inline,
            members[0].fragments.as_deref(),
        )?;

        let reliable: Vec<&Target> = members.iter().filter(|t| t.reliable).collect();
        if !reliable.is_empty() && reliable.iter().all(|t| !t.more_unsent) {
            let low = reliable
                .iter()
                .map(|t| t.low_mark)
                .min()
                .unwrap_or(SequenceNumber::ZERO);
            let count = state.next_heartbeat_count();
            let hb = self.base.heartbeat(reader_id, low, count, false, false);
            builder.add(&Submessage::Heartbeat(hb))?;
        }
        Ok(builder)
    }
}

impl Drop for StatefulWriter {
    fn drop(&mut self) {
        self.base.flow.unregister_writer(self.base.flow_id);
    }
}

impl FlowClient for StatefulWriter {
    fn deliver_sample(&self, seq: SequenceNumber, budget: Option<usize>) -> DeliveryResult {
        let Some(change) = self.base.history.find_change(seq) else {
            return DeliveryResult::Gone;
        };
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut groups: Vec<Vec<Target>> = Vec::new();
        for proxy in state.proxies.values_mut() {
            let full = matches!(
                proxy.status(seq),
                Some(ChangeStatus::Unsent | ChangeStatus::Requested)
            );
            let fragments = if full {
                None
            } else {
                match proxy.take_requested_fragments(seq) {
                    Some(frags) => Some(frags),
                    None => continue,
                }
            };
            let target = Target {
                guid: proxy.guid(),
                locators: proxy.unicast_locators().to_vec(),
                expects_inline_qos: proxy.expects_inline_qos(),
                reliable: proxy.is_reliable(),
                low_mark: proxy.changes_low_mark(),
                more_unsent: proxy.unsent_changes().iter().any(|s| *s > seq),
                fragments,
            };
            let slot = if target.fragments.is_none() {
                groups.iter().position(|g| {
                    g[0].fragments.is_none()
                        && g[0].guid.prefix == target.guid.prefix
                        && g[0].locators == target.locators
                })
            } else {
                None
            };
            match slot {
                Some(i) => groups[i].push(target),
                None => groups.push(vec![target]),
            }
        }
        if groups.is_empty() {
            return DeliveryResult::Gone;
        }

        let mut outgoing = Vec::with_capacity(groups.len());
        let mut needed = 0;
        for members in &groups {
            match self.build_group(&change, members, state) {
                Ok(builder) => {
                    let datagrams = builder.finish();
                    needed += datagrams.iter().map(Vec::len).sum::<usize>() * members[0].locators.len();
                    outgoing.push((datagrams, members[0].locators.clone()));
                }
                Err(e) => {
                    log::error!("[StatefulWriter::deliver_sample] {} seq={}: {}", self.base.guid, seq, e);
                    return DeliveryResult::Gone;
                }
            }
        }
        if budget.is_some_and(|b| needed > b) {
            for target in groups.iter().flatten() {
                if let (Some(frags), Some(proxy)) = (&target.fragments, state.proxies.get_mut(&target.guid)) {
                    proxy.request_fragments(seq, frags.iter().copied());
                }
            }
            return DeliveryResult::Deferred { needed };
        }
        for target in groups.iter().flatten().filter(|t| t.fragments.is_none()) {
            if let Some(proxy) = state.proxies.get_mut(&target.guid) {
                proxy.mark_sent(seq, now);
            }
        }
        let mark = self.low_mark(state);
        drop(guard);

        let mut bytes = 0;
        for (datagrams, locators) in outgoing {
            bytes += self.base.sender.send_datagrams(datagrams, &locators).0;
        }
        log::trace!(
            "[StatefulWriter::deliver_sample] {} seq={} groups={} bytes={}",
            self.base.guid,
            seq,
            groups.len(),
            bytes
        );
        self.publish_ack_progress(mark);
        DeliveryResult::Delivered { bytes }
    }
}

impl RtpsWriter for StatefulWriter {
    fn guid(&self) -> Guid {
        self.base.guid
    }

    fn attributes(&self) -> &WriterAttributes {
        &self.base.attrs
    }

    fn history(&self) -> &WriterHistory {
        &self.base.history
    }

    fn new_change(&self, kind: ChangeKind, data: &[u8], instance: InstanceHandle) -> Result<CacheChange> {
        self.base.new_change(kind, data, instance)
    }

    fn write_with_params(&self, change: CacheChange, params: WriteParams) -> Result<SequenceNumber> {
        let _serial = self.base.write_lock.lock();
        let added = self.base.admit(change, params)?;
        let seq = added.sequence_number;
        let (mark, matched, any_reliable) = {
            let mut state = self.state.lock();
            for proxy in state.proxies.values_mut() {
                for evicted in &added.evicted {
                    proxy.change_removed(*evicted);
                }
                proxy.add_change(seq);
            }
            (
                self.low_mark(&state),
                !state.proxies.is_empty(),
                state.proxies.values().any(ReaderProxy::is_reliable),
            )
        };
        if any_reliable {
            self.heartbeat.arm_if_idle();
        }
        if matched {
            self.base
                .flow
                .add_new_sample(self.base.flow_id, seq, self.base.attrs.max_blocking_time);
        }
        self.publish_ack_progress(mark);
        Ok(seq)
    }

    fn remove_change(&self, seq: SequenceNumber) -> bool {
        if !self.base.remove_change(seq) {
            return false;
        }
        let mark = {
            let mut state = self.state.lock();
            for proxy in state.proxies.values_mut() {
                proxy.change_removed(seq);
            }
            self.low_mark(&state)
        };
        self.publish_ack_progress(mark);
        true
    }

    fn matched_reader_add(&self, reader: RemoteReaderInfo) -> Result<()> {
        reader.validate()?;
        let guid = reader.guid;
        let history = &self.base.history;
        let replay = reader.durability.replays_history() && self.base.attrs.durability.replays_history();
        let replayed = if replay {
            history.sequence_numbers_from(SequenceNumber::ONE)
        } else {
            Vec::new()
        };
        let acked_up_to = match replayed.first() {
            Some(first) => first.prev(),
            None => history.last_sequence_number(),
        };

        let mut proxy = ReaderProxy::new(reader, acked_up_to, self.base.attrs.nack_suppression_duration);
        for seq in &replayed {
            proxy.add_replayed_change(*seq);
        }
        let reliable = proxy.is_reliable();
        let announce = {
            let mut state = self.state.lock();
            if state.proxies.contains_key(&guid) {
                log::debug!("[StatefulWriter::matched_reader_add] {} already matched", guid);
                return Ok(());
            }
            let announce = (reliable && replayed.is_empty()).then(|| {
                let count = state.next_heartbeat_count();
                (
                    self.base.heartbeat(guid.entity_id, acked_up_to, count, false, false),
                    proxy.unicast_locators().to_vec(),
                )
            });
            state.proxies.insert(guid, proxy);
            announce
        };
        log::debug!(
            "[StatefulWriter::matched_reader_add] {} <- reader {} reliable={} replay={}",
            self.base.guid,
            guid,
            reliable,
            replayed.len()
        );

        if let Some((hb, locators)) = announce {
            let mut builder = self.base.sender.builder();
            builder.set_destination(guid.prefix);
            builder.add(&Submessage::Heartbeat(hb))?;
            self.base.sender.send(builder, &locators);
        }
        for seq in replayed {
            self.base.flow.add_old_sample(self.base.flow_id, seq);
        }
        if reliable {
            self.heartbeat.arm_if_idle();
        }
        Ok(())
    }

    fn matched_reader_remove(&self, reader: &Guid) -> bool {
        let (removed, mark) = {
            let mut state = self.state.lock();
            let removed = state.proxies.remove(reader).is_some();
            (removed, self.low_mark(&state))
        };
        if removed {
            log::debug!("[StatefulWriter::matched_reader_remove] {} -x reader {}", self.base.guid, reader);
            self.publish_ack_progress(mark);
        }
        removed
    }

    fn matched_reader_count(&self) -> usize {
        self.state.lock().proxies.len()
    }

    fn is_acked_by_all(&self, seq: SequenceNumber) -> bool {
        self.state.lock().proxies.values().all(|p| p.is_acked(seq))
    }

    fn wait_for_acknowledgments(&self, timeout: Duration) -> Result<bool> {
        let target = self.base.history.last_sequence_number();
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            if state.proxies.values().all(|p| p.changes_low_mark() >= target) {
                return Ok(true);
            }
            match deadline {
                Some(deadline) => {
                    if self.acked.wait_until(&mut state, deadline).timed_out() {
                        return Ok(state.proxies.values().all(|p| p.changes_low_mark() >= target));
                    }
                }
                None => self.acked.wait(&mut state),
            }
        }
    }

    fn assert_liveliness(&self) {
        let outgoing: Vec<(MessageBuilder, Vec<Locator>)> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut count = state.heartbeat_count;
            let mut outgoing = Vec::new();
            for proxy in state.proxies.values() {
                count = count.wrapping_add(1);
                let hb = self.base.heartbeat(
                    proxy.guid().entity_id,
                    proxy.changes_low_mark(),
                    count,
                    true,
                    true,
                );
                let mut builder = self.base.sender.builder();
                builder.set_destination(proxy.guid().prefix);
                if builder.add(&Submessage::Heartbeat(hb)).is_ok() {
                    outgoing.push((builder, proxy.unicast_locators().to_vec()));
                }
            }
            state.heartbeat_count = count;
            outgoing
        };
        log::trace!("[StatefulWriter::assert_liveliness] {} to {} reader(s)", self.base.guid, outgoing.len());
        self.send_all(outgoing);
    }

    fn on_acknack(&self, source: GuidPrefix, acknack: &AckNackSubmessage) {
        let reader_guid = Guid::new(source, acknack.reader_id);
        let now = Instant::now();
        let history = &self.base.history;
        let (present, gaps, heartbeat, locators, mark) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(proxy) = state.proxies.get_mut(&reader_guid) else {
                log::trace!("[StatefulWriter::on_acknack] {} from unmatched {}", self.base.guid, reader_guid);
                return;
            };
            if !proxy.is_reliable() || !proxy.check_acknack_count(acknack.count) {
                return;
            }
            proxy.touch(now);
            proxy.acked_changes_set(acknack.reader_sn_state.base());
            let requested = proxy.requested_changes_set(&acknack.reader_sn_state, now);
            let (present, missing): (Vec<_>, Vec<_>) =
                requested.into_iter().partition(|seq| history.contains(*seq));
            for seq in &present {
                if proxy.status(*seq).is_none() {
                    proxy.set_requested(*seq);
                }
            }
            for seq in &missing {
                proxy.change_removed(*seq);
            }
            let low = proxy.changes_low_mark();
            let locators = proxy.unicast_locators().to_vec();
            let gaps = GapSubmessage::covering(acknack.reader_id, self.base.guid.entity_id, &missing);
            let heartbeat = (!acknack.final_flag && present.is_empty() && gaps.is_empty()).then(|| {
                let count = state.next_heartbeat_count();
                self.base.heartbeat(acknack.reader_id, low, count, true, false)
            });
            (present, gaps, heartbeat, locators, self.low_mark(state))
        };

        if !gaps.is_empty() || heartbeat.is_some() {
            let mut builder = self.base.sender.builder();
            builder.set_destination(source);
            for gap in gaps {
                if let Err(e) = builder.add(&Submessage::Gap(gap)) {
                    log::warn!("[StatefulWriter::on_acknack] GAP: {}", e);
                }
            }
            if let Some(hb) = heartbeat {
                if let Err(e) = builder.add(&Submessage::Heartbeat(hb)) {
                    log::warn!("[StatefulWriter::on_acknack] HEARTBEAT: {}", e);
                }
            }
            self.base.sender.send(builder, &locators);
        }
        if !present.is_empty() {
            if self.base.attrs.nack_response_delay.is_zero() {
                for seq in present {
                    self.base.flow.add_old_sample(self.base.flow_id, seq);
                }
            } else {
                self.nack_response.arm_if_idle();
            }
        }
        self.publish_ack_progress(mark);
    }

    fn on_nack_frag(&self, source: GuidPrefix, nack_frag: &NackFragSubmessage) {
        let reader_guid = Guid::new(source, nack_frag.reader_id);
        let seq = nack_frag.writer_sn;
        let held = self.base.history.contains(seq);
        let gap_to = {
            let mut state = self.state.lock();
            let Some(proxy) = state.proxies.get_mut(&reader_guid) else {
                return;
            };
            if !proxy.is_reliable() || !proxy.check_nackfrag_count(nack_frag.count) {
                return;
            }
            proxy.touch(Instant::now());
            if held {
                proxy.request_fragments(seq, nack_frag.fragment_number_state.iter());
                None
            } else {
                proxy.change_removed(seq);
                Some(proxy.unicast_locators().to_vec())
            }
        };
        match gap_to {
            None => self.base.flow.add_old_sample(self.base.flow_id, seq),
            Some(locators) => {
                let mut builder = self.base.sender.builder();
                builder.set_destination(source);
                for gap in GapSubmessage::covering(nack_frag.reader_id, self.base.guid.entity_id, &[seq]) {
                    if builder.add(&Submessage::Gap(gap)).is_err() {
                        return;
                    }
                }
                self.base.sender.send(builder, &locators);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Locator;
    use crate::events::EventService;
    use crate::flow::{FlowController, FlowControllerDescriptor, PublishMode};
    use crate::history::HistoryAttributes;
    use crate::messages::{kind, SequenceNumberSet};
    use crate::pool::{HeapPayloadPool, PoolConfig};
    use crate::qos::{Durability, Reliability};
    use crate::security::PassThrough;
    use crate::sender::testing::Capture;
    use crate::sender::MessageSender;
    use std::net::Ipv4Addr;

    const READER_PREFIX: GuidPrefix = GuidPrefix([9; 12]);

    fn reader_guid() -> Guid {
        Guid::new(READER_PREFIX, EntityId::new(1, 0x07))
    }

    fn reader(reliability: Reliability) -> RemoteReaderInfo {
        RemoteReaderInfo::new(reader_guid())
            .with_unicast_locator(Locator::udpv4(Ipv4Addr::LOCALHOST, 7411))
            .with_reliability(reliability)
    }

    fn writer(attrs: WriterAttributes) -> (EventService, Arc<Capture>, Arc<StatefulWriter>) {
        let events = EventService::new("test-events").expect("event thread");
        let capture = Arc::new(Capture::default());
        let ctx = WriterContext {
            sender: Arc::new(MessageSender::new(
                GuidPrefix([2; 12]),
                capture.clone(),
                Arc::new(PassThrough),
                1400,
            )),
            flow: FlowController::new(
                FlowControllerDescriptor::new("default").publish_mode(PublishMode::PureSync),
            )
            .expect("flow"),
            events: &events,
            pool: Arc::new(HeapPayloadPool::new(PoolConfig::default())),
            datasharing: None,
            persistence: None,
            listener: None,
        };
        let writer = StatefulWriter::new(Guid::new(GuidPrefix([2; 12]), EntityId::new(1, 0x03)), attrs, &ctx)
            .expect("writer");
        (events, capture, writer)
    }

    fn write(writer: &StatefulWriter, byte: u8) -> SequenceNumber {
        let change = writer
            .new_change(ChangeKind::Alive, &[0, 1, 0, 0, byte], InstanceHandle::NIL)
            .expect("change");
        writer.write(change).expect("write")
    }

    fn acknack(base: i64, missing: &[i64], count: u32) -> AckNackSubmessage {
        let mut set = SequenceNumberSet::empty(SequenceNumber(base));
        for seq in missing {
            set.insert(SequenceNumber(*seq));
        }
        AckNackSubmessage {
            reader_id: reader_guid().entity_id,
            writer_id: EntityId::new(1, 0x03),
            reader_sn_state: set,
            count,
            final_flag: missing.is_empty(),
        }
    }

    #[test]
    fn test_reliable_write_sends_data_and_heartbeat() {
        let attrs = WriterAttributes::reliable().with_history(HistoryAttributes::keep_last(10));
        let (_events, capture, writer) = writer(attrs);
        writer.matched_reader_add(reader(Reliability::Reliable)).expect("match");
        assert_eq!(capture.drain_kinds(), vec![kind::INFO_DST, kind::HEARTBEAT]);

        let seq = write(&writer, 1);
        let kinds = capture.drain_kinds();
        assert!(kinds.contains(&kind::DATA));
        assert_eq!(kinds.last(), Some(&kind::HEARTBEAT));
        assert!(!writer.is_acked_by_all(seq));

        writer.on_acknack(READER_PREFIX, &acknack(2, &[], 1));
        assert!(writer.is_acked_by_all(seq));
        assert!(writer
            .wait_for_acknowledgments(Duration::from_millis(10))
            .expect("wait"));
        // VOLATILE: acknowledged changes leave the history.
        assert!(writer.history().is_empty());
    }

    #[test]
    fn test_nack_retransmits_and_duplicate_count_ignored() {
        let attrs = WriterAttributes::reliable()
            .with_history(HistoryAttributes::keep_last(10))
            .with_nack_response_delay(Duration::ZERO);
        let (_events, capture, writer) = writer(attrs);
        writer.matched_reader_add(reader(Reliability::Reliable)).expect("match");
        for i in 0..3 {
            write(&writer, i);
        }
        capture.drain_kinds();

        writer.on_acknack(READER_PREFIX, &acknack(2, &[2], 1));
        let mut resent = Vec::new();
        capture.drain(|_, s| {
            if let Submessage::Data(d) = s {
                resent.push(d.writer_sn);
            }
        });
        assert_eq!(resent, vec![SequenceNumber(2)]);
        assert_eq!(writer.reader_low_mark(&reader_guid()), Some(SequenceNumber(1)));

        writer.on_acknack(READER_PREFIX, &acknack(2, &[2], 1));
        assert!(capture.drain_kinds().is_empty());
    }

    #[test]
    fn test_nack_for_removed_change_gets_gap() {
        let attrs = WriterAttributes::reliable()
            .with_history(HistoryAttributes::keep_last(10))
            .with_nack_response_delay(Duration::ZERO);
        let (_events, capture, writer) = writer(attrs);
        writer.matched_reader_add(reader(Reliability::Reliable)).expect("match");
        for i in 0..3 {
            write(&writer, i);
        }
        assert!(writer.remove_change(SequenceNumber(3)));
        capture.drain_kinds();

        writer.on_acknack(READER_PREFIX, &acknack(2, &[2, 3], 1));
        let mut gaps = Vec::new();
        let mut data = Vec::new();
        capture.drain(|_, s| match s {
            Submessage::Gap(g) => gaps.extend(g.irrelevant()),
            Submessage::Data(d) => data.push(d.writer_sn),
            _ => {}
        });
        assert_eq!(gaps, vec![SequenceNumber(3)]);
        assert_eq!(data, vec![SequenceNumber(2)]);
    }

    #[test]
    fn test_best_effort_reader_acks_on_send() {
        let attrs = WriterAttributes::reliable().with_history(HistoryAttributes::keep_last(10));
        let (_events, capture, writer) = writer(attrs);
        writer.matched_reader_add(reader(Reliability::BestEffort)).expect("match");
        let seq = write(&writer, 7);
        let kinds = capture.drain_kinds();
        assert!(kinds.contains(&kind::DATA));
        assert!(!kinds.contains(&kind::HEARTBEAT));
        assert!(writer.is_acked_by_all(seq));
    }

    #[test]
    fn test_late_joiner_gets_history_replay() {
        let attrs = WriterAttributes::reliable()
            .with_durability(Durability::TransientLocal)
            .with_history(HistoryAttributes::keep_last(10));
        let (_events, capture, writer) = writer(attrs);
        for i in 0..3 {
            write(&writer, i);
        }
        assert_eq!(writer.history().len(), 3);
        writer
            .matched_reader_add(reader(Reliability::Reliable).with_durability(Durability::TransientLocal))
            .expect("match");
        let mut replayed = Vec::new();
        capture.drain(|_, s| {
            if let Submessage::Data(d) = s {
                replayed.push(d.writer_sn.0);
            }
        });
        assert_eq!(replayed, vec![1, 2, 3]);
        assert_eq!(writer.reader_low_mark(&reader_guid()), Some(SequenceNumber(0)));
    }

    #[test]
    fn test_volatile_late_joiner_starts_after_history() {
        let attrs = WriterAttributes::reliable().with_history(HistoryAttributes::keep_last(10));
        let (_events, capture, writer) = writer(attrs);
        write(&writer, 1);
        write(&writer, 2);
        writer.matched_reader_add(reader(Reliability::Reliable)).expect("match");
        let mut hb = None;
        capture.drain(|_, s| {
            if let Submessage::Heartbeat(h) = s {
                hb = Some((h.first_sn.0, h.last_sn.0));
            }
        });
        assert_eq!(hb, Some((3, 2)));
        assert!(writer.matched_reader_remove(&reader_guid()));
        assert!(!writer.matched_reader_remove(&reader_guid()));
        assert_eq!(writer.matched_reader_count(), 0);
    }
}
