// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stateless writer: best-effort delivery to a list of locators.
//!
//! No per-reader state beyond the changes each locator has not been sent
//! yet. Used for discovery-style traffic and for best-effort topics with
//! many readers behind a multicast locator.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::base::{WriterBase, WriterContext};
use super::{RemoteReaderInfo, RtpsWriter, WriterAttributes};
use crate::core::{
    CacheChange, ChangeKind, EntityId, Guid, GuidPrefix, InstanceHandle, Locator, SequenceNumber,
    WriteParams,
};
use crate::events::{TimedEvent, TimerAction};
use crate::flow::{DeliveryResult, FlowClient};
use crate::history::WriterHistory;
use crate::messages::Submessage;
use crate::Result;

#[derive(Debug, Default)]
struct ReaderLocator {
    expects_inline_qos: bool,
    unsent: BTreeSet<SequenceNumber>,
    /// Matched readers reached through this locator, plus one for an
    /// explicit `reader_locator_add`.
    refs: usize,
}

#[derive(Default)]
struct StatelessState {
    locators: BTreeMap<Locator, ReaderLocator>,
    readers: HashMap<Guid, Vec<Locator>>,
    heartbeat_count: u32,
}

pub struct StatelessWriter {
    base: WriterBase,
    state: Mutex<StatelessState>,
    sent: Condvar,
    deadline: Option<TimedEvent>,
}

impl StatelessWriter {
    pub(crate) fn new(guid: Guid, attrs: WriterAttributes, ctx: &WriterContext<'_>) -> Result<Arc<Self>> {
        let mut base = WriterBase::new(guid, attrs, ctx)?;
        let events = ctx.events;
        let writer = Arc::new_cyclic(|weak: &Weak<Self>| {
            let client: Weak<dyn FlowClient> = weak.clone();
            base.register_flow(client);
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
                state: Mutex::new(StatelessState::default()),
                sent: Condvar::new(),
                deadline,
            }
        });
        log::debug!("[StatelessWriter::new] {}", guid);
        Ok(writer)
    }

    /// Send every future change (and the retained history when the writer
    /// replays it) to `locator`.
    pub fn reader_locator_add(&self, locator: Locator, expects_inline_qos: bool) -> Result<()> {
        locator.validate()?;
        let replay = self.add_locator(locator, expects_inline_qos);
        for seq in replay {
            self.base.flow.add_old_sample(self.base.flow_id, seq);
        }
        Ok(())
    }

    /// Drop one reference to `locator`; it is forgotten with the last one.
    pub fn reader_locator_remove(&self, locator: &Locator) -> bool {
        let mark = {
            let mut state = self.state.lock();
            if !Self::release_locator(&mut state, locator) {
                return false;
            }
            self.low_mark(&state)
        };
        self.publish_progress(mark);
        true
    }

    /// Queue the whole retained history again for every locator.
    pub fn unsent_changes_reset(&self) {
        let seqs = self.base.history.sequence_numbers_from(SequenceNumber::ONE);
        {
            let mut state = self.state.lock();
            for rl in state.locators.values_mut() {
                rl.unsent.extend(seqs.iter().copied());
            }
        }
        for seq in seqs {
            self.base.flow.add_old_sample(self.base.flow_id, seq);
        }
    }

    #[must_use]
    pub fn reader_locator_count(&self) -> usize {
        self.state.lock().locators.len()
    }

    /// Offered deadline misses reported so far.
    #[must_use]
    pub fn deadline_missed_total(&self) -> u64 {
        self.base.deadline_missed_total()
    }

    #[must_use]
    pub fn deadline_check_armed(&self) -> bool {
        self.deadline.as_ref().is_some_and(TimedEvent::is_armed)
    }

    fn add_locator(&self, locator: Locator, expects_inline_qos: bool) -> Vec<SequenceNumber> {
        let replay = if self.base.attrs.durability.replays_history() {
            self.base.history.sequence_numbers_from(SequenceNumber::ONE)
        } else {
            Vec::new()
        };
        let mut state = self.state.lock();
        let rl = state.locators.entry(locator).or_default();
        rl.refs += 1;
        rl.expects_inline_qos |= expects_inline_qos;
        if rl.refs > 1 {
            return Vec::new();
        }
        rl.unsent.extend(replay.iter().copied());
        replay
    }

    fn release_locator(state: &mut StatelessState, locator: &Locator) -> bool {
        let Some(rl) = state.locators.get_mut(locator) else {
            return false;
        };
        rl.refs = rl.refs.saturating_sub(1);
        if rl.refs == 0 {
            state.locators.remove(locator);
        }
        true
    }

    /// Everything below the oldest unsent change went out to every locator.
    fn low_mark(&self, state: &StatelessState) -> SequenceNumber {
        let last = self.base.history.last_sequence_number();
        state
            .locators
            .values()
            .filter_map(|rl| rl.unsent.first())
            .min()
            .map_or(last, |first| first.prev())
    }

    fn publish_progress(&self, mark: SequenceNumber) {
        self.base.apply_ack_progress(mark);
        self.sent.notify_all();
    }
}

impl Drop for StatelessWriter {
    fn drop(&mut self) {
        self.base.flow.unregister_writer(self.base.flow_id);
    }
}

impl FlowClient for StatelessWriter {
    fn deliver_sample(&self, seq: SequenceNumber, budget: Option<usize>) -> DeliveryResult {
        let Some(change) = self.base.history.find_change(seq) else {
            return DeliveryResult::Gone;
        };
        let mut state = self.state.lock();
        let targets: Vec<Locator> = state
            .locators
            .iter()
            .filter(|(_, rl)| rl.unsent.contains(&seq))
            .map(|(locator, _)| *locator)
            .collect();
        if targets.is_empty() {
            return DeliveryResult::Gone;
        }
        let inline = targets
            .iter()
            .any(|l| state.locators.get(l).is_some_and(|rl| rl.expects_inline_qos));
        let mut builder = self.base.sender.builder();
        if let Err(e) = self
            .base
            .encode_change(&mut builder, &change, EntityId::UNKNOWN, inline, None)
        {
            log::error!("[StatelessWriter::deliver_sample] {} seq={}: {}", self.base.guid, seq, e);
            return DeliveryResult::Gone;
        }
        let datagrams = builder.finish();
        let needed = datagrams.iter().map(Vec::len).sum::<usize>() * targets.len();
        if budget.is_some_and(|b| needed > b) {
            return DeliveryResult::Deferred { needed };
        }
        for locator in &targets {
            if let Some(rl) = state.locators.get_mut(locator) {
                rl.unsent.remove(&seq);
            }
        }
        let mark = self.low_mark(&state);
        drop(state);

        let (bytes, _) = self.base.sender.send_datagrams(datagrams, &targets);
        self.publish_progress(mark);
        DeliveryResult::Delivered { bytes }
    }
}

impl RtpsWriter for StatelessWriter {
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
        let (mark, matched) = {
            let mut state = self.state.lock();
            for rl in state.locators.values_mut() {
                for evicted in &added.evicted {
                    rl.unsent.remove(evicted);
                }
                rl.unsent.insert(seq);
            }
            (self.low_mark(&state), !state.locators.is_empty())
        };
        if matched {
            self.base
                .flow
                .add_new_sample(self.base.flow_id, seq, self.base.attrs.max_blocking_time);
        }
        self.publish_progress(mark);
        Ok(seq)
    }

    fn remove_change(&self, seq: SequenceNumber) -> bool {
        if !self.base.remove_change(seq) {
            return false;
        }
        let mark = {
            let mut state = self.state.lock();
            for rl in state.locators.values_mut() {
                rl.unsent.remove(&seq);
            }
            self.low_mark(&state)
        };
        self.publish_progress(mark);
        true
    }

    fn matched_reader_add(&self, reader: RemoteReaderInfo) -> Result<()> {
        reader.validate()?;
        if self.state.lock().readers.contains_key(&reader.guid) {
            return Ok(());
        }
        let locators = if reader.multicast_locators.is_empty() {
            reader.unicast_locators.clone()
        } else {
            reader.multicast_locators.clone()
        };
        let replay_for_reader = reader.durability.replays_history();
        let mut replay = BTreeSet::new();
        for locator in &locators {
            let seqs = self.add_locator(*locator, reader.expects_inline_qos);
            if replay_for_reader {
                replay.extend(seqs);
            } else if !seqs.is_empty() {
                // Locator created for a VOLATILE reader: nothing to replay.
                let mut state = self.state.lock();
                if let Some(rl) = state.locators.get_mut(locator) {
                    rl.unsent.clear();
                }
            }
        }
        log::debug!(
            "[StatelessWriter::matched_reader_add] {} <- reader {} via {} locator(s)",
            self.base.guid,
            reader.guid,
            locators.len()
        );
        self.state.lock().readers.insert(reader.guid, locators);
        for seq in replay {
            self.base.flow.add_old_sample(self.base.flow_id, seq);
        }
        Ok(())
    }

    fn matched_reader_remove(&self, reader: &Guid) -> bool {
        let mark = {
            let mut state = self.state.lock();
            let Some(locators) = state.readers.remove(reader) else {
                return false;
            };
            for locator in &locators {
                Self::release_locator(&mut state, locator);
            }
            self.low_mark(&state)
        };
        self.publish_progress(mark);
        true
    }

    fn matched_reader_count(&self) -> usize {
        self.state.lock().readers.len()
    }

    fn is_acked_by_all(&self, seq: SequenceNumber) -> bool {
        self.state
            .lock()
            .locators
            .values()
            .all(|rl| !rl.unsent.contains(&seq))
    }

    /// Best-effort: waits until every change was sent to every locator.
    fn wait_for_acknowledgments(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            if state.locators.values().all(|rl| rl.unsent.is_empty()) {
                return Ok(true);
            }
            match deadline {
                Some(deadline) => {
                    if self.sent.wait_until(&mut state, deadline).timed_out() {
                        return Ok(state.locators.values().all(|rl| rl.unsent.is_empty()));
                    }
                }
                None => self.sent.wait(&mut state),
            }
        }
    }

    fn assert_liveliness(&self) {
        let (hb, locators) = {
            let mut state = self.state.lock();
            state.heartbeat_count = state.heartbeat_count.wrapping_add(1);
            let hb = self.base.heartbeat(
                EntityId::UNKNOWN,
                SequenceNumber::ZERO,
                state.heartbeat_count,
                true,
                true,
            );
            (hb, state.locators.keys().copied().collect::<Vec<_>>())
        };
        let mut builder = self.base.sender.builder();
        builder.set_destination(GuidPrefix::UNKNOWN);
        if builder.add(&Submessage::Heartbeat(hb)).is_ok() {
            self.base.sender.send(builder, &locators);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventService;
    use crate::flow::{FlowController, FlowControllerDescriptor, PublishMode};
    use crate::history::HistoryAttributes;
    use crate::messages::kind;
    use crate::pool::{HeapPayloadPool, PoolConfig};
    use crate::qos::Durability;
    use crate::security::PassThrough;
    use crate::sender::testing::Capture;
    use crate::sender::MessageSender;
    use std::net::Ipv4Addr;

    fn writer(attrs: WriterAttributes) -> (EventService, Arc<Capture>, Arc<StatelessWriter>) {
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
        let writer = StatelessWriter::new(Guid::new(GuidPrefix([2; 12]), EntityId::new(1, 0xC3)), attrs, &ctx)
            .expect("writer");
        (events, capture, writer)
    }

    fn write(writer: &StatelessWriter, byte: u8) -> SequenceNumber {
        let change = writer
            .new_change(ChangeKind::Alive, &[0, 1, 0, 0, byte], InstanceHandle::NIL)
            .expect("change");
        writer.write(change).expect("write")
    }

    #[test]
    fn test_write_goes_to_every_locator() {
        let (_events, capture, writer) = writer(WriterAttributes::best_effort());
        let a = Locator::udpv4(Ipv4Addr::LOCALHOST, 7400);
        let b = Locator::udpv4(Ipv4Addr::LOCALHOST, 7401);
        writer.reader_locator_add(a, false).expect("add a");
        writer.reader_locator_add(b, false).expect("add b");
        let seq = write(&writer, 1);

        let mut destinations = Vec::new();
        capture.drain(|locator, s| {
            if s.kind() == kind::DATA {
                destinations.push(*locator);
            }
        });
        destinations.sort();
        assert_eq!(destinations, vec![a, b]);
        assert!(writer.is_acked_by_all(seq));
        assert!(writer.wait_for_acknowledgments(Duration::ZERO).expect("wait"));
    }

    #[test]
    fn test_reset_resends_retained_history() {
        let attrs = WriterAttributes::best_effort()
            .with_durability(Durability::TransientLocal)
            .with_history(HistoryAttributes::keep_last(5));
        let (_events, capture, writer) = writer(attrs);
        for i in 0..3 {
            write(&writer, i);
        }
        let locator = Locator::udpv4(Ipv4Addr::LOCALHOST, 7400);
        writer.reader_locator_add(locator, false).expect("add");
        assert_eq!(capture.drain_kinds().iter().filter(|k| **k == kind::DATA).count(), 3);

        writer.unsent_changes_reset();
        assert_eq!(capture.drain_kinds().iter().filter(|k| **k == kind::DATA).count(), 3);
    }

    #[test]
    fn test_shared_locator_is_reference_counted() {
        let (_events, _capture, writer) = writer(WriterAttributes::best_effort());
        let multicast = Locator::udpv4(Ipv4Addr::new(239, 255, 0, 1), 7400);
        let r1 = RemoteReaderInfo::new(Guid::new(GuidPrefix([7; 12]), EntityId::new(1, 0xC7)))
            .with_multicast_locator(multicast);
        let r2 = RemoteReaderInfo::new(Guid::new(GuidPrefix([8; 12]), EntityId::new(1, 0xC7)))
            .with_multicast_locator(multicast);
        writer.matched_reader_add(r1.clone()).expect("r1");
        writer.matched_reader_add(r2).expect("r2");
        assert_eq!(writer.reader_locator_count(), 1);
        assert!(writer.matched_reader_remove(&r1.guid));
        assert_eq!(writer.reader_locator_count(), 1);
        assert!(writer.reader_locator_remove(&multicast));
        assert_eq!(writer.reader_locator_count(), 0);
        assert!(!writer.reader_locator_remove(&multicast));
    }
}
