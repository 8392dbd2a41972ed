// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stateless reader: best-effort, any writer accepted.
//!
//! Keeps only the highest sequence number seen per writer, so late or
//! repeated samples are dropped, and never answers HEARTBEATs.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use super::fragments::FragmentAssembler;
use super::ownership::OwnershipTracker;
use super::{
    change_header, fill_key_from_payload, ContentFilter, MessageContext, ReaderAttributes, ReaderContext,
    ReaderListener, RejectReason, RemoteWriterInfo, RtpsReader,
};
use crate::config::MAX_UNMATCHED_WRITERS;
use crate::core::{CacheChange, ChangeKind, Guid, SequenceNumber};
use crate::deadline::DeadlineTracker;
use crate::events::{TimedEvent, TimerAction};
use crate::history::ReaderHistory;
use crate::messages::DataFragSubmessage;
use crate::qos::Reliability;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct WriterEntry {
    last_seq: Option<SequenceNumber>,
    strength: i32,
    /// Announced through `matched_writer_add`.
    matched: bool,
    last_heard: u64,
}

struct StatelessState {
    writers: HashMap<Guid, WriterEntry>,
    ownership: OwnershipTracker,
    fragments: FragmentAssembler,
    arrivals: u64,
}

impl StatelessState {
    /// Entry of a writer heard on the wire. A new unmatched writer beyond
    /// [`MAX_UNMATCHED_WRITERS`] displaces the least recently heard one.
    fn heard_from(&mut self, writer: Guid) -> &mut WriterEntry {
        if !self.writers.contains_key(&writer)
            && self.writers.values().filter(|e| !e.matched).count() >= MAX_UNMATCHED_WRITERS
        {
            self.evict_oldest_unmatched();
        }
        self.arrivals += 1;
        let arrival = self.arrivals;
        let entry = self.writers.entry(writer).or_default();
        entry.last_heard = arrival;
        entry
    }

    fn evict_oldest_unmatched(&mut self) {
        let oldest = self
            .writers
            .iter()
            .filter(|(_, e)| !e.matched)
            .min_by_key(|(_, e)| e.last_heard)
            .map(|(guid, _)| *guid);
        if let Some(writer) = oldest {
            log::debug!("[StatelessReader] forgetting unmatched writer {}", writer);
            self.writers.remove(&writer);
            self.fragments.discard_writer(writer);
            self.ownership.writer_removed(writer);
        }
    }
}

pub struct StatelessReader {
    guid: Guid,
    attrs: ReaderAttributes,
    history: ReaderHistory,
    listener: Option<Arc<dyn ReaderListener>>,
    filter: Option<Arc<dyn ContentFilter>>,
    state: Mutex<StatelessState>,
    deadline: Option<(DeadlineTracker, TimedEvent)>,
}

impl StatelessReader {
    pub(crate) fn new(guid: Guid, attrs: ReaderAttributes, ctx: &ReaderContext<'_>) -> Result<Arc<Self>> {
        if attrs.reliability == Reliability::Reliable {
            return Err(Error::InvalidQos("stateless readers are best-effort".into()));
        }
        attrs.validate()?;
        let history = ReaderHistory::new(attrs.history, attrs.destination_order)?;
        let events = ctx.events;
        let reader = Arc::new_cyclic(|weak: &Weak<Self>| {
            let deadline = attrs.deadline.is_enforced().then(|| {
                let r = weak.clone();
                let event = events.register(attrs.deadline.period, move || {
                    r.upgrade().map_or(TimerAction::Done, |r| r.check_deadlines())
                });
                event.restart();
                (DeadlineTracker::new(attrs.deadline.period), event)
            });
            Self {
                guid,
                state: Mutex::new(StatelessState {
                    writers: HashMap::new(),
                    ownership: OwnershipTracker::new(),
                    fragments: FragmentAssembler::new(attrs.max_partial_samples),
                    arrivals: 0,
                }),
                attrs,
                history,
                listener: ctx.listener.clone(),
                filter: ctx.filter.clone(),
                deadline,
            }
        });
        log::debug!("[StatelessReader::new] {}", guid);
        Ok(reader)
    }

    /// Writers heard from or announced.
    #[must_use]
    pub fn known_writer_count(&self) -> usize {
        self.state.lock().writers.len()
    }

    fn check_deadlines(&self) -> TimerAction {
        let Some((tracker, _)) = &self.deadline else {
            return TimerAction::Done;
        };
        for instance in tracker.check(Instant::now()) {
            if let Some(listener) = &self.listener {
                listener.on_requested_deadline_missed(self.guid, instance);
            }
        }
        TimerAction::Restart
    }
}

impl RtpsReader for StatelessReader {
    fn guid(&self) -> Guid {
        self.guid
    }

    fn attributes(&self) -> &ReaderAttributes {
        &self.attrs
    }

    fn history(&self) -> &ReaderHistory {
        &self.history
    }

    fn process_data_message(&self, change: CacheChange) -> bool {
        let writer = change.writer_guid;
        let seq = change.sequence_number;
        let handle = change.instance_handle;
        let kind = change.kind;
        let mut rejected = None;
        let admitted = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let entry = state.heard_from(writer);
            if entry.last_seq.is_some_and(|last| seq <= last) {
                log::trace!("[StatelessReader::process_data_message] {} old seq={} from {}", self.guid, seq, writer);
                return false;
            }
            entry.last_seq = Some(seq);
            if let Some(strength) = change.ownership_strength {
                entry.strength = strength;
            }
            let strength = entry.strength;
            state.fragments.discard_where(writer, |s| s <= seq);
            if self.filter.as_ref().is_some_and(|f| !f.accepts(&change)) {
                return false;
            }
            if self.attrs.ownership.is_exclusive() && !state.ownership.accept(handle, writer, strength) {
                return false;
            }
            match self.history.add_change(change) {
                Ok(_) => true,
                Err(Error::DuplicateChange) => false,
                Err(Error::ResourceLimitExceeded(limit)) => {
                    log::debug!("[StatelessReader::process_data_message] {} seq={} rejected: {}", self.guid, seq, limit);
                    rejected = Some(RejectReason::ResourceLimit);
                    false
                }
                Err(e) => {
                    log::warn!("[StatelessReader::process_data_message] {} seq={}: {}", self.guid, seq, e);
                    false
                }
            }
        };

        if admitted {
            if matches!(
                kind,
                ChangeKind::NotAliveUnregistered | ChangeKind::NotAliveDisposedUnregistered
            ) {
                self.state.lock().ownership.release(&handle, writer);
            }
            if let Some((tracker, _)) = &self.deadline {
                if kind.is_alive() {
                    tracker.touch(handle, Instant::now());
                } else {
                    tracker.forget(&handle);
                }
            }
        }
        if let Some(listener) = &self.listener {
            if admitted {
                listener.on_data_available(self.guid);
            } else if let Some(reason) = rejected {
                listener.on_sample_rejected(self.guid, writer, seq, reason);
            }
        }
        admitted
    }

    fn process_data_frag(&self, frag: &DataFragSubmessage<'_>, ctx: &MessageContext) -> bool {
        let writer = Guid::new(ctx.source_prefix, frag.writer_id);
        let complete = {
            let mut state = self.state.lock();
            let stale = state
                .writers
                .get(&writer)
                .and_then(|e| e.last_seq)
                .is_some_and(|last| frag.writer_sn <= last);
            if stale {
                return false;
            }
            let header = change_header(writer, frag.writer_sn, frag.inline_qos.as_ref(), frag.key_only, ctx);
            state.fragments.add_fragment(header, frag)
        };
        match complete {
            Some(mut change) => {
                fill_key_from_payload(&mut change, frag.key_only);
                self.process_data_message(change)
            }
            None => false,
        }
    }

    fn matched_writer_add(&self, writer: RemoteWriterInfo) -> Result<()> {
        writer.validate()?;
        let mut state = self.state.lock();
        let entry = state.writers.entry(writer.guid).or_default();
        entry.strength = writer.ownership_strength;
        entry.matched = true;
        log::debug!("[StatelessReader::matched_writer_add] {} <- writer {}", self.guid, writer.guid);
        Ok(())
    }

    fn matched_writer_remove(&self, writer: &Guid) -> bool {
        let removed = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let removed = state.writers.remove(writer).is_some();
            state.fragments.discard_writer(*writer);
            state.ownership.writer_removed(*writer);
            removed
        };
        if removed {
            self.history.writer_unmatched(*writer);
        }
        removed
    }

    fn matched_writer_count(&self) -> usize {
        self.state.lock().writers.values().filter(|e| e.matched).count()
    }

    fn accepts_writer(&self, _writer: &Guid) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, GuidPrefix, InstanceHandle};
    use crate::events::EventService;
    use crate::history::HistoryAttributes;
    use crate::messages::{DataSubmessage, InlineQos};
    use crate::security::PassThrough;
    use crate::sender::testing::Capture;
    use crate::sender::MessageSender;

    fn writer_guid(n: u8) -> Guid {
        Guid::new(GuidPrefix([n; 12]), EntityId::new(1, 0x03))
    }

    fn reader(attrs: ReaderAttributes) -> (EventService, Arc<StatelessReader>) {
        let events = EventService::new("test-events").expect("event thread");
        let ctx = ReaderContext {
            sender: Arc::new(MessageSender::new(
                GuidPrefix([6; 12]),
                Arc::new(Capture::default()),
                Arc::new(PassThrough),
                1400,
            )),
            events: &events,
            listener: None,
            filter: None,
        };
        let reader = StatelessReader::new(Guid::new(GuidPrefix([6; 12]), EntityId::new(1, 0x04)), attrs, &ctx)
            .expect("reader");
        (events, reader)
    }

    fn send(reader: &StatelessReader, from: u8, seq: i64, strength: Option<i32>) -> bool {
        let payload = [0, 1, 0, 0, from];
        let data = DataSubmessage {
            reader_id: EntityId::UNKNOWN,
            writer_id: writer_guid(from).entity_id,
            writer_sn: SequenceNumber(seq),
            inline_qos: Some(InlineQos {
                key_hash: Some(InstanceHandle::from_key(&[7])),
                ownership_strength: strength,
                ..InlineQos::default()
            }),
            key_only: false,
            serialized_payload: Some(&payload[..]),
        };
        reader.process_data(&data, &MessageContext::new(GuidPrefix([from; 12])))
    }

    #[test]
    fn test_any_writer_accepted_old_samples_dropped() {
        let (_events, reader) = reader(ReaderAttributes::best_effort().with_history(HistoryAttributes::keep_last(10)));
        assert!(send(&reader, 1, 5, None));
        assert!(send(&reader, 2, 1, None));
        assert!(!send(&reader, 1, 5, None));
        assert!(!send(&reader, 1, 3, None));
        assert!(send(&reader, 1, 6, None));
        assert_eq!(reader.history().len(), 3);
        assert_eq!(reader.known_writer_count(), 2);
        assert_eq!(reader.matched_writer_count(), 0);
    }

    #[test]
    fn test_unmatched_writers_are_bounded() {
        let (_events, reader) = reader(ReaderAttributes::best_effort().with_history(HistoryAttributes::keep_last(1)));
        reader.matched_writer_add(RemoteWriterInfo::new(writer_guid(9))).expect("match");
        let spoofed = |n: usize| Guid::new(GuidPrefix([0xee; 12]), EntityId::new(n as u32 + 1, 0x03));
        for n in 0..MAX_UNMATCHED_WRITERS + 50 {
            let mut change = CacheChange::new(
                ChangeKind::Alive,
                spoofed(n),
                InstanceHandle::NIL,
                crate::pool::SerializedPayload::from_vec(vec![0, 1, 0, 0]),
            );
            change.sequence_number = SequenceNumber(1);
            assert!(reader.process_data_message(change));
        }
        assert_eq!(reader.known_writer_count(), MAX_UNMATCHED_WRITERS + 1);
        assert_eq!(reader.matched_writer_count(), 1);
        // The most recent writers are still tracked, the earliest are not.
        let state = reader.state.lock();
        assert!(state.writers.contains_key(&spoofed(MAX_UNMATCHED_WRITERS + 49)));
        assert!(!state.writers.contains_key(&spoofed(0)));
        assert!(state.writers.contains_key(&writer_guid(9)));
    }

    #[test]
    fn test_inline_strength_drives_ownership() {
        let attrs = ReaderAttributes::best_effort()
            .with_key(true)
            .with_history(HistoryAttributes::keep_last(10))
            .with_exclusive_ownership();
        let (_events, reader) = reader(attrs);
        assert!(send(&reader, 1, 1, Some(10)));
        assert!(send(&reader, 2, 1, Some(20)));
        assert!(!send(&reader, 1, 2, Some(10)));
        assert!(reader.matched_writer_remove(&writer_guid(2)));
        assert!(send(&reader, 1, 3, Some(10)));
    }

    #[test]
    fn test_reliable_attributes_rejected() {
        let events = EventService::new("test-events").expect("event thread");
        let ctx = ReaderContext {
            sender: Arc::new(MessageSender::new(
                GuidPrefix([6; 12]),
                Arc::new(Capture::default()),
                Arc::new(PassThrough),
                1400,
            )),
            events: &events,
            listener: None,
            filter: None,
        };
        let guid = Guid::new(GuidPrefix([6; 12]), EntityId::new(1, 0x04));
        assert!(matches!(
            StatelessReader::new(guid, ReaderAttributes::reliable(), &ctx),
            Err(Error::InvalidQos(_))
        ));
    }
}
