// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stateful reader: one [`WriterProxy`] per matched writer.
//!
//! Reliable writers are answered with ACKNACKs (and NACK_FRAGs for
//! partially received samples) after `heartbeat_response_delay`; bursts of
//! HEARTBEATs coalesce into one response. Lock order is reader state, then
//! history. Listeners run with no lock held.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::fragments::FragmentAssembler;
use super::ownership::OwnershipTracker;
use super::{
    change_header, fill_key_from_payload, ContentFilter, MessageContext, ReaderAttributes, ReaderContext,
    ReaderListener, RejectReason, RemoteWriterInfo, RtpsReader,
};
use crate::config::MAX_GAP_RANGE;
use crate::core::{CacheChange, ChangeKind, Guid, InstanceHandle, Locator, SequenceNumber};
use crate::deadline::DeadlineTracker;
use crate::events::{TimedEvent, TimerAction};
use crate::history::ReaderHistory;
use crate::messages::{
    AckNackSubmessage, DataFragSubmessage, FragmentNumberSet, GapSubmessage, HeartbeatFragSubmessage,
    HeartbeatSubmessage, MessageBuilder, NackFragSubmessage, Submessage,
};
use crate::qos::Reliability;
use crate::reliability::{HeartbeatOutcome, WriterProxy};
use crate::sender::MessageSender;
use crate::{Error, Result};

struct ReaderState {
    proxies: BTreeMap<Guid, WriterProxy>,
    ownership: OwnershipTracker,
    fragments: FragmentAssembler,
}

pub struct StatefulReader {
    guid: Guid,
    attrs: ReaderAttributes,
    history: ReaderHistory,
    sender: Arc<MessageSender>,
    listener: Option<Arc<dyn ReaderListener>>,
    filter: Option<Arc<dyn ContentFilter>>,
    state: Mutex<ReaderState>,
    acknack: TimedEvent,
    liveliness: TimedEvent,
    deadline: Option<(DeadlineTracker, TimedEvent)>,
}

impl StatefulReader {
    pub(crate) fn new(guid: Guid, attrs: ReaderAttributes, ctx: &ReaderContext<'_>) -> Result<Arc<Self>> {
        attrs.validate()?;
        let history = ReaderHistory::new(attrs.history, attrs.destination_order)?;
        let events = ctx.events;
        let reader = Arc::new_cyclic(|weak: &Weak<Self>| {
            let r = weak.clone();
            let acknack = events.register(attrs.heartbeat_response_delay, move || {
                r.upgrade().map_or(TimerAction::Done, |r| r.on_acknack_timer())
            });
            let r = weak.clone();
            let liveliness = events.register(Duration::from_secs(1), move || {
                r.upgrade().map_or(TimerAction::Done, |r| r.on_liveliness_timer())
            });
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
                state: Mutex::new(ReaderState {
                    proxies: BTreeMap::new(),
                    ownership: OwnershipTracker::new(),
                    fragments: FragmentAssembler::new(attrs.max_partial_samples),
                }),
                attrs,
                history,
                sender: Arc::clone(&ctx.sender),
                listener: ctx.listener.clone(),
                filter: ctx.filter.clone(),
                acknack,
                liveliness,
                deadline,
            }
        });
        log::debug!(
            "[StatefulReader::new] {} reliability={:?} history={:?}",
            guid,
            reader.attrs.reliability,
            reader.attrs.history.history
        );
        Ok(reader)
    }

    /// Contiguous mark of a matched writer.
    #[must_use]
    pub fn available_changes_max(&self, writer: &Guid) -> Option<SequenceNumber> {
        self.state
            .lock()
            .proxies
            .get(writer)
            .map(WriterProxy::available_changes_max)
    }

    /// Sequence numbers of `writer` announced but not received.
    #[must_use]
    pub fn missing_changes(&self, writer: &Guid) -> Vec<SequenceNumber> {
        self.state
            .lock()
            .proxies
            .get(writer)
            .map(|p| p.missing_changes().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_matched(&self, writer: &Guid) -> bool {
        self.state.lock().proxies.contains_key(writer)
    }

    /// Writer currently owning `instance` (exclusive ownership).
    #[must_use]
    pub fn instance_owner(&self, instance: &InstanceHandle) -> Option<Guid> {
        self.state.lock().ownership.owner(instance)
    }

    /// Requested deadline misses reported so far.
    #[must_use]
    pub fn deadline_missed_total(&self) -> u64 {
        self.deadline.as_ref().map_or(0, |(t, _)| t.missed_total())
    }

    fn send(&self, builder: MessageBuilder, locators: &[Locator]) {
        if locators.is_empty() {
            log::trace!("[StatefulReader::send] {} no reply locator", self.guid);
            return;
        }
        self.sender.send(builder, locators);
    }

    /// ACKNACK for `proxy` plus a NACK_FRAG per partially received sample.
    fn build_reply(
        &self,
        proxy: &mut WriterProxy,
        fragments: &FragmentAssembler,
        final_override: Option<bool>,
    ) -> Option<(MessageBuilder, Vec<Locator>)> {
        let writer = proxy.guid();
        let partials: Vec<SequenceNumber> = fragments
            .partial_sequences(writer)
            .into_iter()
            .filter(|seq| !proxy.is_duplicate(*seq))
            .collect();
        let (set, count) = proxy.build_acknack_set_skipping(|seq| partials.contains(&seq));
        let mut builder = self.sender.builder();
        builder.set_destination(writer.prefix);
        let acknack = AckNackSubmessage {
            reader_id: self.guid.entity_id,
            writer_id: writer.entity_id,
            final_flag: final_override.unwrap_or(set.is_empty() && partials.is_empty()),
            reader_sn_state: set,
            count,
        };
        if let Err(e) = builder.add(&Submessage::AckNack(acknack)) {
            log::warn!("[StatefulReader::build_reply] ACKNACK: {}", e);
            return None;
        }
        for seq in partials {
            let missing = fragments.missing(writer, seq, u32::MAX);
            let Some(&first) = missing.first() else {
                continue;
            };
            let nack_frag = NackFragSubmessage {
                reader_id: self.guid.entity_id,
                writer_id: writer.entity_id,
                writer_sn: seq,
                fragment_number_state: FragmentNumberSet::from_fragments(first, missing),
                count: proxy.next_nackfrag_count(),
            };
            if let Err(e) = builder.add(&Submessage::NackFrag(nack_frag)) {
                log::warn!("[StatefulReader::build_reply] NACK_FRAG: {}", e);
            }
        }
        Some((builder, proxy.reply_locators().to_vec()))
    }

    fn on_acknack_timer(&self) -> TimerAction {
        let replies: Vec<(MessageBuilder, Vec<Locator>)> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let fragments = &state.fragments;
            state
                .proxies
                .values_mut()
                .filter(|p| p.is_reliable() && p.acknack_pending())
                .filter_map(|p| self.build_reply(p, fragments, None))
                .collect()
        };
        for (builder, locators) in replies {
            self.send(builder, &locators);
        }
        TimerAction::Done
    }

    fn on_liveliness_timer(&self) -> TimerAction {
        let now = Instant::now();
        let (expired, leased) = {
            let state = self.state.lock();
            let expired: Vec<Guid> = state
                .proxies
                .values()
                .filter(|p| !p.is_alive(now))
                .map(WriterProxy::guid)
                .collect();
            let leased = state
                .proxies
                .values()
                .any(|p| p.info().liveliness.has_lease() && !expired.contains(&p.guid()));
            (expired, leased)
        };
        for writer in expired {
            log::info!(
                "[StatefulReader::on_liveliness_timer] {} lost writer {} (lease expired)",
                self.guid,
                writer
            );
            self.matched_writer_remove(&writer);
            if let Some(listener) = &self.listener {
                listener.on_liveliness_changed(self.guid, writer, false);
            }
        }
        if leased {
            TimerAction::Restart
        } else {
            TimerAction::Done
        }
    }

    fn check_deadlines(&self) -> TimerAction {
        let Some((tracker, _)) = &self.deadline else {
            return TimerAction::Done;
        };
        for instance in tracker.check(Instant::now()) {
            log::debug!("[StatefulReader::check_deadlines] {} missed requested deadline", self.guid);
            if let Some(listener) = &self.listener {
                listener.on_requested_deadline_missed(self.guid, instance);
            }
        }
        TimerAction::Restart
    }

    /// Shortest lease among matched writers.
    fn min_lease(state: &ReaderState) -> Option<Duration> {
        state
            .proxies
            .values()
            .filter(|p| p.info().liveliness.has_lease())
            .map(WriterProxy::lease_duration)
            .min()
    }
}

impl RtpsReader for StatefulReader {
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
            let Some(proxy) = state.proxies.get_mut(&writer) else {
                log::trace!("[StatefulReader::process_data_message] {} from unmatched {}", self.guid, writer);
                return false;
            };
            proxy.assert_liveliness(Instant::now());
            if proxy.is_duplicate(seq) {
                log::trace!("[StatefulReader::process_data_message] {} duplicate {} seq={}", self.guid, writer, seq);
                return false;
            }
            if !proxy.is_reliable() {
                proxy.lost_changes_update(seq);
            }
            if let Some(strength) = change.ownership_strength {
                proxy.set_ownership_strength(strength);
            }
            if self.filter.as_ref().is_some_and(|f| !f.accepts(&change)) {
                proxy.received_change_set(seq);
                return false;
            }
            if self.attrs.ownership.is_exclusive()
                && !state.ownership.accept(handle, writer, proxy.ownership_strength())
            {
                log::trace!(
                    "[StatefulReader::process_data_message] {} seq={} from weaker writer {}",
                    self.guid,
                    seq,
                    writer
                );
                proxy.received_change_set(seq);
                return false;
            }
            match self.history.add_change(change) {
                Ok(evicted) => {
                    proxy.received_change_set(seq);
                    if !evicted.is_empty() {
                        log::trace!(
                            "[StatefulReader::process_data_message] {} evicted {} sample(s)",
                            self.guid,
                            evicted.len()
                        );
                    }
                    true
                }
                Err(Error::DuplicateChange) => {
                    proxy.received_change_set(seq);
                    false
                }
                Err(Error::ResourceLimitExceeded(limit)) => {
                    log::debug!(
                        "[StatefulReader::process_data_message] {} seq={} rejected: {}",
                        self.guid,
                        seq,
                        limit
                    );
                    // Reliable writers repeat it once the application made room.
                    if !proxy.is_reliable() {
                        proxy.received_change_set(seq);
                    }
                    rejected = Some(RejectReason::ResourceLimit);
                    false
                }
                Err(e) => {
                    log::warn!("[StatefulReader::process_data_message] {} seq={}: {}", self.guid, seq, e);
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
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(proxy) = state.proxies.get_mut(&writer) else {
                return false;
            };
            proxy.assert_liveliness(Instant::now());
            if proxy.is_duplicate(frag.writer_sn) {
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

    fn process_heartbeat(&self, heartbeat: &HeartbeatSubmessage, ctx: &MessageContext) {
        let writer = Guid::new(ctx.source_prefix, heartbeat.writer_id);
        let now = Instant::now();
        let delay = self.attrs.heartbeat_response_delay;
        let (reply, arm) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(proxy) = state.proxies.get_mut(&writer) else {
                log::trace!("[StatefulReader::process_heartbeat] {} from unmatched {}", self.guid, writer);
                return;
            };
            if !proxy.is_reliable() {
                proxy.assert_liveliness(now);
                return;
            }
            let outcome = proxy.on_heartbeat(
                heartbeat.first_sn,
                heartbeat.last_sn,
                heartbeat.count,
                heartbeat.final_flag,
                now,
            );
            let marks = &*proxy;
            state.fragments.discard_where(writer, |seq| marks.is_duplicate(seq));
            match outcome {
                HeartbeatOutcome::Duplicate | HeartbeatOutcome::UpToDate => (None, false),
                HeartbeatOutcome::ResponseRequired if delay.is_zero() => {
                    (self.build_reply(proxy, &state.fragments, None), false)
                }
                HeartbeatOutcome::ResponseRequired => (None, true),
            }
        };
        if let Some((builder, locators)) = reply {
            self.send(builder, &locators);
        }
        if arm {
            self.acknack.arm_if_idle();
        }
    }

    fn process_gap(&self, gap: &GapSubmessage, ctx: &MessageContext) {
        let writer = Guid::new(ctx.source_prefix, gap.writer_id);
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(proxy) = state.proxies.get_mut(&writer) else {
            return;
        };
        let start = gap.gap_start;
        let end = gap.gap_list.base().max(start);
        if start <= proxy.available_changes_max().next() {
            proxy.lost_changes_update(end);
        } else {
            let span = (end - start).min(MAX_GAP_RANGE);
            if end - start > span {
                log::debug!(
                    "[StatefulReader::process_gap] {} range {}..{} from {} truncated",
                    self.guid,
                    start,
                    end,
                    writer
                );
            }
            for offset in 0..span {
                proxy.irrelevant_change_set(start + offset);
            }
        }
        for seq in gap.gap_list.iter() {
            proxy.irrelevant_change_set(seq);
        }
        let marks = &*proxy;
        state.fragments.discard_where(writer, |seq| marks.is_duplicate(seq));
        log::trace!(
            "[StatefulReader::process_gap] {} writer {} mark={}",
            self.guid,
            writer,
            marks.available_changes_max()
        );
    }

    fn process_heartbeat_frag(&self, heartbeat_frag: &HeartbeatFragSubmessage, ctx: &MessageContext) {
        let writer = Guid::new(ctx.source_prefix, heartbeat_frag.writer_id);
        let seq = heartbeat_frag.writer_sn;
        let reply = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(proxy) = state.proxies.get_mut(&writer) else {
                return;
            };
            if !proxy.is_reliable()
                || !proxy.check_heartbeat_frag_count(heartbeat_frag.count)
                || proxy.is_duplicate(seq)
            {
                return;
            }
            let missing = state
                .fragments
                .missing(writer, seq, heartbeat_frag.last_fragment_num);
            let Some(&first) = missing.first() else {
                return;
            };
            let nack_frag = NackFragSubmessage {
                reader_id: self.guid.entity_id,
                writer_id: writer.entity_id,
                writer_sn: seq,
                fragment_number_state: FragmentNumberSet::from_fragments(first, missing),
                count: proxy.next_nackfrag_count(),
            };
            let mut builder = self.sender.builder();
            builder.set_destination(writer.prefix);
            match builder.add(&Submessage::NackFrag(nack_frag)) {
                Ok(()) => (builder, proxy.reply_locators().to_vec()),
                Err(e) => {
                    log::warn!("[StatefulReader::process_heartbeat_frag] {}", e);
                    return;
                }
            }
        };
        self.send(reply.0, &reply.1);
    }

    fn matched_writer_add(&self, mut writer: RemoteWriterInfo) -> Result<()> {
        writer.validate()?;
        if self.attrs.reliability == Reliability::BestEffort {
            writer.reliability = Reliability::BestEffort;
        }
        let guid = writer.guid;
        let (announce, lease) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.proxies.contains_key(&guid) {
                log::debug!("[StatefulReader::matched_writer_add] {} already matched", guid);
                return Ok(());
            }
            let mut proxy = WriterProxy::new(writer, Instant::now());
            // Preemptive ACKNACK: makes the writer announce its history.
            let announce = if proxy.is_reliable() {
                self.build_reply(&mut proxy, &state.fragments, Some(false))
            } else {
                None
            };
            state.proxies.insert(guid, proxy);
            (announce, Self::min_lease(state))
        };
        log::debug!("[StatefulReader::matched_writer_add] {} <- writer {}", self.guid, guid);
        if let Some((builder, locators)) = announce {
            self.send(builder, &locators);
        }
        if let Some(lease) = lease {
            self.liveliness.update_interval(lease);
            self.liveliness.arm_if_idle();
        }
        Ok(())
    }

    fn matched_writer_remove(&self, writer: &Guid) -> bool {
        let released = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.proxies.remove(writer).is_none() {
                return false;
            }
            state.fragments.discard_writer(*writer);
            state.ownership.writer_removed(*writer)
        };
        self.history.writer_unmatched(*writer);
        log::debug!(
            "[StatefulReader::matched_writer_remove] {} -x writer {} (released {} instance(s))",
            self.guid,
            writer,
            released.len()
        );
        true
    }

    fn matched_writer_count(&self) -> usize {
        self.state.lock().proxies.len()
    }

    fn accepts_writer(&self, writer: &Guid) -> bool {
        self.state.lock().proxies.contains_key(writer)
    }
}
