// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! State and helpers shared by both writer variants.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::{WriterAttributes, WriterListener};
use crate::config::{FRAGMENT_OVERHEAD, MAX_FRAGMENT_SIZE};
use crate::core::{CacheChange, EntityId, Guid, InstanceHandle, SequenceNumber, WriteParams};
use crate::deadline::DeadlineTracker;
use crate::events::{EventService, TimerAction};
use crate::flow::{FlowClient, FlowClientId, FlowController};
use crate::history::{AddedChange, WriterHistory};
use crate::messages::{
    DataFragSubmessage, DataSubmessage, HeartbeatSubmessage, InlineQos, MessageBuilder, Submessage,
};
use crate::persistence::{PersistedChange, PersistenceStore};
use crate::pool::{DataSharingPool, PayloadPool};
use crate::sender::MessageSender;
use crate::Result;

/// Participant services a writer is created with.
pub(crate) struct WriterContext<'a> {
    pub sender: Arc<MessageSender>,
    pub flow: Arc<FlowController>,
    pub events: &'a EventService,
    pub pool: Arc<dyn PayloadPool>,
    pub datasharing: Option<Arc<DataSharingPool>>,
    pub persistence: Option<Arc<dyn PersistenceStore>>,
    pub listener: Option<Arc<dyn WriterListener>>,
}

pub(crate) struct WriterBase {
    pub guid: Guid,
    pub attrs: WriterAttributes,
    pub history: WriterHistory,
    pub sender: Arc<MessageSender>,
    pub flow: Arc<FlowController>,
    pub flow_id: FlowClientId,
    pool: Arc<dyn PayloadPool>,
    datasharing: Option<Arc<DataSharingPool>>,
    persistence: Option<Arc<dyn PersistenceStore>>,
    pub listener: Option<Arc<dyn WriterListener>>,
    deadline: Option<DeadlineTracker>,
    /// Serializes admission and the hand-off to the flow controller so
    /// samples are queued in sequence order.
    pub write_lock: Mutex<()>,
    pub fragment_size: usize,
}

impl WriterBase {
    pub fn new(guid: Guid, attrs: WriterAttributes, ctx: &WriterContext<'_>) -> Result<Self> {
        attrs.validate()?;
        let history = match (&ctx.persistence, attrs.durability.is_persistent()) {
            (Some(store), true) => {
                let changes = store
                    .load_changes(&guid)?
                    .into_iter()
                    .map(PersistedChange::into_change)
                    .collect();
                let last = store.last_sequence(&guid)?.unwrap_or(SequenceNumber::ZERO);
                WriterHistory::restored(attrs.history, changes, last)?
            }
            (None, true) => {
                log::warn!(
                    "[WriterBase::new] {} is {:?} without a persistence store, history kept in memory",
                    guid,
                    attrs.durability
                );
                WriterHistory::new(attrs.history)?
            }
            _ => WriterHistory::new(attrs.history)?,
        };
        let fragment_size = attrs
            .fragment_size
            .unwrap_or_else(|| ctx.sender.max_message_size().saturating_sub(FRAGMENT_OVERHEAD))
            .clamp(1, MAX_FRAGMENT_SIZE);
        let deadline = attrs
            .deadline
            .is_enforced()
            .then(|| DeadlineTracker::new(attrs.deadline.period));

        Ok(Self {
            guid,
            history,
            sender: Arc::clone(&ctx.sender),
            flow: Arc::clone(&ctx.flow),
            flow_id: 0,
            pool: Arc::clone(&ctx.pool),
            datasharing: ctx.datasharing.clone(),
            persistence: ctx
                .persistence
                .clone()
                .filter(|_| attrs.durability.is_persistent()),
            listener: ctx.listener.clone(),
            deadline,
            write_lock: Mutex::new(()),
            fragment_size,
            attrs,
        })
    }

    /// Register the owning writer with its flow controller.
    pub fn register_flow(&mut self, client: std::sync::Weak<dyn FlowClient>) {
        self.flow_id = self.flow.register_writer(client, self.attrs.flow_params);
    }

    pub fn new_change(
        &self,
        kind: crate::core::ChangeKind,
        data: &[u8],
        instance: InstanceHandle,
    ) -> Result<CacheChange> {
        let pool: &dyn PayloadPool = match &self.datasharing {
            Some(ds) => ds.as_ref(),
            None => self.pool.as_ref(),
        };
        let mut payload = pool.get_payload(data.len())?;
        payload.copy_from(data)?;
        Ok(CacheChange::new(kind, self.guid, instance, payload))
    }

    /// Admit into the history and mirror the result into the data-sharing
    /// segment, the persistence store and the deadline tracker.
    pub fn admit(&self, mut change: CacheChange, params: WriteParams) -> Result<AddedChange> {
        change.writer_guid = self.guid;
        if params.source_timestamp.is_some() {
            change.source_timestamp = params.source_timestamp;
        }
        if params.related_sample_identity.is_some() {
            change.related_sample_identity = params.related_sample_identity;
        }
        change.ownership_strength = self
            .attrs
            .ownership
            .is_exclusive()
            .then_some(self.attrs.ownership_strength);
        let handle = change.instance_handle;
        let alive = change.kind.is_alive();

        let added = self
            .history
            .add_change_with_timeout(change, self.attrs.max_blocking_time)?;
        let seq = added.sequence_number;

        for evicted in &added.evicted {
            self.flow.remove_change(self.flow_id, *evicted);
            self.unpersist(*evicted);
        }
        if let Some(ds) = &self.datasharing {
            if let Some(Err(e)) = self
                .history
                .with_change(seq, |c| ds.commit(&c.serialized_payload, seq))
            {
                log::debug!("[WriterBase::admit] {} seq={} not shared: {}", self.guid, seq, e);
            }
        }
        if let Some(store) = &self.persistence {
            let stored = self
                .history
                .with_change(seq, PersistedChange::from_change)
                .map_or(Ok(()), |record| store.store_change(&record))
                .and_then(|()| store.set_last_sequence(&self.guid, seq));
            if let Err(e) = stored {
                log::warn!("[WriterBase::admit] {} seq={} not persisted: {}", self.guid, seq, e);
            }
        }
        if let Some(tracker) = &self.deadline {
            if alive {
                tracker.touch(handle, Instant::now());
            } else {
                tracker.forget(&handle);
            }
        }
        log::trace!(
            "[WriterBase::admit] {} seq={} evicted={:?}",
            self.guid,
            seq,
            added.evicted
        );
        Ok(added)
    }

    /// Remove one change on request of the user.
    pub fn remove_change(&self, seq: SequenceNumber) -> bool {
        if !self.history.remove_change(seq) {
            return false;
        }
        self.flow.remove_change(self.flow_id, seq);
        self.unpersist(seq);
        true
    }

    fn unpersist(&self, seq: SequenceNumber) {
        if let Some(store) = &self.persistence {
            if let Err(e) = store.remove_change(&self.guid, seq) {
                log::warn!("[WriterBase::unpersist] {} seq={}: {}", self.guid, seq, e);
            }
        }
    }

    /// Publish the mark acknowledged by every reader. VOLATILE writers
    /// drop what everyone has. Returns true when the mark moved.
    pub fn apply_ack_progress(&self, mark: SequenceNumber) -> bool {
        let previous = self.history.acked_low_mark();
        if mark <= previous {
            return false;
        }
        self.history.set_acked_low_mark(mark);
        if !self.attrs.durability.replays_history() {
            for seq in self.history.remove_change_up_to(mark) {
                self.flow.remove_change(self.flow_id, seq);
            }
        }
        if let Some(listener) = &self.listener {
            listener.on_changes_acknowledged(self.guid, mark);
        }
        true
    }

    /// Deadline event body.
    pub fn check_deadlines(&self) -> TimerAction {
        let Some(tracker) = &self.deadline else {
            return TimerAction::Done;
        };
        for instance in tracker.check(Instant::now()) {
            log::debug!("[WriterBase::check_deadlines] {} missed offered deadline", self.guid);
            if let Some(listener) = &self.listener {
                listener.on_offered_deadline_missed(self.guid, instance);
            }
        }
        TimerAction::Restart
    }

    pub fn deadline_missed_total(&self) -> u64 {
        self.deadline.as_ref().map_or(0, DeadlineTracker::missed_total)
    }

    fn inline_qos(&self, change: &CacheChange, expects_inline_qos: bool) -> Option<InlineQos> {
        let mut qos = InlineQos::default();
        if self.attrs.with_key || expects_inline_qos {
            qos.key_hash = (!change.instance_handle.is_nil()).then_some(change.instance_handle);
        }
        if !change.kind.is_alive() {
            qos.status_info = Some(change.kind.status_info());
        }
        qos.related_sample_identity = change.related_sample_identity;
        qos.ownership_strength = change.ownership_strength;
        (!qos.is_empty()).then_some(qos)
    }

    /// Append `change` as one DATA, or as DATA_FRAGs when it exceeds the
    /// fragment size. `only_fragments` restricts the output to the listed
    /// (1-based) fragments.
    pub fn encode_change(
        &self,
        builder: &mut MessageBuilder,
        change: &CacheChange,
        reader_id: EntityId,
        expects_inline_qos: bool,
        only_fragments: Option<&[u32]>,
    ) -> Result<()> {
        builder.set_timestamp(change.source_timestamp);
        let inline_qos = self.inline_qos(change, expects_inline_qos);
        let payload = change.serialized_payload.as_slice();
        let alive = change.kind.is_alive();

        if payload.len() <= self.fragment_size && only_fragments.is_none() {
            return builder.add(&Submessage::Data(DataSubmessage {
                reader_id,
                writer_id: self.guid.entity_id,
                writer_sn: change.sequence_number,
                inline_qos,
                key_only: !alive,
                serialized_payload: (!payload.is_empty()).then_some(payload),
            }));
        }

        let fragment_size = self.fragment_size;
        let total = payload.len().div_ceil(fragment_size) as u32;
        let all: Vec<u32>;
        let numbers = match only_fragments {
            Some(numbers) => numbers,
            None => {
                all = (1..=total).collect();
                &all
            }
        };
        for &number in numbers.iter().filter(|n| (1..=total).contains(*n)) {
            let start = (number as usize - 1) * fragment_size;
            let end = (start + fragment_size).min(payload.len());
            builder.add(&Submessage::DataFrag(DataFragSubmessage {
                reader_id,
                writer_id: self.guid.entity_id,
                writer_sn: change.sequence_number,
                fragment_starting_num: number,
                fragments_in_submessage: 1,
                fragment_size: fragment_size as u16,
                sample_size: payload.len() as u32,
                inline_qos,
                key_only: !alive,
                fragments: &payload[start..end],
            }))?;
        }
        Ok(())
    }

    /// HEARTBEAT for a reader (or group of readers) whose changes up to
    /// `low_mark` are acknowledged.
    pub fn heartbeat(
        &self,
        reader_id: EntityId,
        low_mark: SequenceNumber,
        count: u32,
        final_flag: bool,
        liveliness_flag: bool,
    ) -> HeartbeatSubmessage {
        let last_sn = self.history.last_sequence_number();
        let first_available = self.history.min_seq().unwrap_or(last_sn.next());
        HeartbeatSubmessage {
            reader_id,
            writer_id: self.guid.entity_id,
            first_sn: first_available.max(low_mark.next()).min(last_sn.next()),
            last_sn,
            count,
            final_flag,
            liveliness_flag,
        }
    }
}
