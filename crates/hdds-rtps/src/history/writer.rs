// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer history.
//!
//! Changes are ordered by sequence number. Admission assigns the sequence
//! number under the history lock, so admission order and sequence order agree.
//!
//! Room under KEEP_ALL comes only from acknowledgement: the owning writer
//! publishes the highest sequence number acknowledged by every matched reader
//! through [`WriterHistory::set_acked_low_mark`], and admission may then drop
//! the oldest change if it is at or below that mark. Under KEEP_LAST the
//! oldest change of the instance (or of the whole history) is evicted instead.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, ReentrantMutex};

use super::{exceeds, HistoryAttributes};
use crate::core::{CacheChange, InstanceHandle, SeqNumGenerator, SequenceNumber, Time};
use crate::{Error, Result};

/// Outcome of a successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedChange {
    /// Sequence number assigned to the admitted change.
    pub sequence_number: SequenceNumber,
    /// Changes removed to make room, ascending.
    pub evicted: Vec<SequenceNumber>,
}

#[derive(Default)]
struct State {
    changes: BTreeMap<SequenceNumber, CacheChange>,
    instances: HashMap<InstanceHandle, VecDeque<SequenceNumber>>,
}

impl State {
    fn remove(&mut self, seq: SequenceNumber) -> Option<CacheChange> {
        let change = self.changes.remove(&seq)?;
        let handle = change.instance_handle;
        if let Some(queue) = self.instances.get_mut(&handle) {
            queue.retain(|s| *s != seq);
            if queue.is_empty() {
                self.instances.remove(&handle);
            }
        }
        Some(change)
    }

    fn insert(&mut self, change: CacheChange) {
        self.instances
            .entry(change.instance_handle)
            .or_default()
            .push_back(change.sequence_number);
        self.changes.insert(change.sequence_number, change);
    }
}

/// Sequence-ordered history of one writer.
pub struct WriterHistory {
    attrs: HistoryAttributes,
    seq_gen: SeqNumGenerator,
    state: ReentrantMutex<RefCell<State>>,
    acked_low_mark: AtomicI64,
    room_epoch: AtomicU64,
    room_lock: Mutex<()>,
    room: Condvar,
}

impl WriterHistory {
    pub fn new(attrs: HistoryAttributes) -> Result<Self> {
        attrs.validate()?;
        Ok(Self::with_generator(attrs, SeqNumGenerator::new(), State::default()))
    }

    /// History pre-filled with restored changes; numbering resumes after
    /// `last_sequence` (or the highest restored change, whichever is larger).
    pub fn restored(
        attrs: HistoryAttributes,
        changes: Vec<CacheChange>,
        last_sequence: SequenceNumber,
    ) -> Result<Self> {
        attrs.validate()?;
        let mut state = State::default();
        let mut last = last_sequence;
        for change in changes {
            last = last.max(change.sequence_number);
            state.insert(change);
        }
        log::debug!(
            "[WriterHistory::restored] {} changes, resuming after {}",
            state.changes.len(),
            last
        );
        Ok(Self::with_generator(
            attrs,
            SeqNumGenerator::starting_at(last.next()),
            state,
        ))
    }

    fn with_generator(attrs: HistoryAttributes, seq_gen: SeqNumGenerator, state: State) -> Self {
        Self {
            attrs,
            seq_gen,
            state: ReentrantMutex::new(RefCell::new(state)),
            acked_low_mark: AtomicI64::new(0),
            room_epoch: AtomicU64::new(0),
            room_lock: Mutex::new(()),
            room: Condvar::new(),
        }
    }

    #[must_use]
    pub fn attributes(&self) -> &HistoryAttributes {
        &self.attrs
    }

    /// Admit without blocking (`WouldBlock` when no room can be made).
    pub fn add_change(&self, change: CacheChange) -> Result<AddedChange> {
        self.add_change_with_timeout(change, Duration::ZERO)
    }

    /// Admit `change`, waiting up to `max_blocking_time` for acknowledgements
    /// to make room.
    ///
    /// Assigns the next sequence number and, if unset, the source timestamp.
    /// Fails with [`Error::WouldBlock`] when `max_blocking_time` is zero and the
    /// history is full, or [`Error::WriteTimeout`] after waiting.
    pub fn add_change_with_timeout(
        &self,
        mut change: CacheChange,
        max_blocking_time: Duration,
    ) -> Result<AddedChange> {
        let deadline = Instant::now().checked_add(max_blocking_time);
        let mut expired = false;

        loop {
            let epoch = self.room_epoch.load(Ordering::Acquire);
            {
                let guard = self.state.lock();
                let mut st = guard.borrow_mut();
                match self.plan_room(&st, change.instance_handle) {
                    Ok(evicted) => {
                        for seq in &evicted {
                            st.remove(*seq);
                        }
                        let seq = self.seq_gen.next();
                        change.sequence_number = seq;
                        if change.source_timestamp.is_none() {
                            change.source_timestamp = Some(Time::now());
                        }
                        st.insert(change);
                        log::trace!(
                            "[WriterHistory::add_change] seq={} evicted={:?} len={}",
                            seq,
                            evicted,
                            st.changes.len()
                        );
                        return Ok(AddedChange {
                            sequence_number: seq,
                            evicted,
                        });
                    }
                    Err(limit) => {
                        if max_blocking_time.is_zero() {
                            log::debug!("[WriterHistory::add_change] full ({}), would block", limit);
                            return Err(Error::WouldBlock);
                        }
                        if expired {
                            log::debug!(
                                "[WriterHistory::add_change] full ({}) after {:?}",
                                limit,
                                max_blocking_time
                            );
                            return Err(Error::WriteTimeout);
                        }
                    }
                }
            }

            let mut room = self.room_lock.lock();
            if self.room_epoch.load(Ordering::Acquire) != epoch {
                continue;
            }
            match deadline {
                Some(deadline) => {
                    if self.room.wait_until(&mut room, deadline).timed_out() {
                        expired = true;
                    }
                }
                None => self.room.wait(&mut room),
            }
        }
    }

    /// Changes to evict so one more change of `handle` fits, or the name of
    /// the limit that cannot be satisfied.
    fn plan_room(
        &self,
        st: &State,
        handle: InstanceHandle,
    ) -> std::result::Result<Vec<SequenceNumber>, &'static str> {
        let limits = &self.attrs.resource_limits;
        let keep_last = self.attrs.is_keep_last();
        let acked = SequenceNumber(self.acked_low_mark.load(Ordering::Acquire));
        let removable = |seq: SequenceNumber| keep_last || seq <= acked;
        let mut evicted = Vec::new();

        let instance = st.instances.get(&handle);
        match instance {
            None => {
                if exceeds(st.instances.len(), limits.max_instances) {
                    // Free an instance whose changes are all removable.
                    let victim = st
                        .instances
                        .values()
                        .find(|queue| queue.iter().all(|s| removable(*s)))
                        .ok_or("max_instances")?;
                    evicted.extend(victim.iter().copied());
                }
            }
            Some(queue) => {
                if exceeds(queue.len(), self.attrs.per_instance_bound()) {
                    let oldest = *queue.front().ok_or("max_samples_per_instance")?;
                    if !removable(oldest) {
                        return Err("max_samples_per_instance");
                    }
                    evicted.push(oldest);
                }
            }
        }

        if exceeds(st.changes.len() - evicted.len(), limits.max_samples) {
            let oldest = st
                .changes
                .keys()
                .copied()
                .find(|s| !evicted.contains(s))
                .ok_or("max_samples")?;
            if !removable(oldest) {
                return Err("max_samples");
            }
            evicted.push(oldest);
        }

        evicted.sort_unstable();
        Ok(evicted)
    }

    fn notify_room(&self) {
        self.room_epoch.fetch_add(1, Ordering::AcqRel);
        let _room = self.room_lock.lock();
        self.room.notify_all();
    }

    /// Remove one change; the payload returns to its pool.
    pub fn remove_change(&self, seq: SequenceNumber) -> bool {
        let removed = {
            let guard = self.state.lock();
            let removed = guard.borrow_mut().remove(seq);
            removed.is_some()
        };
        if removed {
            self.notify_room();
        }
        removed
    }

    /// Remove every change with a sequence number up to and including `seq`.
    pub fn remove_change_up_to(&self, seq: SequenceNumber) -> Vec<SequenceNumber> {
        let removed: Vec<SequenceNumber> = {
            let guard = self.state.lock();
            let mut st = guard.borrow_mut();
            let doomed: Vec<SequenceNumber> = st.changes.range(..=seq).map(|(s, _)| *s).collect();
            for s in &doomed {
                st.remove(*s);
            }
            doomed
        };
        if !removed.is_empty() {
            self.notify_room();
        }
        removed
    }

    /// Remove the oldest change.
    pub fn remove_min_change(&self) -> bool {
        match self.min_seq() {
            Some(seq) => self.remove_change(seq),
            None => false,
        }
    }

    /// Copy of the change with `seq`.
    #[must_use]
    pub fn find_change(&self, seq: SequenceNumber) -> Option<CacheChange> {
        self.with_change(seq, CacheChange::clone)
    }

    /// Run `f` on the change with `seq` without copying it.
    pub fn with_change<R>(&self, seq: SequenceNumber, f: impl FnOnce(&CacheChange) -> R) -> Option<R> {
        let guard = self.state.lock();
        let st = guard.borrow();
        st.changes.get(&seq).map(f)
    }

    #[must_use]
    pub fn contains(&self, seq: SequenceNumber) -> bool {
        let guard = self.state.lock();
        let contains = guard.borrow().changes.contains_key(&seq);
        contains
    }

    #[must_use]
    pub fn get_min_change(&self) -> Option<CacheChange> {
        let guard = self.state.lock();
        let st = guard.borrow();
        st.changes.values().next().cloned()
    }

    #[must_use]
    pub fn get_max_change(&self) -> Option<CacheChange> {
        let guard = self.state.lock();
        let st = guard.borrow();
        st.changes.values().next_back().cloned()
    }

    #[must_use]
    pub fn min_seq(&self) -> Option<SequenceNumber> {
        let guard = self.state.lock();
        let min = guard.borrow().changes.keys().next().copied();
        min
    }

    #[must_use]
    pub fn max_seq(&self) -> Option<SequenceNumber> {
        let guard = self.state.lock();
        let max = guard.borrow().changes.keys().next_back().copied();
        max
    }

    /// Sequence numbers currently held, at or above `from`, ascending.
    #[must_use]
    pub fn sequence_numbers_from(&self, from: SequenceNumber) -> Vec<SequenceNumber> {
        let guard = self.state.lock();
        let st = guard.borrow();
        st.changes.range(from..).map(|(s, _)| *s).collect()
    }

    /// Sequence numbers of one instance, ascending.
    #[must_use]
    pub fn instance_sequence_numbers(&self, handle: &InstanceHandle) -> Vec<SequenceNumber> {
        let guard = self.state.lock();
        let st = guard.borrow();
        st.instances
            .get(handle)
            .map(|q| q.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let guard = self.state.lock();
        let len = guard.borrow().changes.len();
        len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn instance_count(&self) -> usize {
        let guard = self.state.lock();
        let count = guard.borrow().instances.len();
        count
    }

    /// Highest sequence number assigned so far (0 before the first write).
    #[must_use]
    pub fn last_sequence_number(&self) -> SequenceNumber {
        self.seq_gen.last_assigned()
    }

    /// Highest sequence number acknowledged by every matched reader.
    #[must_use]
    pub fn acked_low_mark(&self) -> SequenceNumber {
        SequenceNumber(self.acked_low_mark.load(Ordering::Acquire))
    }

    /// Raise the acknowledged mark (never lowered) and wake blocked writers.
    pub fn set_acked_low_mark(&self, seq: SequenceNumber) {
        let previous = self.acked_low_mark.fetch_max(seq.0, Ordering::AcqRel);
        if seq.0 > previous {
            self.notify_room();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChangeKind, EntityId, Guid, GuidPrefix};
    use crate::pool::SerializedPayload;
    use crate::qos::ResourceLimits;
    use std::sync::Arc;

    fn change(key: u8) -> CacheChange {
        let guid = Guid::new(GuidPrefix([1; 12]), EntityId::new(1, 0x02));
        CacheChange::new(
            ChangeKind::Alive,
            guid,
            InstanceHandle::from_key(&[key]),
            SerializedPayload::from_vec(vec![0, 1, 0, 0, key]),
        )
    }

    #[test]
    fn test_sequence_numbers_start_at_one_and_increase() {
        let history = WriterHistory::new(HistoryAttributes::keep_last(10)).expect("valid qos");
        let a = history.add_change(change(1)).expect("add should succeed");
        let b = history.add_change(change(1)).expect("add should succeed");
        assert_eq!(a.sequence_number, SequenceNumber(1));
        assert_eq!(b.sequence_number, SequenceNumber(2));
        assert!(history
            .find_change(SequenceNumber(1))
            .expect("present")
            .source_timestamp
            .is_some());
        assert_eq!(history.last_sequence_number(), SequenceNumber(2));
    }

    #[test]
    fn test_keep_last_evicts_oldest_of_instance() {
        let history = WriterHistory::new(HistoryAttributes::keep_last(2)).expect("valid qos");
        history.add_change(change(1)).expect("1");
        history.add_change(change(2)).expect("2");
        history.add_change(change(1)).expect("3");
        let added = history.add_change(change(1)).expect("4");
        assert_eq!(added.evicted, vec![SequenceNumber(1)]);
        assert_eq!(
            history.instance_sequence_numbers(&InstanceHandle::from_key(&[1])),
            vec![SequenceNumber(3), SequenceNumber(4)]
        );
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_keep_last_evicts_global_oldest_at_max_samples() {
        let attrs = HistoryAttributes::keep_last(5).with_limits(ResourceLimits {
            max_samples: 2,
            ..ResourceLimits::default()
        });
        let history = WriterHistory::new(attrs).expect("valid qos");
        history.add_change(change(1)).expect("1");
        history.add_change(change(2)).expect("2");
        let added = history.add_change(change(3)).expect("3");
        assert_eq!(added.evicted, vec![SequenceNumber(1)]);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_keep_all_full_with_zero_timeout_would_block() {
        let history = WriterHistory::new(HistoryAttributes::keep_all(2)).expect("valid qos");
        history.add_change(change(1)).expect("1");
        history.add_change(change(1)).expect("2");
        assert!(matches!(history.add_change(change(1)), Err(Error::WouldBlock)));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_keep_all_times_out_without_acks() {
        let history = WriterHistory::new(HistoryAttributes::keep_all(1)).expect("valid qos");
        history.add_change(change(1)).expect("1");
        let err = history
            .add_change_with_timeout(change(1), Duration::from_millis(20))
            .expect_err("full history should time out");
        assert!(matches!(err, Error::WriteTimeout));
    }

    #[test]
    fn test_keep_all_makes_room_from_acked_changes() {
        let history = WriterHistory::new(HistoryAttributes::keep_all(2)).expect("valid qos");
        history.add_change(change(1)).expect("1");
        history.add_change(change(1)).expect("2");
        history.set_acked_low_mark(SequenceNumber(1));
        let added = history.add_change(change(1)).expect("room from acked change");
        assert_eq!(added.evicted, vec![SequenceNumber(1)]);
    }

    #[test]
    fn test_blocked_writer_wakes_on_ack() {
        let history =
            Arc::new(WriterHistory::new(HistoryAttributes::keep_all(1)).expect("valid qos"));
        history.add_change(change(1)).expect("1");
        let waker = Arc::clone(&history);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.set_acked_low_mark(SequenceNumber(1));
        });
        let added = history
            .add_change_with_timeout(change(1), Duration::from_secs(5))
            .expect("ack should unblock the writer");
        assert_eq!(added.sequence_number, SequenceNumber(2));
        handle.join().expect("waker thread");
    }

    #[test]
    fn test_remove_operations() {
        let history = WriterHistory::new(HistoryAttributes::keep_last(10)).expect("valid qos");
        for _ in 0..5 {
            history.add_change(change(1)).expect("add");
        }
        assert!(history.remove_change(SequenceNumber(3)));
        assert!(!history.remove_change(SequenceNumber(3)));
        assert_eq!(
            history.remove_change_up_to(SequenceNumber(2)),
            vec![SequenceNumber(1), SequenceNumber(2)]
        );
        assert!(history.remove_min_change());
        assert_eq!(history.min_seq(), Some(SequenceNumber(5)));
        assert_eq!(
            history.get_max_change().map(|c| c.sequence_number),
            Some(SequenceNumber(5))
        );
        assert_eq!(history.sequence_numbers_from(SequenceNumber(1)), vec![SequenceNumber(5)]);
    }

    #[test]
    fn test_max_instances_under_keep_all() {
        let attrs = HistoryAttributes::keep_all(10).with_limits(ResourceLimits {
            max_samples: 10,
            max_instances: 1,
            max_samples_per_instance: 10,
        });
        let history = WriterHistory::new(attrs).expect("valid qos");
        history.add_change(change(1)).expect("first instance");
        assert!(matches!(history.add_change(change(2)), Err(Error::WouldBlock)));
        history.set_acked_low_mark(SequenceNumber(1));
        let added = history.add_change(change(2)).expect("acked instance evicted");
        assert_eq!(added.evicted, vec![SequenceNumber(1)]);
        assert_eq!(history.instance_count(), 1);
    }

    #[test]
    fn test_restored_history_resumes_numbering() {
        let mut restored = change(1);
        restored.sequence_number = SequenceNumber(7);
        let history = WriterHistory::restored(
            HistoryAttributes::keep_last(10),
            vec![restored],
            SequenceNumber(9),
        )
        .expect("valid qos");
        let added = history.add_change(change(1)).expect("add");
        assert_eq!(added.sequence_number, SequenceNumber(10));
        assert!(history.contains(SequenceNumber(7)));
    }
}
