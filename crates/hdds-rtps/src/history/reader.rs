// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader history.
//!
//! Samples are keyed by (writer GUID, sequence number) and kept in
//! presentation order: arrival order, or source timestamp order under
//! `DestinationOrder::BySourceTimestamp`. Each sample carries a read state;
//! each instance carries a view state and an instance state.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, ReentrantMutex};

use super::{exceeds, HistoryAttributes};
use crate::core::{CacheChange, ChangeKind, Guid, InstanceHandle, SampleIdentity, SequenceNumber, Time};
use crate::qos::DestinationOrder;
use crate::{Error, Result};

/// Whether the application has already seen a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleState {
    Read,
    NotRead,
}

/// Whether the instance is new to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    New,
    NotNew,
}

/// Lifecycle of an instance as seen by this reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Alive,
    NotAliveDisposed,
    NotAliveNoWriters,
}

/// Selection masks for `read`/`take`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMask {
    pub sample: u8,
    pub view: u8,
    pub instance: u8,
}

impl StateMask {
    pub const READ: u8 = 0x01;
    pub const NOT_READ: u8 = 0x02;
    pub const ANY_SAMPLE: u8 = 0x03;

    pub const NEW: u8 = 0x01;
    pub const NOT_NEW: u8 = 0x02;
    pub const ANY_VIEW: u8 = 0x03;

    pub const ALIVE: u8 = 0x01;
    pub const NOT_ALIVE_DISPOSED: u8 = 0x02;
    pub const NOT_ALIVE_NO_WRITERS: u8 = 0x04;
    pub const ANY_INSTANCE: u8 = 0x07;

    /// Every sample.
    pub const ANY: StateMask = StateMask {
        sample: Self::ANY_SAMPLE,
        view: Self::ANY_VIEW,
        instance: Self::ANY_INSTANCE,
    };

    /// Samples not yet read, any view/instance state.
    pub const UNREAD: StateMask = StateMask {
        sample: Self::NOT_READ,
        view: Self::ANY_VIEW,
        instance: Self::ANY_INSTANCE,
    };

    fn matches(&self, sample: SampleState, view: ViewState, instance: InstanceState) -> bool {
        let s = match sample {
            SampleState::Read => Self::READ,
            SampleState::NotRead => Self::NOT_READ,
        };
        let v = match view {
            ViewState::New => Self::NEW,
            ViewState::NotNew => Self::NOT_NEW,
        };
        let i = match instance {
            InstanceState::Alive => Self::ALIVE,
            InstanceState::NotAliveDisposed => Self::NOT_ALIVE_DISPOSED,
            InstanceState::NotAliveNoWriters => Self::NOT_ALIVE_NO_WRITERS,
        };
        self.sample & s != 0 && self.view & v != 0 && self.instance & i != 0
    }
}

/// Metadata returned alongside each sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub sample_state: SampleState,
    pub view_state: ViewState,
    pub instance_state: InstanceState,
    pub instance_handle: InstanceHandle,
    pub writer_guid: Guid,
    pub sequence_number: SequenceNumber,
    pub source_timestamp: Option<Time>,
    pub reception_timestamp: Option<Time>,
    /// False for dispose/unregister notifications carrying no data.
    pub valid_data: bool,
}

struct Sample {
    change: CacheChange,
    state: SampleState,
}

struct Instance {
    state: InstanceState,
    view: ViewState,
    writers: HashSet<Guid>,
    samples: usize,
}

#[derive(Default)]
struct State {
    samples: Vec<Sample>,
    keys: HashSet<SampleIdentity>,
    instances: HashMap<InstanceHandle, Instance>,
    unread: usize,
}

impl State {
    fn remove_at(&mut self, index: usize) -> Sample {
        let sample = self.samples.remove(index);
        self.keys.remove(&sample.change.identity());
        if sample.state == SampleState::NotRead {
            self.unread -= 1;
        }
        let handle = sample.change.instance_handle;
        if let Some(inst) = self.instances.get_mut(&handle) {
            inst.samples -= 1;
            if inst.samples == 0 && inst.state != InstanceState::Alive {
                self.instances.remove(&handle);
            }
        }
        sample
    }

    fn position(&self, writer_guid: Guid, seq: SequenceNumber) -> Option<usize> {
        if !self.keys.contains(&SampleIdentity::new(writer_guid, seq)) {
            return None;
        }
        self.samples.iter().position(|s| {
            s.change.writer_guid == writer_guid && s.change.sequence_number == seq
        })
    }

    fn info(&self, sample: &Sample) -> SampleInfo {
        let handle = sample.change.instance_handle;
        let (view_state, instance_state) = self
            .instances
            .get(&handle)
            .map_or((ViewState::NotNew, InstanceState::Alive), |i| (i.view, i.state));
        SampleInfo {
            sample_state: sample.state,
            view_state,
            instance_state,
            instance_handle: handle,
            writer_guid: sample.change.writer_guid,
            sequence_number: sample.change.sequence_number,
            source_timestamp: sample.change.source_timestamp,
            reception_timestamp: sample.change.reception_timestamp,
            valid_data: sample.change.kind.is_alive(),
        }
    }

    fn matches(&self, sample: &Sample, mask: &StateMask) -> bool {
        let (view, instance) = self
            .instances
            .get(&sample.change.instance_handle)
            .map_or((ViewState::NotNew, InstanceState::Alive), |i| (i.view, i.state));
        mask.matches(sample.state, view, instance)
    }
}

/// Received samples of one reader.
pub struct ReaderHistory {
    attrs: HistoryAttributes,
    order: DestinationOrder,
    state: ReentrantMutex<RefCell<State>>,
    unread_epoch: AtomicU64,
    unread_lock: Mutex<()>,
    unread_cv: Condvar,
}

impl ReaderHistory {
    pub fn new(attrs: HistoryAttributes, order: DestinationOrder) -> Result<Self> {
        attrs.validate()?;
        Ok(Self {
            attrs,
            order,
            state: ReentrantMutex::new(RefCell::new(State::default())),
            unread_epoch: AtomicU64::new(0),
            unread_lock: Mutex::new(()),
            unread_cv: Condvar::new(),
        })
    }

    #[must_use]
    pub fn attributes(&self) -> &HistoryAttributes {
        &self.attrs
    }

    /// Store a received change.
    ///
    /// Returns the identities evicted to make room (KEEP_LAST). Fails with
    /// [`Error::DuplicateChange`] for a known (writer, seq) and
    /// [`Error::ResourceLimitExceeded`] when a limit is hit and eviction is not
    /// allowed (KEEP_ALL, or a new instance over `max_instances`).
    pub fn add_change(&self, change: CacheChange) -> Result<Vec<SampleIdentity>> {
        let evicted = {
            let guard = self.state.lock();
            let mut st = guard.borrow_mut();
            if st.keys.contains(&change.identity()) {
                return Err(Error::DuplicateChange);
            }
            let evicted = self.make_room(&mut st, change.instance_handle)?;
            self.insert(&mut st, change);
            evicted
        };
        self.unread_epoch.fetch_add(1, Ordering::AcqRel);
        let _lock = self.unread_lock.lock();
        self.unread_cv.notify_all();
        Ok(evicted)
    }

    fn make_room(&self, st: &mut State, handle: InstanceHandle) -> Result<Vec<SampleIdentity>> {
        let limits = self.attrs.resource_limits;
        let keep_last = self.attrs.is_keep_last();
        let mut evicted = Vec::new();

        let instance_samples = st.instances.get(&handle).map(|i| i.samples);
        match instance_samples {
            None => {
                if exceeds(st.instances.len(), limits.max_instances) {
                    // Instances with no samples left can be forgotten.
                    let empty: Option<InstanceHandle> = st
                        .instances
                        .iter()
                        .find(|(_, i)| i.samples == 0)
                        .map(|(h, _)| *h);
                    match empty {
                        Some(h) => {
                            st.instances.remove(&h);
                        }
                        None => {
                            return Err(Error::ResourceLimitExceeded(format!(
                                "max_instances={}",
                                limits.max_instances
                            )))
                        }
                    }
                }
            }
            Some(count) => {
                if exceeds(count, self.attrs.per_instance_bound()) {
                    if !keep_last {
                        return Err(Error::ResourceLimitExceeded(format!(
                            "max_samples_per_instance={}",
                            limits.max_samples_per_instance
                        )));
                    }
                    if let Some(idx) = Self::oldest_index(st, |s| s.change.instance_handle == handle) {
                        evicted.push(st.remove_at(idx).change.identity());
                    }
                }
            }
        }

        if exceeds(st.samples.len(), limits.max_samples) {
            if !keep_last {
                return Err(Error::ResourceLimitExceeded(format!(
                    "max_samples={}",
                    limits.max_samples
                )));
            }
            if let Some(idx) = Self::oldest_index(st, |_| true) {
                evicted.push(st.remove_at(idx).change.identity());
            }
        }
        Ok(evicted)
    }

    /// Index of the earliest-received matching sample.
    fn oldest_index(st: &State, pred: impl Fn(&Sample) -> bool) -> Option<usize> {
        st.samples
            .iter()
            .enumerate()
            .filter(|(_, s)| pred(s))
            .min_by_key(|(_, s)| (s.change.reception_timestamp, s.change.sequence_number))
            .map(|(i, _)| i)
    }

    fn insert(&self, st: &mut State, mut change: CacheChange) {
        if change.reception_timestamp.is_none() {
            change.reception_timestamp = Some(Time::now());
        }
        let handle = change.instance_handle;
        let writer = change.writer_guid;
        let kind = change.kind;
        let instance = st.instances.entry(handle).or_insert_with(|| Instance {
            state: InstanceState::Alive,
            view: ViewState::New,
            writers: HashSet::new(),
            samples: 0,
        });
        instance.samples += 1;
        match kind {
            ChangeKind::Alive => {
                if instance.state != InstanceState::Alive {
                    instance.view = ViewState::New;
                }
                instance.state = InstanceState::Alive;
                instance.writers.insert(writer);
            }
            ChangeKind::NotAliveDisposed | ChangeKind::NotAliveDisposedUnregistered => {
                instance.state = InstanceState::NotAliveDisposed;
                if kind == ChangeKind::NotAliveDisposedUnregistered {
                    instance.writers.remove(&writer);
                }
            }
            ChangeKind::NotAliveUnregistered => {
                instance.writers.remove(&writer);
                if instance.writers.is_empty() && instance.state == InstanceState::Alive {
                    instance.state = InstanceState::NotAliveNoWriters;
                }
            }
        }

        st.keys.insert(change.identity());
        st.unread += 1;
        let sample = Sample {
            change,
            state: SampleState::NotRead,
        };
        let index = match self.order {
            DestinationOrder::ByReceptionTimestamp => st.samples.len(),
            DestinationOrder::BySourceTimestamp => {
                let ts = sample.change.source_timestamp;
                st.samples
                    .iter()
                    .rposition(|s| s.change.source_timestamp <= ts)
                    .map_or(0, |i| i + 1)
            }
        };
        st.samples.insert(index, sample);
    }

    /// Remove one sample.
    pub fn remove_change(&self, writer_guid: Guid, seq: SequenceNumber) -> bool {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        match st.position(writer_guid, seq) {
            Some(idx) => {
                st.remove_at(idx);
                true
            }
            None => false,
        }
    }

    /// Remove every sample of `writer_guid` with a sequence number up to and
    /// including `seq`.
    pub fn remove_change_up_to(&self, writer_guid: Guid, seq: SequenceNumber) -> usize {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        let mut removed = 0;
        let mut idx = 0;
        while idx < st.samples.len() {
            let c = &st.samples[idx].change;
            if c.writer_guid == writer_guid && c.sequence_number <= seq {
                st.remove_at(idx);
                removed += 1;
            } else {
                idx += 1;
            }
        }
        removed
    }

    /// Remove the first sample in presentation order.
    pub fn remove_min_change(&self) -> bool {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        if st.samples.is_empty() {
            return false;
        }
        st.remove_at(0);
        true
    }

    #[must_use]
    pub fn find_change(&self, writer_guid: Guid, seq: SequenceNumber) -> Option<CacheChange> {
        let guard = self.state.lock();
        let st = guard.borrow();
        st.position(writer_guid, seq)
            .map(|idx| st.samples[idx].change.clone())
    }

    #[must_use]
    pub fn contains(&self, writer_guid: Guid, seq: SequenceNumber) -> bool {
        let guard = self.state.lock();
        let contains = guard
            .borrow()
            .keys
            .contains(&SampleIdentity::new(writer_guid, seq));
        contains
    }

    /// First sample in presentation order.
    #[must_use]
    pub fn get_min_change(&self) -> Option<CacheChange> {
        let guard = self.state.lock();
        let st = guard.borrow();
        st.samples.first().map(|s| s.change.clone())
    }

    /// Last sample in presentation order.
    #[must_use]
    pub fn get_max_change(&self) -> Option<CacheChange> {
        let guard = self.state.lock();
        let st = guard.borrow();
        st.samples.last().map(|s| s.change.clone())
    }

    /// Read the first unread sample, marking it read.
    pub fn read_next_sample(&self) -> Option<(CacheChange, SampleInfo)> {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        let idx = st
            .samples
            .iter()
            .position(|s| s.state == SampleState::NotRead)?;
        let info = st.info(&st.samples[idx]);
        Self::mark_read(&mut st, idx);
        Some((st.samples[idx].change.clone(), info))
    }

    /// Remove and return the first unread sample.
    pub fn take_next_sample(&self) -> Option<(CacheChange, SampleInfo)> {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        let idx = st
            .samples
            .iter()
            .position(|s| s.state == SampleState::NotRead)?;
        let info = st.info(&st.samples[idx]);
        Self::mark_viewed(&mut st, idx);
        let sample = st.remove_at(idx);
        Some((sample.change, info))
    }

    /// Up to `max` samples matching `mask`, marked read.
    pub fn read(&self, max: usize, mask: StateMask) -> Vec<(CacheChange, SampleInfo)> {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        let selected: Vec<usize> = (0..st.samples.len())
            .filter(|i| st.matches(&st.samples[*i], &mask))
            .take(max)
            .collect();
        let out: Vec<(CacheChange, SampleInfo)> = selected
            .iter()
            .map(|i| (st.samples[*i].change.clone(), st.info(&st.samples[*i])))
            .collect();
        for idx in selected {
            Self::mark_read(&mut st, idx);
        }
        out
    }

    /// Up to `max` samples matching `mask`, removed from the history.
    pub fn take(&self, max: usize, mask: StateMask) -> Vec<(CacheChange, SampleInfo)> {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        let selected: Vec<usize> = (0..st.samples.len())
            .filter(|i| st.matches(&st.samples[*i], &mask))
            .take(max)
            .collect();
        let infos: Vec<SampleInfo> = selected.iter().map(|i| st.info(&st.samples[*i])).collect();
        for idx in &selected {
            Self::mark_viewed(&mut st, *idx);
        }
        let mut out = Vec::with_capacity(selected.len());
        for (idx, info) in selected.into_iter().rev().zip(infos.into_iter().rev()) {
            out.push((st.remove_at(idx).change, info));
        }
        out.reverse();
        out
    }

    fn mark_read(st: &mut State, idx: usize) {
        if st.samples[idx].state == SampleState::NotRead {
            st.samples[idx].state = SampleState::Read;
            st.unread -= 1;
        }
        Self::mark_viewed(st, idx);
    }

    fn mark_viewed(st: &mut State, idx: usize) {
        let handle = st.samples[idx].change.instance_handle;
        if let Some(inst) = st.instances.get_mut(&handle) {
            inst.view = ViewState::NotNew;
        }
    }

    /// Wait until an unread sample is available. Returns false on timeout.
    pub fn wait_for_unread_message(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let epoch = self.unread_epoch.load(Ordering::Acquire);
            if self.unread_count() > 0 {
                return true;
            }
            let mut lock = self.unread_lock.lock();
            if self.unread_epoch.load(Ordering::Acquire) != epoch {
                continue;
            }
            match deadline {
                Some(deadline) => {
                    if self.unread_cv.wait_until(&mut lock, deadline).timed_out() {
                        drop(lock);
                        return self.unread_count() > 0;
                    }
                }
                None => self.unread_cv.wait(&mut lock),
            }
        }
    }

    /// A writer is gone: instances it kept alive alone lose their writers.
    pub fn writer_unmatched(&self, writer_guid: Guid) {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        let mut forget = Vec::new();
        for (handle, inst) in st.instances.iter_mut() {
            if inst.writers.remove(&writer_guid)
                && inst.writers.is_empty()
                && inst.state == InstanceState::Alive
            {
                inst.state = InstanceState::NotAliveNoWriters;
                if inst.samples == 0 {
                    forget.push(*handle);
                }
            }
        }
        for handle in forget {
            st.instances.remove(&handle);
        }
    }

    #[must_use]
    pub fn instance_state(&self, handle: &InstanceHandle) -> Option<InstanceState> {
        let guard = self.state.lock();
        let state = guard.borrow().instances.get(handle).map(|i| i.state);
        state
    }

    #[must_use]
    pub fn unread_count(&self) -> usize {
        let guard = self.state.lock();
        let unread = guard.borrow().unread;
        unread
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let guard = self.state.lock();
        let len = guard.borrow().samples.len();
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, GuidPrefix};
    use crate::pool::SerializedPayload;
    use crate::qos::ResourceLimits;
    use std::sync::Arc;

    fn writer(n: u8) -> Guid {
        Guid::new(GuidPrefix([n; 12]), EntityId::new(1, 0x02))
    }

    fn change(w: u8, seq: i64, key: u8) -> CacheChange {
        let mut c = CacheChange::new(
            ChangeKind::Alive,
            writer(w),
            InstanceHandle::from_key(&[key]),
            SerializedPayload::from_vec(vec![0, 1, 0, 0, key]),
        );
        c.sequence_number = SequenceNumber(seq);
        c
    }

    fn history(attrs: HistoryAttributes) -> ReaderHistory {
        ReaderHistory::new(attrs, DestinationOrder::ByReceptionTimestamp).expect("valid qos")
    }

    #[test]
    fn test_duplicate_rejected() {
        let h = history(HistoryAttributes::keep_last(5));
        h.add_change(change(1, 1, 0)).expect("first add");
        assert!(matches!(h.add_change(change(1, 1, 0)), Err(Error::DuplicateChange)));
        h.add_change(change(2, 1, 0)).expect("same seq from another writer");
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn test_keep_last_evicts_per_instance() {
        let h = history(HistoryAttributes::keep_last(2));
        for seq in 1..=3 {
            h.add_change(change(1, seq, 7)).expect("add");
        }
        h.add_change(change(1, 4, 8)).expect("other instance");
        assert_eq!(h.len(), 3);
        assert!(!h.contains(writer(1), SequenceNumber(1)));
        assert!(h.contains(writer(1), SequenceNumber(4)));
    }

    #[test]
    fn test_keep_all_rejects_when_full() {
        let h = history(HistoryAttributes::keep_all(2));
        h.add_change(change(1, 1, 0)).expect("1");
        h.add_change(change(1, 2, 0)).expect("2");
        assert!(matches!(
            h.add_change(change(1, 3, 0)),
            Err(Error::ResourceLimitExceeded(_))
        ));
        assert!(h.take_next_sample().is_some());
        h.add_change(change(1, 3, 0)).expect("room after take");
    }

    #[test]
    fn test_max_instances_rejects_new_instance() {
        let attrs = HistoryAttributes::keep_last(1).with_limits(ResourceLimits {
            max_samples: 10,
            max_instances: 1,
            max_samples_per_instance: 1,
        });
        let h = history(attrs);
        h.add_change(change(1, 1, 1)).expect("first instance");
        assert!(matches!(
            h.add_change(change(1, 2, 2)),
            Err(Error::ResourceLimitExceeded(_))
        ));
    }

    #[test]
    fn test_read_then_take() {
        let h = history(HistoryAttributes::keep_last(5));
        h.add_change(change(1, 1, 0)).expect("add");
        h.add_change(change(1, 2, 0)).expect("add");
        let (c, info) = h.read_next_sample().expect("unread sample");
        assert_eq!(c.sequence_number, SequenceNumber(1));
        assert_eq!(info.sample_state, SampleState::NotRead);
        assert_eq!(info.view_state, ViewState::New);
        assert_eq!(h.unread_count(), 1);

        let (c, info) = h.take_next_sample().expect("second sample");
        assert_eq!(c.sequence_number, SequenceNumber(2));
        assert_eq!(info.view_state, ViewState::NotNew);
        assert!(h.take_next_sample().is_none());
        assert_eq!(h.len(), 1);

        let read = h.take(10, StateMask {
            sample: StateMask::READ,
            ..StateMask::ANY
        });
        assert_eq!(read.len(), 1);
        assert!(h.is_empty());
    }

    #[test]
    fn test_source_timestamp_order() {
        let h = ReaderHistory::new(
            HistoryAttributes::keep_last(5),
            DestinationOrder::BySourceTimestamp,
        )
        .expect("valid qos");
        let mut late = change(1, 1, 0);
        late.source_timestamp = Some(Time::new(20, 0));
        let mut early = change(2, 1, 0);
        early.source_timestamp = Some(Time::new(10, 0));
        h.add_change(late).expect("add");
        h.add_change(early).expect("add");
        let first = h.take_next_sample().expect("sample").0;
        assert_eq!(first.writer_guid, writer(2));
    }

    #[test]
    fn test_instance_states() {
        let h = history(HistoryAttributes::keep_last(5));
        let handle = InstanceHandle::from_key(&[3]);
        h.add_change(change(1, 1, 3)).expect("alive");
        assert_eq!(h.instance_state(&handle), Some(InstanceState::Alive));

        let mut dispose = change(1, 2, 3);
        dispose.kind = ChangeKind::NotAliveDisposed;
        dispose.serialized_payload = SerializedPayload::empty();
        h.add_change(dispose).expect("dispose");
        assert_eq!(h.instance_state(&handle), Some(InstanceState::NotAliveDisposed));
        let infos = h.read(10, StateMask::ANY);
        assert!(!infos[1].1.valid_data);

        h.add_change(change(2, 1, 4)).expect("alive");
        h.writer_unmatched(writer(2));
        assert_eq!(
            h.instance_state(&InstanceHandle::from_key(&[4])),
            Some(InstanceState::NotAliveNoWriters)
        );
    }

    #[test]
    fn test_wait_for_unread_message() {
        let h = Arc::new(history(HistoryAttributes::keep_last(5)));
        assert!(!h.wait_for_unread_message(Duration::from_millis(10)));
        let producer = Arc::clone(&h);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.add_change(change(1, 1, 0)).expect("add");
        });
        assert!(h.wait_for_unread_message(Duration::from_secs(5)));
        t.join().expect("producer thread");
    }

    #[test]
    fn test_remove_up_to_per_writer() {
        let h = history(HistoryAttributes::keep_last(10));
        for seq in 1..=4 {
            h.add_change(change(1, seq, 0)).expect("add");
        }
        h.add_change(change(2, 1, 0)).expect("add");
        assert_eq!(h.remove_change_up_to(writer(1), SequenceNumber(3)), 3);
        assert!(h.remove_change(writer(2), SequenceNumber(1)));
        assert_eq!(h.len(), 1);
        assert!(h.remove_min_change());
        assert!(h.get_min_change().is_none());
    }
}
