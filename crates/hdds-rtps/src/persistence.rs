// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persistence store abstraction
//!
//! TRANSIENT and PERSISTENT writers mirror their history into a
//! [`PersistenceStore`] and restore it when re-created with the same GUID.
//! The store keeps `(writer GUID, sequence number) -> change` plus the last
//! sequence number assigned by each writer, so numbering resumes after a
//! restart even when every change was already removed.
//!
//! [`InMemoryStore`] ships here; the SQLite backend lives in the
//! `hdds-rtps-persistence` crate.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::core::{CacheChange, ChangeKind, Guid, InstanceHandle, SequenceNumber, Time};
use crate::pool::SerializedPayload;
use crate::Result;

/// A change as stored by a persistence backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedChange {
    pub writer_guid: Guid,
    pub sequence_number: SequenceNumber,
    pub kind: ChangeKind,
    pub instance_handle: InstanceHandle,
    pub source_timestamp: Option<Time>,
    /// Serialized payload, encapsulation header included.
    pub payload: Vec<u8>,
}

impl PersistedChange {
    #[must_use]
    pub fn from_change(change: &CacheChange) -> Self {
        Self {
            writer_guid: change.writer_guid,
            sequence_number: change.sequence_number,
            kind: change.kind,
            instance_handle: change.instance_handle,
            source_timestamp: change.source_timestamp,
            payload: change.serialized_payload.as_slice().to_vec(),
        }
    }

    #[must_use]
    pub fn into_change(self) -> CacheChange {
        let mut change = CacheChange::new(
            self.kind,
            self.writer_guid,
            self.instance_handle,
            SerializedPayload::from_vec(self.payload),
        );
        change.sequence_number = self.sequence_number;
        change.source_timestamp = self.source_timestamp;
        change
    }
}

/// Storage backend for writer histories.
///
/// Implementations must be safe to call from any writer thread.
pub trait PersistenceStore: Send + Sync {
    /// Save (or overwrite) one change.
    fn store_change(&self, change: &PersistedChange) -> Result<()>;

    /// Forget one change; missing changes are not an error.
    fn remove_change(&self, writer: &Guid, seq: SequenceNumber) -> Result<()>;

    /// Every stored change of `writer`, ascending.
    fn load_changes(&self, writer: &Guid) -> Result<Vec<PersistedChange>>;

    fn set_last_sequence(&self, writer: &Guid, seq: SequenceNumber) -> Result<()>;

    /// Last sequence number recorded for `writer`, if any.
    fn last_sequence(&self, writer: &Guid) -> Result<Option<SequenceNumber>>;
}

/// Process-local store, mostly for tests.
#[derive(Default)]
pub struct InMemoryStore {
    changes: Mutex<BTreeMap<(Guid, SequenceNumber), PersistedChange>>,
    last: Mutex<HashMap<Guid, SequenceNumber>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistenceStore for InMemoryStore {
    fn store_change(&self, change: &PersistedChange) -> Result<()> {
        self.changes
            .lock()
            .insert((change.writer_guid, change.sequence_number), change.clone());
        Ok(())
    }

    fn remove_change(&self, writer: &Guid, seq: SequenceNumber) -> Result<()> {
        self.changes.lock().remove(&(*writer, seq));
        Ok(())
    }

    fn load_changes(&self, writer: &Guid) -> Result<Vec<PersistedChange>> {
        let changes = self.changes.lock();
        Ok(changes
            .range((*writer, SequenceNumber(i64::MIN))..=(*writer, SequenceNumber::MAX))
            .map(|(_, c)| c.clone())
            .collect())
    }

    fn set_last_sequence(&self, writer: &Guid, seq: SequenceNumber) -> Result<()> {
        let mut last = self.last.lock();
        let entry = last.entry(*writer).or_insert(seq);
        *entry = (*entry).max(seq);
        Ok(())
    }

    fn last_sequence(&self, writer: &Guid) -> Result<Option<SequenceNumber>> {
        Ok(self.last.lock().get(writer).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, GuidPrefix};

    fn guid(key: u32) -> Guid {
        Guid::new(GuidPrefix([5; 12]), EntityId::new(key, 0x02))
    }

    fn persisted(writer: Guid, seq: i64) -> PersistedChange {
        PersistedChange {
            writer_guid: writer,
            sequence_number: SequenceNumber(seq),
            kind: ChangeKind::Alive,
            instance_handle: InstanceHandle::from_key(&[seq as u8]),
            source_timestamp: Some(Time::new(1, 0)),
            payload: vec![0, 1, 0, 0, seq as u8],
        }
    }

    #[test]
    fn test_store_load_per_writer() {
        let store = InMemoryStore::new();
        for seq in [3, 1, 2] {
            store.store_change(&persisted(guid(1), seq)).expect("store");
        }
        store.store_change(&persisted(guid(2), 9)).expect("store");
        let loaded = store.load_changes(&guid(1)).expect("load");
        let seqs: Vec<i64> = loaded.iter().map(|c| c.sequence_number.0).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        store.remove_change(&guid(1), SequenceNumber(2)).expect("remove");
        assert_eq!(store.load_changes(&guid(1)).expect("load").len(), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_last_sequence_never_decreases() {
        let store = InMemoryStore::new();
        assert_eq!(store.last_sequence(&guid(1)).expect("query"), None);
        store.set_last_sequence(&guid(1), SequenceNumber(7)).expect("set");
        store.set_last_sequence(&guid(1), SequenceNumber(4)).expect("set");
        assert_eq!(
            store.last_sequence(&guid(1)).expect("query"),
            Some(SequenceNumber(7))
        );
    }

    #[test]
    fn test_change_conversion_keeps_metadata() {
        let original = persisted(guid(1), 4);
        let change = original.clone().into_change();
        assert_eq!(change.sequence_number, SequenceNumber(4));
        assert_eq!(PersistedChange::from_change(&change), original);
    }
}
