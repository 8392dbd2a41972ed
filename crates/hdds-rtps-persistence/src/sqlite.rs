// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite persistence backend
//!
//! One table of changes keyed by `(writer GUID, sequence number)` and one
//! table of last-assigned sequence numbers per writer.

use std::path::Path;

use anyhow::{anyhow, Context};
use hdds_rtps::core::{ChangeKind, Guid, InstanceHandle, SequenceNumber, Time};
use hdds_rtps::persistence::{PersistedChange, PersistenceStore};
use hdds_rtps::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

/// SQLite persistence store
///
/// Thread-safe via an internal mutex (a SQLite `Connection` is not `Sync`).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE changes (
///     writer_guid BLOB NOT NULL,
///     sequence INTEGER NOT NULL,
///     kind INTEGER NOT NULL,
///     instance_handle BLOB NOT NULL,
///     ts_seconds INTEGER,
///     ts_fraction INTEGER,
///     payload BLOB NOT NULL,
///     PRIMARY KEY (writer_guid, sequence)
/// );
/// CREATE TABLE writers (
///     writer_guid BLOB PRIMARY KEY,
///     last_sequence INTEGER NOT NULL
/// );
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a file-backed database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open SQLite database at {}", path.display()))
            .map_err(to_error)?;
        log::debug!("[SqliteStore::open] {}", path.display());
        Self::with_connection(conn)
    }

    /// In-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .context("failed to create in-memory SQLite database")
            .map_err(to_error)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn).map_err(to_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored changes across all writers.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM changes", [], |row| row.get(0))
            .context("count changes")
            .map_err(to_error)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Drop every change and sequence record of `writer`.
    pub fn forget_writer(&self, writer: &Guid) -> Result<()> {
        let mut conn = self.conn.lock();
        forget(&mut conn, &writer.to_bytes())
            .with_context(|| format!("forget writer {}", writer))
            .map_err(to_error)
    }
}

fn forget(conn: &mut Connection, key: &[u8]) -> anyhow::Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM changes WHERE writer_guid = ?1", [key])?;
    tx.execute("DELETE FROM writers WHERE writer_guid = ?1", [key])?;
    tx.commit()?;
    Ok(())
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS changes (
            writer_guid BLOB NOT NULL,
            sequence INTEGER NOT NULL,
            kind INTEGER NOT NULL,
            instance_handle BLOB NOT NULL,
            ts_seconds INTEGER,
            ts_fraction INTEGER,
            payload BLOB NOT NULL,
            PRIMARY KEY (writer_guid, sequence)
        );
        CREATE TABLE IF NOT EXISTS writers (
            writer_guid BLOB PRIMARY KEY,
            last_sequence INTEGER NOT NULL
        );",
    )
    .context("create schema")
}

fn to_error(e: anyhow::Error) -> Error {
    log::warn!("[SqliteStore] {:#}", e);
    Error::Persistence(format!("{:#}", e))
}

fn fixed16(blob: &[u8], column: &str) -> anyhow::Result<[u8; 16]> {
    blob.try_into()
        .map_err(|_| anyhow!("column {} holds {} bytes, expected 16", column, blob.len()))
}

struct Row {
    writer_guid: Vec<u8>,
    sequence: i64,
    kind: u8,
    instance_handle: Vec<u8>,
    ts_seconds: Option<i32>,
    ts_fraction: Option<u32>,
    payload: Vec<u8>,
}

impl Row {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            writer_guid: row.get(0)?,
            sequence: row.get(1)?,
            kind: row.get(2)?,
            instance_handle: row.get(3)?,
            ts_seconds: row.get(4)?,
            ts_fraction: row.get(5)?,
            payload: row.get(6)?,
        })
    }

    fn into_change(self) -> anyhow::Result<PersistedChange> {
        let source_timestamp = match (self.ts_seconds, self.ts_fraction) {
            (Some(seconds), Some(fraction)) => Some(Time { seconds, fraction }),
            _ => None,
        };
        Ok(PersistedChange {
            writer_guid: Guid::from_bytes(fixed16(&self.writer_guid, "writer_guid")?),
            sequence_number: SequenceNumber(self.sequence),
            kind: ChangeKind::from_status_info(self.kind),
            instance_handle: InstanceHandle(fixed16(&self.instance_handle, "instance_handle")?),
            source_timestamp,
            payload: self.payload,
        })
    }
}

impl PersistenceStore for SqliteStore {
    fn store_change(&self, change: &PersistedChange) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO changes
                (writer_guid, sequence, kind, instance_handle, ts_seconds, ts_fraction, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &change.writer_guid.to_bytes()[..],
                change.sequence_number.0,
                change.kind.status_info(),
                &change.instance_handle.0[..],
                change.source_timestamp.map(|t| t.seconds),
                change.source_timestamp.map(|t| t.fraction),
                change.payload,
            ],
        )
        .with_context(|| format!("store {} seq={}", change.writer_guid, change.sequence_number))
        .map_err(to_error)?;
        Ok(())
    }

    fn remove_change(&self, writer: &Guid, seq: SequenceNumber) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM changes WHERE writer_guid = ?1 AND sequence = ?2",
            params![&writer.to_bytes()[..], seq.0],
        )
        .with_context(|| format!("remove {} seq={}", writer, seq))
        .map_err(to_error)?;
        Ok(())
    }

    fn load_changes(&self, writer: &Guid) -> Result<Vec<PersistedChange>> {
        let conn = self.conn.lock();
        let load = || -> anyhow::Result<Vec<PersistedChange>> {
            let mut stmt = conn.prepare(
                "SELECT writer_guid, sequence, kind, instance_handle, ts_seconds, ts_fraction, payload
                 FROM changes
                 WHERE writer_guid = ?1
                 ORDER BY sequence ASC",
            )?;
            let rows = stmt
                .query_map([&writer.to_bytes()[..]], Row::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(Row::into_change).collect()
        };
        let changes = load()
            .with_context(|| format!("load {}", writer))
            .map_err(to_error)?;
        log::debug!("[SqliteStore::load_changes] {} -> {} changes", writer, changes.len());
        Ok(changes)
    }

    fn set_last_sequence(&self, writer: &Guid, seq: SequenceNumber) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO writers (writer_guid, last_sequence) VALUES (?1, ?2)
             ON CONFLICT(writer_guid) DO UPDATE
             SET last_sequence = MAX(last_sequence, excluded.last_sequence)",
            params![&writer.to_bytes()[..], seq.0],
        )
        .with_context(|| format!("set last sequence {} = {}", writer, seq))
        .map_err(to_error)?;
        Ok(())
    }

    fn last_sequence(&self, writer: &Guid) -> Result<Option<SequenceNumber>> {
        let conn = self.conn.lock();
        let last: Option<i64> = conn
            .query_row(
                "SELECT last_sequence FROM writers WHERE writer_guid = ?1",
                [&writer.to_bytes()[..]],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("last sequence {}", writer))
            .map_err(to_error)?;
        Ok(last.map(SequenceNumber))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdds_rtps::core::{EntityId, GuidPrefix};

    fn guid(key: u32) -> Guid {
        Guid::new(GuidPrefix([3; 12]), EntityId::new(key, 0x02))
    }

    fn persisted(writer: Guid, seq: i64, kind: ChangeKind) -> PersistedChange {
        PersistedChange {
            writer_guid: writer,
            sequence_number: SequenceNumber(seq),
            kind,
            instance_handle: InstanceHandle::from_key(&[0, 0, 0, seq as u8]),
            source_timestamp: Some(Time {
                seconds: 1_700_000_000 + seq as i32,
                fraction: 0x4000_0000,
            }),
            payload: vec![0, 1, 0, 0, seq as u8],
        }
    }

    #[test]
    fn test_store_and_load_in_order() {
        let store = SqliteStore::new_in_memory().expect("store");
        for seq in [3, 1, 2] {
            store
                .store_change(&persisted(guid(1), seq, ChangeKind::Alive))
                .expect("store");
        }
        store
            .store_change(&persisted(guid(2), 9, ChangeKind::NotAliveDisposed))
            .expect("store");

        let loaded = store.load_changes(&guid(1)).expect("load");
        let seqs: Vec<i64> = loaded.iter().map(|c| c.sequence_number.0).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(loaded[1], persisted(guid(1), 2, ChangeKind::Alive));

        let other = store.load_changes(&guid(2)).expect("load");
        assert_eq!(other, vec![persisted(guid(2), 9, ChangeKind::NotAliveDisposed)]);
        assert_eq!(store.count().expect("count"), 4);
    }

    #[test]
    fn test_overwrite_and_remove() {
        let store = SqliteStore::new_in_memory().expect("store");
        let mut change = persisted(guid(1), 1, ChangeKind::Alive);
        store.store_change(&change).expect("store");
        change.payload = vec![0, 1, 0, 0, 0xff];
        change.source_timestamp = None;
        store.store_change(&change).expect("overwrite");
        assert_eq!(store.load_changes(&guid(1)).expect("load"), vec![change]);

        store.remove_change(&guid(1), SequenceNumber(1)).expect("remove");
        store.remove_change(&guid(1), SequenceNumber(42)).expect("missing is fine");
        assert!(store.load_changes(&guid(1)).expect("load").is_empty());
    }

    #[test]
    fn test_last_sequence_never_moves_back() {
        let store = SqliteStore::new_in_memory().expect("store");
        assert_eq!(store.last_sequence(&guid(1)).expect("query"), None);
        store.set_last_sequence(&guid(1), SequenceNumber(10)).expect("set");
        store.set_last_sequence(&guid(1), SequenceNumber(4)).expect("set");
        assert_eq!(
            store.last_sequence(&guid(1)).expect("query"),
            Some(SequenceNumber(10))
        );

        store.forget_writer(&guid(1)).expect("forget");
        assert_eq!(store.last_sequence(&guid(1)).expect("query"), None);
    }
}
