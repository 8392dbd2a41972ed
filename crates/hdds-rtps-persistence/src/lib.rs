// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite persistence backend for hdds-rtps
//!
//! [`SqliteStore`] implements [`PersistenceStore`] so TRANSIENT and
//! PERSISTENT writers survive a process restart: hand it to
//! `ParticipantBuilder::with_persistence` and re-create the writer with the
//! same GUID.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hdds_rtps_persistence::SqliteStore;
//!
//! let store = Arc::new(SqliteStore::open("/var/lib/app/history.db").expect("open"));
//! ```

mod sqlite;

pub use sqlite::SqliteStore;

pub use hdds_rtps::persistence::{PersistedChange, PersistenceStore};
