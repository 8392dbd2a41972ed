// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-instance deadline tracking.
//!
//! Writers touch an instance on every write (offered deadline), readers on
//! every accepted sample (requested deadline). The owning endpoint runs
//! [`DeadlineTracker::check`] from a periodic event; each instance is
//! reported at most once per elapsed period.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::InstanceHandle;

pub struct DeadlineTracker {
    period: Duration,
    last_update: Mutex<HashMap<InstanceHandle, Instant>>,
    missed_total: AtomicU64,
}

impl DeadlineTracker {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_update: Mutex::new(HashMap::new()),
            missed_total: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// A sample of `handle` was written or received.
    pub fn touch(&self, handle: InstanceHandle, now: Instant) {
        self.last_update.lock().insert(handle, now);
    }

    /// Stop tracking an instance (disposed, unregistered, writer gone).
    pub fn forget(&self, handle: &InstanceHandle) {
        self.last_update.lock().remove(handle);
    }

    /// Instances whose last update is older than one period. Their clock
    /// restarts so the next report comes one period later.
    pub fn check(&self, now: Instant) -> Vec<InstanceHandle> {
        let mut missed = Vec::new();
        let mut last = self.last_update.lock();
        for (handle, at) in last.iter_mut() {
            if now.saturating_duration_since(*at) >= self.period {
                missed.push(*handle);
                *at = now;
            }
        }
        drop(last);
        if !missed.is_empty() {
            self.missed_total
                .fetch_add(missed.len() as u64, Ordering::Relaxed);
            log::debug!("[DeadlineTracker::check] {} instance(s) missed their deadline", missed.len());
        }
        missed
    }

    /// Deadline misses reported so far.
    #[must_use]
    pub fn missed_total(&self) -> u64 {
        self.missed_total.load(Ordering::Relaxed)
    }
}
