// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sequence numbers and per-writer sequence generation.
//!
//! On the wire a sequence number is two 32-bit words: `high` (signed) and
//! `low` (unsigned), combined as `(high << 32) | low`.

use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicI64, Ordering};

/// 64-bit RTPS sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SequenceNumber(pub i64);

impl SequenceNumber {
    /// SEQUENCENUMBER_UNKNOWN (high = -1, low = 0).
    pub const UNKNOWN: SequenceNumber = SequenceNumber(-1_i64 << 32);
    pub const ZERO: SequenceNumber = SequenceNumber(0);
    pub const ONE: SequenceNumber = SequenceNumber(1);
    pub const MAX: SequenceNumber = SequenceNumber(i64::MAX);

    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Combine the two wire words.
    #[must_use]
    pub fn from_parts(high: i32, low: u32) -> Self {
        Self((i64::from(high) << 32) | i64::from(low))
    }

    #[must_use]
    pub fn high(self) -> i32 {
        (self.0 >> 32) as i32
    }

    #[must_use]
    pub fn low(self) -> u32 {
        self.0 as u32
    }

    #[must_use]
    pub fn value(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    #[must_use]
    pub fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl Add<i64> for SequenceNumber {
    type Output = SequenceNumber;

    fn add(self, rhs: i64) -> Self::Output {
        SequenceNumber(self.0.saturating_add(rhs))
    }
}

impl Sub<SequenceNumber> for SequenceNumber {
    type Output = i64;

    fn sub(self, rhs: SequenceNumber) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

impl From<i64> for SequenceNumber {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence number generator (per-writer).
///
/// Starts at 1; values never repeat and never decrease. The writer history
/// draws from it while holding its lock, so admission order and sequence
/// order are the same.
#[derive(Debug)]
pub struct SeqNumGenerator {
    next: AtomicI64,
}

impl SeqNumGenerator {
    pub fn new() -> Self {
        Self::starting_at(SequenceNumber::ONE)
    }

    /// Resume numbering (restored persistent history).
    pub fn starting_at(first: SequenceNumber) -> Self {
        Self {
            next: AtomicI64::new(first.0.max(1)),
        }
    }

    #[inline]
    pub fn next(&self) -> SequenceNumber {
        SequenceNumber(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Sequence number the next call to `next()` will return.
    #[inline]
    pub fn peek(&self) -> SequenceNumber {
        SequenceNumber(self.next.load(Ordering::Relaxed))
    }

    /// Highest sequence number handed out so far (0 if none).
    #[inline]
    pub fn last_assigned(&self) -> SequenceNumber {
        self.peek().prev()
    }
}

impl Default for SeqNumGenerator {
    fn default() -> Self {
        Self::new()
    }
}
