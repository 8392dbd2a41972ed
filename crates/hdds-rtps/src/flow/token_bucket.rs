// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Period-based token bucket.
//!
//! The bucket holds at most `capacity` bytes (`max_bytes_per_period`) and is
//! refilled by a full `capacity` at every period boundary. A message larger
//! than the whole budget may still go out when the bucket is full; the
//! bucket then runs a deficit that following periods pay back, so the
//! long-run rate stays bounded.

use std::time::{Duration, Instant};

/// Bandwidth budget of one flow controller.
#[derive(Debug)]
pub struct TokenBucket {
    /// Current token count in bytes; negative while paying back an
    /// oversize send.
    tokens: i64,

    /// Bytes granted per period.
    capacity: u64,

    period: Duration,

    /// Start of the current period.
    period_start: Instant,
}

impl TokenBucket {
    /// Full bucket granting `capacity` bytes every `period`.
    pub fn new(capacity: u64, period: Duration) -> Self {
        Self::new_at(capacity, period, Instant::now())
    }

    pub(crate) fn new_at(capacity: u64, period: Duration, now: Instant) -> Self {
        Self {
            tokens: clamp_i64(capacity),
            capacity,
            period: period.max(Duration::from_micros(1)),
            period_start: now,
        }
    }

    /// Try to consume tokens for a message.
    ///
    /// Returns `false` (nothing consumed) if the bucket cannot cover `bytes`.
    /// A full bucket always accepts, even for messages larger than the
    /// whole budget.
    pub fn try_consume(&mut self, bytes: u64) -> bool {
        self.try_consume_at(bytes, Instant::now())
    }

    pub(crate) fn try_consume_at(&mut self, bytes: u64, now: Instant) -> bool {
        self.refill_at(now);
        if self.tokens >= clamp_i64(bytes) || self.is_full() {
            self.tokens -= clamp_i64(bytes);
            true
        } else {
            false
        }
    }

    /// Consume regardless of the balance (the message already went out).
    pub fn force_consume(&mut self, bytes: u64) {
        self.force_consume_at(bytes, Instant::now());
    }

    pub(crate) fn force_consume_at(&mut self, bytes: u64, now: Instant) {
        self.refill_at(now);
        self.tokens -= clamp_i64(bytes);
    }

    /// Budget a sender may use right now: `None` when the bucket is full
    /// (any single message may go), otherwise the remaining bytes.
    pub(crate) fn budget_at(&mut self, now: Instant) -> Option<usize> {
        self.refill_at(now);
        if self.is_full() {
            None
        } else {
            Some(usize::try_from(self.tokens.max(0)).unwrap_or(usize::MAX))
        }
    }

    /// Check if tokens are available without consuming.
    pub fn has_tokens(&mut self, bytes: u64) -> bool {
        self.refill_at(Instant::now());
        self.tokens >= clamp_i64(bytes) || self.is_full()
    }

    /// Current token count (negative while in deficit).
    pub fn tokens(&mut self) -> i64 {
        self.refill_at(Instant::now());
        self.tokens
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Time until `bytes` can be sent.
    ///
    /// Returns `Duration::ZERO` if already possible.
    pub fn time_until_available(&mut self, bytes: u64) -> Duration {
        self.time_until_available_at(bytes, Instant::now())
    }

    pub(crate) fn time_until_available_at(&mut self, bytes: u64, now: Instant) -> Duration {
        self.refill_at(now);
        if self.tokens >= clamp_i64(bytes) || self.is_full() {
            return Duration::ZERO;
        }
        let needed = clamp_i64(bytes.min(self.capacity)) - self.tokens;
        let capacity = clamp_i64(self.capacity).max(1);
        // Whole periods beyond the current one.
        let extra_periods = u32::try_from((needed - 1) / capacity).unwrap_or(u32::MAX);
        let next_boundary = self.period_start + self.period;
        next_boundary.saturating_duration_since(now) + self.period.saturating_mul(extra_periods)
    }

    /// Time until the next period boundary.
    pub(crate) fn time_until_refill_at(&self, now: Instant) -> Duration {
        (self.period_start + self.period).saturating_duration_since(now)
    }

    /// Refill for every period boundary crossed since the last call.
    /// Returns `true` when at least one new period started.
    pub(crate) fn refill_at(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.period_start);
        if elapsed < self.period {
            return false;
        }
        let periods = elapsed.as_nanos() / self.period.as_nanos();
        let periods_u32 = u32::try_from(periods).unwrap_or(u32::MAX);
        let add = i128::from(self.capacity).saturating_mul(periods as i128);
        let refilled = (i128::from(self.tokens) + add).min(i128::from(self.capacity));
        self.tokens = i64::try_from(refilled).unwrap_or(i64::MAX);
        self.period_start += self.period.saturating_mul(periods_u32);
        true
    }

    fn is_full(&self) -> bool {
        self.tokens >= clamp_i64(self.capacity)
    }

    /// Reset the bucket to full capacity.
    pub fn reset(&mut self) {
        self.tokens = clamp_i64(self.capacity);
        self.period_start = Instant::now();
    }

    /// Get fill ratio (0.0 to 1.0).
    pub fn fill_ratio(&mut self) -> f32 {
        self.refill_at(Instant::now());
        if self.capacity == 0 {
            return 1.0;
        }
        (self.tokens.max(0) as f32 / self.capacity as f32).min(1.0)
    }
}

fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(100);

    #[test]
    fn test_new_starts_full() {
        let mut bucket = TokenBucket::new(500, PERIOD);
        assert_eq!(bucket.tokens(), 500);
        assert!((bucket.fill_ratio() - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_try_consume_within_period() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new_at(500, PERIOD, t0);
        assert!(bucket.try_consume_at(300, t0));
        assert!(bucket.try_consume_at(200, t0));
        assert!(!bucket.try_consume_at(1, t0));
        assert_eq!(bucket.budget_at(t0), Some(0));
    }

    #[test]
    fn test_refill_at_period_boundary() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new_at(500, PERIOD, t0);
        assert!(bucket.try_consume_at(500, t0));
        assert!(!bucket.refill_at(t0 + Duration::from_millis(99)));
        assert!(!bucket.try_consume_at(100, t0 + Duration::from_millis(99)));
        assert!(bucket.try_consume_at(100, t0 + PERIOD));
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new_at(500, PERIOD, t0);
        bucket.try_consume_at(100, t0);
        bucket.refill_at(t0 + PERIOD * 10);
        assert_eq!(bucket.budget_at(t0 + PERIOD * 10), None);
    }

    #[test]
    fn test_oversize_message_runs_deficit() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new_at(100, PERIOD, t0);
        // Full bucket accepts a message larger than the whole budget.
        assert!(bucket.try_consume_at(250, t0));
        // Deficit of 150 needs two more refills before anything goes out.
        assert!(!bucket.try_consume_at(1, t0 + PERIOD));
        assert_eq!(bucket.budget_at(t0 + PERIOD * 2), Some(50));
        assert_eq!(bucket.budget_at(t0 + PERIOD * 3), None);
    }

    #[test]
    fn test_time_until_available() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new_at(100, PERIOD, t0);
        assert_eq!(bucket.time_until_available_at(100, t0), Duration::ZERO);
        bucket.force_consume_at(100, t0);
        let at = t0 + Duration::from_millis(40);
        assert_eq!(bucket.time_until_available_at(50, at), Duration::from_millis(60));
        bucket.force_consume_at(100, at);
        // 200 short: the next boundary plus one more period.
        assert_eq!(
            bucket.time_until_available_at(100, at),
            Duration::from_millis(160)
        );
    }

    #[test]
    fn test_reset() {
        let mut bucket = TokenBucket::new(100, PERIOD);
        bucket.force_consume(80);
        bucket.reset();
        assert!(bucket.has_tokens(100));
        assert_eq!(bucket.capacity(), 100);
        assert_eq!(bucket.period(), PERIOD);
    }
}
