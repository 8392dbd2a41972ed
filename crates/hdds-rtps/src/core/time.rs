// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS `Time_t`: seconds plus 2^-32 fractions since the UNIX epoch.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// RTPS timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Time {
    pub seconds: i32,
    pub fraction: u32,
}

impl Time {
    pub const ZERO: Time = Time {
        seconds: 0,
        fraction: 0,
    };
    pub const INVALID: Time = Time {
        seconds: -1,
        fraction: u32::MAX,
    };
    pub const INFINITE: Time = Time {
        seconds: i32::MAX,
        fraction: u32::MAX,
    };

    #[must_use]
    pub const fn new(seconds: i32, fraction: u32) -> Self {
        Self { seconds, fraction }
    }

    /// Wall-clock time now.
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_duration(since_epoch)
    }

    #[must_use]
    pub fn from_duration(d: Duration) -> Self {
        let seconds = i32::try_from(d.as_secs()).unwrap_or(i32::MAX);
        let fraction = ((u64::from(d.subsec_nanos()) << 32) / 1_000_000_000) as u32;
        Self { seconds, fraction }
    }

    #[must_use]
    pub fn from_nanos(nanos: u64) -> Self {
        Self::from_duration(Duration::from_nanos(nanos))
    }

    /// Nanoseconds since the epoch (negative times clamp to zero).
    #[must_use]
    pub fn to_nanos(&self) -> u64 {
        if self.seconds < 0 {
            return 0;
        }
        let secs = u64::from(self.seconds.unsigned_abs()) * 1_000_000_000;
        let frac = (u64::from(self.fraction) * 1_000_000_000) >> 32;
        secs + frac
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}
