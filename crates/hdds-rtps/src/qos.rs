// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS policies consumed by the engine.
//!
//! Policies arrive already resolved (profile parsing lives outside the engine);
//! they are validated when an endpoint is created, so an inconsistent set is
//! rejected with [`Error::InvalidQos`] instead of misbehaving later.

use std::time::Duration;

use crate::{Error, Result};

/// Value meaning "no limit" in [`ResourceLimits`] (DDS LENGTH_UNLIMITED).
pub const LENGTH_UNLIMITED: usize = usize::MAX;

/// Duration used for "infinite" periods and leases.
pub const DURATION_INFINITE: Duration = Duration::MAX;

/// Reliability policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Reliability {
    /// Fire-and-forget (no ACKs, no retransmission).
    #[default]
    BestEffort,
    /// HEARTBEAT/ACKNACK driven retransmission.
    Reliable,
}

/// History policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum History {
    /// Keep the last N samples of each instance.
    KeepLast(u32),
    /// Keep every sample within [`ResourceLimits`].
    KeepAll,
}

impl Default for History {
    fn default() -> Self {
        Self::KeepLast(1)
    }
}

/// Durability policy, ordered from weakest to strongest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Durability {
    #[default]
    Volatile,
    TransientLocal,
    Transient,
    Persistent,
}

impl Durability {
    /// Late joiners receive the retained history.
    #[must_use]
    pub fn replays_history(self) -> bool {
        self >= Durability::TransientLocal
    }

    /// History survives the process (needs a persistence store).
    #[must_use]
    pub fn is_persistent(self) -> bool {
        self >= Durability::Transient
    }
}

/// Resource limits of a history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum total samples across all instances.
    pub max_samples: usize,
    /// Maximum distinct instances.
    pub max_instances: usize,
    /// Maximum samples per instance.
    pub max_samples_per_instance: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_samples: 5000,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: LENGTH_UNLIMITED,
        }
    }
}

impl ResourceLimits {
    /// Every limit unbounded.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_samples: LENGTH_UNLIMITED,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: LENGTH_UNLIMITED,
        }
    }
}

/// Ownership kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipKind {
    /// Every writer updates every instance.
    #[default]
    Shared,
    /// The strongest writer owns each instance.
    Exclusive,
}

/// Ownership policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ownership {
    pub kind: OwnershipKind,
}

impl Ownership {
    #[must_use]
    pub fn shared() -> Self {
        Self {
            kind: OwnershipKind::Shared,
        }
    }

    #[must_use]
    pub fn exclusive() -> Self {
        Self {
            kind: OwnershipKind::Exclusive,
        }
    }

    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.kind == OwnershipKind::Exclusive
    }
}

/// Destination order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestinationOrder {
    /// Present samples in arrival order.
    #[default]
    ByReceptionTimestamp,
    /// Present samples ordered by their writer's timestamp.
    BySourceTimestamp,
}

/// Liveliness kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LivelinessKind {
    /// Asserted by the engine on every write and heartbeat.
    #[default]
    Automatic,
    /// Application asserts per participant.
    ManualByParticipant,
    /// Application asserts per writer.
    ManualByTopic,
}

/// Liveliness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveliness {
    pub kind: LivelinessKind,
    pub lease_duration: Duration,
}

impl Default for Liveliness {
    fn default() -> Self {
        Self {
            kind: LivelinessKind::Automatic,
            lease_duration: DURATION_INFINITE,
        }
    }
}

impl Liveliness {
    #[must_use]
    pub fn automatic(lease_duration: Duration) -> Self {
        Self {
            kind: LivelinessKind::Automatic,
            lease_duration,
        }
    }

    #[must_use]
    pub fn has_lease(&self) -> bool {
        self.lease_duration != DURATION_INFINITE
    }
}

/// Deadline policy: maximum period between two samples of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub period: Duration,
}

impl Default for Deadline {
    fn default() -> Self {
        Self {
            period: DURATION_INFINITE,
        }
    }
}

impl Deadline {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    #[must_use]
    pub fn is_enforced(&self) -> bool {
        self.period != DURATION_INFINITE
    }
}

/// Check a history/resource-limit combination.
///
/// - `KeepLast(0)` is rejected.
/// - `max_samples` must be non-zero.
/// - `max_samples` must cover `max_samples_per_instance`.
/// - Under `KeepLast`, the depth must fit in `max_samples_per_instance`.
pub fn validate_history(history: History, limits: &ResourceLimits) -> Result<()> {
    if limits.max_samples == 0 {
        return Err(Error::InvalidQos("max_samples must be > 0".into()));
    }
    if limits.max_instances == 0 || limits.max_samples_per_instance == 0 {
        return Err(Error::InvalidQos(
            "max_instances and max_samples_per_instance must be > 0".into(),
        ));
    }
    if limits.max_samples_per_instance != LENGTH_UNLIMITED
        && limits.max_samples < limits.max_samples_per_instance
    {
        return Err(Error::InvalidQos(format!(
            "max_samples ({}) < max_samples_per_instance ({})",
            limits.max_samples, limits.max_samples_per_instance
        )));
    }
    if let History::KeepLast(depth) = history {
        if depth == 0 {
            return Err(Error::InvalidQos("KeepLast depth must be > 0".into()));
        }
        if limits.max_samples_per_instance != LENGTH_UNLIMITED
            && depth as usize > limits.max_samples_per_instance
        {
            return Err(Error::InvalidQos(format!(
                "KeepLast depth ({}) > max_samples_per_instance ({})",
                depth, limits.max_samples_per_instance
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_history_rejects_zero_depth() {
        let err = validate_history(History::KeepLast(0), &ResourceLimits::default());
        assert!(matches!(err, Err(Error::InvalidQos(_))));
    }

    #[test]
    fn test_validate_history_rejects_inconsistent_limits() {
        let limits = ResourceLimits {
            max_samples: 4,
            max_instances: 1,
            max_samples_per_instance: 8,
        };
        assert!(validate_history(History::KeepAll, &limits).is_err());
        let limits = ResourceLimits {
            max_samples: 10,
            max_instances: 2,
            max_samples_per_instance: 3,
        };
        assert!(validate_history(History::KeepLast(5), &limits).is_err());
        assert!(validate_history(History::KeepLast(3), &limits).is_ok());
    }

    #[test]
    fn test_durability_ordering() {
        assert!(!Durability::Volatile.replays_history());
        assert!(Durability::TransientLocal.replays_history());
        assert!(!Durability::TransientLocal.is_persistent());
        assert!(Durability::Persistent.is_persistent());
    }

    #[test]
    fn test_default_policies() {
        assert!(!Deadline::default().is_enforced());
        assert!(!Liveliness::default().has_lease());
        assert!(Liveliness::automatic(Duration::from_secs(1)).has_lease());
        assert!(Ownership::exclusive().is_exclusive());
    }
}
