// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer and reader histories.
//!
//! Both keep an ordered set of [`CacheChange`](crate::core::CacheChange)s
//! under one recursive mutex and enforce [`ResourceLimits`]. The writer side
//! orders by sequence number and blocks on a full KEEP_ALL history until
//! acknowledgements make room; the reader side is keyed by
//! (writer GUID, sequence number) and tracks sample/instance state.

pub mod reader;
pub mod writer;

pub use reader::{
    InstanceState, ReaderHistory, SampleInfo, SampleState, StateMask, ViewState,
};
pub use writer::{AddedChange, WriterHistory};

use crate::qos::{validate_history, History, ResourceLimits, LENGTH_UNLIMITED};
use crate::Result;

/// History configuration shared by both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistoryAttributes {
    pub history: History,
    pub resource_limits: ResourceLimits,
}

impl HistoryAttributes {
    #[must_use]
    pub fn keep_last(depth: u32) -> Self {
        Self {
            history: History::KeepLast(depth),
            resource_limits: ResourceLimits::default(),
        }
    }

    #[must_use]
    pub fn keep_all(max_samples: usize) -> Self {
        Self {
            history: History::KeepAll,
            resource_limits: ResourceLimits {
                max_samples,
                ..ResourceLimits::default()
            },
        }
    }

    #[must_use]
    pub fn with_limits(mut self, resource_limits: ResourceLimits) -> Self {
        self.resource_limits = resource_limits;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_history(self.history, &self.resource_limits)
    }

    /// Effective per-instance bound (KEEP_LAST depth capped by the limit).
    pub(crate) fn per_instance_bound(&self) -> usize {
        let per_instance = self.resource_limits.max_samples_per_instance;
        match self.history {
            History::KeepLast(depth) => (depth as usize).min(per_instance),
            History::KeepAll => per_instance,
        }
    }

    pub(crate) fn is_keep_last(&self) -> bool {
        matches!(self.history, History::KeepLast(_))
    }
}

pub(crate) fn exceeds(count: usize, limit: usize) -> bool {
    limit != LENGTH_UNLIMITED && count >= limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_instance_bound_uses_smallest_limit() {
        let attrs = HistoryAttributes::keep_last(10).with_limits(ResourceLimits {
            max_samples: 100,
            max_instances: 4,
            max_samples_per_instance: 3,
        });
        assert_eq!(attrs.per_instance_bound(), 3);
        assert_eq!(HistoryAttributes::keep_last(2).per_instance_bound(), 2);
        assert_eq!(
            HistoryAttributes::keep_all(8).per_instance_bound(),
            LENGTH_UNLIMITED
        );
    }

    #[test]
    fn test_exceeds_ignores_unlimited() {
        assert!(exceeds(3, 3));
        assert!(!exceeds(2, 3));
        assert!(!exceeds(usize::MAX - 1, LENGTH_UNLIMITED));
    }
}
