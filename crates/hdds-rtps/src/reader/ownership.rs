// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Exclusive ownership arbitration.
//!
//! Each instance is owned by the writer that last delivered it with the
//! highest strength. A writer of equal or greater strength takes over; a
//! weaker writer's samples are dropped until the owner goes away.

use std::collections::HashMap;

use crate::core::{Guid, InstanceHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Owner {
    writer: Guid,
    strength: i32,
}

#[derive(Debug, Default)]
pub(crate) struct OwnershipTracker {
    owners: HashMap<InstanceHandle, Owner>,
}

impl OwnershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a sample of `instance` from `writer` may be delivered.
    /// Accepting makes `writer` the owner.
    pub fn accept(&mut self, instance: InstanceHandle, writer: Guid, strength: i32) -> bool {
        match self.owners.get_mut(&instance) {
            Some(owner) if owner.writer == writer => {
                owner.strength = strength;
                true
            }
            Some(owner) if strength >= owner.strength => {
                log::debug!(
                    "[OwnershipTracker::accept] {:?} owner {} ({}) -> {} ({})",
                    instance,
                    owner.writer,
                    owner.strength,
                    writer,
                    strength
                );
                *owner = Owner { writer, strength };
                true
            }
            Some(_) => false,
            None => {
                self.owners.insert(instance, Owner { writer, strength });
                true
            }
        }
    }

    /// The owner unregistered or disposed `instance`: release it.
    pub fn release(&mut self, instance: &InstanceHandle, writer: Guid) {
        if self.owner(instance) == Some(writer) {
            self.owners.remove(instance);
        }
    }

    /// `writer` is gone; instances it owned become free. Returns them.
    pub fn writer_removed(&mut self, writer: Guid) -> Vec<InstanceHandle> {
        let released: Vec<InstanceHandle> = self
            .owners
            .iter()
            .filter(|(_, o)| o.writer == writer)
            .map(|(h, _)| *h)
            .collect();
        for handle in &released {
            self.owners.remove(handle);
        }
        released
    }

    #[must_use]
    pub fn owner(&self, instance: &InstanceHandle) -> Option<Guid> {
        self.owners.get(instance).map(|o| o.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, GuidPrefix};

    fn writer(n: u8) -> Guid {
        Guid::new(GuidPrefix([n; 12]), EntityId::new(1, 0x02))
    }

    #[test]
    fn test_stronger_or_equal_writer_takes_over() {
        let mut tracker = OwnershipTracker::new();
        let key = InstanceHandle::from_key(&[1]);
        assert!(tracker.accept(key, writer(1), 10));
        assert!(tracker.accept(key, writer(2), 20));
        assert!(!tracker.accept(key, writer(1), 10));
        assert!(tracker.accept(key, writer(3), 20));
        assert_eq!(tracker.owner(&key), Some(writer(3)));
        assert!(!tracker.accept(key, writer(2), 19));
    }

    #[test]
    fn test_owner_removal_frees_instances() {
        let mut tracker = OwnershipTracker::new();
        let a = InstanceHandle::from_key(&[1]);
        let b = InstanceHandle::from_key(&[2]);
        tracker.accept(a, writer(2), 20);
        tracker.accept(b, writer(2), 20);
        assert!(!tracker.accept(a, writer(1), 10));
        let mut released = tracker.writer_removed(writer(2));
        released.sort();
        assert_eq!(released, vec![a, b]);
        assert!(tracker.accept(a, writer(1), 10));
    }

    #[test]
    fn test_release_only_by_owner() {
        let mut tracker = OwnershipTracker::new();
        let a = InstanceHandle::from_key(&[1]);
        tracker.accept(a, writer(2), 20);
        tracker.release(&a, writer(1));
        assert_eq!(tracker.owner(&a), Some(writer(2)));
        tracker.release(&a, writer(2));
        assert_eq!(tracker.owner(&a), None);
    }
}
