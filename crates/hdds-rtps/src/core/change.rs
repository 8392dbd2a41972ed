// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cache changes: one versioned sample of one instance.

use std::fmt;

use super::guid::Guid;
use super::seq::SequenceNumber;
use super::time::Time;
use crate::pool::SerializedPayload;

/// Kind of change carried by a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChangeKind {
    #[default]
    Alive,
    NotAliveDisposed,
    NotAliveUnregistered,
    NotAliveDisposedUnregistered,
}

impl ChangeKind {
    /// PID_STATUS_INFO flag octet.
    #[must_use]
    pub fn status_info(self) -> u8 {
        match self {
            ChangeKind::Alive => 0x00,
            ChangeKind::NotAliveDisposed => 0x01,
            ChangeKind::NotAliveUnregistered => 0x02,
            ChangeKind::NotAliveDisposedUnregistered => 0x03,
        }
    }

    #[must_use]
    pub fn from_status_info(flags: u8) -> Self {
        match flags & 0x03 {
            0x01 => ChangeKind::NotAliveDisposed,
            0x02 => ChangeKind::NotAliveUnregistered,
            0x03 => ChangeKind::NotAliveDisposedUnregistered,
            _ => ChangeKind::Alive,
        }
    }

    #[must_use]
    pub fn is_alive(self) -> bool {
        self == ChangeKind::Alive
    }
}

/// 16-byte instance key hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct InstanceHandle(pub [u8; 16]);

impl InstanceHandle {
    /// Unkeyed topics use the nil handle for their single instance.
    pub const NIL: InstanceHandle = InstanceHandle([0; 16]);

    /// Key hash of a serialized (big-endian CDR) key.
    ///
    /// Keys that fit in 16 bytes are zero-padded; longer keys are MD5-hashed.
    #[must_use]
    pub fn from_key(key: &[u8]) -> Self {
        if key.len() <= 16 {
            let mut out = [0u8; 16];
            out[..key.len()].copy_from_slice(key);
            return InstanceHandle(out);
        }
        InstanceHandle(Self::digest(key))
    }

    #[cfg(feature = "keyhash")]
    fn digest(key: &[u8]) -> [u8; 16] {
        use md5::{Digest, Md5};
        let mut hasher = Md5::new();
        hasher.update(key);
        let result = hasher.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&result[..16]);
        out
    }

    #[cfg(not(feature = "keyhash"))]
    fn digest(key: &[u8]) -> [u8; 16] {
        // FNV-1a folded into two lanes; only used when MD5 is compiled out.
        let mut lanes = [0xcbf2_9ce4_8422_2325_u64, 0x8422_2325_cbf2_9ce4_u64];
        for (i, b) in key.iter().enumerate() {
            let lane = &mut lanes[i % 2];
            *lane ^= u64::from(*b);
            *lane = lane.wrapping_mul(0x0100_0000_01b3);
        }
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&lanes[0].to_be_bytes());
        out[8..].copy_from_slice(&lanes[1].to_be_bytes());
        out
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceHandle(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// Identity of a sample: (writer GUID, sequence number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SampleIdentity {
    pub writer_guid: Guid,
    pub sequence_number: SequenceNumber,
}

impl SampleIdentity {
    pub const UNKNOWN: SampleIdentity = SampleIdentity {
        writer_guid: Guid::UNKNOWN,
        sequence_number: SequenceNumber::UNKNOWN,
    };

    #[must_use]
    pub fn new(writer_guid: Guid, sequence_number: SequenceNumber) -> Self {
        Self {
            writer_guid,
            sequence_number,
        }
    }
}

/// Optional per-write parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteParams {
    /// Request/reply correlation.
    pub related_sample_identity: Option<SampleIdentity>,
    /// Overrides the timestamp taken at write time.
    pub source_timestamp: Option<Time>,
}

/// Fragmentation metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentInfo {
    pub fragment_size: u16,
    pub total_fragments: u32,
    received: Vec<u32>,
}

impl FragmentInfo {
    /// Fragment layout for a payload of `sample_size` bytes.
    #[must_use]
    pub fn new(sample_size: u32, fragment_size: u16) -> Self {
        let size = u32::from(fragment_size.max(1));
        let total_fragments = sample_size.div_ceil(size).max(1);
        let words = total_fragments.div_ceil(32) as usize;
        Self {
            fragment_size: fragment_size.max(1),
            total_fragments,
            received: vec![0; words],
        }
    }

    /// Layout with every fragment marked as present (writer side).
    #[must_use]
    pub fn complete(sample_size: u32, fragment_size: u16) -> Self {
        let mut info = Self::new(sample_size, fragment_size);
        for n in 1..=info.total_fragments {
            info.mark_received(n);
        }
        info
    }

    /// Mark fragment `number` (1-based) as received; returns false if out of range.
    pub fn mark_received(&mut self, number: u32) -> bool {
        if number == 0 || number > self.total_fragments {
            return false;
        }
        let idx = number - 1;
        self.received[(idx / 32) as usize] |= 1 << (idx % 32);
        true
    }

    #[must_use]
    pub fn is_received(&self, number: u32) -> bool {
        if number == 0 || number > self.total_fragments {
            return false;
        }
        let idx = number - 1;
        self.received[(idx / 32) as usize] & (1 << (idx % 32)) != 0
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        (1..=self.total_fragments).all(|n| self.is_received(n))
    }

    /// Missing fragment numbers, ascending.
    pub fn missing(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=self.total_fragments).filter(move |n| !self.is_received(*n))
    }
}

/// A single sample with its RTPS metadata.
#[derive(Debug, Clone)]
pub struct CacheChange {
    pub kind: ChangeKind,
    pub writer_guid: Guid,
    pub instance_handle: InstanceHandle,
    pub sequence_number: SequenceNumber,
    pub source_timestamp: Option<Time>,
    pub reception_timestamp: Option<Time>,
    pub serialized_payload: SerializedPayload,
    pub related_sample_identity: Option<SampleIdentity>,
    pub fragments: Option<FragmentInfo>,
    /// Strength of the writer that produced the change (exclusive ownership).
    pub ownership_strength: Option<i32>,
}

impl CacheChange {
    /// New change with no sequence number yet (assigned on history admission).
    #[must_use]
    pub fn new(
        kind: ChangeKind,
        writer_guid: Guid,
        instance_handle: InstanceHandle,
        serialized_payload: SerializedPayload,
    ) -> Self {
        Self {
            kind,
            writer_guid,
            instance_handle,
            sequence_number: SequenceNumber::UNKNOWN,
            source_timestamp: None,
            reception_timestamp: None,
            serialized_payload,
            related_sample_identity: None,
            fragments: None,
            ownership_strength: None,
        }
    }

    #[must_use]
    pub fn identity(&self) -> SampleIdentity {
        SampleIdentity::new(self.writer_guid, self.sequence_number)
    }

    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.serialized_payload.len()
    }

    /// Fully received (not a partially reassembled fragment set).
    #[must_use]
    pub fn is_fully_assembled(&self) -> bool {
        self.fragments.as_ref().map_or(true, FragmentInfo::is_complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_info_mapping() {
        for kind in [
            ChangeKind::Alive,
            ChangeKind::NotAliveDisposed,
            ChangeKind::NotAliveUnregistered,
            ChangeKind::NotAliveDisposedUnregistered,
        ] {
            assert_eq!(ChangeKind::from_status_info(kind.status_info()), kind);
        }
        // Filtered flag (0x04) does not change the kind.
        assert_eq!(ChangeKind::from_status_info(0x04), ChangeKind::Alive);
    }

    #[test]
    fn test_short_key_is_zero_padded() {
        let handle = InstanceHandle::from_key(&[0, 0, 0, 7]);
        assert_eq!(&handle.0[..4], &[0, 0, 0, 7]);
        assert!(handle.0[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_long_key_is_hashed_deterministically() {
        let key = [0x42u8; 40];
        let a = InstanceHandle::from_key(&key);
        let b = InstanceHandle::from_key(&key);
        let c = InstanceHandle::from_key(&[0x43u8; 40]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.is_nil());
    }

    #[cfg(feature = "keyhash")]
    #[test]
    fn test_long_key_uses_md5() {
        let handle = InstanceHandle::from_key(&[0u8; 17]);
        use md5::{Digest, Md5};
        let expected = Md5::digest([0u8; 17]);
        assert_eq!(&handle.0[..], &expected[..]);
    }

    #[test]
    fn test_fragment_info_tracks_missing() {
        let mut info = FragmentInfo::new(2500, 1000);
        assert_eq!(info.total_fragments, 3);
        assert!(info.mark_received(2));
        assert!(!info.mark_received(4));
        assert_eq!(info.missing().collect::<Vec<_>>(), vec![1, 3]);
        info.mark_received(1);
        info.mark_received(3);
        assert!(info.is_complete());
        assert!(FragmentInfo::complete(70, 8).is_complete());
    }
}
