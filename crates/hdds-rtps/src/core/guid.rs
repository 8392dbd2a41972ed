// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS GUIDs: 12-byte participant prefix plus 4-byte entity id.

use std::fmt;

/// GUID prefix length (12 bytes).
pub const GUID_PREFIX_LEN: usize = 12;
/// Entity ID length (4 bytes).
pub const ENTITY_ID_LEN: usize = 4;

/// Participant-wide GUID prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GuidPrefix(pub [u8; GUID_PREFIX_LEN]);

impl GuidPrefix {
    pub const UNKNOWN: GuidPrefix = GuidPrefix([0; GUID_PREFIX_LEN]);

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl fmt::Display for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 && i % 4 == 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Entity id: 3-byte key plus 1-byte kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EntityId(pub [u8; ENTITY_ID_LEN]);

/// Entity kind octets (last byte of an entity id).
pub mod entity_kind {
    pub const USER_WRITER_WITH_KEY: u8 = 0x02;
    pub const USER_WRITER_NO_KEY: u8 = 0x03;
    pub const USER_READER_NO_KEY: u8 = 0x04;
    pub const USER_READER_WITH_KEY: u8 = 0x07;
    pub const BUILTIN_PARTICIPANT: u8 = 0xC1;
    pub const BUILTIN_WRITER_WITH_KEY: u8 = 0xC2;
    pub const BUILTIN_WRITER_NO_KEY: u8 = 0xC3;
    pub const BUILTIN_READER_NO_KEY: u8 = 0xC4;
    pub const BUILTIN_READER_WITH_KEY: u8 = 0xC7;
}

impl EntityId {
    pub const UNKNOWN: EntityId = EntityId([0x00, 0x00, 0x00, 0x00]);
    pub const PARTICIPANT: EntityId = EntityId([0x00, 0x00, 0x01, 0xC1]);
    pub const SPDP_WRITER: EntityId = EntityId([0x00, 0x01, 0x00, 0xC2]);
    pub const SPDP_READER: EntityId = EntityId([0x00, 0x01, 0x00, 0xC7]);
    pub const SEDP_PUBLICATIONS_WRITER: EntityId = EntityId([0x00, 0x00, 0x03, 0xC2]);
    pub const SEDP_PUBLICATIONS_READER: EntityId = EntityId([0x00, 0x00, 0x03, 0xC7]);
    pub const SEDP_SUBSCRIPTIONS_WRITER: EntityId = EntityId([0x00, 0x00, 0x04, 0xC2]);
    pub const SEDP_SUBSCRIPTIONS_READER: EntityId = EntityId([0x00, 0x00, 0x04, 0xC7]);
    pub const P2P_MESSAGE_WRITER: EntityId = EntityId([0x00, 0x02, 0x00, 0xC2]);
    pub const P2P_MESSAGE_READER: EntityId = EntityId([0x00, 0x02, 0x00, 0xC7]);

    /// Build an entity id from a 24-bit key and a kind octet.
    #[must_use]
    pub fn new(key: u32, kind: u8) -> Self {
        let k = key.to_be_bytes();
        EntityId([k[1], k[2], k[3], kind])
    }

    #[must_use]
    pub fn kind(&self) -> u8 {
        self.0[3]
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }

    #[must_use]
    pub fn is_writer(&self) -> bool {
        matches!(self.kind() & 0x0F, 0x02 | 0x03)
    }

    #[must_use]
    pub fn is_reader(&self) -> bool {
        matches!(self.kind() & 0x0F, 0x04 | 0x07)
    }

    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.kind() & 0xC0 == 0xC0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}{:02x}{:02x}.{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Globally unique identifier of an RTPS entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid {
    pub prefix: GuidPrefix,
    pub entity_id: EntityId,
}

impl Guid {
    pub const UNKNOWN: Guid = Guid {
        prefix: GuidPrefix::UNKNOWN,
        entity_id: EntityId::UNKNOWN,
    };

    #[must_use]
    pub const fn new(prefix: GuidPrefix, entity_id: EntityId) -> Self {
        Self { prefix, entity_id }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..GUID_PREFIX_LEN].copy_from_slice(&self.prefix.0);
        out[GUID_PREFIX_LEN..].copy_from_slice(&self.entity_id.0);
        out
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; GUID_PREFIX_LEN];
        let mut entity = [0u8; ENTITY_ID_LEN];
        prefix.copy_from_slice(&bytes[..GUID_PREFIX_LEN]);
        entity.copy_from_slice(&bytes[GUID_PREFIX_LEN..]);
        Self::new(GuidPrefix(prefix), EntityId(entity))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.prefix, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_kind_classification() {
        let writer = EntityId::new(1, entity_kind::USER_WRITER_WITH_KEY);
        let reader = EntityId::new(2, entity_kind::USER_READER_NO_KEY);
        assert_eq!(writer.0, [0, 0, 1, 0x02]);
        assert!(writer.is_writer() && !writer.is_reader());
        assert!(reader.is_reader() && !reader.is_writer());
        assert!(EntityId::SPDP_WRITER.is_builtin() && EntityId::SPDP_WRITER.is_writer());
        assert!(EntityId::SEDP_SUBSCRIPTIONS_READER.is_reader());
    }

    #[test]
    fn test_guid_bytes_roundtrip_and_ordering() {
        let a = Guid::new(GuidPrefix([1; 12]), EntityId::new(3, 0x02));
        let b = Guid::new(GuidPrefix([1; 12]), EntityId::new(4, 0x02));
        assert_eq!(Guid::from_bytes(a.to_bytes()), a);
        assert!(a < b);
        assert_eq!(
            a.to_string(),
            "01010101.01010101.01010101|000003.02"
        );
    }
}
