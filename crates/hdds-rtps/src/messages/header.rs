// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS message header (20 bytes).

use super::ParseError;
use crate::config::{PROTOCOL_VERSION, VENDOR_ID};
use crate::core::ser::{CursorMut, SerResult};
use crate::core::GuidPrefix;

/// Protocol magic.
pub const RTPS_MAGIC: [u8; 4] = *b"RTPS";

/// Protocol version (major.minor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

/// Header carried at the start of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpsHeader {
    pub version: ProtocolVersion,
    pub vendor_id: [u8; 2],
    pub guid_prefix: GuidPrefix,
}

impl RtpsHeader {
    pub const LEN: usize = 20;

    /// Header of a message sent by this engine.
    #[must_use]
    pub fn new(guid_prefix: GuidPrefix) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            vendor_id: VENDOR_ID,
            guid_prefix,
        }
    }

    pub fn encode(&self, w: &mut CursorMut<'_>) -> SerResult<()> {
        w.write_bytes(&RTPS_MAGIC)?;
        w.write_u8(self.version.major)?;
        w.write_u8(self.version.minor)?;
        w.write_bytes(&self.vendor_id)?;
        w.write_bytes(&self.guid_prefix.0)
    }

    /// Decode and validate the header.
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < Self::LEN {
            return Err(ParseError::TooShort(bytes.len()));
        }
        if bytes[0..4] != RTPS_MAGIC {
            return Err(ParseError::BadMagic);
        }
        let version = ProtocolVersion {
            major: bytes[4],
            minor: bytes[5],
        };
        if version.major != PROTOCOL_VERSION.major {
            return Err(ParseError::UnsupportedVersion(version.major, version.minor));
        }
        let mut prefix = [0u8; 12];
        prefix.copy_from_slice(&bytes[8..20]);
        Ok(Self {
            version,
            vendor_id: [bytes[6], bytes[7]],
            guid_prefix: GuidPrefix(prefix),
        })
    }
}
