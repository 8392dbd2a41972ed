// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CDR serialization helpers for RTPS message encoding/decoding.
//!
//! Both cursors track the CDR alignment origin (the start of the RTPS
//! message) and the byte order selected by the current submessage.

pub mod cursor;

pub use cursor::{Cursor, CursorMut};

use std::fmt;

/// Byte order of a submessage (flag bit 0 of the submessage header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endianness {
    Big,
    #[default]
    Little,
}

impl Endianness {
    /// Submessage flag bit selecting little-endian encoding.
    pub const FLAG: u8 = 0x01;

    /// Decode from submessage flags.
    #[must_use]
    pub fn from_flags(flags: u8) -> Self {
        if flags & Self::FLAG != 0 {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    /// Flag bit to OR into the submessage header flags.
    #[must_use]
    pub fn flag(self) -> u8 {
        match self {
            Endianness::Little => Self::FLAG,
            Endianness::Big => 0,
        }
    }

    /// Native byte order of the host.
    #[must_use]
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }
}

/// Serialization error used within core::ser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerError {
    WriteFailed { offset: usize, reason: String },
    ReadFailed { offset: usize, reason: String },
    InvalidData { reason: String },
}

impl fmt::Display for SerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerError::WriteFailed { offset, reason } => {
                write!(f, "write failed at offset {}: {}", offset, reason)
            }
            SerError::ReadFailed { offset, reason } => {
                write!(f, "read failed at offset {}: {}", offset, reason)
            }
            SerError::InvalidData { reason } => write!(f, "invalid data: {}", reason),
        }
    }
}

impl std::error::Error for SerError {}

pub type SerResult<T> = core::result::Result<T, SerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ser_error_display_variants() {
        let err = SerError::WriteFailed {
            offset: 12,
            reason: "buffer too small".into(),
        };
        assert_eq!(err.to_string(), "write failed at offset 12: buffer too small");

        let err = SerError::InvalidData {
            reason: "num_bits > 256".into(),
        };
        assert_eq!(err.to_string(), "invalid data: num_bits > 256");
    }

    #[test]
    fn test_endianness_flag_roundtrip() {
        assert_eq!(Endianness::from_flags(0x01), Endianness::Little);
        assert_eq!(Endianness::from_flags(0x02), Endianness::Big);
        assert_eq!(Endianness::Little.flag(), 0x01);
        assert_eq!(Endianness::Big.flag(), 0x00);
    }
}
