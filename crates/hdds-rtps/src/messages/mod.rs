// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RTPS wire codec
//!
//! Message header, submessages, sequence/fragment number sets and parameter
//! lists, encoded with the cursors from [`crate::core::ser`].
//!
//! Every submessage is written in the byte order carried by the encoder
//! cursor and flagged accordingly (flag bit 0); decoding follows the flag of
//! each submessage independently. Submessage bodies are padded to 4 bytes.
//!
//! ```text
//! +------------------------------------------+
//! | "RTPS" | ver | vendor | guidPrefix (12)  |  20-byte header
//! +------------------------------------------+
//! | kind | flags | octetsToNextHeader (u16)  |  submessage header
//! | body ...                                 |
//! +------------------------------------------+
//! | kind | flags | octetsToNextHeader        |
//! | ...                                      |
//! ```

pub mod builder;
pub mod header;
pub mod params;
pub mod parser;
pub mod seqset;
pub mod submessage;

pub use builder::MessageBuilder;
pub use header::{ProtocolVersion, RtpsHeader};
pub use params::InlineQos;
pub use parser::{parse_message, parse_submessage, RawSubmessage, SubmessageIter};
pub use seqset::{FragmentNumberSet, SequenceNumberSet};
pub use submessage::{
    AckNackSubmessage, DataFragSubmessage, DataSubmessage, GapSubmessage,
    HeartbeatFragSubmessage, HeartbeatSubmessage, InfoReply, InfoSource, NackFragSubmessage,
    Submessage,
};

use std::fmt;

use crate::core::ser::SerError;

/// Submessage kind identifiers.
pub mod kind {
    pub const PAD: u8 = 0x01;
    pub const ACKNACK: u8 = 0x06;
    pub const HEARTBEAT: u8 = 0x07;
    pub const GAP: u8 = 0x08;
    pub const INFO_TS: u8 = 0x09;
    pub const INFO_SRC: u8 = 0x0c;
    pub const INFO_REPLY_IP4: u8 = 0x0d;
    pub const INFO_DST: u8 = 0x0e;
    pub const INFO_REPLY: u8 = 0x0f;
    pub const NACK_FRAG: u8 = 0x12;
    pub const HEARTBEAT_FRAG: u8 = 0x13;
    pub const DATA: u8 = 0x15;
    pub const DATA_FRAG: u8 = 0x16;
}

/// Submessage flag bits (bit 0 is always endianness).
pub mod flags {
    pub const ENDIANNESS: u8 = 0x01;

    // DATA
    pub const DATA_INLINE_QOS: u8 = 0x02;
    pub const DATA_PAYLOAD: u8 = 0x04;
    pub const DATA_KEY: u8 = 0x08;

    // DATA_FRAG
    pub const DATA_FRAG_INLINE_QOS: u8 = 0x02;
    pub const DATA_FRAG_KEY: u8 = 0x04;

    // HEARTBEAT
    pub const HEARTBEAT_FINAL: u8 = 0x02;
    pub const HEARTBEAT_LIVELINESS: u8 = 0x04;

    // ACKNACK
    pub const ACKNACK_FINAL: u8 = 0x02;

    // INFO_TS
    pub const INFO_TS_INVALIDATE: u8 = 0x02;

    // INFO_REPLY / INFO_REPLY_IP4
    pub const INFO_REPLY_MULTICAST: u8 = 0x02;
}

/// Size of the submessage header.
pub const SUBMESSAGE_HEADER_LEN: usize = 4;

/// Message parsing error. Aborts the message (header errors) or one
/// submessage (body errors); never panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Shorter than the 20-byte header.
    TooShort(usize),
    /// Magic is not "RTPS".
    BadMagic,
    /// Major version other than 2.
    UnsupportedVersion(u8, u8),
    /// Submessage length runs past the end of the message.
    Truncated { kind: u8, offset: usize },
    /// Body does not decode.
    Malformed { kind: u8, reason: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::TooShort(len) => write!(f, "message too short ({} bytes)", len),
            ParseError::BadMagic => write!(f, "bad protocol magic"),
            ParseError::UnsupportedVersion(major, minor) => {
                write!(f, "unsupported protocol version {}.{}", major, minor)
            }
            ParseError::Truncated { kind, offset } => {
                write!(f, "submessage 0x{:02x} at {} truncated", kind, offset)
            }
            ParseError::Malformed { kind, reason } => {
                write!(f, "submessage 0x{:02x} malformed: {}", kind, reason)
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    pub(crate) fn malformed(kind: u8, err: SerError) -> Self {
        ParseError::Malformed {
            kind,
            reason: err.to_string(),
        }
    }
}

impl From<ParseError> for crate::Error {
    fn from(e: ParseError) -> Self {
        crate::Error::MalformedMessage(e.to_string())
    }
}
