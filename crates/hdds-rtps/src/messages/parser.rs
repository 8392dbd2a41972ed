// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounds-checked message splitting.
//!
//! [`parse_message`] validates the header and returns an iterator over raw
//! submessages. Each item borrows its body from the datagram; decoding is
//! deferred to [`RawSubmessage::decode`] so a malformed body only costs that
//! submessage. A length field running past the end of the datagram ends
//! the iteration with [`ParseError::Truncated`].

use super::header::RtpsHeader;
use super::submessage::Submessage;
use super::{kind, ParseError, SUBMESSAGE_HEADER_LEN};
use crate::core::ser::Endianness;

/// Submessage header plus undecoded body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSubmessage<'a> {
    pub kind: u8,
    pub flags: u8,
    pub body: &'a [u8],
    /// Offset of `body` in the datagram.
    pub offset: usize,
}

impl<'a> RawSubmessage<'a> {
    #[must_use]
    pub fn endianness(&self) -> Endianness {
        Endianness::from_flags(self.flags)
    }

    /// Decode the body; `Ok(None)` for kinds this engine does not know.
    pub fn decode(&self) -> Result<Option<Submessage<'a>>, ParseError> {
        Submessage::decode(self.kind, self.flags, self.body, self.offset)
    }
}

/// Iterator over the submessages of one datagram.
pub struct SubmessageIter<'a> {
    bytes: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Iterator for SubmessageIter<'a> {
    type Item = Result<RawSubmessage<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.bytes.len() {
            return None;
        }
        let start = self.offset;
        let Some(header) = self.bytes.get(start..start + SUBMESSAGE_HEADER_LEN) else {
            self.done = true;
            return Some(Err(ParseError::Truncated {
                kind: self.bytes[start],
                offset: start,
            }));
        };
        let submessage_kind = header[0];
        let flags = header[1];
        let length = match Endianness::from_flags(flags) {
            Endianness::Little => u16::from_le_bytes([header[2], header[3]]),
            Endianness::Big => u16::from_be_bytes([header[2], header[3]]),
        } as usize;

        let body_start = start + SUBMESSAGE_HEADER_LEN;
        // Zero length: the submessage extends to the end of the message,
        // except for kinds whose body may legitimately be empty.
        let body_end = if length == 0 && !matches!(submessage_kind, kind::PAD | kind::INFO_TS) {
            self.bytes.len()
        } else {
            body_start + length
        };
        if body_end > self.bytes.len() {
            self.done = true;
            return Some(Err(ParseError::Truncated {
                kind: submessage_kind,
                offset: start,
            }));
        }
        // The next header starts on a 4-byte boundary past the counted body.
        self.offset = body_end.next_multiple_of(4).min(self.bytes.len());
        Some(Ok(RawSubmessage {
            kind: submessage_kind,
            flags,
            body: &self.bytes[body_start..body_end],
            offset: body_start,
        }))
    }
}

/// Validate the header and split the rest of `bytes` into submessages.
pub fn parse_message(bytes: &[u8]) -> Result<(RtpsHeader, SubmessageIter<'_>), ParseError> {
    let header = RtpsHeader::decode(bytes)?;
    Ok((
        header,
        SubmessageIter {
            bytes,
            offset: RtpsHeader::LEN,
            done: false,
        },
    ))
}

/// Split one stand-alone submessage (header included), as handed back by a
/// security transform. `offset` is reported relative to `bytes`.
pub fn parse_submessage(bytes: &[u8]) -> Result<RawSubmessage<'_>, ParseError> {
    let mut iter = SubmessageIter {
        bytes,
        offset: 0,
        done: false,
    };
    match iter.next() {
        Some(raw) => raw,
        None => Err(ParseError::Truncated { kind: 0, offset: 0 }),
    }
}
