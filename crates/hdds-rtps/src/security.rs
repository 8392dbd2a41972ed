// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Security transform hooks.
//!
//! Authentication, access control and crypto plugins live outside the
//! engine; they plug in as a [`SecurityTransform`] applied at the encode and
//! decode boundaries:
//!
//! ```text
//! outbound: submessages -> encode_submessage (each) -> encode_message -> transport
//! inbound:  transport -> decode_message -> decode_submessage (each) -> endpoints
//! ```
//!
//! RTPS header and INFO_* submessages are never passed to the submessage
//! hooks. The default [`PassThrough`] leaves bytes untouched.

use std::borrow::Cow;

use crate::core::GuidPrefix;
use crate::messages::{kind, parse_message, RtpsHeader, SUBMESSAGE_HEADER_LEN};
use crate::{Error, Result};

/// Message and submessage level protection.
///
/// Submessage hooks receive whole submessages (4-byte header included) and
/// must return whole submessages.
pub trait SecurityTransform: Send + Sync {
    /// Protect one outbound submessage.
    fn encode_submessage(&self, submessage: &[u8]) -> Result<Vec<u8>> {
        Ok(submessage.to_vec())
    }

    /// Verify / unprotect one inbound submessage from `source`.
    fn decode_submessage<'a>(&self, source: &GuidPrefix, submessage: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let _ = source;
        Ok(Cow::Borrowed(submessage))
    }

    /// Protect a whole outbound datagram.
    fn encode_message(&self, message: Vec<u8>) -> Result<Vec<u8>> {
        Ok(message)
    }

    /// Verify / unprotect a whole inbound datagram.
    fn decode_message<'a>(&self, message: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(message))
    }

    /// False for [`PassThrough`]; lets the send path skip re-framing.
    fn is_active(&self) -> bool {
        true
    }
}

/// No protection.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl SecurityTransform for PassThrough {
    fn is_active(&self) -> bool {
        false
    }
}

/// INFO_* and PAD carry no endpoint data.
pub(crate) fn is_protected_kind(submessage_kind: u8) -> bool {
    !matches!(
        submessage_kind,
        kind::PAD
            | kind::INFO_TS
            | kind::INFO_SRC
            | kind::INFO_DST
            | kind::INFO_REPLY
            | kind::INFO_REPLY_IP4
    )
}

/// Run an encoded datagram through the outbound hooks.
pub fn protect_datagram(transform: &dyn SecurityTransform, datagram: Vec<u8>) -> Result<Vec<u8>> {
    if !transform.is_active() {
        return Ok(datagram);
    }
    let (_, submessages) =
        parse_message(&datagram).map_err(|e| Error::MalformedMessage(e.to_string()))?;
    let mut out = Vec::with_capacity(datagram.len());
    out.extend_from_slice(&datagram[..RtpsHeader::LEN]);
    for raw in submessages {
        let raw = raw.map_err(|e| Error::MalformedMessage(e.to_string()))?;
        let start = raw.offset - SUBMESSAGE_HEADER_LEN;
        let whole = &datagram[start..raw.offset + raw.body.len()];
        if is_protected_kind(raw.kind) {
            out.extend_from_slice(&transform.encode_submessage(whole)?);
        } else {
            out.extend_from_slice(whole);
        }
        out.resize(out.len().next_multiple_of(4), 0);
    }
    transform.encode_message(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, SequenceNumber};
    use crate::messages::submessage::{HeartbeatSubmessage, Submessage};
    use crate::messages::MessageBuilder;

    /// Flips every body byte of protected submessages.
    struct Invert;

    impl SecurityTransform for Invert {
        fn encode_submessage(&self, submessage: &[u8]) -> Result<Vec<u8>> {
            let mut out = submessage.to_vec();
            for b in &mut out[SUBMESSAGE_HEADER_LEN..] {
                *b = !*b;
            }
            Ok(out)
        }
    }

    fn datagram() -> Vec<u8> {
        let mut builder = MessageBuilder::new(GuidPrefix([1; 12]), 1400);
        builder.set_destination(GuidPrefix([2; 12]));
        builder
            .add(&Submessage::Heartbeat(HeartbeatSubmessage {
                reader_id: EntityId::UNKNOWN,
                writer_id: EntityId::new(1, 0x02),
                first_sn: SequenceNumber(1),
                last_sn: SequenceNumber(1),
                count: 1,
                final_flag: false,
                liveliness_flag: false,
            }))
            .expect("fits");
        builder.finish().remove(0)
    }

    #[test]
    fn test_pass_through_is_identity() {
        let bytes = datagram();
        assert_eq!(protect_datagram(&PassThrough, bytes.clone()).expect("ok"), bytes);
    }

    #[test]
    fn test_info_submessages_untouched() {
        let bytes = datagram();
        let protected = protect_datagram(&Invert, bytes.clone()).expect("ok");
        assert_eq!(protected.len(), bytes.len());
        // Header and INFO_DST (4 + 12 bytes) unchanged, heartbeat body inverted.
        let info_end = RtpsHeader::LEN + 16;
        assert_eq!(protected[..info_end], bytes[..info_end]);
        assert_eq!(protected[info_end..info_end + 4], bytes[info_end..info_end + 4]);
        assert_eq!(protected[info_end + 4], !bytes[info_end + 4]);
    }
}
