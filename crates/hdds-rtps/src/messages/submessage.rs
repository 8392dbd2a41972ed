// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Submessage model, encoder and decoder.
//!
//! Decoding is zero-copy: DATA / DATA_FRAG payloads borrow from the received
//! buffer. Each submessage is encoded in the cursor's byte order and its
//! octetsToNextHeader is back-patched once the body is written.

use super::header::ProtocolVersion;
use super::params::InlineQos;
use super::seqset::{FragmentNumberSet, SequenceNumberSet};
use super::{flags, kind, ParseError, SUBMESSAGE_HEADER_LEN};
use crate::core::ser::{Cursor, CursorMut, Endianness, SerError, SerResult};
use crate::core::{EntityId, GuidPrefix, Locator, SequenceNumber, Time};

/// Bytes between the octetsToInlineQos field and the inline QoS of a DATA.
const DATA_OCTETS_TO_INLINE_QOS: u16 = 16;
/// Same for DATA_FRAG (adds fragment bookkeeping fields).
const DATA_FRAG_OCTETS_TO_INLINE_QOS: u16 = 28;

fn write_entity(w: &mut CursorMut<'_>, id: EntityId) -> SerResult<()> {
    w.write_bytes(&id.0)
}

fn read_entity(r: &mut Cursor<'_>) -> SerResult<EntityId> {
    Ok(EntityId(r.read_array::<4>()?))
}

pub(crate) fn write_sn(w: &mut CursorMut<'_>, sn: SequenceNumber) -> SerResult<()> {
    w.write_i32(sn.high())?;
    w.write_u32(sn.low())
}

pub(crate) fn read_sn(r: &mut Cursor<'_>) -> SerResult<SequenceNumber> {
    let high = r.read_i32()?;
    let low = r.read_u32()?;
    Ok(SequenceNumber::from_parts(high, low))
}

fn write_locator(w: &mut CursorMut<'_>, loc: &Locator) -> SerResult<()> {
    w.write_i32(loc.kind)?;
    w.write_u32(loc.port)?;
    w.write_bytes(&loc.address)
}

fn read_locator(r: &mut Cursor<'_>) -> SerResult<Locator> {
    let kind = r.read_i32()?;
    let port = r.read_u32()?;
    let address = r.read_array::<16>()?;
    Ok(Locator::new(kind, port, address))
}

fn write_locator_list(w: &mut CursorMut<'_>, list: &[Locator]) -> SerResult<()> {
    let count = u32::try_from(list.len()).map_err(|_| SerError::WriteFailed {
        offset: w.offset(),
        reason: "locator list too long".into(),
    })?;
    w.write_u32(count)?;
    for loc in list {
        write_locator(w, loc)?;
    }
    Ok(())
}

fn read_locator_list(r: &mut Cursor<'_>) -> SerResult<Vec<Locator>> {
    let count = r.read_u32()? as usize;
    if count.saturating_mul(Locator::WIRE_SIZE) > r.remaining() {
        return Err(SerError::InvalidData {
            reason: format!("locator count {} exceeds body", count),
        });
    }
    (0..count).map(|_| read_locator(r)).collect()
}

// ============================================================================
// DATA / DATA_FRAG
// ============================================================================

/// DATA submessage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSubmessage<'a> {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub inline_qos: Option<InlineQos>,
    /// Payload is the serialized key only (K flag) rather than data (D flag).
    pub key_only: bool,
    /// Serialized payload (encapsulation header included).
    pub serialized_payload: Option<&'a [u8]>,
}

impl<'a> DataSubmessage<'a> {
    fn flags(&self) -> u8 {
        let mut f = 0;
        if self.inline_qos.is_some() {
            f |= flags::DATA_INLINE_QOS;
        }
        if self.serialized_payload.is_some() {
            f |= if self.key_only {
                flags::DATA_KEY
            } else {
                flags::DATA_PAYLOAD
            };
        }
        f
    }

    fn encode_body(&self, w: &mut CursorMut<'_>) -> SerResult<()> {
        w.write_u16(0)?; // extraFlags
        w.write_u16(DATA_OCTETS_TO_INLINE_QOS)?;
        write_entity(w, self.reader_id)?;
        write_entity(w, self.writer_id)?;
        write_sn(w, self.writer_sn)?;
        if let Some(qos) = &self.inline_qos {
            qos.encode(w)?;
        }
        if let Some(payload) = self.serialized_payload {
            w.write_bytes(payload)?;
        }
        Ok(())
    }

    fn decode(f: u8, r: &mut Cursor<'a>) -> SerResult<Self> {
        let _extra_flags = r.read_u16()?;
        let octets_to_inline_qos = r.read_u16()?;
        if octets_to_inline_qos < DATA_OCTETS_TO_INLINE_QOS {
            return Err(SerError::InvalidData {
                reason: format!("octetsToInlineQos {} < 16", octets_to_inline_qos),
            });
        }
        let reader_id = read_entity(r)?;
        let writer_id = read_entity(r)?;
        let writer_sn = read_sn(r)?;
        r.skip((octets_to_inline_qos - DATA_OCTETS_TO_INLINE_QOS) as usize)?;
        let inline_qos = if f & flags::DATA_INLINE_QOS != 0 {
            Some(InlineQos::decode(r)?)
        } else {
            None
        };
        let has_data = f & flags::DATA_PAYLOAD != 0;
        let has_key = f & flags::DATA_KEY != 0;
        let serialized_payload = if has_data || has_key {
            Some(r.rest())
        } else {
            None
        };
        Ok(Self {
            reader_id,
            writer_id,
            writer_sn,
            inline_qos,
            key_only: has_key && !has_data,
            serialized_payload,
        })
    }
}

/// DATA_FRAG submessage: `fragments_in_submessage` consecutive fragments of
/// one sample, starting at fragment `fragment_starting_num` (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFragSubmessage<'a> {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub fragment_starting_num: u32,
    pub fragments_in_submessage: u16,
    pub fragment_size: u16,
    pub sample_size: u32,
    pub inline_qos: Option<InlineQos>,
    pub key_only: bool,
    /// Fragment bytes (the last fragment may be short; trailing pad possible).
    pub fragments: &'a [u8],
}

impl<'a> DataFragSubmessage<'a> {
    fn flags(&self) -> u8 {
        let mut f = 0;
        if self.inline_qos.is_some() {
            f |= flags::DATA_FRAG_INLINE_QOS;
        }
        if self.key_only {
            f |= flags::DATA_FRAG_KEY;
        }
        f
    }

    /// Bytes of this submessage that belong to the sample.
    #[must_use]
    pub fn fragment_data(&self) -> &'a [u8] {
        let start = (u64::from(self.fragment_starting_num.saturating_sub(1))
            * u64::from(self.fragment_size)) as usize;
        let expected = (self.sample_size as usize).saturating_sub(start).min(
            self.fragments_in_submessage as usize * self.fragment_size as usize,
        );
        &self.fragments[..expected.min(self.fragments.len())]
    }

    fn encode_body(&self, w: &mut CursorMut<'_>) -> SerResult<()> {
        w.write_u16(0)?;
        w.write_u16(DATA_FRAG_OCTETS_TO_INLINE_QOS)?;
        write_entity(w, self.reader_id)?;
        write_entity(w, self.writer_id)?;
        write_sn(w, self.writer_sn)?;
        w.write_u32(self.fragment_starting_num)?;
        w.write_u16(self.fragments_in_submessage)?;
        w.write_u16(self.fragment_size)?;
        w.write_u32(self.sample_size)?;
        if let Some(qos) = &self.inline_qos {
            qos.encode(w)?;
        }
        w.write_bytes(self.fragments)
    }

    fn decode(f: u8, r: &mut Cursor<'a>) -> SerResult<Self> {
        let _extra_flags = r.read_u16()?;
        let octets_to_inline_qos = r.read_u16()?;
        if octets_to_inline_qos < DATA_FRAG_OCTETS_TO_INLINE_QOS {
            return Err(SerError::InvalidData {
                reason: format!("octetsToInlineQos {} < 28", octets_to_inline_qos),
            });
        }
        let reader_id = read_entity(r)?;
        let writer_id = read_entity(r)?;
        let writer_sn = read_sn(r)?;
        let fragment_starting_num = r.read_u32()?;
        let fragments_in_submessage = r.read_u16()?;
        let fragment_size = r.read_u16()?;
        let sample_size = r.read_u32()?;
        if fragment_starting_num == 0 || fragment_size == 0 {
            return Err(SerError::InvalidData {
                reason: "fragment number and size must be non-zero".into(),
            });
        }
        r.skip((octets_to_inline_qos - DATA_FRAG_OCTETS_TO_INLINE_QOS) as usize)?;
        let inline_qos = if f & flags::DATA_FRAG_INLINE_QOS != 0 {
            Some(InlineQos::decode(r)?)
        } else {
            None
        };
        Ok(Self {
            reader_id,
            writer_id,
            writer_sn,
            fragment_starting_num,
            fragments_in_submessage,
            fragment_size,
            sample_size,
            inline_qos,
            key_only: f & flags::DATA_FRAG_KEY != 0,
            fragments: r.rest(),
        })
    }
}

// ============================================================================
// HEARTBEAT / ACKNACK / GAP
// ============================================================================

/// HEARTBEAT: the writer holds `[first_sn, last_sn]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub first_sn: SequenceNumber,
    pub last_sn: SequenceNumber,
    pub count: u32,
    /// No response required.
    pub final_flag: bool,
    /// Liveliness assertion.
    pub liveliness_flag: bool,
}

impl HeartbeatSubmessage {
    fn flags(&self) -> u8 {
        let mut f = 0;
        if self.final_flag {
            f |= flags::HEARTBEAT_FINAL;
        }
        if self.liveliness_flag {
            f |= flags::HEARTBEAT_LIVELINESS;
        }
        f
    }

    fn encode_body(&self, w: &mut CursorMut<'_>) -> SerResult<()> {
        write_entity(w, self.reader_id)?;
        write_entity(w, self.writer_id)?;
        write_sn(w, self.first_sn)?;
        write_sn(w, self.last_sn)?;
        w.write_u32(self.count)
    }

    fn decode(f: u8, r: &mut Cursor<'_>) -> SerResult<Self> {
        let hb = Self {
            reader_id: read_entity(r)?,
            writer_id: read_entity(r)?,
            first_sn: read_sn(r)?,
            last_sn: read_sn(r)?,
            count: r.read_u32()?,
            final_flag: f & flags::HEARTBEAT_FINAL != 0,
            liveliness_flag: f & flags::HEARTBEAT_LIVELINESS != 0,
        };
        // Empty history is first = last + 1; anything lower is invalid.
        if hb.first_sn.0 < 1 || hb.last_sn.0 < hb.first_sn.0 - 1 {
            return Err(SerError::InvalidData {
                reason: format!("heartbeat range [{}, {}]", hb.first_sn, hb.last_sn),
            });
        }
        Ok(hb)
    }
}

/// ACKNACK: everything below `reader_sn_state.base()` is acknowledged, set
/// members are requested again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckNackSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub reader_sn_state: SequenceNumberSet,
    pub count: u32,
    pub final_flag: bool,
}

impl AckNackSubmessage {
    fn flags(&self) -> u8 {
        if self.final_flag {
            flags::ACKNACK_FINAL
        } else {
            0
        }
    }

    fn encode_body(&self, w: &mut CursorMut<'_>) -> SerResult<()> {
        write_entity(w, self.reader_id)?;
        write_entity(w, self.writer_id)?;
        self.reader_sn_state.encode(w)?;
        w.write_u32(self.count)
    }

    fn decode(f: u8, r: &mut Cursor<'_>) -> SerResult<Self> {
        Ok(Self {
            reader_id: read_entity(r)?,
            writer_id: read_entity(r)?,
            reader_sn_state: SequenceNumberSet::decode(r)?,
            count: r.read_u32()?,
            final_flag: f & flags::ACKNACK_FINAL != 0,
        })
    }
}

/// GAP: `[gap_start, gap_list.base())` plus the members of `gap_list` are
/// irrelevant to the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub gap_start: SequenceNumber,
    pub gap_list: SequenceNumberSet,
}

impl GapSubmessage {
    /// Every sequence number declared irrelevant, ascending.
    pub fn irrelevant(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        let start = self.gap_start.0;
        let end = self.gap_list.base().0.max(start);
        (start..end).map(SequenceNumber).chain(self.gap_list.iter())
    }

    /// Minimal GAPs covering `seqs` (ascending, deduplicated by the caller).
    #[must_use]
    pub fn covering(reader_id: EntityId, writer_id: EntityId, seqs: &[SequenceNumber]) -> Vec<Self> {
        let mut gaps = Vec::new();
        let mut i = 0;
        while i < seqs.len() {
            let gap_start = seqs[i];
            let mut run_end = gap_start;
            i += 1;
            while i < seqs.len() && seqs[i] == run_end.next() {
                run_end = seqs[i];
                i += 1;
            }
            let mut gap_list = SequenceNumberSet::empty(run_end.next());
            while i < seqs.len() && gap_list.insert(seqs[i]) {
                i += 1;
            }
            gaps.push(Self {
                reader_id,
                writer_id,
                gap_start,
                gap_list,
            });
        }
        gaps
    }

    fn encode_body(&self, w: &mut CursorMut<'_>) -> SerResult<()> {
        write_entity(w, self.reader_id)?;
        write_entity(w, self.writer_id)?;
        write_sn(w, self.gap_start)?;
        self.gap_list.encode(w)
    }

    fn decode(r: &mut Cursor<'_>) -> SerResult<Self> {
        let gap = Self {
            reader_id: read_entity(r)?,
            writer_id: read_entity(r)?,
            gap_start: read_sn(r)?,
            gap_list: SequenceNumberSet::decode(r)?,
        };
        if gap.gap_start.0 < 1 {
            return Err(SerError::InvalidData {
                reason: format!("gapStart {}", gap.gap_start),
            });
        }
        Ok(gap)
    }
}

// ============================================================================
// NACK_FRAG / HEARTBEAT_FRAG
// ============================================================================

/// NACK_FRAG: the reader misses some fragments of `writer_sn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackFragSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub fragment_number_state: FragmentNumberSet,
    pub count: u32,
}

impl NackFragSubmessage {
    fn encode_body(&self, w: &mut CursorMut<'_>) -> SerResult<()> {
        write_entity(w, self.reader_id)?;
        write_entity(w, self.writer_id)?;
        write_sn(w, self.writer_sn)?;
        self.fragment_number_state.encode(w)?;
        w.write_u32(self.count)
    }

    fn decode(r: &mut Cursor<'_>) -> SerResult<Self> {
        Ok(Self {
            reader_id: read_entity(r)?,
            writer_id: read_entity(r)?,
            writer_sn: read_sn(r)?,
            fragment_number_state: FragmentNumberSet::decode(r)?,
            count: r.read_u32()?,
        })
    }
}

/// HEARTBEAT_FRAG: fragments `1..=last_fragment_num` of `writer_sn` are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatFragSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub last_fragment_num: u32,
    pub count: u32,
}

impl HeartbeatFragSubmessage {
    fn encode_body(&self, w: &mut CursorMut<'_>) -> SerResult<()> {
        write_entity(w, self.reader_id)?;
        write_entity(w, self.writer_id)?;
        write_sn(w, self.writer_sn)?;
        w.write_u32(self.last_fragment_num)?;
        w.write_u32(self.count)
    }

    fn decode(r: &mut Cursor<'_>) -> SerResult<Self> {
        Ok(Self {
            reader_id: read_entity(r)?,
            writer_id: read_entity(r)?,
            writer_sn: read_sn(r)?,
            last_fragment_num: r.read_u32()?,
            count: r.read_u32()?,
        })
    }
}

// ============================================================================
// INFO_*
// ============================================================================

/// INFO_SRC: following submessages come from another participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoSource {
    pub version: ProtocolVersion,
    pub vendor_id: [u8; 2],
    pub guid_prefix: GuidPrefix,
}

/// INFO_REPLY: where replies to the following submessages should go.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfoReply {
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
}

// ============================================================================
// Submessage
// ============================================================================

/// One decoded submessage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submessage<'a> {
    Data(DataSubmessage<'a>),
    DataFrag(DataFragSubmessage<'a>),
    Heartbeat(HeartbeatSubmessage),
    AckNack(AckNackSubmessage),
    Gap(GapSubmessage),
    NackFrag(NackFragSubmessage),
    HeartbeatFrag(HeartbeatFragSubmessage),
    /// `None` invalidates the current timestamp.
    InfoTimestamp(Option<Time>),
    InfoSource(InfoSource),
    InfoDestination(GuidPrefix),
    InfoReply(InfoReply),
    Pad,
}

impl<'a> Submessage<'a> {
    #[must_use]
    pub fn kind(&self) -> u8 {
        match self {
            Submessage::Data(_) => kind::DATA,
            Submessage::DataFrag(_) => kind::DATA_FRAG,
            Submessage::Heartbeat(_) => kind::HEARTBEAT,
            Submessage::AckNack(_) => kind::ACKNACK,
            Submessage::Gap(_) => kind::GAP,
            Submessage::NackFrag(_) => kind::NACK_FRAG,
            Submessage::HeartbeatFrag(_) => kind::HEARTBEAT_FRAG,
            Submessage::InfoTimestamp(_) => kind::INFO_TS,
            Submessage::InfoSource(_) => kind::INFO_SRC,
            Submessage::InfoDestination(_) => kind::INFO_DST,
            Submessage::InfoReply(_) => kind::INFO_REPLY,
            Submessage::Pad => kind::PAD,
        }
    }

    fn flags(&self) -> u8 {
        match self {
            Submessage::Data(d) => d.flags(),
            Submessage::DataFrag(d) => d.flags(),
            Submessage::Heartbeat(h) => h.flags(),
            Submessage::AckNack(a) => a.flags(),
            Submessage::InfoTimestamp(None) => flags::INFO_TS_INVALIDATE,
            Submessage::InfoReply(r) if !r.multicast_locators.is_empty() => {
                flags::INFO_REPLY_MULTICAST
            }
            _ => 0,
        }
    }

    /// Append header and body in the cursor's byte order.
    ///
    /// octetsToNextHeader counts the body only; the zero bytes that bring the
    /// next header to a 4-byte boundary follow it uncounted, so a DATA payload
    /// is delivered with exactly the length it was written with.
    pub fn encode(&self, w: &mut CursorMut<'_>) -> SerResult<()> {
        w.align(4)?;
        w.write_u8(self.kind())?;
        w.write_u8(self.flags() | w.endianness().flag())?;
        let length_at = w.offset();
        w.write_u16(0)?;
        let body_start = w.offset();

        match self {
            Submessage::Data(d) => d.encode_body(w)?,
            Submessage::DataFrag(d) => d.encode_body(w)?,
            Submessage::Heartbeat(h) => h.encode_body(w)?,
            Submessage::AckNack(a) => a.encode_body(w)?,
            Submessage::Gap(g) => g.encode_body(w)?,
            Submessage::NackFrag(n) => n.encode_body(w)?,
            Submessage::HeartbeatFrag(h) => h.encode_body(w)?,
            Submessage::InfoTimestamp(Some(ts)) => {
                w.write_i32(ts.seconds)?;
                w.write_u32(ts.fraction)?;
            }
            Submessage::InfoTimestamp(None) | Submessage::Pad => {}
            Submessage::InfoSource(src) => {
                w.write_u32(0)?;
                w.write_u8(src.version.major)?;
                w.write_u8(src.version.minor)?;
                w.write_bytes(&src.vendor_id)?;
                w.write_bytes(&src.guid_prefix.0)?;
            }
            Submessage::InfoDestination(prefix) => w.write_bytes(&prefix.0)?,
            Submessage::InfoReply(reply) => {
                write_locator_list(w, &reply.unicast_locators)?;
                if !reply.multicast_locators.is_empty() {
                    write_locator_list(w, &reply.multicast_locators)?;
                }
            }
        }
        let length = u16::try_from(w.offset() - body_start).map_err(|_| SerError::WriteFailed {
            offset: body_start,
            reason: "submessage body exceeds 65535 bytes".into(),
        })?;
        w.patch_u16(length_at, length)?;
        w.align(4)
    }

    /// Decode one submessage body. `body_offset` is the position of `body`
    /// in the message (alignment origin). Unknown kinds yield `Ok(None)`.
    pub fn decode(
        submessage_kind: u8,
        f: u8,
        body: &'a [u8],
        body_offset: usize,
    ) -> Result<Option<Self>, ParseError> {
        let endianness = Endianness::from_flags(f);
        let mut r = Cursor::with_base(body, body_offset, endianness);
        let r = &mut r;
        let decoded = match submessage_kind {
            kind::DATA => DataSubmessage::decode(f, r).map(Submessage::Data),
            kind::DATA_FRAG => DataFragSubmessage::decode(f, r).map(Submessage::DataFrag),
            kind::HEARTBEAT => HeartbeatSubmessage::decode(f, r).map(Submessage::Heartbeat),
            kind::ACKNACK => AckNackSubmessage::decode(f, r).map(Submessage::AckNack),
            kind::GAP => GapSubmessage::decode(r).map(Submessage::Gap),
            kind::NACK_FRAG => NackFragSubmessage::decode(r).map(Submessage::NackFrag),
            kind::HEARTBEAT_FRAG => {
                HeartbeatFragSubmessage::decode(r).map(Submessage::HeartbeatFrag)
            }
            kind::INFO_TS => {
                if f & flags::INFO_TS_INVALIDATE != 0 {
                    Ok(Submessage::InfoTimestamp(None))
                } else {
                    decode_time(r).map(|t| Submessage::InfoTimestamp(Some(t)))
                }
            }
            kind::INFO_SRC => decode_info_source(r).map(Submessage::InfoSource),
            kind::INFO_DST => r
                .read_array::<12>()
                .map(|p| Submessage::InfoDestination(GuidPrefix(p))),
            kind::INFO_REPLY => decode_info_reply(f, r).map(Submessage::InfoReply),
            kind::INFO_REPLY_IP4 => decode_info_reply_ip4(f, r).map(Submessage::InfoReply),
            kind::PAD => Ok(Submessage::Pad),
            _ => return Ok(None),
        };
        decoded
            .map(Some)
            .map_err(|e| ParseError::malformed(submessage_kind, e))
    }
}

fn decode_time(r: &mut Cursor<'_>) -> SerResult<Time> {
    let seconds = r.read_i32()?;
    let fraction = r.read_u32()?;
    Ok(Time::new(seconds, fraction))
}

fn decode_info_source(r: &mut Cursor<'_>) -> SerResult<InfoSource> {
    let _unused = r.read_u32()?;
    let major = r.read_u8()?;
    let minor = r.read_u8()?;
    let vendor_id = r.read_array::<2>()?;
    let guid_prefix = GuidPrefix(r.read_array::<12>()?);
    Ok(InfoSource {
        version: ProtocolVersion { major, minor },
        vendor_id,
        guid_prefix,
    })
}

fn decode_info_reply(f: u8, r: &mut Cursor<'_>) -> SerResult<InfoReply> {
    let unicast_locators = read_locator_list(r)?;
    let multicast_locators = if f & flags::INFO_REPLY_MULTICAST != 0 {
        read_locator_list(r)?
    } else {
        Vec::new()
    };
    Ok(InfoReply {
        unicast_locators,
        multicast_locators,
    })
}

fn decode_info_reply_ip4(f: u8, r: &mut Cursor<'_>) -> SerResult<InfoReply> {
    let read_ip4 = |r: &mut Cursor<'_>| -> SerResult<Locator> {
        let address = r.read_u32()?;
        let port = r.read_u32()?;
        let port = u16::try_from(port).map_err(|_| SerError::InvalidData {
            reason: format!("udpv4 port {}", port),
        })?;
        Ok(Locator::udpv4(address.into(), port))
    };
    let unicast_locators = vec![read_ip4(r)?];
    let multicast_locators = if f & flags::INFO_REPLY_MULTICAST != 0 {
        vec![read_ip4(r)?]
    } else {
        Vec::new()
    };
    Ok(InfoReply {
        unicast_locators,
        multicast_locators,
    })
}

/// Total encoded size of a submessage header plus `body` bytes.
#[must_use]
pub const fn submessage_size(body: usize) -> usize {
    SUBMESSAGE_HEADER_LEN + body.div_ceil(4) * 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::params::status_info;
    use crate::core::InstanceHandle;

    fn encode(sub: &Submessage<'_>, endianness: Endianness) -> Vec<u8> {
        let mut buf = Vec::new();
        sub.encode(&mut CursorMut::new(&mut buf, 65536, endianness))
            .expect("encode should succeed");
        buf
    }

    fn decode(buf: &[u8]) -> Submessage<'_> {
        let length = match Endianness::from_flags(buf[1]) {
            Endianness::Little => u16::from_le_bytes([buf[2], buf[3]]),
            Endianness::Big => u16::from_be_bytes([buf[2], buf[3]]),
        } as usize;
        assert_eq!(submessage_size(length), buf.len());
        assert!(buf[4 + length..].iter().all(|&b| b == 0));
        Submessage::decode(buf[0], buf[1], &buf[4..4 + length], 4)
            .expect("decode should succeed")
            .expect("known kind")
    }

    fn writer() -> EntityId {
        EntityId::new(1, 0x02)
    }

    fn reader() -> EntityId {
        EntityId::new(1, 0x07)
    }

    #[test]
    fn test_data_with_inline_qos_both_byte_orders() {
        let payload = [0x00, 0x01, 0x00, 0x00, 1, 2, 3, 4, 5];
        let sub = Submessage::Data(DataSubmessage {
            reader_id: EntityId::UNKNOWN,
            writer_id: writer(),
            writer_sn: SequenceNumber(0x2_0000_0005),
            inline_qos: Some(InlineQos {
                key_hash: Some(InstanceHandle([4; 16])),
                ownership_strength: Some(25),
                ..InlineQos::default()
            }),
            key_only: false,
            serialized_payload: Some(&payload),
        });
        for endianness in [Endianness::Little, Endianness::Big] {
            let buf = encode(&sub, endianness);
            assert_eq!(buf.len() % 4, 0);
            assert_eq!(buf[1] & flags::DATA_PAYLOAD, flags::DATA_PAYLOAD);
            let Submessage::Data(decoded) = decode(&buf) else {
                panic!("expected DATA");
            };
            assert_eq!(decoded.writer_sn, SequenceNumber(0x2_0000_0005));
            assert_eq!(decoded.inline_qos.and_then(|q| q.ownership_strength), Some(25));
            let received = decoded.serialized_payload.expect("payload present");
            assert_eq!(received, &payload[..]);
        }
    }

    #[test]
    fn test_dispose_without_payload() {
        let sub = Submessage::Data(DataSubmessage {
            reader_id: reader(),
            writer_id: writer(),
            writer_sn: SequenceNumber(3),
            inline_qos: Some(InlineQos {
                status_info: Some(status_info::DISPOSED),
                ..InlineQos::default()
            }),
            key_only: false,
            serialized_payload: None,
        });
        let buf = encode(&sub, Endianness::Little);
        assert_eq!(decode(&buf), sub);
    }

    #[test]
    fn test_heartbeat_acknack_gap_both_byte_orders() {
        let subs = [
            Submessage::Heartbeat(HeartbeatSubmessage {
                reader_id: EntityId::UNKNOWN,
                writer_id: writer(),
                first_sn: SequenceNumber(1),
                last_sn: SequenceNumber(5),
                count: 9,
                final_flag: false,
                liveliness_flag: true,
            }),
            Submessage::AckNack(AckNackSubmessage {
                reader_id: reader(),
                writer_id: writer(),
                reader_sn_state: SequenceNumberSet::from_sequences(
                    SequenceNumber(2),
                    [SequenceNumber(2), SequenceNumber(4)],
                )
                .expect("in window"),
                count: 3,
                final_flag: false,
            }),
            Submessage::Gap(GapSubmessage {
                reader_id: reader(),
                writer_id: writer(),
                gap_start: SequenceNumber(6),
                gap_list: SequenceNumberSet::empty(SequenceNumber(8)),
            }),
            Submessage::NackFrag(NackFragSubmessage {
                reader_id: reader(),
                writer_id: writer(),
                writer_sn: SequenceNumber(2),
                fragment_number_state: FragmentNumberSet::from_fragments(2, [2, 3]),
                count: 1,
            }),
            Submessage::HeartbeatFrag(HeartbeatFragSubmessage {
                reader_id: reader(),
                writer_id: writer(),
                writer_sn: SequenceNumber(2),
                last_fragment_num: 4,
                count: 1,
            }),
            Submessage::InfoTimestamp(Some(Time::new(100, 5))),
            Submessage::InfoTimestamp(None),
            Submessage::InfoDestination(GuidPrefix([7; 12])),
            Submessage::InfoSource(InfoSource {
                version: ProtocolVersion { major: 2, minor: 3 },
                vendor_id: [1, 15],
                guid_prefix: GuidPrefix([2; 12]),
            }),
            Submessage::InfoReply(InfoReply {
                unicast_locators: vec![Locator::udpv4([10, 0, 0, 1].into(), 7411)],
                multicast_locators: vec![Locator::udpv4([239, 255, 0, 1].into(), 7401)],
            }),
        ];
        for endianness in [Endianness::Little, Endianness::Big] {
            for sub in &subs {
                let buf = encode(sub, endianness);
                assert_eq!(&decode(&buf), sub, "{:?} in {:?}", sub.kind(), endianness);
            }
        }
    }

    #[test]
    fn test_gap_irrelevant_range() {
        let gap = GapSubmessage {
            reader_id: reader(),
            writer_id: writer(),
            gap_start: SequenceNumber(6),
            gap_list: SequenceNumberSet::empty(SequenceNumber(8)),
        };
        assert_eq!(
            gap.irrelevant().collect::<Vec<_>>(),
            vec![SequenceNumber(6), SequenceNumber(7)]
        );
    }

    #[test]
    fn test_gap_covering_groups_runs() {
        let seqs: Vec<SequenceNumber> = [2, 3, 4, 7, 9].into_iter().map(SequenceNumber).collect();
        let gaps = GapSubmessage::covering(reader(), writer(), &seqs);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].irrelevant().collect::<Vec<_>>(), seqs);
        let far: Vec<SequenceNumber> = [1, 1000].into_iter().map(SequenceNumber).collect();
        assert_eq!(GapSubmessage::covering(reader(), writer(), &far).len(), 2);
    }

    #[test]
    fn test_data_frag_fragment_data() {
        let bytes = [7u8; 12];
        let sub = Submessage::DataFrag(DataFragSubmessage {
            reader_id: reader(),
            writer_id: writer(),
            writer_sn: SequenceNumber(1),
            fragment_starting_num: 3,
            fragments_in_submessage: 1,
            fragment_size: 16,
            sample_size: 42,
            inline_qos: None,
            key_only: false,
            fragments: &bytes[..10],
        });
        let buf = encode(&sub, Endianness::Big);
        let Submessage::DataFrag(frag) = decode(&buf) else {
            panic!("expected DATA_FRAG");
        };
        // Fragment 3 of a 42-byte sample with 16-byte fragments holds 10 bytes.
        assert_eq!(frag.fragment_data().len(), 10);
    }

    #[test]
    fn test_bad_heartbeat_range_is_malformed() {
        let sub = Submessage::Heartbeat(HeartbeatSubmessage {
            reader_id: reader(),
            writer_id: writer(),
            first_sn: SequenceNumber(10),
            last_sn: SequenceNumber(3),
            count: 1,
            final_flag: false,
            liveliness_flag: false,
        });
        let buf = encode(&sub, Endianness::Little);
        assert!(matches!(
            Submessage::decode(buf[0], buf[1], &buf[4..], 4),
            Err(ParseError::Malformed { .. })
        ));
    }

    #[test]
    fn test_truncated_body_is_malformed() {
        let buf = encode(
            &Submessage::InfoDestination(GuidPrefix([1; 12])),
            Endianness::Little,
        );
        assert!(Submessage::decode(buf[0], buf[1], &buf[4..10], 4).is_err());
        assert_eq!(Submessage::decode(0x7f, 0x01, &buf[4..], 4), Ok(None));
    }
}
