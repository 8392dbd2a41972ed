// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parameter lists and inline QoS.
//!
//! A parameter list is a sequence of `(pid u16, length u16, value)` entries,
//! each value padded to 4 bytes, ended by `PID_SENTINEL`. Unknown pids are
//! skipped by length.

use crate::core::ser::{Cursor, CursorMut, SerError, SerResult};
use crate::core::{Guid, InstanceHandle, SampleIdentity, SequenceNumber};

/// Parameter identifiers understood in inline QoS.
pub mod pid {
    pub const PAD: u16 = 0x0000;
    pub const SENTINEL: u16 = 0x0001;
    pub const OWNERSHIP_STRENGTH: u16 = 0x0006;
    pub const KEY_HASH: u16 = 0x0070;
    pub const STATUS_INFO: u16 = 0x0071;
    pub const RELATED_SAMPLE_IDENTITY: u16 = 0x0083;
}

/// STATUS_INFO flag bits (last octet of the value).
pub mod status_info {
    pub const DISPOSED: u8 = 0x01;
    pub const UNREGISTERED: u8 = 0x02;
    pub const FILTERED: u8 = 0x04;
}

/// Write one parameter, padding the value to 4 bytes.
pub fn write_parameter(w: &mut CursorMut<'_>, pid: u16, value: &[u8]) -> SerResult<()> {
    let padded = value.len().div_ceil(4) * 4;
    let len = u16::try_from(padded).map_err(|_| SerError::WriteFailed {
        offset: w.offset(),
        reason: format!("parameter 0x{:04x} too long ({} bytes)", pid, value.len()),
    })?;
    w.write_u16(pid)?;
    w.write_u16(len)?;
    w.write_bytes(value)?;
    w.write_bytes(&[0u8; 3][..padded - value.len()])
}

pub fn write_sentinel(w: &mut CursorMut<'_>) -> SerResult<()> {
    w.write_u16(pid::SENTINEL)?;
    w.write_u16(0)
}

/// Iterate `(pid, value)` pairs until the sentinel. The cursor is left just
/// past the sentinel.
pub fn read_parameters<'a>(
    r: &mut Cursor<'a>,
    mut visit: impl FnMut(u16, &'a [u8]) -> SerResult<()>,
) -> SerResult<()> {
    loop {
        let pid = r.read_u16()?;
        let len = r.read_u16()? as usize;
        if pid == pid::SENTINEL {
            return Ok(());
        }
        let value = r.read_bytes(len)?;
        if pid != pid::PAD {
            visit(pid, value)?;
        }
    }
}

/// Inline QoS carried by DATA / DATA_FRAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InlineQos {
    pub key_hash: Option<InstanceHandle>,
    /// STATUS_INFO flags octet.
    pub status_info: Option<u8>,
    pub related_sample_identity: Option<SampleIdentity>,
    pub ownership_strength: Option<i32>,
}

impl InlineQos {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn encode(&self, w: &mut CursorMut<'_>) -> SerResult<()> {
        if let Some(handle) = &self.key_hash {
            write_parameter(w, pid::KEY_HASH, &handle.0)?;
        }
        if let Some(flags) = self.status_info {
            write_parameter(w, pid::STATUS_INFO, &[0, 0, 0, flags])?;
        }
        if let Some(identity) = &self.related_sample_identity {
            w.write_u16(pid::RELATED_SAMPLE_IDENTITY)?;
            w.write_u16(24)?;
            w.write_bytes(&identity.writer_guid.to_bytes())?;
            w.write_i32(identity.sequence_number.high())?;
            w.write_u32(identity.sequence_number.low())?;
        }
        if let Some(strength) = self.ownership_strength {
            w.write_u16(pid::OWNERSHIP_STRENGTH)?;
            w.write_u16(4)?;
            w.write_i32(strength)?;
        }
        write_sentinel(w)
    }

    /// Decode up to and including the sentinel; unknown pids are ignored.
    pub fn decode(r: &mut Cursor<'_>) -> SerResult<Self> {
        let endianness = r.endianness();
        let mut qos = InlineQos::default();
        read_parameters(r, |pid, value| {
            match pid {
                pid::KEY_HASH => {
                    let bytes: [u8; 16] = value
                        .get(..16)
                        .and_then(|s| s.try_into().ok())
                        .ok_or_else(|| short(pid, value))?;
                    qos.key_hash = Some(InstanceHandle(bytes));
                }
                pid::STATUS_INFO => {
                    let flags = *value.get(3).ok_or_else(|| short(pid, value))?;
                    qos.status_info = Some(flags);
                }
                pid::RELATED_SAMPLE_IDENTITY => {
                    if value.len() < 24 {
                        return Err(short(pid, value));
                    }
                    let mut v = Cursor::new(value, endianness);
                    let guid = v.read_array::<16>()?;
                    let high = v.read_i32()?;
                    let low = v.read_u32()?;
                    qos.related_sample_identity = Some(SampleIdentity::new(
                        Guid::from_bytes(guid),
                        SequenceNumber::from_parts(high, low),
                    ));
                }
                pid::OWNERSHIP_STRENGTH => {
                    let mut v = Cursor::new(value, endianness);
                    qos.ownership_strength = Some(v.read_i32()?);
                }
                _ => {}
            }
            Ok(())
        })?;
        Ok(qos)
    }
}

fn short(pid: u16, value: &[u8]) -> SerError {
    SerError::InvalidData {
        reason: format!("parameter 0x{:04x} too short ({} bytes)", pid, value.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ser::Endianness;
    use crate::core::{EntityId, GuidPrefix};

    fn sample_qos() -> InlineQos {
        InlineQos {
            key_hash: Some(InstanceHandle([3; 16])),
            status_info: Some(status_info::DISPOSED | status_info::UNREGISTERED),
            related_sample_identity: Some(SampleIdentity::new(
                Guid::new(GuidPrefix([1; 12]), EntityId::new(5, 0x03)),
                SequenceNumber(0x1_0000_0002),
            )),
            ownership_strength: Some(-7),
        }
    }

    #[test]
    fn test_inline_qos_both_byte_orders() {
        for endianness in [Endianness::Little, Endianness::Big] {
            let qos = sample_qos();
            let mut buf = Vec::new();
            qos.encode(&mut CursorMut::new(&mut buf, 256, endianness))
                .expect("encode");
            assert_eq!(buf.len() % 4, 0);
            let mut r = Cursor::new(&buf, endianness);
            assert_eq!(InlineQos::decode(&mut r).expect("decode"), qos);
            assert!(r.is_eof());
        }
    }

    #[test]
    fn test_unknown_pid_is_skipped() {
        let mut buf = Vec::new();
        {
            let mut w = CursorMut::new(&mut buf, 256, Endianness::Little);
            write_parameter(&mut w, 0x8001, &[1, 2, 3, 4, 5]).expect("vendor pid");
            write_parameter(&mut w, pid::STATUS_INFO, &[0, 0, 0, 1]).expect("status");
            write_sentinel(&mut w).expect("sentinel");
        }
        let qos = InlineQos::decode(&mut Cursor::new(&buf, Endianness::Little)).expect("decode");
        assert_eq!(qos.status_info, Some(status_info::DISPOSED));
        assert!(qos.key_hash.is_none());
    }

    #[test]
    fn test_missing_sentinel_is_an_error() {
        let mut buf = Vec::new();
        {
            let mut w = CursorMut::new(&mut buf, 256, Endianness::Little);
            write_parameter(&mut w, pid::KEY_HASH, &[0u8; 16]).expect("key hash");
        }
        assert!(InlineQos::decode(&mut Cursor::new(&buf, Endianness::Little)).is_err());
    }

    #[test]
    fn test_short_key_hash_is_an_error() {
        let mut buf = Vec::new();
        {
            let mut w = CursorMut::new(&mut buf, 256, Endianness::Little);
            write_parameter(&mut w, pid::KEY_HASH, &[0u8; 8]).expect("short key hash");
            write_sentinel(&mut w).expect("sentinel");
        }
        assert!(InlineQos::decode(&mut Cursor::new(&buf, Endianness::Little)).is_err());
    }
}
