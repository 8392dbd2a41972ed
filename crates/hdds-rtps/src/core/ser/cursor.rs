// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read/write cursors for CDR buffer manipulation.
//!
//! Alignment is computed against the alignment origin (message start), not
//! the start of the slice being read, so a submessage body decoded on its own
//! still pads exactly as it did inside the full message.

use super::{Endianness, SerError, SerResult};

/// Generate endian-aware write methods for primitive types.
///
/// Each generated method:
/// 1. Aligns to the primitive size (relative to the message start)
/// 2. Checks the size limit (returns `SerError::WriteFailed` if overflow)
/// 3. Converts the value with the cursor's byte order
/// 4. Appends the bytes
macro_rules! impl_write {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self, value: $type) -> SerResult<()> {
            self.align($size)?;
            let bytes = match self.endianness {
                Endianness::Little => value.to_le_bytes(),
                Endianness::Big => value.to_be_bytes(),
            };
            self.write_bytes(&bytes)
        }
    };
}

/// Generate endian-aware read methods for primitive types.
///
/// Each generated method:
/// 1. Aligns to the primitive size (relative to the message start)
/// 2. Checks buffer bounds (returns `SerError::ReadFailed` if overflow)
/// 3. Converts bytes with the cursor's byte order
/// 4. Advances offset
macro_rules! impl_read {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> SerResult<$type> {
            self.align($size)?;
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(self.read_bytes($size)?);
            Ok(match self.endianness {
                Endianness::Little => <$type>::from_le_bytes(bytes),
                Endianness::Big => <$type>::from_be_bytes(bytes),
            })
        }
    };
}

/// Growable cursor for writing an RTPS message (bounds-checked against a size limit).
pub struct CursorMut<'a> {
    buffer: &'a mut Vec<u8>,
    limit: usize,
    endianness: Endianness,
}

impl<'a> CursorMut<'a> {
    /// Append to `buffer`; offset 0 of `buffer` is the alignment origin.
    pub fn new(buffer: &'a mut Vec<u8>, limit: usize, endianness: Endianness) -> Self {
        Self {
            buffer,
            limit,
            endianness,
        }
    }

    impl_write!(write_u16, u16, 2);
    impl_write!(write_i16, i16, 2);
    impl_write!(write_u32, u32, 4);
    impl_write!(write_i32, i32, 4);
    impl_write!(write_u64, u64, 8);

    pub fn write_u8(&mut self, value: u8) -> SerResult<()> {
        self.write_bytes(&[value])
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> SerResult<()> {
        if self.buffer.len() + data.len() > self.limit {
            return Err(SerError::WriteFailed {
                offset: self.buffer.len(),
                reason: "message size limit exceeded".into(),
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Overwrite a previously written u16 (submessage length back-patching).
    pub fn patch_u16(&mut self, at: usize, value: u16) -> SerResult<()> {
        if at + 2 > self.buffer.len() {
            return Err(SerError::WriteFailed {
                offset: at,
                reason: "patch outside written range".into(),
            });
        }
        let bytes = match self.endianness {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        };
        self.buffer[at..at + 2].copy_from_slice(&bytes);
        Ok(())
    }

    /// Pad with zeros until the offset is a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) -> SerResult<()> {
        if alignment <= 1 {
            return Ok(());
        }
        let pad = (alignment - self.buffer.len() % alignment) % alignment;
        if pad == 0 {
            return Ok(());
        }
        self.write_bytes(&[0u8; 8][..pad])
    }

    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.buffer.len())
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn set_endianness(&mut self, endianness: Endianness) {
        self.endianness = endianness;
    }
}

/// Immutable cursor for reading (bounds-checked, zero-copy).
pub struct Cursor<'a> {
    buffer: &'a [u8],
    offset: usize,
    /// Position of `buffer[0]` relative to the alignment origin.
    base: usize,
    endianness: Endianness,
}

impl<'a> Cursor<'a> {
    pub fn new(buffer: &'a [u8], endianness: Endianness) -> Self {
        Self::with_base(buffer, 0, endianness)
    }

    /// Cursor over a slice that starts `base` bytes after the message start.
    pub fn with_base(buffer: &'a [u8], base: usize, endianness: Endianness) -> Self {
        Self {
            buffer,
            offset: 0,
            base,
            endianness,
        }
    }

    impl_read!(read_u16, u16, 2);
    impl_read!(read_i16, i16, 2);
    impl_read!(read_u32, u32, 4);
    impl_read!(read_i32, i32, 4);
    impl_read!(read_u64, u64, 8);

    pub fn read_u8(&mut self) -> SerResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_bytes(&mut self, len: usize) -> SerResult<&'a [u8]> {
        let end = self.offset.checked_add(len).ok_or_else(|| SerError::ReadFailed {
            offset: self.offset,
            reason: "length overflow".into(),
        })?;
        if end > self.buffer.len() {
            return Err(SerError::ReadFailed {
                offset: self.base + self.offset,
                reason: "unexpected end of buffer".into(),
            });
        }
        let slice = &self.buffer[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    /// Read a fixed-size array (GUID prefixes, entity ids, key hashes).
    pub fn read_array<const N: usize>(&mut self) -> SerResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn skip(&mut self, len: usize) -> SerResult<()> {
        self.read_bytes(len).map(|_| ())
    }

    pub fn align(&mut self, alignment: usize) -> SerResult<()> {
        if alignment <= 1 {
            return Ok(());
        }
        let absolute = self.base + self.offset;
        let pad = (alignment - absolute % alignment) % alignment;
        if self.offset + pad > self.buffer.len() {
            return Err(SerError::ReadFailed {
                offset: absolute,
                reason: "unexpected end of buffer".into(),
            });
        }
        self.offset += pad;
        Ok(())
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }

    /// Everything not yet consumed.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buffer[self.offset.min(self.buffer.len())..];
        self.offset = self.buffer.len();
        slice
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn is_eof(&self) -> bool {
        self.offset >= self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_U16: u16 = 0xCDEF;
    const TEST_U32: u32 = 0x1234_5678;
    const TEST_U64: u64 = 0x1122_3344_5566_7788;

    #[test]
    fn test_cursor_mut_limit_reports_offset() {
        let mut buffer = Vec::new();
        let mut cursor = CursorMut::new(&mut buffer, 2, Endianness::Little);
        cursor.write_u16(TEST_U16).expect("Write u16 should succeed");
        let err = cursor.write_u8(1).expect_err("Write past limit should fail");
        assert_eq!(
            err,
            SerError::WriteFailed {
                offset: 2,
                reason: "message size limit exceeded".into()
            }
        );
    }

    #[test]
    fn test_write_aligns_to_primitive_size() {
        let mut buffer = Vec::new();
        let mut cursor = CursorMut::new(&mut buffer, 64, Endianness::Little);
        cursor.write_u8(0xAA).expect("u8 should succeed");
        cursor.write_u32(TEST_U32).expect("u32 should succeed");
        cursor.write_u8(0xBB).expect("u8 should succeed");
        cursor.write_u64(TEST_U64).expect("u64 should succeed");
        assert_eq!(buffer.len(), 16);
        assert_eq!(&buffer[0..4], &[0xAA, 0, 0, 0]);
        assert_eq!(&buffer[4..8], &TEST_U32.to_le_bytes());
        assert_eq!(&buffer[8..16], &TEST_U64.to_le_bytes());
    }

    #[test]
    fn test_big_and_little_endian_roundtrip() {
        for endianness in [Endianness::Big, Endianness::Little] {
            let mut buffer = Vec::new();
            let mut w = CursorMut::new(&mut buffer, 64, endianness);
            w.write_u16(TEST_U16).expect("u16 should succeed");
            w.write_i32(-5).expect("i32 should succeed");
            w.write_u64(TEST_U64).expect("u64 should succeed");

            let mut r = Cursor::new(&buffer, endianness);
            assert_eq!(r.read_u16().expect("u16 read"), TEST_U16);
            assert_eq!(r.read_i32().expect("i32 read"), -5);
            assert_eq!(r.read_u64().expect("u64 read"), TEST_U64);
            assert!(r.is_eof());
        }
        let mut buffer = Vec::new();
        CursorMut::new(&mut buffer, 4, Endianness::Big)
            .write_u32(TEST_U32)
            .expect("u32 should succeed");
        assert_eq!(buffer, vec![0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_read_alignment_uses_message_origin() {
        // Slice starts at absolute offset 2: the u32 must be read at absolute offset 4.
        let data = [0xFFu8, 0xFF, 0x78, 0x56, 0x34, 0x12];
        let mut cursor = Cursor::with_base(&data, 2, Endianness::Little);
        assert_eq!(cursor.read_u32().expect("aligned read"), TEST_U32);
    }

    #[test]
    fn test_read_past_end_fails_without_panic() {
        let data = [1u8, 2, 3];
        let mut cursor = Cursor::new(&data, Endianness::Little);
        assert!(cursor.read_u32().is_err());
        assert!(cursor.read_bytes(usize::MAX).is_err());
        assert_eq!(cursor.read_u16().expect("2 bytes available"), 0x0201);
        assert!(cursor.read_u16().is_err());
    }

    #[test]
    fn test_patch_u16_respects_endianness() {
        let mut buffer = Vec::new();
        let mut cursor = CursorMut::new(&mut buffer, 16, Endianness::Big);
        cursor.write_u16(0).expect("placeholder");
        cursor.patch_u16(0, 0x0102).expect("patch");
        assert!(cursor.patch_u16(1, 0).is_err());
        assert_eq!(buffer, vec![0x01, 0x02]);
    }
}
