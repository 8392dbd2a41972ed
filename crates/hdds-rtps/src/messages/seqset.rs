// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SequenceNumberSet and FragmentNumberSet.
//!
//! Both are a base plus a bitmap of at most 256 bits, most significant bit
//! first: bit `i` stands for `base + i`. On the wire: base, `numBits` (u32),
//! then `ceil(numBits / 32)` u32 words.

use crate::core::ser::{Cursor, CursorMut, SerError, SerResult};
use crate::core::SequenceNumber;

pub const MAX_BITMAP_BITS: u32 = 256;
pub const WORD_BITS: u32 = 32;
pub const BITMAP_WORDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Bitmap {
    num_bits: u32,
    words: [u32; BITMAP_WORDS],
}

impl Bitmap {
    fn set(&mut self, offset: u32) -> bool {
        if offset >= MAX_BITMAP_BITS {
            return false;
        }
        self.words[(offset / WORD_BITS) as usize] |= 1 << (31 - offset % WORD_BITS);
        self.num_bits = self.num_bits.max(offset + 1);
        true
    }

    fn get(&self, offset: u32) -> bool {
        offset < self.num_bits
            && self.words[(offset / WORD_BITS) as usize] & (1 << (31 - offset % WORD_BITS)) != 0
    }

    fn word_count(&self) -> usize {
        self.num_bits.div_ceil(WORD_BITS) as usize
    }

    fn offsets(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.num_bits).filter(move |o| self.get(*o))
    }

    fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    fn encode(&self, w: &mut CursorMut<'_>) -> SerResult<()> {
        w.write_u32(self.num_bits)?;
        for word in &self.words[..self.word_count()] {
            w.write_u32(*word)?;
        }
        Ok(())
    }

    fn decode(r: &mut Cursor<'_>) -> SerResult<Self> {
        let num_bits = r.read_u32()?;
        if num_bits > MAX_BITMAP_BITS {
            return Err(SerError::InvalidData {
                reason: format!("bitmap numBits {} > {}", num_bits, MAX_BITMAP_BITS),
            });
        }
        let mut bitmap = Bitmap {
            num_bits,
            words: [0; BITMAP_WORDS],
        };
        for idx in 0..bitmap.word_count() {
            bitmap.words[idx] = r.read_u32()?;
        }
        // Bits past numBits are not members.
        let tail = num_bits % WORD_BITS;
        if tail != 0 {
            let last = bitmap.word_count() - 1;
            bitmap.words[last] &= !(u32::MAX >> tail);
        }
        Ok(bitmap)
    }
}

/// Set of sequence numbers in `[base, base + 256)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumberSet {
    base: SequenceNumber,
    bitmap: Bitmap,
}

impl SequenceNumberSet {
    pub const MAX_BITS: u32 = MAX_BITMAP_BITS;

    /// Empty set with the given base.
    #[must_use]
    pub fn empty(base: SequenceNumber) -> Self {
        Self {
            base,
            bitmap: Bitmap::default(),
        }
    }

    /// Build from explicit members; `None` if one lies outside the window.
    pub fn from_sequences(
        base: SequenceNumber,
        sequences: impl IntoIterator<Item = SequenceNumber>,
    ) -> Option<Self> {
        let mut set = Self::empty(base);
        for seq in sequences {
            if !set.insert(seq) {
                return None;
            }
        }
        Some(set)
    }

    /// Build from members, silently dropping those beyond the window.
    pub fn from_sequences_capped(
        base: SequenceNumber,
        sequences: impl IntoIterator<Item = SequenceNumber>,
    ) -> Self {
        let mut set = Self::empty(base);
        for seq in sequences {
            set.insert(seq);
        }
        set
    }

    /// Add a member; false if outside `[base, base + 256)`.
    pub fn insert(&mut self, seq: SequenceNumber) -> bool {
        let offset = seq - self.base;
        if !(0..i64::from(MAX_BITMAP_BITS)).contains(&offset) {
            return false;
        }
        self.bitmap.set(offset as u32)
    }

    #[must_use]
    pub fn contains(&self, seq: SequenceNumber) -> bool {
        let offset = seq - self.base;
        (0..i64::from(MAX_BITMAP_BITS)).contains(&offset) && self.bitmap.get(offset as u32)
    }

    #[must_use]
    pub fn base(&self) -> SequenceNumber {
        self.base
    }

    #[must_use]
    pub fn num_bits(&self) -> u32 {
        self.bitmap.num_bits
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    /// Members, ascending.
    pub fn iter(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        self.bitmap.offsets().map(move |o| self.base + i64::from(o))
    }

    pub fn encode(&self, w: &mut CursorMut<'_>) -> SerResult<()> {
        w.write_i32(self.base.high())?;
        w.write_u32(self.base.low())?;
        self.bitmap.encode(w)
    }

    pub fn decode(r: &mut Cursor<'_>) -> SerResult<Self> {
        let high = r.read_i32()?;
        let low = r.read_u32()?;
        let base = SequenceNumber::from_parts(high, low);
        if base.0 < 0 {
            return Err(SerError::InvalidData {
                reason: format!("negative set base {}", base),
            });
        }
        Ok(Self {
            base,
            bitmap: Bitmap::decode(r)?,
        })
    }
}

/// Set of fragment numbers in `[base, base + 256)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentNumberSet {
    base: u32,
    bitmap: Bitmap,
}

impl FragmentNumberSet {
    pub const MAX_BITS: u32 = MAX_BITMAP_BITS;

    #[must_use]
    pub fn empty(base: u32) -> Self {
        Self {
            base,
            bitmap: Bitmap::default(),
        }
    }

    /// Members beyond the window are dropped.
    pub fn from_fragments(base: u32, fragments: impl IntoIterator<Item = u32>) -> Self {
        let mut set = Self::empty(base);
        for frag in fragments {
            set.insert(frag);
        }
        set
    }

    pub fn insert(&mut self, fragment: u32) -> bool {
        match fragment.checked_sub(self.base) {
            Some(offset) => self.bitmap.set(offset),
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, fragment: u32) -> bool {
        fragment
            .checked_sub(self.base)
            .is_some_and(|o| self.bitmap.get(o))
    }

    #[must_use]
    pub fn base(&self) -> u32 {
        self.base
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bitmap.offsets().map(move |o| self.base + o)
    }

    pub fn encode(&self, w: &mut CursorMut<'_>) -> SerResult<()> {
        w.write_u32(self.base)?;
        self.bitmap.encode(w)
    }

    pub fn decode(r: &mut Cursor<'_>) -> SerResult<Self> {
        let base = r.read_u32()?;
        if base == 0 {
            return Err(SerError::InvalidData {
                reason: "fragment set base 0".into(),
            });
        }
        Ok(Self {
            base,
            bitmap: Bitmap::decode(r)?,
        })
    }
}
