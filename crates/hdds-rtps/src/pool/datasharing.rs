// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datasharing payload pool.
//!
//! Payloads live in an arena of fixed-size slots addressed by index (never by
//! pointer), so the arena can be mapped at different addresses by several
//! local processes. Layout:
//!
//! ```text
//! +----------------------+  offset 0
//! | SegmentHeader (64 B) |  magic, slot count/size, ring begin/end, writer GUID
//! +----------------------+
//! | ring[slot_count] u32 |  slot indices in sequence order
//! +----------------------+  (8-aligned)
//! | slot 0: hdr + data   |  hdr = refcount u32, len u32, seq i64, reserved u64
//! | slot 1: hdr + data   |
//! | ...                  |
//! +----------------------+
//! ```
//!
//! Reference counts and the ring descriptor are atomics, touched without the
//! history lock. A slot is free when its count is zero; the last
//! [`SharedPayload`] dropped frees it.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{PayloadPool, PoolError, SerializedPayload};
use crate::core::{Guid, SequenceNumber};

const MAGIC: u32 = 0x4844_5348; // "HDSH"
const HEADER_SIZE: usize = 64;
const SLOT_HEADER_SIZE: usize = 24;

// Header field offsets.
const OFF_MAGIC: usize = 0;
const OFF_SLOT_COUNT: usize = 4;
const OFF_SLOT_SIZE: usize = 8;
const OFF_RING_BEGIN: usize = 16;
const OFF_RING_END: usize = 24;
const OFF_WRITER_GUID: usize = 32;

// Slot header field offsets.
const SLOT_REFCOUNT: usize = 0;
const SLOT_LEN: usize = 4;
const SLOT_SEQ: usize = 8;

const FREE_SEQ: i64 = -1;

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

enum Backing {
    Heap(Box<[AtomicU64]>),
    #[cfg(unix)]
    Shm(super::segment::ShmSegment),
}

impl Backing {
    fn base(&self) -> *mut u8 {
        match self {
            // AtomicU64 has interior mutability, so writing through this pointer is allowed.
            Backing::Heap(words) => words.as_ptr().cast::<u8>().cast_mut(),
            #[cfg(unix)]
            Backing::Shm(seg) => seg.as_ptr(),
        }
    }
}

/// Slot arena shared by a writer pool, its payloads and local readers.
pub struct DataSharingSegment {
    backing: Backing,
    size: usize,
    slot_count: u32,
    slot_size: u32,
    stride: usize,
    ring_offset: usize,
    slots_offset: usize,
}

// SAFETY: all shared mutable state in the arena is accessed through atomics,
// and payload bytes are only written while the writer holds the sole reference.
unsafe impl Send for DataSharingSegment {}
unsafe impl Sync for DataSharingSegment {}

impl DataSharingSegment {
    /// Total mapping size for a geometry.
    #[must_use]
    pub fn required_size(slot_count: u32, slot_size: u32) -> usize {
        let ring = align8(slot_count as usize * 4);
        let stride = align8(SLOT_HEADER_SIZE + slot_size as usize);
        HEADER_SIZE + ring + stride * slot_count as usize
    }

    fn with_backing(backing: Backing, size: usize, slot_count: u32, slot_size: u32) -> Self {
        let ring_offset = HEADER_SIZE;
        let slots_offset = ring_offset + align8(slot_count as usize * 4);
        Self {
            backing,
            size,
            slot_count,
            slot_size,
            stride: align8(SLOT_HEADER_SIZE + slot_size as usize),
            ring_offset,
            slots_offset,
        }
    }

    fn init(&self, writer_guid: Guid) {
        self.u32_at(OFF_SLOT_COUNT)
            .store(self.slot_count, Ordering::Relaxed);
        self.u32_at(OFF_SLOT_SIZE).store(self.slot_size, Ordering::Relaxed);
        self.u64_at(OFF_RING_BEGIN).store(0, Ordering::Relaxed);
        self.u64_at(OFF_RING_END).store(0, Ordering::Relaxed);
        let guid = writer_guid.to_bytes();
        for (i, chunk) in guid.chunks_exact(4).enumerate() {
            let mut w = [0u8; 4];
            w.copy_from_slice(chunk);
            self.u32_at(OFF_WRITER_GUID + i * 4)
                .store(u32::from_ne_bytes(w), Ordering::Relaxed);
        }
        for slot in 0..self.slot_count {
            self.slot_seq(slot).store(FREE_SEQ, Ordering::Relaxed);
        }
        self.u32_at(OFF_MAGIC).store(MAGIC, Ordering::Release);
    }

    fn u32_at(&self, offset: usize) -> &AtomicU32 {
        assert!(offset % 4 == 0 && offset + 4 <= self.size);
        // SAFETY: offset is 4-aligned and in bounds (asserted); the base is
        // 8-aligned (heap words or a page-aligned mapping).
        unsafe { &*self.backing.base().add(offset).cast::<AtomicU32>() }
    }

    fn u64_at(&self, offset: usize) -> &AtomicU64 {
        assert!(offset % 8 == 0 && offset + 8 <= self.size);
        // SAFETY: as in `u32_at`, with 8-byte alignment.
        unsafe { &*self.backing.base().add(offset).cast::<AtomicU64>() }
    }

    fn i64_at(&self, offset: usize) -> &AtomicI64 {
        assert!(offset % 8 == 0 && offset + 8 <= self.size);
        // SAFETY: as in `u64_at`.
        unsafe { &*self.backing.base().add(offset).cast::<AtomicI64>() }
    }

    fn slot_offset(&self, slot: u32) -> usize {
        self.slots_offset + slot as usize * self.stride
    }

    fn slot_refcount(&self, slot: u32) -> &AtomicU32 {
        self.u32_at(self.slot_offset(slot) + SLOT_REFCOUNT)
    }

    fn slot_len(&self, slot: u32) -> &AtomicU32 {
        self.u32_at(self.slot_offset(slot) + SLOT_LEN)
    }

    fn slot_seq(&self, slot: u32) -> &AtomicI64 {
        self.i64_at(self.slot_offset(slot) + SLOT_SEQ)
    }

    fn ring_entry(&self, index: u64) -> &AtomicU32 {
        let pos = (index % u64::from(self.slot_count)) as usize;
        self.u32_at(self.ring_offset + pos * 4)
    }

    fn slot_data_ptr(&self, slot: u32) -> *mut u8 {
        let offset = self.slot_offset(slot) + SLOT_HEADER_SIZE;
        assert!(offset + self.slot_size as usize <= self.size);
        // SAFETY: in bounds (asserted above).
        unsafe { self.backing.base().add(offset) }
    }

    /// Ring descriptor (begin, end), monotonically increasing indices.
    #[must_use]
    pub fn ring_descriptor(&self) -> (u64, u64) {
        (
            self.u64_at(OFF_RING_BEGIN).load(Ordering::Acquire),
            self.u64_at(OFF_RING_END).load(Ordering::Acquire),
        )
    }

    #[must_use]
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    #[must_use]
    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    /// Current reference count of a slot.
    #[must_use]
    pub fn refcount(&self, slot: u32) -> u32 {
        self.slot_refcount(slot).load(Ordering::Acquire)
    }

    #[must_use]
    pub fn writer_guid(&self) -> Guid {
        let mut bytes = [0u8; 16];
        for i in 0..4 {
            let w = self.u32_at(OFF_WRITER_GUID + i * 4).load(Ordering::Relaxed);
            bytes[i * 4..i * 4 + 4].copy_from_slice(&w.to_ne_bytes());
        }
        Guid::from_bytes(bytes)
    }

    /// Add a reference to a slot that is still alive.
    fn try_acquire(&self, slot: u32) -> bool {
        let rc = self.slot_refcount(slot);
        let mut current = rc.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match rc.compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Drop one reference; frees the slot at zero.
    fn release(&self, slot: u32) {
        if self.slot_refcount(slot).fetch_sub(1, Ordering::AcqRel) == 1 {
            self.slot_seq(slot).store(FREE_SEQ, Ordering::Release);
            self.slot_len(slot).store(0, Ordering::Release);
        }
    }

    /// Look up a committed payload by sequence number, adding a reference.
    pub fn find(self: &Arc<Self>, seq: SequenceNumber) -> Option<SharedPayload> {
        let (begin, end) = self.ring_descriptor();
        for index in begin..end {
            let slot = self.ring_entry(index).load(Ordering::Acquire);
            if slot >= self.slot_count || self.slot_seq(slot).load(Ordering::Acquire) != seq.0 {
                continue;
            }
            if !self.try_acquire(slot) {
                continue;
            }
            // Re-check: the slot may have been recycled between the two loads.
            if self.slot_seq(slot).load(Ordering::Acquire) == seq.0 {
                return Some(SharedPayload {
                    segment: Arc::clone(self),
                    slot,
                });
            }
            self.release(slot);
        }
        None
    }
}

/// Reference to one datasharing slot. Cloning adds a reference, dropping
/// removes one.
pub struct SharedPayload {
    segment: Arc<DataSharingSegment>,
    slot: u32,
}

impl SharedPayload {
    #[must_use]
    pub fn slot(&self) -> u32 {
        self.slot
    }

    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.segment.refcount(self.slot)
    }

    /// Sequence number recorded by `commit` (None before commit).
    #[must_use]
    pub fn sequence_number(&self) -> Option<SequenceNumber> {
        let seq = self.segment.slot_seq(self.slot).load(Ordering::Acquire);
        (seq != FREE_SEQ).then_some(SequenceNumber(seq))
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.segment.slot_size as usize
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        let len = (self.segment.slot_len(self.slot).load(Ordering::Acquire) as usize)
            .min(self.capacity());
        // SAFETY: the slot data area holds `slot_size` bytes; holding a
        // reference keeps the slot from being recycled, and the bytes are not
        // written once the slot is shared or committed.
        unsafe { std::slice::from_raw_parts(self.segment.slot_data_ptr(self.slot), len) }
    }

    /// Fill the slot; only allowed while this is the sole, uncommitted reference.
    pub fn write(&mut self, data: &[u8]) -> Result<(), PoolError> {
        if data.len() > self.capacity() {
            return Err(PoolError::TooLarge {
                requested: data.len(),
                max: self.capacity(),
            });
        }
        if self.refcount() != 1 || self.sequence_number().is_some() {
            return Err(PoolError::Segment("slot already shared".into()));
        }
        // SAFETY: the destination has `slot_size` >= data.len() bytes and no
        // other reference can observe the slot (refcount is 1, not committed).
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.segment.slot_data_ptr(self.slot),
                data.len(),
            );
        }
        self.segment
            .slot_len(self.slot)
            .store(data.len() as u32, Ordering::Release);
        Ok(())
    }
}

impl Clone for SharedPayload {
    fn clone(&self) -> Self {
        self.segment
            .slot_refcount(self.slot)
            .fetch_add(1, Ordering::AcqRel);
        Self {
            segment: Arc::clone(&self.segment),
            slot: self.slot,
        }
    }
}

impl Drop for SharedPayload {
    fn drop(&mut self) {
        self.segment.release(self.slot);
    }
}

/// Writer-side datasharing pool.
pub struct DataSharingPool {
    segment: Arc<DataSharingSegment>,
    /// Serializes slot search and ring appends (single writer).
    ring_lock: Mutex<u32>,
}

impl DataSharingPool {
    /// Process-local arena (same layout, heap memory).
    #[must_use]
    pub fn new_in_memory(writer_guid: Guid, slot_count: u32, slot_size: u32) -> Self {
        let slot_count = slot_count.max(1);
        let size = DataSharingSegment::required_size(slot_count, slot_size);
        let words: Box<[AtomicU64]> = (0..size.div_ceil(8)).map(|_| AtomicU64::new(0)).collect();
        let segment =
            DataSharingSegment::with_backing(Backing::Heap(words), size, slot_count, slot_size);
        segment.init(writer_guid);
        Self::from_segment(segment)
    }

    /// Named POSIX shared memory arena.
    #[cfg(unix)]
    pub fn create_shm(
        name: &str,
        writer_guid: Guid,
        slot_count: u32,
        slot_size: u32,
    ) -> Result<Self, PoolError> {
        let slot_count = slot_count.max(1);
        let size = DataSharingSegment::required_size(slot_count, slot_size);
        let shm = super::segment::ShmSegment::create(name, size)?;
        let segment = DataSharingSegment::with_backing(Backing::Shm(shm), size, slot_count, slot_size);
        segment.init(writer_guid);
        log::debug!(
            "[DataSharingPool::create_shm] {} slots={} slot_size={} bytes={}",
            name,
            slot_count,
            slot_size,
            size
        );
        Ok(Self::from_segment(segment))
    }

    fn from_segment(segment: DataSharingSegment) -> Self {
        Self {
            segment: Arc::new(segment),
            ring_lock: Mutex::new(0),
        }
    }

    #[must_use]
    pub fn segment(&self) -> &Arc<DataSharingSegment> {
        &self.segment
    }

    /// Record `seq` for a filled payload and append it to the history ring.
    pub fn commit(&self, payload: &SerializedPayload, seq: SequenceNumber) -> Result<(), PoolError> {
        let shared = payload
            .shared()
            .ok_or_else(|| PoolError::Segment("payload not from datasharing pool".into()))?;
        if !Arc::ptr_eq(&shared.segment, &self.segment) {
            return Err(PoolError::Segment("payload from another segment".into()));
        }
        let _guard = self.ring_lock.lock();
        let seg = &self.segment;
        self.compact_ring_locked();
        let (_, end) = seg.ring_descriptor();
        seg.slot_seq(shared.slot).store(seq.0, Ordering::Release);
        seg.ring_entry(end).store(shared.slot, Ordering::Release);
        seg.u64_at(OFF_RING_END).store(end + 1, Ordering::Release);
        Ok(())
    }

    /// Drop freed entries from the ring head and squeeze out freed entries in
    /// the middle when the ring is full.
    fn compact_ring_locked(&self) {
        let seg = &self.segment;
        let (mut begin, end) = seg.ring_descriptor();
        while begin < end {
            let slot = seg.ring_entry(begin).load(Ordering::Acquire);
            if seg.slot_seq(slot).load(Ordering::Acquire) != FREE_SEQ {
                break;
            }
            begin += 1;
        }
        seg.u64_at(OFF_RING_BEGIN).store(begin, Ordering::Release);

        if end - begin < u64::from(seg.slot_count) {
            return;
        }
        // A recycled slot can appear twice; only its latest entry is current.
        let mut live: Vec<u32> = Vec::with_capacity(seg.slot_count as usize);
        for i in (begin..end).rev() {
            let slot = seg.ring_entry(i).load(Ordering::Acquire);
            if seg.slot_seq(slot).load(Ordering::Acquire) != FREE_SEQ && !live.contains(&slot) {
                live.push(slot);
            }
        }
        live.reverse();
        for (i, slot) in live.iter().enumerate() {
            seg.ring_entry(begin + i as u64).store(*slot, Ordering::Release);
        }
        seg.u64_at(OFF_RING_END)
            .store(begin + live.len() as u64, Ordering::Release);
    }
}

impl PayloadPool for DataSharingPool {
    fn get_payload(&self, size: usize) -> Result<SerializedPayload, PoolError> {
        let seg = &self.segment;
        if size > seg.slot_size as usize {
            return Err(PoolError::TooLarge {
                requested: size,
                max: seg.slot_size as usize,
            });
        }
        let mut hint = self.ring_lock.lock();
        for i in 0..seg.slot_count {
            let slot = (*hint + i) % seg.slot_count;
            if seg
                .slot_refcount(slot)
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                seg.slot_len(slot).store(0, Ordering::Release);
                seg.slot_seq(slot).store(FREE_SEQ, Ordering::Release);
                *hint = (slot + 1) % seg.slot_count;
                return Ok(SerializedPayload::from_shared(SharedPayload {
                    segment: Arc::clone(seg),
                    slot,
                }));
            }
        }
        Err(PoolError::Exhausted {
            in_use: seg.slot_count as usize,
        })
    }

    fn in_use(&self) -> usize {
        (0..self.segment.slot_count)
            .filter(|s| self.segment.refcount(*s) > 0)
            .count()
    }
}

/// Read-only view of a writer's arena from a local reader.
pub struct DataSharingReader {
    segment: Arc<DataSharingSegment>,
}

impl DataSharingReader {
    /// Attach to an in-process writer pool.
    #[must_use]
    pub fn attach(pool: &DataSharingPool) -> Self {
        Self {
            segment: Arc::clone(&pool.segment),
        }
    }

    /// Map a writer's named segment.
    #[cfg(unix)]
    pub fn open_shm(name: &str, slot_count: u32, slot_size: u32) -> Result<Self, PoolError> {
        let size = DataSharingSegment::required_size(slot_count, slot_size);
        let shm = super::segment::ShmSegment::open(name, size)?;
        let segment = DataSharingSegment::with_backing(Backing::Shm(shm), size, slot_count, slot_size);
        if segment.u32_at(OFF_MAGIC).load(Ordering::Acquire) != MAGIC
            || segment.u32_at(OFF_SLOT_COUNT).load(Ordering::Acquire) != slot_count
            || segment.u32_at(OFF_SLOT_SIZE).load(Ordering::Acquire) != slot_size
        {
            return Err(PoolError::Segment(format!("{}: geometry mismatch", name)));
        }
        Ok(Self {
            segment: Arc::new(segment),
        })
    }

    /// Payload for `seq`, if the writer still holds it.
    #[must_use]
    pub fn read(&self, seq: SequenceNumber) -> Option<SerializedPayload> {
        self.segment.find(seq).map(SerializedPayload::from_shared)
    }

    #[must_use]
    pub fn writer_guid(&self) -> Guid {
        self.segment.writer_guid()
    }

    #[must_use]
    pub fn ring_descriptor(&self) -> (u64, u64) {
        self.segment.ring_descriptor()
    }
}
