// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload pools.
//!
//! A pool hands out [`SerializedPayload`] buffers and takes them back when the
//! owning change leaves its history. Heap pools implement the four memory
//! policies; the datasharing pool (see [`datasharing`]) places payloads in a
//! reference-counted slot arena that other local endpoints can map.
//!
//! Release is RAII: dropping a pooled payload returns its buffer to the pool
//! that produced it, so a change that is evicted, acknowledged or taken never
//! leaks pool capacity. `release_payload` is the explicit spelling of the same
//! thing.

pub mod datasharing;
#[cfg(unix)]
pub mod segment;

pub use datasharing::{DataSharingPool, DataSharingReader, DataSharingSegment, SharedPayload};

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Encapsulation identifiers (first two bytes of every serialized payload).
pub mod encapsulation {
    pub const CDR_BE: [u8; 2] = [0x00, 0x00];
    pub const CDR_LE: [u8; 2] = [0x00, 0x01];
    pub const PL_CDR_BE: [u8; 2] = [0x00, 0x02];
    pub const PL_CDR_LE: [u8; 2] = [0x00, 0x03];
    /// Encapsulation header size (identifier + options).
    pub const HEADER_LEN: usize = 4;
}

/// Pool error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Request larger than the fixed buffer size of a preallocated pool.
    TooLarge { requested: usize, max: usize },
    /// Every buffer is in use and the allocation bound is reached.
    Exhausted { in_use: usize },
    /// Shared memory segment failure.
    Segment(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::TooLarge { requested, max } => {
                write!(f, "payload of {} bytes exceeds fixed size {}", requested, max)
            }
            PoolError::Exhausted { in_use } => {
                write!(f, "pool exhausted ({} buffers in use)", in_use)
            }
            PoolError::Segment(msg) => write!(f, "segment: {}", msg),
        }
    }
}

impl std::error::Error for PoolError {}

impl From<PoolError> for crate::Error {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Segment(msg) => crate::Error::SharedMemory(msg),
            other => crate::Error::OutOfResources(other.to_string()),
        }
    }
}

/// Memory management policy of a heap pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config-loaders", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-loaders", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum MemoryPolicy {
    /// Fixed-size buffers allocated up front; larger requests fail.
    Preallocated,
    /// Fixed initial buffers that may grow when a larger payload arrives.
    PreallocatedWithRealloc,
    /// Allocate on demand, free on release.
    DynamicReserve,
    /// Allocate on demand, keep released buffers for reuse.
    #[default]
    DynamicReusable,
}

/// Sizing of a heap pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub policy: MemoryPolicy,
    /// Fixed (or initial) buffer size for preallocated policies.
    pub payload_size: usize,
    /// Buffers allocated at construction (preallocated policies).
    pub initial_count: usize,
    /// Upper bound on live buffers (0 = unlimited).
    pub max_allocations: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            policy: MemoryPolicy::DynamicReusable,
            payload_size: 0,
            initial_count: 0,
            max_allocations: 0,
        }
    }
}

/// Contract shared by all payload pools.
pub trait PayloadPool: Send + Sync {
    /// Reserve a buffer able to hold `size` bytes.
    fn get_payload(&self, size: usize) -> Result<SerializedPayload, PoolError>;

    /// Give a payload back (equivalent to dropping it).
    fn release_payload(&self, payload: SerializedPayload) {
        drop(payload);
    }

    /// Buffers currently handed out.
    fn in_use(&self) -> usize;
}

// ============================================================================
// SerializedPayload
// ============================================================================

/// Serialized sample bytes, including the 4-byte encapsulation header.
pub struct SerializedPayload {
    storage: Storage,
}

enum Storage {
    Heap(PooledBuffer),
    Shared(SharedPayload),
}

struct PooledBuffer {
    data: Vec<u8>,
    /// Largest length the payload may take (`get_payload` size).
    max_len: usize,
    home: Option<Arc<HeapPoolShared>>,
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(home) = self.home.take() {
            home.recycle(std::mem::take(&mut self.data));
        }
    }
}

impl SerializedPayload {
    /// Unpooled payload owning `data`.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        let max_len = data.len();
        Self {
            storage: Storage::Heap(PooledBuffer {
                data,
                max_len,
                home: None,
            }),
        }
    }

    /// Empty unpooled payload (key-only / dispose changes).
    #[must_use]
    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    pub(crate) fn from_shared(shared: SharedPayload) -> Self {
        Self {
            storage: Storage::Shared(shared),
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match &self.storage {
            Storage::Heap(buf) => &buf.data,
            Storage::Shared(shared) => shared.as_slice(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity reserved by `get_payload`.
    #[must_use]
    pub fn max_len(&self) -> usize {
        match &self.storage {
            Storage::Heap(buf) => buf.max_len,
            Storage::Shared(shared) => shared.capacity(),
        }
    }

    /// Fill the payload, replacing previous contents.
    pub fn copy_from(&mut self, data: &[u8]) -> Result<(), PoolError> {
        match &mut self.storage {
            Storage::Heap(buf) => {
                if data.len() > buf.max_len && buf.home.is_some() {
                    return Err(PoolError::TooLarge {
                        requested: data.len(),
                        max: buf.max_len,
                    });
                }
                buf.data.clear();
                buf.data.extend_from_slice(data);
                buf.max_len = buf.max_len.max(data.len());
                Ok(())
            }
            Storage::Shared(shared) => shared.write(data),
        }
    }

    /// Encapsulation identifier, if the payload carries a header.
    #[must_use]
    pub fn encapsulation(&self) -> Option<[u8; 2]> {
        let s = self.as_slice();
        (s.len() >= 2).then(|| [s[0], s[1]])
    }

    /// Datasharing slot backing this payload, if any.
    #[must_use]
    pub fn shared(&self) -> Option<&SharedPayload> {
        match &self.storage {
            Storage::Shared(shared) => Some(shared),
            Storage::Heap(_) => None,
        }
    }

    #[must_use]
    pub fn is_pooled(&self) -> bool {
        match &self.storage {
            Storage::Heap(buf) => buf.home.is_some(),
            Storage::Shared(_) => true,
        }
    }
}

impl Clone for SerializedPayload {
    /// Heap payloads are copied out of the pool; shared payloads gain a reference.
    fn clone(&self) -> Self {
        match &self.storage {
            Storage::Heap(buf) => Self::from_vec(buf.data.clone()),
            Storage::Shared(shared) => Self::from_shared(shared.clone()),
        }
    }
}

impl PartialEq for SerializedPayload {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for SerializedPayload {}

impl fmt::Debug for SerializedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedPayload")
            .field("len", &self.len())
            .field("shared", &self.shared().is_some())
            .finish()
    }
}

impl Default for SerializedPayload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<u8>> for SerializedPayload {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

// ============================================================================
// Heap pool
// ============================================================================

struct HeapPoolShared {
    config: PoolConfig,
    free: Mutex<Vec<Vec<u8>>>,
    in_use: AtomicUsize,
    allocated: AtomicUsize,
}

impl HeapPoolShared {
    fn recycle(&self, mut buf: Vec<u8>) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        match self.config.policy {
            MemoryPolicy::DynamicReserve => {
                self.allocated.fetch_sub(1, Ordering::AcqRel);
            }
            _ => {
                buf.clear();
                self.free.lock().push(buf);
            }
        }
    }
}

/// Heap-backed pool implementing [`MemoryPolicy`].
#[derive(Clone)]
pub struct HeapPayloadPool {
    shared: Arc<HeapPoolShared>,
}

impl HeapPayloadPool {
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let preallocate = matches!(
            config.policy,
            MemoryPolicy::Preallocated | MemoryPolicy::PreallocatedWithRealloc
        );
        let mut free = Vec::new();
        if preallocate {
            let count = if config.max_allocations > 0 {
                config.initial_count.min(config.max_allocations)
            } else {
                config.initial_count
            };
            free.extend((0..count).map(|_| Vec::with_capacity(config.payload_size)));
        }
        let allocated = free.len();
        log::debug!(
            "[HeapPayloadPool::new] policy={:?} payload_size={} prealloc={} max={}",
            config.policy,
            config.payload_size,
            allocated,
            config.max_allocations
        );
        Self {
            shared: Arc::new(HeapPoolShared {
                config,
                free: Mutex::new(free),
                in_use: AtomicUsize::new(0),
                allocated: AtomicUsize::new(allocated),
            }),
        }
    }

    /// Fixed-size preallocated pool.
    #[must_use]
    pub fn preallocated(payload_size: usize, count: usize) -> Self {
        Self::new(PoolConfig {
            policy: MemoryPolicy::Preallocated,
            payload_size,
            initial_count: count,
            max_allocations: count,
        })
    }

    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.shared.config
    }

    /// Buffers allocated so far (free or in use).
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.shared.allocated.load(Ordering::Acquire)
    }

    /// Buffers waiting on the free list.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.shared.free.lock().len()
    }

    fn take_free(&self, size: usize) -> Option<Vec<u8>> {
        let mut free = self.shared.free.lock();
        match self.shared.config.policy {
            MemoryPolicy::DynamicReusable => {
                let idx = free
                    .iter()
                    .position(|b| b.capacity() >= size)
                    .or_else(|| (!free.is_empty()).then_some(0))?;
                Some(free.swap_remove(idx))
            }
            MemoryPolicy::DynamicReserve => None,
            _ => free.pop(),
        }
    }

    fn try_allocate(&self, capacity: usize) -> Result<Vec<u8>, PoolError> {
        let max = self.shared.config.max_allocations;
        let reserved = self
            .shared
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            });
        match reserved {
            Ok(_) => Ok(Vec::with_capacity(capacity)),
            Err(_) => Err(PoolError::Exhausted {
                in_use: self.in_use(),
            }),
        }
    }
}

impl PayloadPool for HeapPayloadPool {
    fn get_payload(&self, size: usize) -> Result<SerializedPayload, PoolError> {
        let config = self.shared.config;
        if config.policy == MemoryPolicy::Preallocated && size > config.payload_size {
            return Err(PoolError::TooLarge {
                requested: size,
                max: config.payload_size,
            });
        }

        let mut data = match self.take_free(size) {
            Some(buf) => buf,
            None => {
                let capacity = match config.policy {
                    MemoryPolicy::Preallocated | MemoryPolicy::PreallocatedWithRealloc => {
                        config.payload_size.max(size)
                    }
                    _ => size,
                };
                self.try_allocate(capacity)?
            }
        };
        if data.capacity() < size {
            data.reserve(size - data.len());
        }

        self.shared.in_use.fetch_add(1, Ordering::AcqRel);
        Ok(SerializedPayload {
            storage: Storage::Heap(PooledBuffer {
                data,
                max_len: size,
                home: Some(Arc::clone(&self.shared)),
            }),
        })
    }

    fn in_use(&self) -> usize {
        self.shared.in_use.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preallocated_rejects_oversized_request() {
        let pool = HeapPayloadPool::preallocated(64, 2);
        let err = pool.get_payload(65).expect_err("oversized request should fail");
        assert_eq!(err, PoolError::TooLarge { requested: 65, max: 64 });
    }

    #[test]
    fn test_preallocated_exhaustion_and_release() {
        let pool = HeapPayloadPool::preallocated(32, 2);
        let a = pool.get_payload(16).expect("first buffer");
        let b = pool.get_payload(32).expect("second buffer");
        assert_eq!(pool.in_use(), 2);
        assert!(matches!(
            pool.get_payload(8),
            Err(PoolError::Exhausted { in_use: 2 })
        ));

        pool.release_payload(a);
        assert_eq!(pool.in_use(), 1);
        let c = pool.get_payload(8).expect("buffer recycled after release");
        drop(b);
        drop(c);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.allocated(), 2);
    }

    #[test]
    fn test_dynamic_reserve_frees_on_release() {
        let pool = HeapPayloadPool::new(PoolConfig {
            policy: MemoryPolicy::DynamicReserve,
            ..PoolConfig::default()
        });
        let p = pool.get_payload(1000).expect("allocation");
        assert_eq!(pool.allocated(), 1);
        drop(p);
        assert_eq!(pool.allocated(), 0);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn test_dynamic_reusable_keeps_free_list() {
        let pool = HeapPayloadPool::new(PoolConfig::default());
        let mut p = pool.get_payload(128).expect("allocation");
        p.copy_from(&[1u8; 100]).expect("fits reservation");
        drop(p);
        assert_eq!(pool.free_count(), 1);
        let q = pool.get_payload(64).expect("reuse");
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.allocated(), 1);
        assert!(q.is_empty(), "recycled buffer must be cleared");
    }

    #[test]
    fn test_max_allocations_bounds_dynamic_pool() {
        let pool = HeapPayloadPool::new(PoolConfig {
            policy: MemoryPolicy::DynamicReusable,
            max_allocations: 1,
            ..PoolConfig::default()
        });
        let _held = pool.get_payload(10).expect("first");
        assert!(pool.get_payload(10).is_err());
    }

    #[test]
    fn test_pooled_payload_rejects_overflowing_copy() {
        let pool = HeapPayloadPool::new(PoolConfig::default());
        let mut p = pool.get_payload(4).expect("allocation");
        assert!(p.copy_from(&[0u8; 5]).is_err());
        p.copy_from(&[0, 1, 0, 0]).expect("fits");
        assert_eq!(p.encapsulation(), Some(encapsulation::CDR_LE));
    }

    #[test]
    fn test_clone_of_pooled_payload_is_unpooled() {
        let pool = HeapPayloadPool::new(PoolConfig::default());
        let mut p = pool.get_payload(3).expect("allocation");
        p.copy_from(&[7, 8, 9]).expect("fits");
        let copy = p.clone();
        assert!(!copy.is_pooled());
        assert_eq!(copy, p);
        drop(p);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(copy.as_slice(), &[7, 8, 9]);
    }
}
