// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type plugin boundary.
//!
//! The engine only moves serialized payloads. A [`TypeSupport`] turns user
//! samples into payloads (encapsulation header included) and extracts the
//! instance key. [`RawBytesType`] is the trivial plugin used when samples
//! already are bytes.

use crate::core::{CacheChange, ChangeKind, InstanceHandle};
use crate::pool::encapsulation;
use crate::writer::RtpsWriter;
use crate::{Error, Result};

/// Serialization plugin for one topic type.
pub trait TypeSupport: Send + Sync {
    type Sample;

    fn type_name(&self) -> &str;

    /// Keyed types produce one instance per distinct key.
    fn is_keyed(&self) -> bool;

    /// Upper bound of [`serialize`](Self::serialize) output, header included.
    fn max_serialized_size(&self) -> usize;

    /// Encapsulation header followed by the encoded sample.
    fn serialize(&self, sample: &Self::Sample) -> Result<Vec<u8>>;

    fn deserialize(&self, payload: &[u8]) -> Result<Self::Sample>;

    /// Instance of `sample`; `None` for unkeyed types.
    fn get_key(&self, sample: &Self::Sample) -> Option<InstanceHandle>;
}

/// Serialize `sample` into a change of `writer`, ready for `write`.
pub fn change_from_sample<T: TypeSupport + ?Sized>(
    type_support: &T,
    writer: &dyn RtpsWriter,
    kind: ChangeKind,
    sample: &T::Sample,
) -> Result<CacheChange> {
    let bytes = type_support.serialize(sample)?;
    if bytes.len() > type_support.max_serialized_size() {
        return Err(Error::ResourceLimitExceeded(format!(
            "{} sample of {} bytes exceeds max_serialized_size {}",
            type_support.type_name(),
            bytes.len(),
            type_support.max_serialized_size()
        )));
    }
    let handle = type_support.get_key(sample).unwrap_or(InstanceHandle::NIL);
    writer.new_change(kind, &bytes, handle)
}

/// Decode the sample carried by `change`; `None` for dispose/unregister
/// notifications without data.
pub fn sample_from_change<T: TypeSupport + ?Sized>(
    type_support: &T,
    change: &CacheChange,
) -> Result<Option<T::Sample>> {
    if !change.kind.is_alive() && change.serialized_payload.len() <= encapsulation::HEADER_LEN {
        return Ok(None);
    }
    type_support
        .deserialize(change.serialized_payload.as_slice())
        .map(Some)
}

/// Samples are opaque byte strings; the first `key_len` bytes form the key.
#[derive(Debug, Clone)]
pub struct RawBytesType {
    name: String,
    key_len: usize,
    max_size: usize,
}

impl RawBytesType {
    /// Unkeyed byte strings up to `max_size` bytes.
    #[must_use]
    pub fn new(name: &str, max_size: usize) -> Self {
        Self {
            name: name.to_string(),
            key_len: 0,
            max_size,
        }
    }

    #[must_use]
    pub fn with_key_len(mut self, key_len: usize) -> Self {
        self.key_len = key_len;
        self
    }
}

impl TypeSupport for RawBytesType {
    type Sample = Vec<u8>;

    fn type_name(&self) -> &str {
        &self.name
    }

    fn is_keyed(&self) -> bool {
        self.key_len > 0
    }

    fn max_serialized_size(&self) -> usize {
        self.max_size + encapsulation::HEADER_LEN
    }

    fn serialize(&self, sample: &Vec<u8>) -> Result<Vec<u8>> {
        if sample.len() < self.key_len {
            return Err(Error::InvalidState(format!(
                "sample of {} bytes shorter than its {}-byte key",
                sample.len(),
                self.key_len
            )));
        }
        let mut out = Vec::with_capacity(encapsulation::HEADER_LEN + sample.len());
        out.extend_from_slice(&encapsulation::CDR_LE);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(sample);
        Ok(out)
    }

    fn deserialize(&self, payload: &[u8]) -> Result<Vec<u8>> {
        payload
            .get(encapsulation::HEADER_LEN..)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::MalformedMessage("payload shorter than encapsulation header".into()))
    }

    fn get_key(&self, sample: &Vec<u8>) -> Option<InstanceHandle> {
        (self.key_len > 0 && sample.len() >= self.key_len)
            .then(|| InstanceHandle::from_key(&sample[..self.key_len]))
    }
}
