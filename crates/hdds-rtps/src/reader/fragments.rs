// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DATA_FRAG reassembly.
//!
//! One partial sample per (writer, sequence number). The buffer is sized
//! from the announced sample size when the first fragment arrives;
//! fragments that disagree with that layout are dropped.

use std::collections::BTreeMap;

use crate::config::MAX_REASSEMBLED_SAMPLE_SIZE;
use crate::core::{CacheChange, FragmentInfo, Guid, SampleIdentity, SequenceNumber};
use crate::messages::{DataFragSubmessage, FragmentNumberSet};
use crate::pool::SerializedPayload;

struct Partial {
    /// Metadata of the sample (payload empty until complete).
    change: CacheChange,
    info: FragmentInfo,
    sample_size: usize,
    data: Vec<u8>,
    started: u64,
}

pub(crate) struct FragmentAssembler {
    partials: BTreeMap<SampleIdentity, Partial>,
    max_partials: usize,
    arrivals: u64,
}

impl FragmentAssembler {
    pub fn new(max_partials: usize) -> Self {
        Self {
            partials: BTreeMap::new(),
            max_partials: max_partials.max(1),
            arrivals: 0,
        }
    }

    /// Add the fragments carried by `frag`. `change` holds the sample
    /// metadata and is only used for the first fragment of a sample.
    /// Returns the sample once every fragment arrived.
    pub fn add_fragment(&mut self, change: CacheChange, frag: &DataFragSubmessage<'_>) -> Option<CacheChange> {
        let id = change.identity();
        let sample_size = frag.sample_size as usize;
        if frag.fragment_size == 0 || frag.fragment_starting_num == 0 || sample_size > MAX_REASSEMBLED_SAMPLE_SIZE {
            log::debug!(
                "[FragmentAssembler::add_fragment] {} seq={} rejected (size={} frag={})",
                id.writer_guid,
                id.sequence_number,
                sample_size,
                frag.fragment_size
            );
            return None;
        }

        if !self.partials.contains_key(&id) {
            if self.partials.len() >= self.max_partials {
                self.evict_oldest();
            }
            self.arrivals += 1;
            self.partials.insert(
                id,
                Partial {
                    change,
                    info: FragmentInfo::new(frag.sample_size, frag.fragment_size),
                    sample_size,
                    data: vec![0; sample_size],
                    started: self.arrivals,
                },
            );
        }
        let partial = self.partials.get_mut(&id)?;
        if partial.sample_size != sample_size || partial.info.fragment_size != frag.fragment_size {
            log::warn!(
                "[FragmentAssembler::add_fragment] {} seq={} layout changed mid-sample",
                id.writer_guid,
                id.sequence_number
            );
            return None;
        }

        let fragment_size = usize::from(frag.fragment_size);
        let data = frag.fragment_data();
        let start = (frag.fragment_starting_num as usize - 1).saturating_mul(fragment_size);
        if start >= sample_size {
            return None;
        }
        let end = (start + data.len()).min(sample_size);
        partial.data[start..end].copy_from_slice(&data[..end - start]);
        for i in 0..u32::from(frag.fragments_in_submessage) {
            let number = frag.fragment_starting_num + i;
            let frag_start = (number as usize - 1) * fragment_size;
            let frag_end = (frag_start + fragment_size).min(sample_size);
            if frag_start >= sample_size || frag_end > end {
                break;
            }
            partial.info.mark_received(number);
        }

        if !partial.info.is_complete() {
            return None;
        }
        let done = self.partials.remove(&id)?;
        let mut change = done.change;
        change.serialized_payload = SerializedPayload::from_vec(done.data);
        change.fragments = None;
        Some(change)
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .partials
            .iter()
            .min_by_key(|(_, p)| p.started)
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            log::debug!(
                "[FragmentAssembler::evict_oldest] dropping partial {} seq={}",
                id.writer_guid,
                id.sequence_number
            );
            self.partials.remove(&id);
        }
    }

    /// Fragments of `seq` not yet received, up to `last_fragment`, within
    /// the NACK_FRAG window that starts at the first of them. The first
    /// window of fragments when nothing arrived yet.
    pub fn missing(&self, writer: Guid, seq: SequenceNumber, last_fragment: u32) -> Vec<u32> {
        let window = FragmentNumberSet::MAX_BITS;
        match self.partials.get(&SampleIdentity::new(writer, seq)) {
            Some(p) => {
                let mut missing = p.info.missing().take_while(|n| *n <= last_fragment).peekable();
                let Some(&first) = missing.peek() else {
                    return Vec::new();
                };
                missing.take_while(|n| n - first < window).collect()
            }
            None => (1..=last_fragment.min(window)).collect(),
        }
    }

    #[cfg(test)]
    pub fn has_partial(&self, writer: Guid, seq: SequenceNumber) -> bool {
        self.partials.contains_key(&SampleIdentity::new(writer, seq))
    }

    /// Sequence numbers of `writer` being reassembled.
    pub fn partial_sequences(&self, writer: Guid) -> Vec<SequenceNumber> {
        self.partials
            .keys()
            .filter(|id| id.writer_guid == writer)
            .map(|id| id.sequence_number)
            .collect()
    }

    /// Drop partial samples of `writer` that `stale` selects.
    pub fn discard_where(&mut self, writer: Guid, stale: impl Fn(SequenceNumber) -> bool) {
        self.partials
            .retain(|id, _| id.writer_guid != writer || !stale(id.sequence_number));
    }

    pub fn discard_writer(&mut self, writer: Guid) {
        self.discard_where(writer, |_| true);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.partials.len()
    }
}
