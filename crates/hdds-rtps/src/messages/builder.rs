// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram assembly.
//!
//! [`MessageBuilder`] packs submessages bound for the same destination set
//! into as few datagrams as `max_message_size` allows. INFO_DST and INFO_TS
//! are inserted on demand: when the requested destination / timestamp
//! differs from what the current datagram already established, and again at
//! the start of every new datagram (receiver state resets per message).

use super::header::RtpsHeader;
use super::submessage::Submessage;
use crate::core::ser::{CursorMut, Endianness, SerResult};
use crate::core::{GuidPrefix, Time};
use crate::{Error, Result};

/// Builds one or more RTPS messages from a stream of submessages.
pub struct MessageBuilder {
    guid_prefix: GuidPrefix,
    max_message_size: usize,
    endianness: Endianness,
    finished: Vec<Vec<u8>>,
    current: Vec<u8>,
    submessages_in_current: usize,
    /// Destination requested for the next submessages.
    destination: GuidPrefix,
    /// Destination established in the current datagram.
    current_destination: GuidPrefix,
    timestamp: Option<Time>,
    current_timestamp: Option<Time>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new(guid_prefix: GuidPrefix, max_message_size: usize) -> Self {
        Self {
            guid_prefix,
            max_message_size,
            endianness: Endianness::native(),
            finished: Vec::new(),
            current: Vec::new(),
            submessages_in_current: 0,
            destination: GuidPrefix::UNKNOWN,
            current_destination: GuidPrefix::UNKNOWN,
            timestamp: None,
            current_timestamp: None,
        }
    }

    #[must_use]
    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Address the following submessages to one participant
    /// (`GuidPrefix::UNKNOWN` addresses everyone).
    pub fn set_destination(&mut self, prefix: GuidPrefix) {
        self.destination = prefix;
    }

    /// Source timestamp for the following DATA / DATA_FRAG submessages.
    pub fn set_timestamp(&mut self, timestamp: Option<Time>) {
        self.timestamp = timestamp;
    }

    /// Append a submessage, starting a new datagram when the current one is
    /// full. Fails if the submessage cannot fit even in an empty datagram.
    pub fn add(&mut self, submessage: &Submessage<'_>) -> Result<()> {
        let mark = self.current.len();
        match self.try_append(submessage) {
            Ok(()) => {
                self.submessages_in_current += 1;
                return Ok(());
            }
            Err(_) => self.current.truncate(mark),
        }

        if self.submessages_in_current == 0 {
            return Err(self.oversize(submessage));
        }
        self.flush();
        match self.try_append(submessage) {
            Ok(()) => {
                self.submessages_in_current += 1;
                Ok(())
            }
            Err(_) => {
                self.current.clear();
                Err(self.oversize(submessage))
            }
        }
    }

    fn oversize(&self, submessage: &Submessage<'_>) -> Error {
        Error::OutOfResources(format!(
            "submessage 0x{:02x} does not fit in a {}-byte message",
            submessage.kind(),
            self.max_message_size
        ))
    }

    fn try_append(&mut self, submessage: &Submessage<'_>) -> SerResult<()> {
        let fresh = self.current.is_empty();
        let mut destination = if fresh {
            GuidPrefix::UNKNOWN
        } else {
            self.current_destination
        };
        let mut timestamp = if fresh { None } else { self.current_timestamp };

        let mut w = CursorMut::new(&mut self.current, self.max_message_size, self.endianness);
        if fresh {
            RtpsHeader::new(self.guid_prefix).encode(&mut w)?;
        }
        if self.destination != destination {
            Submessage::InfoDestination(self.destination).encode(&mut w)?;
            destination = self.destination;
        }
        let carries_data = matches!(submessage, Submessage::Data(_) | Submessage::DataFrag(_));
        if carries_data && self.timestamp != timestamp {
            Submessage::InfoTimestamp(self.timestamp).encode(&mut w)?;
            timestamp = self.timestamp;
        }
        submessage.encode(&mut w)?;

        self.current_destination = destination;
        self.current_timestamp = timestamp;
        Ok(())
    }

    fn flush(&mut self) {
        if self.submessages_in_current > 0 {
            self.finished.push(std::mem::take(&mut self.current));
        }
        self.current.clear();
        self.submessages_in_current = 0;
    }

    /// True when nothing has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.finished.is_empty() && self.submessages_in_current == 0
    }

    /// Completed datagrams, in order.
    #[must_use]
    pub fn finish(mut self) -> Vec<Vec<u8>> {
        self.flush();
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, SequenceNumber};
    use crate::messages::submessage::{DataSubmessage, HeartbeatSubmessage};
    use crate::messages::{kind, parse_message};

    fn data(payload: &[u8], sn: i64) -> Submessage<'_> {
        Submessage::Data(DataSubmessage {
            reader_id: EntityId::UNKNOWN,
            writer_id: EntityId::new(1, 0x02),
            writer_sn: SequenceNumber(sn),
            inline_qos: None,
            key_only: false,
            serialized_payload: Some(payload),
        })
    }

    fn kinds(datagram: &[u8]) -> Vec<u8> {
        let (_, iter) = parse_message(datagram).expect("valid message");
        iter.map(|raw| raw.expect("complete submessage").kind).collect()
    }

    #[test]
    fn test_groups_into_one_datagram() {
        let payload = [0, 1, 0, 0, 9, 9, 9, 9];
        let mut builder = MessageBuilder::new(GuidPrefix([1; 12]), 1400);
        builder.set_timestamp(Some(Time::new(10, 0)));
        builder.add(&data(&payload, 1)).expect("fits");
        builder.add(&data(&payload, 2)).expect("fits");
        builder
            .add(&Submessage::Heartbeat(HeartbeatSubmessage {
                reader_id: EntityId::UNKNOWN,
                writer_id: EntityId::new(1, 0x02),
                first_sn: SequenceNumber(1),
                last_sn: SequenceNumber(2),
                count: 1,
                final_flag: false,
                liveliness_flag: false,
            }))
            .expect("fits");
        let datagrams = builder.finish();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(
            kinds(&datagrams[0]),
            vec![kind::INFO_TS, kind::DATA, kind::DATA, kind::HEARTBEAT]
        );
    }

    #[test]
    fn test_splits_and_repeats_context() {
        let payload = [0u8; 400];
        let mut builder = MessageBuilder::new(GuidPrefix([1; 12]), 1000);
        builder.set_destination(GuidPrefix([2; 12]));
        for sn in 1..=4 {
            builder.add(&data(&payload, sn)).expect("fits");
        }
        let datagrams = builder.finish();
        assert_eq!(datagrams.len(), 2);
        for datagram in &datagrams {
            assert!(datagram.len() <= 1000);
            assert_eq!(kinds(datagram)[0], kind::INFO_DST);
        }
    }

    #[test]
    fn test_oversize_submessage_is_rejected() {
        let payload = [0u8; 2000];
        let mut builder = MessageBuilder::new(GuidPrefix([1; 12]), 1000);
        assert!(matches!(
            builder.add(&data(&payload, 1)),
            Err(Error::OutOfResources(_))
        ));
        assert!(builder.is_empty());
        assert!(builder.finish().is_empty());
    }
}
