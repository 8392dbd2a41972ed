// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Two participants on one loopback hub.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdds_rtps::core::{ChangeKind, GuidPrefix, InstanceHandle, Locator, SequenceNumber};
use hdds_rtps::flow::{FlowControllerDescriptor, PublishMode};
use hdds_rtps::qos::Reliability;
use hdds_rtps::{
    EngineConfig, LoopbackHub, Participant, RemoteReaderInfo, RemoteWriterInfo, RtpsReader, RtpsWriter,
};

pub const WRITER_PREFIX: GuidPrefix = GuidPrefix([0x11; 12]);
pub const READER_PREFIX: GuidPrefix = GuidPrefix([0x22; 12]);

pub fn writer_locator() -> Locator {
    Locator::udpv4(Ipv4Addr::LOCALHOST, 7411)
}

pub fn reader_locator() -> Locator {
    Locator::udpv4(Ipv4Addr::LOCALHOST, 7412)
}

pub struct Pair {
    pub hub: Arc<LoopbackHub>,
    pub writer_side: Arc<Participant>,
    pub reader_side: Arc<Participant>,
}

impl Pair {
    /// Participants whose default flow controller uses `mode`.
    pub fn new(mode: PublishMode) -> Self {
        Self::with_controllers(mode, &[])
    }

    /// Like [`Pair::new`], with `extra` controllers on the writing side.
    pub fn with_controllers(mode: PublishMode, extra: &[FlowControllerDescriptor]) -> Self {
        let hub = LoopbackHub::with_delivery_thread().expect("hub");
        let config = || {
            EngineConfig::default()
                .with_max_message_size(1400)
                .with_flow_controller(FlowControllerDescriptor::new("default").publish_mode(mode))
        };
        let writer_config = extra
            .iter()
            .cloned()
            .fold(config(), EngineConfig::with_flow_controller);
        let writer_side = Participant::builder(WRITER_PREFIX, hub.transport(writer_locator()))
            .with_config(writer_config.with_unicast_locator(writer_locator()))
            .build()
            .expect("writer participant");
        let reader_side = Participant::builder(READER_PREFIX, hub.transport(reader_locator()))
            .with_config(config().with_unicast_locator(reader_locator()))
            .build()
            .expect("reader participant");
        hub.attach(writer_locator(), writer_side.receiver());
        hub.attach(reader_locator(), reader_side.receiver());
        Self {
            hub,
            writer_side,
            reader_side,
        }
    }
}

/// Match both ends the way discovery would.
pub fn match_endpoints(writer: &dyn RtpsWriter, reader: &dyn RtpsReader, reliability: Reliability) {
    writer
        .matched_reader_add(
            RemoteReaderInfo::new(reader.guid())
                .with_unicast_locator(reader_locator())
                .with_reliability(reliability)
                .with_durability(reader.attributes().durability),
        )
        .expect("reader proxy");
    reader
        .matched_writer_add(
            RemoteWriterInfo::new(writer.guid())
                .with_unicast_locator(writer_locator())
                .with_reliability(reliability)
                .with_durability(writer.attributes().durability),
        )
        .expect("writer proxy");
}

/// Payload with a CDR little-endian encapsulation header.
pub fn sample(body: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0x00, 0x01, 0x00, 0x00];
    bytes.extend_from_slice(body);
    bytes
}

pub fn write(writer: &dyn RtpsWriter, body: &[u8], instance: InstanceHandle) -> SequenceNumber {
    let change = writer
        .new_change(ChangeKind::Alive, &sample(body), instance)
        .expect("change");
    writer.write(change).expect("write")
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Bodies of every sample taken from `reader`, in delivery order.
pub fn take_all(reader: &dyn RtpsReader) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    while let Some((change, _)) = reader.take_next_sample() {
        out.push(change.serialized_payload.as_slice()[4..].to_vec());
    }
    out
}
