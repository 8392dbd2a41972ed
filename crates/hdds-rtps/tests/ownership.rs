// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Exclusive ownership arbitration between three writers of one instance.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{match_endpoints, take_all, wait_until, write, Pair};
use hdds_rtps::core::InstanceHandle;
use hdds_rtps::flow::PublishMode;
use hdds_rtps::qos::Reliability;
use hdds_rtps::{ReaderAttributes, RtpsReader, RtpsWriter, StatefulReader, StatefulWriter, WriterAttributes};

fn keyed_writer(pair: &Pair, strength: i32) -> Arc<StatefulWriter> {
    pair.writer_side
        .create_stateful_writer(
            WriterAttributes::reliable()
                .with_key(true)
                .with_ownership_strength(strength)
                .with_heartbeat_period(Duration::from_millis(20)),
            None,
        )
        .expect("writer")
}

fn settle(writer: &StatefulWriter) {
    assert!(writer
        .wait_for_acknowledgments(Duration::from_secs(5))
        .expect("wait"));
}

fn delivered(reader: &StatefulReader) -> Vec<u8> {
    take_all(reader).into_iter().map(|b| b[0]).collect()
}

#[test]
fn test_strongest_writer_owns_instance() {
    let pair = Pair::new(PublishMode::PureSync);
    let reader = pair
        .reader_side
        .create_stateful_reader(
            ReaderAttributes::reliable().with_key(true).with_exclusive_ownership(),
            None,
            None,
        )
        .expect("reader");
    let weak = keyed_writer(&pair, 10);
    let middle = keyed_writer(&pair, 20);
    let strong = keyed_writer(&pair, 25);
    for writer in [&weak, &middle, &strong] {
        match_endpoints(&**writer, &*reader, Reliability::Reliable);
    }
    let instance = InstanceHandle::from_key(&[0, 0, 0, 1]);

    write(&*weak, &[10], instance);
    assert!(wait_until(Duration::from_secs(5), || {
        reader.instance_owner(&instance) == Some(weak.guid())
    }));
    write(&*middle, &[20], instance);
    assert!(wait_until(Duration::from_secs(5), || {
        reader.instance_owner(&instance) == Some(middle.guid())
    }));
    assert_eq!(delivered(&reader), vec![10, 20]);

    // A weaker writer is acknowledged but not delivered.
    write(&*weak, &[11], instance);
    settle(&weak);
    assert!(delivered(&reader).is_empty());

    write(&*strong, &[25], instance);
    assert!(wait_until(Duration::from_secs(5), || {
        reader.instance_owner(&instance) == Some(strong.guid())
    }));
    write(&*middle, &[21], instance);
    settle(&middle);
    assert_eq!(delivered(&reader), vec![25]);

    // Losing the owner hands the instance to whoever writes next.
    assert!(reader.matched_writer_remove(&strong.guid()));
    write(&*weak, &[12], instance);
    assert!(wait_until(Duration::from_secs(5), || {
        reader.instance_owner(&instance) == Some(weak.guid())
    }));
    assert_eq!(delivered(&reader), vec![12]);
}

#[test]
fn test_instances_are_owned_independently() {
    let pair = Pair::new(PublishMode::PureSync);
    let reader = pair
        .reader_side
        .create_stateful_reader(
            ReaderAttributes::reliable().with_key(true).with_exclusive_ownership(),
            None,
            None,
        )
        .expect("reader");
    let weak = keyed_writer(&pair, 1);
    let strong = keyed_writer(&pair, 2);
    match_endpoints(&*weak, &*reader, Reliability::Reliable);
    match_endpoints(&*strong, &*reader, Reliability::Reliable);
    let a = InstanceHandle::from_key(&[0, 0, 0, 1]);
    let b = InstanceHandle::from_key(&[0, 0, 0, 2]);

    write(&*strong, &[1], a);
    write(&*weak, &[2], b);
    settle(&strong);
    settle(&weak);
    assert_eq!(reader.instance_owner(&a), Some(strong.guid()));
    assert_eq!(reader.instance_owner(&b), Some(weak.guid()));
    let mut got = delivered(&reader);
    got.sort_unstable();
    assert_eq!(got, vec![1, 2]);
}
