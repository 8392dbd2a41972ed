// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound path shared by every endpoint of a participant.
//!
//! Endpoints fill a [`MessageBuilder`]; [`MessageSender::send`] runs each
//! finished datagram through the security hooks and hands it to the
//! transport once per destination locator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::{GuidPrefix, Locator};
use crate::messages::MessageBuilder;
use crate::security::{protect_datagram, SecurityTransform};
use crate::transport::Transport;

/// Counters of the outbound path.
#[derive(Debug, Default)]
pub struct SendStats {
    pub datagrams: AtomicU64,
    pub bytes: AtomicU64,
    pub failures: AtomicU64,
}

/// Datagram assembly plus transport hand-off for one participant.
pub struct MessageSender {
    guid_prefix: GuidPrefix,
    transport: Arc<dyn Transport>,
    security: Arc<dyn SecurityTransform>,
    max_message_size: usize,
    stats: SendStats,
}

impl MessageSender {
    #[must_use]
    pub fn new(
        guid_prefix: GuidPrefix,
        transport: Arc<dyn Transport>,
        security: Arc<dyn SecurityTransform>,
        max_message_size: usize,
    ) -> Self {
        let max_message_size = max_message_size.min(transport.max_message_size());
        Self {
            guid_prefix,
            transport,
            security,
            max_message_size,
            stats: SendStats::default(),
        }
    }

    #[must_use]
    pub fn guid_prefix(&self) -> GuidPrefix {
        self.guid_prefix
    }

    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Empty builder sized for this participant's transport.
    #[must_use]
    pub fn builder(&self) -> MessageBuilder {
        MessageBuilder::new(self.guid_prefix, self.max_message_size)
    }

    /// Send every datagram of `builder` to every locator. Returns the
    /// number of bytes handed to the transport (per locator, summed) and
    /// whether every hand-off succeeded.
    pub fn send(&self, builder: MessageBuilder, locators: &[Locator]) -> (usize, bool) {
        if locators.is_empty() || builder.is_empty() {
            return (0, true);
        }
        self.send_datagrams(builder.finish(), locators)
    }

    /// Same as [`send`](Self::send) for datagrams already taken out of a
    /// builder (callers that size a send before committing to it).
    pub fn send_datagrams(&self, datagrams: Vec<Vec<u8>>, locators: &[Locator]) -> (usize, bool) {
        let mut total = 0;
        let mut all_ok = true;
        for datagram in datagrams {
            let datagram = match protect_datagram(self.security.as_ref(), datagram) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("[MessageSender::send] security encode failed: {}", e);
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    all_ok = false;
                    continue;
                }
            };
            for locator in locators {
                if self.transport.send(&datagram, locator) {
                    total += datagram.len();
                    self.stats.datagrams.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .bytes
                        .fetch_add(datagram.len() as u64, Ordering::Relaxed);
                } else {
                    log::trace!("[MessageSender::send] {} bytes to {} dropped", datagram.len(), locator);
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    all_ok = false;
                }
            }
        }
        (total, all_ok)
    }

    #[must_use]
    pub fn stats(&self) -> &SendStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, SequenceNumber};
    use crate::messages::{HeartbeatSubmessage, Submessage};
    use crate::security::PassThrough;
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;

    #[derive(Default)]
    struct Capture {
        sent: Mutex<Vec<(Vec<u8>, Locator)>>,
    }

    impl Transport for Capture {
        fn send(&self, bytes: &[u8], destination: &Locator) -> bool {
            self.sent.lock().push((bytes.to_vec(), *destination));
            destination.port != 9
        }
    }

    fn heartbeat() -> Submessage<'static> {
        Submessage::Heartbeat(HeartbeatSubmessage {
            reader_id: EntityId::UNKNOWN,
            writer_id: EntityId::new(1, 0x02),
            first_sn: SequenceNumber(1),
            last_sn: SequenceNumber(2),
            count: 1,
            final_flag: true,
            liveliness_flag: false,
        })
    }

    #[test]
    fn test_send_fans_out_per_locator() {
        let capture = Arc::new(Capture::default());
        let sender = MessageSender::new(GuidPrefix([1; 12]), capture.clone(), Arc::new(PassThrough), 1400);
        let mut builder = sender.builder();
        builder.add(&heartbeat()).expect("fits");
        let a = Locator::udpv4(Ipv4Addr::LOCALHOST, 7410);
        let b = Locator::udpv4(Ipv4Addr::LOCALHOST, 9);
        let (bytes, ok) = sender.send(builder, &[a, b]);
        assert!(!ok);
        assert_eq!(capture.sent.lock().len(), 2);
        assert_eq!(bytes, capture.sent.lock()[0].0.len());
        assert_eq!(sender.stats().failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_empty_builder_sends_nothing() {
        let capture = Arc::new(Capture::default());
        let sender = MessageSender::new(GuidPrefix([1; 12]), capture.clone(), Arc::new(PassThrough), 1400);
        let (bytes, ok) = sender.send(sender.builder(), &[Locator::udpv4(Ipv4Addr::LOCALHOST, 7410)]);
        assert_eq!((bytes, ok), (0, true));
        assert!(capture.sent.lock().is_empty());
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use crate::core::Locator;
    use crate::messages::{parse_message, Submessage};
    use crate::transport::Transport;

    /// Transport keeping every datagram for inspection.
    #[derive(Default)]
    pub(crate) struct Capture {
        pub sent: Mutex<Vec<(Vec<u8>, Locator)>>,
    }

    impl Transport for Capture {
        fn send(&self, bytes: &[u8], destination: &Locator) -> bool {
            self.sent.lock().push((bytes.to_vec(), *destination));
            true
        }
    }

    impl Capture {
        /// Drain the captured datagrams and visit every decodable submessage.
        pub(crate) fn drain(&self, mut visit: impl FnMut(&Locator, Submessage<'_>)) -> usize {
            let sent = std::mem::take(&mut *self.sent.lock());
            for (bytes, locator) in &sent {
                let Ok((_, iter)) = parse_message(bytes) else {
                    continue;
                };
                for raw in iter.flatten() {
                    if let Ok(Some(submessage)) = raw.decode() {
                        visit(locator, submessage);
                    }
                }
            }
            sent.len()
        }

        /// Kinds of every captured submessage, draining the capture.
        pub(crate) fn drain_kinds(&self) -> Vec<u8> {
            let mut kinds = Vec::new();
            self.drain(|_, s| kinds.push(s.kind()));
            kinds
        }
    }
}
