// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport boundary and the in-process loopback hub.
//!
//! The engine never opens sockets: it hands encoded datagrams to a
//! [`Transport`] and is fed through [`MessageReceiver::on_receive`].
//! [`LoopbackHub`] connects participants living in the same process; every
//! datagram goes through a queue, so a send never re-enters the receiving
//! endpoint on the sender's stack.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};

use crate::core::Locator;
use crate::receiver::MessageReceiver;
use crate::{Error, Result};

/// Outbound side of a transport.
pub trait Transport: Send + Sync {
    /// Send one datagram. `false` when it could not be handed to the
    /// network (reliable traffic is repaired by the heartbeat cycle).
    fn send(&self, bytes: &[u8], destination: &Locator) -> bool;

    /// Largest datagram this transport carries.
    fn max_message_size(&self) -> usize {
        crate::config::DEFAULT_MAX_MESSAGE_SIZE
    }
}

/// One datagram in flight on a [`LoopbackHub`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub source: Locator,
    pub destination: Locator,
    pub bytes: Vec<u8>,
}

/// Returns `true` to drop the packet.
pub type DropFilter = Box<dyn Fn(&Packet) -> bool + Send + Sync>;

struct HubShared {
    routes: RwLock<HashMap<Locator, Vec<Weak<MessageReceiver>>>>,
    filter: RwLock<Option<DropFilter>>,
    tx: Sender<Packet>,
    rx: Receiver<Packet>,
    sent: AtomicU64,
    dropped: AtomicU64,
    stop: AtomicBool,
}

impl HubShared {
    fn deliver(&self, packet: &Packet) {
        let targets: Vec<Arc<MessageReceiver>> = self
            .routes
            .read()
            .get(&packet.destination)
            .map(|list| list.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default();
        if targets.is_empty() {
            log::trace!("[LoopbackHub] no receiver on {}", packet.destination);
        }
        for receiver in targets {
            receiver.on_receive(&packet.bytes, &packet.source, &packet.destination);
        }
    }
}

/// In-process network: locators map to attached receivers; multicast
/// locators reach every receiver attached to them.
pub struct LoopbackHub {
    shared: Arc<HubShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackHub {
    /// Hub delivering only when [`pump`](Self::pump) is called.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(Self {
            shared: Arc::new(HubShared {
                routes: RwLock::new(HashMap::new()),
                filter: RwLock::new(None),
                tx,
                rx,
                sent: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                stop: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        })
    }

    /// Hub with a delivery thread draining the queue continuously.
    pub fn with_delivery_thread() -> Result<Arc<Self>> {
        let hub = Self::new();
        let shared = Arc::clone(&hub.shared);
        let handle = std::thread::Builder::new()
            .name("hdds-loopback".into())
            .spawn(move || {
                while !shared.stop.load(Ordering::Acquire) {
                    match shared.rx.recv_timeout(Duration::from_millis(20)) {
                        Ok(packet) => shared.deliver(&packet),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(Error::IoError)?;
        *hub.thread.lock() = Some(handle);
        Ok(hub)
    }

    /// Route datagrams addressed to `locator` to `receiver`.
    pub fn attach(&self, locator: Locator, receiver: &Arc<MessageReceiver>) {
        let mut routes = self.shared.routes.write();
        let list = routes.entry(locator).or_default();
        list.retain(|w| w.strong_count() > 0);
        list.push(Arc::downgrade(receiver));
    }

    pub fn detach(&self, locator: &Locator, receiver: &Arc<MessageReceiver>) {
        if let Some(list) = self.shared.routes.write().get_mut(locator) {
            list.retain(|w| !std::ptr::eq(w.as_ptr(), Arc::as_ptr(receiver)));
        }
    }

    /// Install a loss model; `None` removes it.
    pub fn set_filter(&self, filter: Option<DropFilter>) {
        *self.shared.filter.write() = filter;
    }

    /// Transport handle sending from `source`.
    #[must_use]
    pub fn transport(self: &Arc<Self>, source: Locator) -> Arc<dyn Transport> {
        Arc::new(LoopbackTransport {
            hub: Arc::clone(self),
            source,
        })
    }

    /// Deliver queued datagrams (including ones produced while delivering)
    /// until the queue is empty or `max_packets` were handled. Returns the
    /// number delivered.
    pub fn pump(&self, max_packets: usize) -> usize {
        let mut delivered = 0;
        while delivered < max_packets {
            let Ok(packet) = self.shared.rx.try_recv() else {
                break;
            };
            self.shared.deliver(&packet);
            delivered += 1;
        }
        delivered
    }

    /// Datagrams waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.rx.len()
    }

    /// (accepted, dropped by the filter).
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (
            self.shared.sent.load(Ordering::Relaxed),
            self.shared.dropped.load(Ordering::Relaxed),
        )
    }

    fn enqueue(&self, packet: Packet) -> bool {
        if let Some(filter) = self.shared.filter.read().as_ref() {
            if filter(&packet) {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                return true;
            }
        }
        self.shared.sent.fetch_add(1, Ordering::Relaxed);
        self.shared.tx.send(packet).is_ok()
    }
}

impl Drop for LoopbackHub {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    source: Locator,
}

impl Transport for LoopbackTransport {
    fn send(&self, bytes: &[u8], destination: &Locator) -> bool {
        self.hub.enqueue(Packet {
            source: self.source,
            destination: *destination,
            bytes: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_filter_counts_drops() {
        let hub = LoopbackHub::new();
        let transport = hub.transport(Locator::udpv4(Ipv4Addr::LOCALHOST, 7400));
        let dst = Locator::udpv4(Ipv4Addr::LOCALHOST, 7410);
        assert!(transport.send(b"one", &dst));
        hub.set_filter(Some(Box::new(|p: &Packet| p.bytes == b"two")));
        assert!(transport.send(b"two", &dst));
        assert_eq!(hub.stats(), (1, 1));
        assert_eq!(hub.pending(), 1);
        // No receiver attached: pumping just drains.
        assert_eq!(hub.pump(10), 1);
        assert_eq!(hub.pending(), 0);
    }
}
