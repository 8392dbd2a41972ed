// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Flow controllers
//!
//! A flow controller decides *when* a writer's samples reach the transport.
//!
//! ## Publish modes
//!
//! | Mode | New samples | Retransmissions |
//! |------|-------------|-----------------|
//! | SYNCHRONOUS | sent in the writing thread; queued when the budget is short | queued |
//! | ASYNCHRONOUS | queued, sent by the controller thread | queued |
//! | PURE_SYNC | sent in the writing thread, waiting up to `max_blocking_time` for budget | sent in the calling thread |
//!
//! ## Bandwidth
//!
//! `max_bytes_per_period` bytes may leave per `period` (0 = unlimited),
//! tracked by a [`TokenBucket`]. A sample that does not fit is deferred to
//! a later period, never dropped by the controller.
//!
//! ## Locking
//!
//! The controller lock is never held while a writer is called back
//! ([`FlowClient::deliver_sample`]), and writers never call into the
//! controller while holding their own lock. Actual sends through one
//! controller are serialized by a separate send lock.

mod scheduler;
mod token_bucket;

pub use scheduler::{FlowClientId, Scheduled};
pub use token_bucket::TokenBucket;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::SequenceNumber;
use crate::{Error, Result};

use scheduler::Scheduler;

/// Name of the controller used by writers that do not name one.
pub const DEFAULT_FLOW_CONTROLLER: &str = "default";

/// How a write reaches the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Send in the writing thread when possible, queue otherwise.
    #[default]
    Synchronous,
    /// Always queue; the controller thread sends.
    Asynchronous,
    /// Never queue new samples; the writing thread sends.
    PureSync,
}

/// Order in which writers sharing a controller are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerPolicy {
    #[default]
    Fifo,
    RoundRobin,
    HighPriority,
    PriorityWithReservation,
}

/// Configuration of one named flow controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowControllerDescriptor {
    pub name: String,
    pub publish_mode: PublishMode,
    pub scheduler: SchedulerPolicy,
    /// Bytes per period; 0 means unlimited.
    pub max_bytes_per_period: usize,
    pub period: Duration,
}

impl FlowControllerDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            publish_mode: PublishMode::default(),
            scheduler: SchedulerPolicy::default(),
            max_bytes_per_period: 0,
            period: Duration::from_millis(100),
        }
    }

    #[must_use]
    pub fn publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }

    #[must_use]
    pub fn scheduler(mut self, policy: SchedulerPolicy) -> Self {
        self.scheduler = policy;
        self
    }

    /// Limit bandwidth to `bytes` per `period`.
    #[must_use]
    pub fn bandwidth(mut self, bytes: usize, period: Duration) -> Self {
        self.max_bytes_per_period = bytes;
        self.period = period;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidQos("flow controller name is empty".into()));
        }
        if self.max_bytes_per_period > 0 && self.period.is_zero() {
            return Err(Error::InvalidQos(format!(
                "flow controller '{}': period must be > 0 when bandwidth is limited",
                self.name
            )));
        }
        Ok(())
    }

    fn is_limited(&self) -> bool {
        self.max_bytes_per_period > 0
    }
}

/// Scheduling parameters of one writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriterFlowParams {
    /// -10 (highest) .. 10 (lowest).
    pub priority: i32,
    /// Share of the period budget reserved for this writer, in percent.
    pub reservation_pct: u32,
}

/// Outcome of handing one sample to its writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Put on the wire.
    Delivered { bytes: usize },
    /// Does not fit in the offered budget.
    Deferred { needed: usize },
    /// Nothing to send anymore (removed, acknowledged, writer closing).
    Gone,
}

/// Writer side of a flow controller.
pub trait FlowClient: Send + Sync {
    /// Send change `seq` to whoever still needs it, within `budget` bytes
    /// when one is given.
    fn deliver_sample(&self, seq: SequenceNumber, budget: Option<usize>) -> DeliveryResult;
}

struct FlowState {
    scheduler: Scheduler,
    clients: HashMap<FlowClientId, Weak<dyn FlowClient>>,
    bucket: Option<TokenBucket>,
    next_client: FlowClientId,
}

impl FlowState {
    /// Refill the bucket; a new period also resets reservations.
    fn budget(&mut self, now: Instant) -> Option<usize> {
        let bucket = self.bucket.as_mut()?;
        if bucket.refill_at(now) {
            self.scheduler.reset_period();
        }
        bucket.budget_at(now)
    }

    fn account(&mut self, client: FlowClientId, bytes: usize, now: Instant) {
        if let Some(bucket) = self.bucket.as_mut() {
            bucket.force_consume_at(bytes as u64, now);
        }
        self.scheduler.work_done(client, bytes);
    }

    fn wait_hint(&mut self, needed: usize, now: Instant) -> Duration {
        match self.bucket.as_mut() {
            Some(bucket) => bucket
                .time_until_available_at(needed as u64, now)
                .max(Duration::from_millis(1)),
            None => Duration::from_millis(1),
        }
    }
}

struct Shared {
    descriptor: FlowControllerDescriptor,
    state: Mutex<FlowState>,
    wake: Condvar,
    send_lock: Mutex<()>,
    stop: AtomicBool,
}

impl Shared {
    /// Try one sample right now in the calling thread.
    fn deliver(&self, client_id: FlowClientId, seq: SequenceNumber) -> DeliveryResult {
        let (client, budget) = {
            let mut state = self.state.lock();
            let budget = state.budget(Instant::now());
            if budget == Some(0) {
                return DeliveryResult::Deferred { needed: 1 };
            }
            let Some(client) = state.clients.get(&client_id).and_then(Weak::upgrade) else {
                return DeliveryResult::Gone;
            };
            (client, budget)
        };
        let result = {
            let _send = self.send_lock.lock();
            client.deliver_sample(seq, budget)
        };
        if let DeliveryResult::Delivered { bytes } = result {
            self.state.lock().account(client_id, bytes, Instant::now());
        }
        result
    }
}

/// One named flow controller, shared by the writers that use it.
pub struct FlowController {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl FlowController {
    /// Create the controller and, unless it is PURE_SYNC, its sender thread.
    pub fn new(descriptor: FlowControllerDescriptor) -> Result<Arc<Self>> {
        descriptor.validate()?;
        let bucket = descriptor
            .is_limited()
            .then(|| TokenBucket::new(descriptor.max_bytes_per_period as u64, descriptor.period));
        let shared = Arc::new(Shared {
            state: Mutex::new(FlowState {
                scheduler: Scheduler::new(descriptor.scheduler, descriptor.max_bytes_per_period),
                clients: HashMap::new(),
                bucket,
                next_client: 1,
            }),
            descriptor,
            wake: Condvar::new(),
            send_lock: Mutex::new(()),
            stop: AtomicBool::new(false),
        });

        let thread = if shared.descriptor.publish_mode == PublishMode::PureSync {
            None
        } else {
            let worker = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("hdds-flow-{}", shared.descriptor.name))
                .spawn(move || run(&worker))
                .map_err(Error::IoError)?;
            Some(handle)
        };
        log::debug!(
            "[FlowController::new] name={} mode={:?} scheduler={:?} bytes_per_period={} period={:?}",
            shared.descriptor.name,
            shared.descriptor.publish_mode,
            shared.descriptor.scheduler,
            shared.descriptor.max_bytes_per_period,
            shared.descriptor.period
        );
        Ok(Arc::new(Self {
            shared,
            thread: Mutex::new(thread),
        }))
    }

    #[must_use]
    pub fn descriptor(&self) -> &FlowControllerDescriptor {
        &self.shared.descriptor
    }

    #[must_use]
    pub fn publish_mode(&self) -> PublishMode {
        self.shared.descriptor.publish_mode
    }

    /// Register a writer. The controller only keeps a weak reference.
    pub fn register_writer(&self, client: Weak<dyn FlowClient>, params: WriterFlowParams) -> FlowClientId {
        let mut state = self.shared.state.lock();
        let id = state.next_client;
        state.next_client += 1;
        state.clients.insert(id, client);
        state.scheduler.register(id, params);
        id
    }

    pub fn unregister_writer(&self, id: FlowClientId) {
        let mut state = self.shared.state.lock();
        state.clients.remove(&id);
        state.scheduler.remove_client(id);
    }

    /// A new change entered the writer history.
    ///
    /// Under PURE_SYNC this blocks up to `max_blocking_time` waiting for
    /// budget; when none frees up the change stays unsent in the history
    /// (reliable readers recover it through the heartbeat cycle).
    pub fn add_new_sample(&self, id: FlowClientId, seq: SequenceNumber, max_blocking_time: Duration) {
        match self.shared.descriptor.publish_mode {
            PublishMode::Asynchronous => self.enqueue(id, seq, false),
            PublishMode::Synchronous => {
                if self.shared.state.lock().scheduler.has_pending(id) {
                    self.enqueue(id, seq, false);
                    return;
                }
                if let DeliveryResult::Deferred { .. } = self.shared.deliver(id, seq) {
                    log::trace!(
                        "[FlowController::add_new_sample] {} seq={} deferred to sender thread",
                        self.shared.descriptor.name,
                        seq
                    );
                    self.enqueue(id, seq, false);
                }
            }
            PublishMode::PureSync => self.deliver_blocking(id, seq, max_blocking_time),
        }
    }

    /// A change must be sent again (NACK, late joiner replay).
    pub fn add_old_sample(&self, id: FlowClientId, seq: SequenceNumber) {
        match self.shared.descriptor.publish_mode {
            PublishMode::PureSync => {
                if let DeliveryResult::Deferred { .. } = self.shared.deliver(id, seq) {
                    log::trace!(
                        "[FlowController::add_old_sample] {} seq={} skipped, no budget",
                        self.shared.descriptor.name,
                        seq
                    );
                }
            }
            _ => self.enqueue(id, seq, true),
        }
    }

    /// The change left the writer history: forget any queued send.
    pub fn remove_change(&self, id: FlowClientId, seq: SequenceNumber) {
        self.shared.state.lock().scheduler.remove(id, seq);
    }

    /// True when nothing is queued for any writer.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().scheduler.is_empty()
    }

    fn enqueue(&self, id: FlowClientId, seq: SequenceNumber, old: bool) {
        let mut state = self.shared.state.lock();
        let added = if old {
            state.scheduler.add_old(id, seq)
        } else {
            state.scheduler.add_new(id, seq)
        };
        if added {
            self.shared.wake.notify_one();
        }
    }

    /// `None` deadline (an infinite blocking time) waits until the budget
    /// allows the send.
    fn deliver_blocking(&self, id: FlowClientId, seq: SequenceNumber, max_blocking_time: Duration) {
        let deadline = Instant::now().checked_add(max_blocking_time);
        loop {
            let needed = match self.shared.deliver(id, seq) {
                DeliveryResult::Deferred { needed } => needed,
                _ => return,
            };
            let now = Instant::now();
            let mut wait_cap = None;
            if let Some(deadline) = deadline {
                if now >= deadline {
                    log::debug!(
                        "[FlowController::add_new_sample] {} seq={} no budget within {:?}, left unsent",
                        self.shared.descriptor.name,
                        seq,
                        max_blocking_time
                    );
                    return;
                }
                wait_cap = Some(deadline - now);
            }
            let mut state = self.shared.state.lock();
            let hint = state.wait_hint(needed, now);
            let wait = wait_cap.map_or(hint, |cap| hint.min(cap));
            self.shared.wake.wait_for(&mut state, wait);
        }
    }
}

impl Drop for FlowController {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        {
            let _state = self.shared.state.lock();
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            // A writer dropped from inside the sender thread may own the
            // last reference; that thread exits on its own.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Sender thread body.
fn run(shared: &Shared) {
    let mut state = shared.state.lock();
    while !shared.stop.load(Ordering::Acquire) {
        let now = Instant::now();
        let budget = state.budget(now);

        let Some(item) = state.scheduler.next() else {
            match state.bucket.as_ref() {
                Some(bucket) => {
                    let wait = bucket.time_until_refill_at(now).max(Duration::from_millis(1));
                    shared.wake.wait_for(&mut state, wait);
                }
                None => shared.wake.wait(&mut state),
            }
            continue;
        };

        if budget == Some(0) {
            state.scheduler.push_front(item);
            let wait = state.wait_hint(1, now);
            shared.wake.wait_for(&mut state, wait);
            continue;
        }

        let Some(client) = state.clients.get(&item.client).and_then(Weak::upgrade) else {
            state.clients.remove(&item.client);
            state.scheduler.remove_client(item.client);
            continue;
        };

        let result = parking_lot::MutexGuard::unlocked(&mut state, || {
            let _send = shared.send_lock.lock();
            let result = client.deliver_sample(item.seq, budget);
            drop(client);
            result
        });

        match result {
            DeliveryResult::Delivered { bytes } => state.account(item.client, bytes, Instant::now()),
            DeliveryResult::Gone => {}
            DeliveryResult::Deferred { needed } => {
                state.scheduler.push_front(item);
                let wait = state.wait_hint(needed, Instant::now());
                shared.wake.wait_for(&mut state, wait);
            }
        }
    }
    log::debug!("[FlowController] sender thread {} stopped", shared.descriptor.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Records deliveries; every sample has the same size.
    struct Recorder {
        size: usize,
        sent: Mutex<Vec<i64>>,
        calls: AtomicUsize,
    }

    impl Recorder {
        fn new(size: usize) -> Arc<Self> {
            Arc::new(Self {
                size,
                sent: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn sent(&self) -> Vec<i64> {
            self.sent.lock().clone()
        }
    }

    impl FlowClient for Recorder {
        fn deliver_sample(&self, seq: SequenceNumber, budget: Option<usize>) -> DeliveryResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if budget.is_some_and(|b| b < self.size) {
                return DeliveryResult::Deferred { needed: self.size };
            }
            self.sent.lock().push(seq.0);
            DeliveryResult::Delivered { bytes: self.size }
        }
    }

    fn register(fc: &FlowController, rec: &Arc<Recorder>) -> FlowClientId {
        let client: Arc<dyn FlowClient> = rec.clone();
        fc.register_writer(Arc::downgrade(&client), WriterFlowParams::default())
    }

    fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(FlowControllerDescriptor::new("").validate().is_err());
        assert!(FlowControllerDescriptor::new("x")
            .bandwidth(100, Duration::ZERO)
            .validate()
            .is_err());
        assert!(FlowControllerDescriptor::new("x")
            .bandwidth(100, Duration::from_millis(10))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_synchronous_sends_in_caller_thread() {
        let fc = FlowController::new(FlowControllerDescriptor::new("sync")).expect("controller");
        let rec = Recorder::new(100);
        let id = register(&fc, &rec);
        fc.add_new_sample(id, SequenceNumber(1), Duration::ZERO);
        assert_eq!(rec.sent(), vec![1]);
    }

    #[test]
    fn test_asynchronous_drains_in_order() {
        let fc = FlowController::new(
            FlowControllerDescriptor::new("async").publish_mode(PublishMode::Asynchronous),
        )
        .expect("controller");
        let rec = Recorder::new(10);
        let id = register(&fc, &rec);
        for seq in 1..=5 {
            fc.add_new_sample(id, SequenceNumber(seq), Duration::ZERO);
        }
        assert!(wait_until(|| rec.sent().len() == 5, Duration::from_secs(2)));
        assert_eq!(rec.sent(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_rate_limit_defers_to_next_period() {
        let fc = FlowController::new(
            FlowControllerDescriptor::new("limited")
                .publish_mode(PublishMode::Asynchronous)
                .bandwidth(200, Duration::from_millis(50)),
        )
        .expect("controller");
        let rec = Recorder::new(100);
        let id = register(&fc, &rec);
        let start = Instant::now();
        for seq in 1..=6 {
            fc.add_new_sample(id, SequenceNumber(seq), Duration::ZERO);
        }
        assert!(wait_until(|| rec.sent().len() == 6, Duration::from_secs(2)));
        // 200 bytes per 50ms: six 100-byte samples need at least two refills.
        assert!(start.elapsed() >= Duration::from_millis(90));
        assert_eq!(rec.sent(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_pure_sync_without_budget_leaves_unsent() {
        let fc = FlowController::new(
            FlowControllerDescriptor::new("pure")
                .publish_mode(PublishMode::PureSync)
                .bandwidth(100, Duration::from_secs(60)),
        )
        .expect("controller");
        let rec = Recorder::new(100);
        let id = register(&fc, &rec);
        fc.add_new_sample(id, SequenceNumber(1), Duration::from_millis(10));
        fc.add_new_sample(id, SequenceNumber(2), Duration::from_millis(10));
        assert_eq!(rec.sent(), vec![1]);
        assert!(fc.is_idle());
    }

    #[test]
    fn test_pure_sync_infinite_blocking_waits_for_refill() {
        let fc = FlowController::new(
            FlowControllerDescriptor::new("pure-forever")
                .publish_mode(PublishMode::PureSync)
                .bandwidth(100, Duration::from_millis(40)),
        )
        .expect("controller");
        let rec = Recorder::new(100);
        let id = register(&fc, &rec);
        let start = Instant::now();
        fc.add_new_sample(id, SequenceNumber(1), crate::qos::DURATION_INFINITE);
        fc.add_new_sample(id, SequenceNumber(2), crate::qos::DURATION_INFINITE);
        assert_eq!(rec.sent(), vec![1, 2]);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_removed_change_is_not_sent() {
        let fc = FlowController::new(
            FlowControllerDescriptor::new("rm")
                .publish_mode(PublishMode::Asynchronous)
                .bandwidth(100, Duration::from_millis(200)),
        )
        .expect("controller");
        let rec = Recorder::new(100);
        let id = register(&fc, &rec);
        fc.add_new_sample(id, SequenceNumber(1), Duration::ZERO);
        fc.add_new_sample(id, SequenceNumber(2), Duration::ZERO);
        assert!(wait_until(|| rec.sent().len() == 1, Duration::from_secs(1)));
        fc.remove_change(id, SequenceNumber(2));
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(rec.sent(), vec![1]);
    }

    #[test]
    fn test_dropped_writer_is_forgotten() {
        let fc = FlowController::new(
            FlowControllerDescriptor::new("gone").publish_mode(PublishMode::Asynchronous),
        )
        .expect("controller");
        let rec = Recorder::new(10);
        let id = register(&fc, &rec);
        drop(rec);
        fc.add_new_sample(id, SequenceNumber(1), Duration::ZERO);
        assert!(wait_until(|| fc.is_idle(), Duration::from_secs(1)));
    }
}
