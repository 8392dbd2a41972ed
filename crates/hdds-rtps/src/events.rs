// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timer thread shared by the endpoints of one participant.
//!
//! Periodic heartbeats, delayed ACKNACK responses, NACK response delays,
//! liveliness lease checks and deadline checks all run as [`TimedEvent`]s
//! on a single [`EventService`] thread.
//!
//! ```text
//!  register()        restart()            deadline reached
//!  ──────────> idle ───────────> armed ───────────────────> callback
//!                ^                 |                           |
//!                |   cancel()      |      TimerAction::Restart |
//!                +-----------------+<--------------------------+
//! ```
//!
//! Callbacks run without the service lock held, so they may freely arm or
//! cancel events (their own included). Dropping a [`TimedEvent`] unregisters
//! it.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{Error, Result};

/// What to do after a callback ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Fire again after the event's interval.
    Restart,
    /// Stay idle until armed again.
    Done,
}

type Callback = Box<dyn FnMut() -> TimerAction + Send>;

struct EventEntry {
    interval: Duration,
    /// `None` while the callback is running.
    callback: Option<Callback>,
    /// Deadline when armed.
    armed: Option<Instant>,
    /// Bumped on every (re)arm/cancel; stale heap entries are skipped.
    generation: u64,
}

#[derive(Default)]
struct EventState {
    heap: BinaryHeap<Reverse<(Instant, u64, u64)>>,
    events: HashMap<u64, EventEntry>,
    next_id: u64,
}

impl EventState {
    fn arm(&mut self, id: u64, at: Instant) -> bool {
        let Some(entry) = self.events.get_mut(&id) else {
            return false;
        };
        entry.generation += 1;
        entry.armed = Some(at);
        self.heap.push(Reverse((at, id, entry.generation)));
        true
    }
}

struct EventShared {
    state: Mutex<EventState>,
    wake: Condvar,
    stop: AtomicBool,
}

/// Owner of the timer thread.
pub struct EventService {
    shared: Arc<EventShared>,
    thread: Option<JoinHandle<()>>,
}

impl EventService {
    /// Start the timer thread.
    pub fn new(thread_name: &str) -> Result<Self> {
        let shared = Arc::new(EventShared {
            state: Mutex::new(EventState::default()),
            wake: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let worker = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || event_loop(&worker))
            .map_err(Error::IoError)?;
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Register an idle event firing `interval` after each arm.
    pub fn register(
        &self,
        interval: Duration,
        callback: impl FnMut() -> TimerAction + Send + 'static,
    ) -> TimedEvent {
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.events.insert(
            id,
            EventEntry {
                interval,
                callback: Some(Box::new(callback)),
                armed: None,
                generation: 0,
            },
        );
        TimedEvent {
            id,
            service: Arc::downgrade(&self.shared),
        }
    }

    /// Registered events (armed or idle).
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.shared.state.lock().events.len()
    }
}

impl Drop for EventService {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        {
            let _state = self.shared.state.lock();
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Handle to one registered event.
pub struct TimedEvent {
    id: u64,
    service: Weak<EventShared>,
}

impl TimedEvent {
    /// Arm at now + interval, replacing any pending deadline.
    pub fn restart(&self) {
        self.with_state(|state, shared| {
            let Some(interval) = state.events.get(&self.id).map(|e| e.interval) else {
                return;
            };
            // An interval past the clock's range never fires.
            let Some(at) = Instant::now().checked_add(interval) else {
                return;
            };
            if state.arm(self.id, at) {
                shared.wake.notify_one();
            }
        });
    }

    /// Arm unless already pending (coalesces bursts into one firing).
    pub fn arm_if_idle(&self) {
        self.with_state(|state, shared| {
            let Some(entry) = state.events.get(&self.id) else {
                return;
            };
            if entry.armed.is_some() {
                return;
            }
            let Some(at) = Instant::now().checked_add(entry.interval) else {
                return;
            };
            if state.arm(self.id, at) {
                shared.wake.notify_one();
            }
        });
    }

    /// Disarm; the callback will not fire until armed again.
    pub fn cancel(&self) {
        self.with_state(|state, _| {
            if let Some(entry) = state.events.get_mut(&self.id) {
                entry.generation += 1;
                entry.armed = None;
            }
        });
    }

    /// Change the interval; takes effect at the next arm.
    pub fn update_interval(&self, interval: Duration) {
        self.with_state(|state, _| {
            if let Some(entry) = state.events.get_mut(&self.id) {
                entry.interval = interval;
            }
        });
    }

    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.with_state(|state, _| state.events.get(&self.id).map(|e| e.interval))
            .flatten()
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.with_state(|state, _| {
            state
                .events
                .get(&self.id)
                .is_some_and(|e| e.armed.is_some())
        })
        .unwrap_or(false)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut EventState, &EventShared) -> R) -> Option<R> {
        let shared = self.service.upgrade()?;
        let mut state = shared.state.lock();
        Some(f(&mut *state, &*shared))
    }
}

impl Drop for TimedEvent {
    fn drop(&mut self) {
        // The entry (and its callback) is dropped after the lock is released.
        let removed = self.with_state(|state, _| state.events.remove(&self.id));
        drop(removed);
    }
}

impl std::fmt::Debug for TimedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedEvent").field("id", &self.id).finish()
    }
}

fn event_loop(shared: &EventShared) {
    log::debug!("[EventService] thread started");
    let mut state = shared.state.lock();
    while !shared.stop.load(Ordering::Acquire) {
        let now = Instant::now();
        let next = match state.heap.peek() {
            None => {
                shared.wake.wait(&mut state);
                continue;
            }
            Some(Reverse((at, id, generation))) => (*at, *id, *generation),
        };
        let (at, id, generation) = next;

        let current = state
            .events
            .get(&id)
            .is_some_and(|e| e.generation == generation && e.armed.is_some());
        if !current {
            state.heap.pop();
            continue;
        }
        if at > now {
            shared.wake.wait_until(&mut state, at);
            continue;
        }
        state.heap.pop();

        let Some(entry) = state.events.get_mut(&id) else {
            continue;
        };
        entry.armed = None;
        let Some(mut callback) = entry.callback.take() else {
            continue;
        };
        let fired_generation = entry.generation;

        let action = parking_lot::MutexGuard::unlocked(&mut state, || callback());

        if let Some(entry) = state.events.get_mut(&id) {
            entry.callback = Some(callback);
            // Re-armed from inside the callback: that deadline wins.
            let rearmed = entry.generation != fired_generation;
            if action == TimerAction::Restart && !rearmed {
                if let Some(at) = Instant::now().checked_add(entry.interval) {
                    state.arm(id, at);
                }
            }
        } else {
            // Unregistered while running; drop the callback outside the lock.
            parking_lot::MutexGuard::unlocked(&mut state, || drop(callback));
        }
    }
    log::debug!("[EventService] thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wait_until(cond: impl Fn() -> bool, timeout: Duration) -> bool {
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
    fn test_one_shot() {
        let service = EventService::new("test-events").expect("service");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let event = service.register(Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TimerAction::Done
        });
        assert!(!event.is_armed());
        event.restart();
        assert!(wait_until(|| fired.load(Ordering::SeqCst) == 1, Duration::from_secs(1)));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!event.is_armed());
    }

    #[test]
    fn test_periodic_until_cancel() {
        let service = EventService::new("test-events").expect("service");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let event = service.register(Duration::from_millis(2), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TimerAction::Restart
        });
        event.restart();
        assert!(wait_until(|| fired.load(Ordering::SeqCst) >= 3, Duration::from_secs(1)));
        event.cancel();
        std::thread::sleep(Duration::from_millis(20));
        let after_cancel = fired.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn test_arm_if_idle_coalesces() {
        let service = EventService::new("test-events").expect("service");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let event = service.register(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TimerAction::Done
        });
        for _ in 0..10 {
            event.arm_if_idle();
        }
        assert!(wait_until(|| fired.load(Ordering::SeqCst) == 1, Duration::from_secs(1)));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unregisters() {
        let service = EventService::new("test-events").expect("service");
        let event = service.register(Duration::from_secs(60), || TimerAction::Done);
        event.restart();
        assert_eq!(service.event_count(), 1);
        drop(event);
        assert_eq!(service.event_count(), 0);
    }

    #[test]
    fn test_handle_outlives_service() {
        let service = EventService::new("test-events").expect("service");
        let event = service.register(Duration::from_millis(1), || TimerAction::Done);
        drop(service);
        event.restart();
        assert!(!event.is_armed());
    }
}
