// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sample ordering disciplines of a flow controller.
//!
//! Every registered writer owns two queues: new samples and retransmissions
//! ("old" samples). A writer's new samples are always served before its old
//! ones. Which writer goes next depends on the policy:
//!
//! | Policy | Next writer |
//! |--------|-------------|
//! | FIFO | the one holding the oldest queued sample |
//! | ROUND_ROBIN | the next one after the last served, cyclically |
//! | HIGH_PRIORITY | the lowest priority value (-10 highest .. 10 lowest) |
//! | PRIORITY_WITH_RESERVATION | writers under their reserved share first, then by priority |

use std::collections::{BTreeMap, VecDeque};

use crate::core::SequenceNumber;

use super::{SchedulerPolicy, WriterFlowParams};

/// Identifier of a writer registered with a flow controller.
pub type FlowClientId = u64;

/// A sample picked for sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub client: FlowClientId,
    pub seq: SequenceNumber,
    /// Retransmission rather than first send.
    pub old: bool,
    stamp: u64,
}

#[derive(Debug, Default)]
struct ClientQueues {
    params: WriterFlowParams,
    new: VecDeque<(u64, SequenceNumber)>,
    old: VecDeque<(u64, SequenceNumber)>,
    /// Bytes sent in the current period.
    sent_this_period: usize,
}

impl ClientQueues {
    fn contains(&self, seq: SequenceNumber) -> bool {
        self.new.iter().chain(&self.old).any(|(_, s)| *s == seq)
    }

    fn has_work(&self) -> bool {
        !self.new.is_empty() || !self.old.is_empty()
    }

    fn pop(&mut self, client: FlowClientId) -> Option<Scheduled> {
        if let Some((stamp, seq)) = self.new.pop_front() {
            return Some(Scheduled { client, seq, old: false, stamp });
        }
        self.old
            .pop_front()
            .map(|(stamp, seq)| Scheduled { client, seq, old: true, stamp })
    }
}

/// Per-controller scheduler state.
#[derive(Debug)]
pub(crate) struct Scheduler {
    policy: SchedulerPolicy,
    /// Budget of one period, used for reservations (0 = unlimited).
    period_budget: usize,
    clients: BTreeMap<FlowClientId, ClientQueues>,
    next_stamp: u64,
    last_served: Option<FlowClientId>,
}

impl Scheduler {
    pub(crate) fn new(policy: SchedulerPolicy, period_budget: usize) -> Self {
        Self {
            policy,
            period_budget,
            clients: BTreeMap::new(),
            next_stamp: 0,
            last_served: None,
        }
    }

    pub(crate) fn register(&mut self, client: FlowClientId, params: WriterFlowParams) {
        self.clients.insert(
            client,
            ClientQueues {
                params,
                ..ClientQueues::default()
            },
        );
    }

    pub(crate) fn remove_client(&mut self, client: FlowClientId) {
        self.clients.remove(&client);
        if self.last_served == Some(client) {
            self.last_served = None;
        }
    }

    /// Queue a first send. False when the client is unknown or the sample
    /// is already queued.
    pub(crate) fn add_new(&mut self, client: FlowClientId, seq: SequenceNumber) -> bool {
        self.add(client, seq, false)
    }

    /// Queue a retransmission.
    pub(crate) fn add_old(&mut self, client: FlowClientId, seq: SequenceNumber) -> bool {
        self.add(client, seq, true)
    }

    fn add(&mut self, client: FlowClientId, seq: SequenceNumber, old: bool) -> bool {
        let stamp = self.next_stamp;
        let Some(queues) = self.clients.get_mut(&client) else {
            return false;
        };
        if queues.contains(seq) {
            return false;
        }
        if old {
            queues.old.push_back((stamp, seq));
        } else {
            queues.new.push_back((stamp, seq));
        }
        self.next_stamp += 1;
        true
    }

    /// Drop a queued sample (it left the writer history).
    pub(crate) fn remove(&mut self, client: FlowClientId, seq: SequenceNumber) {
        if let Some(queues) = self.clients.get_mut(&client) {
            queues.new.retain(|(_, s)| *s != seq);
            queues.old.retain(|(_, s)| *s != seq);
        }
    }

    pub(crate) fn has_pending(&self, client: FlowClientId) -> bool {
        self.clients.get(&client).is_some_and(ClientQueues::has_work)
    }

    pub(crate) fn is_empty(&self) -> bool {
        !self.clients.values().any(ClientQueues::has_work)
    }

    /// Pop the next sample according to the policy.
    pub(crate) fn next(&mut self) -> Option<Scheduled> {
        let client = match self.policy {
            SchedulerPolicy::Fifo => self.pick_fifo(),
            SchedulerPolicy::RoundRobin => self.pick_round_robin(),
            SchedulerPolicy::HighPriority => self.pick_by_priority(|_| true),
            SchedulerPolicy::PriorityWithReservation => self.pick_with_reservation(),
        }?;
        self.last_served = Some(client);
        self.clients.get_mut(&client)?.pop(client)
    }

    /// Put back a sample that could not be sent; it keeps its place.
    pub(crate) fn push_front(&mut self, item: Scheduled) {
        if let Some(queues) = self.clients.get_mut(&item.client) {
            if queues.contains(item.seq) {
                return;
            }
            let queue = if item.old { &mut queues.old } else { &mut queues.new };
            queue.push_front((item.stamp, item.seq));
        }
    }

    /// Account bytes sent on behalf of a client.
    pub(crate) fn work_done(&mut self, client: FlowClientId, bytes: usize) {
        if let Some(queues) = self.clients.get_mut(&client) {
            queues.sent_this_period = queues.sent_this_period.saturating_add(bytes);
        }
    }

    pub(crate) fn reset_period(&mut self) {
        for queues in self.clients.values_mut() {
            queues.sent_this_period = 0;
        }
    }

    fn pick_fifo(&self) -> Option<FlowClientId> {
        let oldest = |pick_old: bool| {
            self.clients
                .iter()
                .filter_map(|(id, q)| {
                    let queue = if pick_old { &q.old } else { &q.new };
                    queue.front().map(|(stamp, _)| (*stamp, *id))
                })
                .min()
                .map(|(_, id)| id)
        };
        oldest(false).or_else(|| oldest(true))
    }

    fn pick_round_robin(&self) -> Option<FlowClientId> {
        let start = self.last_served.map_or(0, |id| id.saturating_add(1));
        self.clients
            .range(start..)
            .chain(self.clients.range(..start))
            .find(|(_, q)| q.has_work())
            .map(|(id, _)| *id)
    }

    fn pick_by_priority(&self, eligible: impl Fn(&ClientQueues) -> bool) -> Option<FlowClientId> {
        self.clients
            .iter()
            .filter(|(_, q)| q.has_work() && eligible(q))
            .min_by_key(|(id, q)| (q.params.priority, **id))
            .map(|(id, _)| *id)
    }

    fn pick_with_reservation(&self) -> Option<FlowClientId> {
        let budget = self.period_budget;
        if budget > 0 {
            let under_reservation = self.pick_by_priority(|q| {
                let reserved = budget.saturating_mul(q.params.reservation_pct as usize) / 100;
                q.sent_this_period < reserved
            });
            if under_reservation.is_some() {
                return under_reservation;
            }
        }
        self.pick_by_priority(|_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sn(v: i64) -> SequenceNumber {
        SequenceNumber(v)
    }

    fn drain(s: &mut Scheduler) -> Vec<(FlowClientId, i64, bool)> {
        std::iter::from_fn(|| s.next().map(|i| (i.client, i.seq.0, i.old))).collect()
    }

    fn params(priority: i32, reservation_pct: u32) -> WriterFlowParams {
        WriterFlowParams {
            priority,
            reservation_pct,
        }
    }

    #[test]
    fn test_fifo_new_before_old() {
        let mut s = Scheduler::new(SchedulerPolicy::Fifo, 0);
        s.register(1, WriterFlowParams::default());
        s.register(2, WriterFlowParams::default());
        assert!(s.add_old(1, sn(1)));
        assert!(s.add_new(2, sn(5)));
        assert!(s.add_new(1, sn(2)));
        assert_eq!(drain(&mut s), vec![(2, 5, false), (1, 2, false), (1, 1, true)]);
    }

    #[test]
    fn test_duplicate_is_skipped() {
        let mut s = Scheduler::new(SchedulerPolicy::Fifo, 0);
        s.register(1, WriterFlowParams::default());
        assert!(s.add_new(1, sn(1)));
        assert!(!s.add_new(1, sn(1)));
        assert!(!s.add_old(1, sn(1)));
        assert!(!s.add_new(9, sn(1)));
        assert_eq!(drain(&mut s).len(), 1);
    }

    #[test]
    fn test_round_robin_rotates() {
        let mut s = Scheduler::new(SchedulerPolicy::RoundRobin, 0);
        for id in 1..=3 {
            s.register(id, WriterFlowParams::default());
        }
        for seq in 1..=2 {
            s.add_new(1, sn(seq));
            s.add_new(3, sn(seq));
        }
        s.add_new(2, sn(1));
        let order: Vec<_> = drain(&mut s).into_iter().map(|(c, _, _)| c).collect();
        assert_eq!(order, vec![1, 2, 3, 1, 3]);
    }

    #[test]
    fn test_high_priority_order() {
        let mut s = Scheduler::new(SchedulerPolicy::HighPriority, 0);
        s.register(1, params(5, 0));
        s.register(2, params(-10, 0));
        s.add_new(1, sn(1));
        s.add_new(2, sn(1));
        s.add_old(2, sn(0));
        let order: Vec<_> = drain(&mut s).into_iter().map(|(c, _, old)| (c, old)).collect();
        assert_eq!(order, vec![(2, false), (2, true), (1, false)]);
    }

    #[test]
    fn test_reservation_served_first() {
        let mut s = Scheduler::new(SchedulerPolicy::PriorityWithReservation, 1000);
        s.register(1, params(-10, 0));
        s.register(2, params(10, 30));
        for seq in 1..=3 {
            s.add_new(1, sn(seq));
            s.add_new(2, sn(seq));
        }
        // Writer 2 is below its 300-byte reservation: it goes first despite
        // its low priority.
        assert_eq!(s.next().map(|i| i.client), Some(2));
        s.work_done(2, 300);
        assert_eq!(s.next().map(|i| i.client), Some(1));
        s.reset_period();
        assert_eq!(s.next().map(|i| i.client), Some(2));
    }

    #[test]
    fn test_push_front_keeps_position() {
        let mut s = Scheduler::new(SchedulerPolicy::Fifo, 0);
        s.register(1, WriterFlowParams::default());
        s.add_new(1, sn(1));
        s.add_new(1, sn(2));
        let first = s.next().expect("queued");
        s.push_front(first);
        assert_eq!(drain(&mut s), vec![(1, 1, false), (1, 2, false)]);
    }

    #[test]
    fn test_remove_and_remove_client() {
        let mut s = Scheduler::new(SchedulerPolicy::Fifo, 0);
        s.register(1, WriterFlowParams::default());
        s.register(2, WriterFlowParams::default());
        s.add_new(1, sn(1));
        s.add_new(1, sn(2));
        s.add_new(2, sn(1));
        s.remove(1, sn(1));
        s.remove_client(2);
        assert!(s.has_pending(1));
        assert!(!s.has_pending(2));
        assert_eq!(drain(&mut s), vec![(1, 2, false)]);
        assert!(s.is_empty());
    }
}
