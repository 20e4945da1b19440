//! The future event list.
//!
//! A binary heap of scheduled wakes ordered by `(timestamp, insertion
//! sequence)`. The sequence counter is global and monotone, so two wakes at
//! the same instant fire in the order they were scheduled, which keeps runs
//! reproducible and gives FIFO fairness at ties.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::id::{NodeRef, StationId, StorageId, VariantId, VehicleId};
use crate::storage::RelayStage;
use crate::time::Minutes;

/// What to do when a scheduled instant arrives. Timer wakes carry a token;
/// a token older than the owner's current one marks a cancelled timer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wake {
    /// Stochastic source: emit the next lot of a variant.
    SourceBatch { variant: VariantId },
    /// Scheduled source: emit one fixed delivery.
    SourceDelivery { index: usize },
    /// Pull-mode replenishment check for a node's entry buffer.
    OrderCheck { node: NodeRef },
    /// Push-mode dispatch check for a node's exit buffers.
    PushCheck { node: NodeRef },
    /// A storage finished handling one item between zones.
    RelayTimer { storage: StorageId, stage: RelayStage },
    /// Re-evaluate a station's phase (fetch, retry acquire, retry push).
    StationCheck { station: StationId },
    /// A station phase timer elapsed.
    StationTimer { station: StationId, token: u64 },
    /// A vehicle phase timer elapsed.
    VehicleTimer { vehicle: VehicleId, token: u64 },
    /// An equipment unit fails (deferred outside working hours).
    Failure { unit: usize },
    /// An equipment unit's repair completes.
    RepairDone { unit: usize },
    ShiftStart,
    ShiftEnd,
    /// Periodic buffer-occupancy snapshot.
    MonitorTick,
}

/// One heap entry.
#[derive(Debug, Clone, Copy)]
pub struct Scheduled {
    pub time: Minutes,
    pub seq: u64,
    pub wake: Wake,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of future wakes with a monotone sequence counter.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Scheduled>>,
    seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, time: Minutes, wake: Wake) {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(Reverse(Scheduled { time, seq, wake }));
    }

    pub fn pop(&mut self) -> Option<Scheduled> {
        self.heap.pop().map(|Reverse(s)| s)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_time_order() {
        let mut q = EventQueue::new();
        q.schedule(5.0, Wake::ShiftEnd);
        q.schedule(1.0, Wake::ShiftStart);
        q.schedule(3.0, Wake::MonitorTick);
        assert_eq!(q.pop().unwrap().wake, Wake::ShiftStart);
        assert_eq!(q.pop().unwrap().wake, Wake::MonitorTick);
        assert_eq!(q.pop().unwrap().wake, Wake::ShiftEnd);
        assert!(q.pop().is_none());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut q = EventQueue::new();
        q.schedule(2.0, Wake::StationCheck {
            station: StationId(0),
        });
        q.schedule(2.0, Wake::StationCheck {
            station: StationId(1),
        });
        q.schedule(2.0, Wake::StationCheck {
            station: StationId(2),
        });
        for expect in 0..3 {
            match q.pop().unwrap().wake {
                Wake::StationCheck { station } => assert_eq!(station, StationId(expect)),
                other => panic!("unexpected wake {other:?}"),
            }
        }
    }

    #[test]
    fn interleaved_schedules_keep_total_order() {
        let mut q = EventQueue::new();
        q.schedule(4.0, Wake::ShiftEnd);
        q.schedule(4.0, Wake::ShiftStart);
        q.schedule(0.5, Wake::MonitorTick);
        let first = q.pop().unwrap();
        assert_eq!(first.time, 0.5);
        // both at t=4.0: ShiftEnd was scheduled first
        assert_eq!(q.pop().unwrap().wake, Wake::ShiftEnd);
        assert_eq!(q.pop().unwrap().wake, Wake::ShiftStart);
    }

    #[test]
    fn len_tracks_outstanding_wakes() {
        let mut q = EventQueue::new();
        assert!(q.is_empty());
        q.schedule(1.0, Wake::MonitorTick);
        q.schedule(2.0, Wake::MonitorTick);
        assert_eq!(q.len(), 2);
        q.pop();
        assert_eq!(q.len(), 1);
    }
}
