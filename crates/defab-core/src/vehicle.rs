//! Transport vehicles.
//!
//! Each vehicle serves a FIFO queue of transport orders: drive to the origin,
//! load compatible items up to capacity (paying a per-item loading time),
//! drive to the destination, unload per item into its entry buffer. A full
//! destination entry suspends the vehicle mid-unload; capacity is never
//! overrun in transit either.

use std::collections::VecDeque;

use crate::id::{NodeRef, VehicleId};
use crate::storage::{ExitLane, Item};
use crate::time::Minutes;

/// A request to move material from one element's exit lane to another
/// element's entry buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportOrder {
    pub id: u64,
    pub origin: NodeRef,
    pub lane: ExitLane,
    pub dest: NodeRef,
    /// Element whose open-order budget this order occupies.
    pub holder: NodeRef,
}

/// What the vehicle is doing right now. Timer-driven phases carry the token
/// of the completion event they are waiting for.
#[derive(Debug, Clone, PartialEq)]
pub enum VehiclePhase {
    Idle,
    /// Driving empty to the order's origin.
    ToOrigin { order: TransportOrder },
    /// At the origin, loading one item per timer tick.
    Loading { order: TransportOrder },
    /// Driving loaded to the destination.
    ToDest { order: TransportOrder },
    /// At the destination, unloading one item per timer tick.
    Unloading { order: TransportOrder },
    /// Destination entry is full; waiting for space.
    BlockedUnloading { order: TransportOrder },
}

#[derive(Debug)]
pub struct Vehicle {
    pub id: VehicleId,
    pub name: String,
    /// Distance units per minute.
    pub speed: f64,
    /// Carrying capacity in transport units.
    pub capacity: u32,
    pub location: NodeRef,
    pub phase: VehiclePhase,
    pub queue: VecDeque<TransportOrder>,
    pub cargo: Vec<Item>,
    /// The item currently being loaded or unloaded.
    pub in_hand: Option<Item>,
    /// Transport units currently aboard.
    pub used_units: u32,
    /// Invalidates stale timer completions after a phase change.
    pub token: u64,
    /// Minutes spent on order service, for utilization queries.
    pub busy_time: f64,
    pub busy_since: Option<Minutes>,
}

impl Vehicle {
    pub fn new(id: VehicleId, name: String, speed: f64, capacity: u32, location: NodeRef) -> Self {
        Self {
            id,
            name,
            speed,
            capacity,
            location,
            phase: VehiclePhase::Idle,
            queue: VecDeque::new(),
            cargo: Vec::new(),
            in_hand: None,
            used_units: 0,
            token: 0,
            busy_time: 0.0,
            busy_since: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, VehiclePhase::Idle)
    }

    /// Minutes to cover `distance` at this vehicle's speed.
    pub fn travel_time(&self, distance: f64) -> Minutes {
        distance / self.speed
    }

    /// Whether an item of `units` transport units still fits aboard.
    pub fn fits(&self, units: u32) -> bool {
        self.used_units + units <= self.capacity
    }

    /// Invalidate any outstanding timer and hand out a fresh token.
    pub fn next_token(&mut self) -> u64 {
        self.token += 1;
        self.token
    }

    pub fn mark_busy(&mut self, now: Minutes) {
        if self.busy_since.is_none() {
            self.busy_since = Some(now);
        }
    }

    pub fn mark_idle(&mut self, now: Minutes) {
        if let Some(since) = self.busy_since.take() {
            self.busy_time += now - since;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ProductId, StationId, StorageId};
    use slotmap::SlotMap;

    fn vehicle() -> Vehicle {
        Vehicle::new(
            VehicleId(0),
            "agv_0".into(),
            60.0,
            3,
            NodeRef::Storage(StorageId(0)),
        )
    }

    #[test]
    fn travel_time_scales_with_distance() {
        let v = vehicle();
        assert_eq!(v.travel_time(120.0), 2.0);
        assert_eq!(v.travel_time(0.0), 0.0);
    }

    #[test]
    fn capacity_is_in_transport_units() {
        let mut v = vehicle();
        assert!(v.fits(3));
        v.used_units = 2;
        assert!(v.fits(1));
        assert!(!v.fits(2));
    }

    #[test]
    fn tokens_invalidate_previous_timers() {
        let mut v = vehicle();
        let t1 = v.next_token();
        let t2 = v.next_token();
        assert_ne!(t1, t2);
        assert_eq!(v.token, t2);
    }

    #[test]
    fn busy_time_accumulates_between_marks() {
        let mut v = vehicle();
        v.mark_busy(10.0);
        v.mark_busy(12.0); // no-op while already busy
        v.mark_idle(25.0);
        assert_eq!(v.busy_time, 15.0);
        v.mark_idle(30.0); // no-op while idle
        assert_eq!(v.busy_time, 15.0);
    }

    #[test]
    fn orders_queue_fifo() {
        let mut v = vehicle();
        let mut products: SlotMap<ProductId, ()> = SlotMap::with_key();
        let _ = products.insert(());
        let order = |id| TransportOrder {
            id,
            origin: NodeRef::Station(StationId(0)),
            lane: ExitLane::Next,
            dest: NodeRef::Storage(StorageId(1)),
            holder: NodeRef::Storage(StorageId(1)),
        };
        v.queue.push_back(order(1));
        v.queue.push_back(order(2));
        assert_eq!(v.queue.pop_front().unwrap().id, 1);
        assert_eq!(v.queue.pop_front().unwrap().id, 2);
    }
}
