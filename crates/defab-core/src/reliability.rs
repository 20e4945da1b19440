//! Equipment reliability: breakdowns, repairs and the maintenance crew.
//!
//! Each station-local equipment unit alternates between uptime (normal MTBF
//! draw) and repair (normal MTTR draw). Failures sampled to land outside
//! working hours are deferred to the next shift opening; repairs only
//! progress during the shift. Repairs compete for a bounded maintenance
//! crew, first come first served.

use std::collections::VecDeque;

use crate::config::SimulationParams;
use crate::id::{ResourceTypeId, StationId};
use crate::rng::{Stream, Streams};

/// One physical equipment unit subject to breakdowns.
#[derive(Debug, Clone)]
pub struct EquipmentUnit {
    pub station: StationId,
    pub ty: ResourceTypeId,
    /// Ordinal among units of the same type at the station.
    pub unit: u32,
    pub down: bool,
    /// Failures survived, for diagnostics.
    pub failures: u32,
}

/// Sample the next uptime stretch, minutes.
pub fn sample_mtbf(params: &SimulationParams, streams: &mut Streams) -> f64 {
    streams.normal(Stream::Breakdowns, params.mtbf_mu, params.mtbf_sigma)
}

/// Sample one repair duration, minutes.
pub fn sample_mttr(params: &SimulationParams, streams: &mut Streams) -> f64 {
    streams.normal(Stream::Breakdowns, params.mttr_mu, params.mttr_sigma)
}

/// A repair waiting for, or occupying, a maintenance slot. Indexes into the
/// engine's equipment-unit table.
pub type RepairTicket = usize;

/// Bounded repair capacity with a FIFO backlog.
#[derive(Debug)]
pub struct MaintenanceCrew {
    capacity: u32,
    busy: u32,
    queue: VecDeque<RepairTicket>,
}

impl MaintenanceCrew {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            busy: 0,
            queue: VecDeque::new(),
        }
    }

    /// Claim a slot for the ticket, or queue it. Returns whether the repair
    /// starts now.
    pub fn try_start(&mut self, ticket: RepairTicket) -> bool {
        if self.busy < self.capacity {
            self.busy += 1;
            true
        } else {
            self.queue.push_back(ticket);
            false
        }
    }

    /// Release a slot; the next queued ticket (if any) takes it immediately.
    pub fn finish(&mut self) -> Option<RepairTicket> {
        debug_assert!(self.busy > 0);
        self.busy = self.busy.saturating_sub(1);
        let next = self.queue.pop_front();
        if next.is_some() {
            self.busy += 1;
        }
        next
    }

    pub fn backlog(&self) -> usize {
        self.queue.len()
    }
}
