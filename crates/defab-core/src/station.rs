//! Disassembly stations.
//!
//! A station is a five-state machine (idle, busy, blocked, failed, closed)
//! with a time ledger, wrapped around a finer-grained work phase that records
//! exactly what the station is waiting for. Phases that wait on a timer carry
//! a completion token; bumping the token cancels the timer, which is how
//! breakdowns and shift ends pause work without losing progress.

use std::collections::{BTreeMap, BTreeSet};

use crate::id::{CompIdx, NodeRef, ProductId, ResourceTypeId, StationId, VariantId};
use crate::product::{ComponentStatus, Product, VariantTemplate};
use crate::resource::{Hold, Pool};
use crate::rng::Streams;
use crate::storage::{BufferZone, ExitLane, Item};
use crate::time::{Minutes, ShiftWindow};

// ---- public state and its ledger ----

/// The externally visible station state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationState {
    Idle,
    Busy,
    Blocked,
    Failed,
    Closed,
}

impl StationState {
    pub fn as_str(self) -> &'static str {
        match self {
            StationState::Idle => "idle",
            StationState::Busy => "busy",
            StationState::Blocked => "blocked",
            StationState::Failed => "failed",
            StationState::Closed => "closed",
        }
    }

    fn slot(self) -> usize {
        match self {
            StationState::Idle => 0,
            StationState::Busy => 1,
            StationState::Blocked => 2,
            StationState::Failed => 3,
            StationState::Closed => 4,
        }
    }
}

/// Accumulates time per state. The five totals always sum to the elapsed
/// time once the clock is closed out.
#[derive(Debug, Clone)]
pub struct StateClock {
    current: StationState,
    since: Minutes,
    started: Minutes,
    totals: [f64; 5],
}

impl StateClock {
    pub fn new(initial: StationState, now: Minutes) -> Self {
        Self {
            current: initial,
            since: now,
            started: now,
            totals: [0.0; 5],
        }
    }

    pub fn current(&self) -> StationState {
        self.current
    }

    pub fn enter(&mut self, state: StationState, now: Minutes) {
        if state == self.current {
            return;
        }
        self.totals[self.current.slot()] += now - self.since;
        self.current = state;
        self.since = now;
    }

    /// Settle the open interval, e.g. at the horizon.
    pub fn close_out(&mut self, now: Minutes) {
        self.totals[self.current.slot()] += now - self.since;
        self.since = now;
    }

    pub fn total(&self, state: StationState) -> f64 {
        self.totals[state.slot()]
    }

    /// Sum of all settled totals.
    pub fn accounted(&self) -> f64 {
        self.totals.iter().sum()
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self, now: Minutes) -> f64 {
        now - self.started
    }
}

// ---- steps ----

/// One disassembly capability of a station, keyed by component name.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub component: String,
    /// Condition gate for non-mandatory, non-blocking removals.
    pub min_condition: f64,
    /// Resource demands, acquired all-or-nothing.
    pub demands: Vec<(ResourceTypeId, u32)>,
}

// ---- phases ----

/// A step in flight: resources held, work possibly partially done.
#[derive(Debug, Clone)]
pub struct ActiveStep {
    pub comp: CompIdx,
    /// Full sampled duration of the unit.
    pub duration: Minutes,
    /// Minutes of work still owed (equals `duration` until a pause).
    pub remaining: Minutes,
    pub hold: Hold,
}

/// What the station is doing, finer-grained than [`StationState`].
#[derive(Debug, Clone)]
pub enum StationPhase {
    /// No product at the bench, entry possibly empty.
    Vacant,
    /// Moving a product from entry to the bench (handling + preparation).
    Fetching,
    /// Choosing the next component of the bench product.
    Scanning,
    /// A selected component's resource demands are not yet available.
    AwaitingResources { comp: CompIdx },
    /// Removing one unit of a component.
    Working(ActiveStep),
    /// Handling a detached part towards the store lane.
    StoringPart { item: Item },
    /// Handling the exhausted remainder towards an exit lane.
    RoutingOut { lane: ExitLane },
    /// An exit push found the lane full; waiting for space.
    BlockedExit { item: Item, lane: ExitLane, resume_scan: bool },
}

/// Work suspended by a breakdown or shift close. The phase itself stays in
/// place; only the cancelled timer's remainder needs saving.
#[derive(Debug, Clone, Copy)]
pub struct PausedWork {
    /// Minutes left on the phase timer, if the phase was timer-driven.
    pub timer_remaining: Option<Minutes>,
}

/// Why a component was chosen, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SelectClass {
    Mandatory,
    Blocking,
    Eligible,
}

impl SelectClass {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectClass::Mandatory => "mandatory",
            SelectClass::Blocking => "blocking",
            SelectClass::Eligible => "eligible",
        }
    }
}

/// Result of one bench scan.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub selected: Option<(CompIdx, SelectClass)>,
    /// Missing components encountered for the first time.
    pub newly_missing: Vec<CompIdx>,
    /// Components passed over for low condition (and their abandoned
    /// dependents, transitively).
    pub newly_skipped: Vec<CompIdx>,
}

// ---- the station ----

#[derive(Debug)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub shift: ShiftWindow,
    pub predecessors: Vec<NodeRef>,
    pub steps: Vec<StepSpec>,
    step_index: BTreeMap<String, usize>,
    /// Variant allow-list; `None` accepts every variant.
    pub allowed_variants: Option<BTreeSet<VariantId>>,
    pub preparation_time: Minutes,
    pub order_threshold: u32,
    pub entry: BufferZone,
    pub exit_next: BufferZone,
    pub exit_store: BufferZone,
    pub local: Pool,
    pub clock: StateClock,
    pub bench: Option<ProductId>,
    pub phase: StationPhase,
    pub paused: Option<PausedWork>,
    /// Completion token; stale timer events carry an older value.
    pub token: u64,
    /// Absolute due time of the outstanding phase timer.
    pub timer_due: Option<Minutes>,
    pub open_orders: u32,
    /// Down equipment units withdrawn out of this station's current hold.
    pub down_holds: u32,
    /// Set while queued in the resource wait line.
    pub waiting_for_resources: bool,
    pub products_processed: u64,
    pub units_removed: u64,
}

impl Station {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: StationId,
        name: String,
        shift: ShiftWindow,
        steps: Vec<StepSpec>,
        allowed_variants: Option<BTreeSet<VariantId>>,
        preparation_time: Minutes,
        order_threshold: u32,
        entry_capacity: u32,
        exit_next_capacity: u32,
        exit_store_capacity: u32,
        local: Pool,
        now: Minutes,
    ) -> Self {
        let step_index = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.component.clone(), i))
            .collect();
        let initial = if shift.contains(now) {
            StationState::Idle
        } else {
            StationState::Closed
        };
        Self {
            id,
            name,
            shift,
            predecessors: Vec::new(),
            steps,
            step_index,
            allowed_variants,
            preparation_time,
            order_threshold,
            entry: BufferZone::new(entry_capacity),
            exit_next: BufferZone::new(exit_next_capacity),
            exit_store: BufferZone::new(exit_store_capacity),
            local,
            clock: StateClock::new(initial, now),
            bench: None,
            phase: StationPhase::Vacant,
            paused: None,
            token: 0,
            timer_due: None,
            open_orders: 0,
            down_holds: 0,
            waiting_for_resources: false,
            products_processed: 0,
            units_removed: 0,
        }
    }

    pub fn state(&self) -> StationState {
        self.clock.current()
    }

    pub fn step_for(&self, component: &str) -> Option<&StepSpec> {
        self.step_index.get(component).map(|&i| &self.steps[i])
    }

    pub fn has_step(&self, component: &str) -> bool {
        self.step_index.contains_key(component)
    }

    pub fn accepts_variant(&self, variant: VariantId) -> bool {
        self.allowed_variants
            .as_ref()
            .is_none_or(|allowed| allowed.contains(&variant))
    }

    /// Whether a product still has work this station can do.
    pub fn can_work_on(&self, product: &Product, template: &VariantTemplate) -> bool {
        self.accepts_variant(product.variant)
            && product
                .workable()
                .any(|idx| self.has_step(&template.spec(idx).name))
    }

    /// Whether the entry has run low enough to order more material. Open
    /// order caps are the engine's concern.
    pub fn wants_material(&self) -> bool {
        (self.entry.len() as u32) < self.order_threshold && self.entry.has_space()
    }

    /// Invalidate the outstanding phase timer and hand out a fresh token.
    pub fn next_token(&mut self) -> u64 {
        self.token += 1;
        self.timer_due = None;
        self.token
    }

    /// Pick the next component of the bench product: mandatory before
    /// blocking before eligible, structural order within a class. Missing
    /// components are reported once; low-condition removables are skipped
    /// together with their dependents.
    pub fn scan(
        &self,
        product: &mut Product,
        template: &VariantTemplate,
        streams: &mut Streams,
    ) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let mut best: Option<(SelectClass, CompIdx)> = None;
        for i in 0..template.components.len() {
            let idx = CompIdx(i as u32);
            match product.component(idx).status {
                ComponentStatus::Missing => {
                    if !product.component(idx).missing_logged {
                        product.components[i].missing_logged = true;
                        outcome.newly_missing.push(idx);
                    }
                    continue;
                }
                ComponentStatus::Disassembled => continue,
                _ => {}
            }
            if product.component(idx).skipped {
                continue;
            }
            let spec = template.spec(idx);
            let Some(step) = self.step_for(&spec.name) else {
                continue;
            };
            if !product.component(idx).blocked_by.is_empty() {
                continue;
            }
            let class = if spec.mandatory {
                SelectClass::Mandatory
            } else if product.is_blocking(idx) {
                SelectClass::Blocking
            } else {
                let condition = product.condition_of(idx, template, streams);
                if condition >= step.min_condition {
                    SelectClass::Eligible
                } else {
                    outcome.newly_skipped.extend(product.skip(idx));
                    continue;
                }
            };
            // Structural order within a class: only a strictly better class
            // displaces an earlier find.
            if best.is_none_or(|(held, _)| class < held) {
                best = Some((class, idx));
            }
        }
        outcome.selected = best.map(|(class, idx)| (idx, class));
        outcome
    }

    /// Duration of one unit removal: the ideal time stretched by how far the
    /// component condition falls short of perfect.
    pub fn processing_time(ideal: f64, condition: f64, scale: f64) -> Minutes {
        ideal + (1.0 - condition) * (scale - 1.0) * ideal
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;
    use crate::id::VariantId;
    use crate::product::ComponentSpec;
    use crate::rng::{BehaviorMode, Streams};

    fn spec(name: &str, mandatory: bool, blocked_by: Vec<CompIdx>) -> ComponentSpec {
        ComponentSpec {
            name: name.into(),
            group: None,
            time_ideal: 6.0,
            quantity: 1,
            mandatory,
            blocked_by,
            cond_dev: (0.0, 0.0, 0.0),
            prob_missing: 0.0,
            transport_units: 1,
        }
    }

    fn template() -> VariantTemplate {
        VariantTemplate {
            id: VariantId(0),
            name: "washer".into(),
            volume_per_week: (40.0, 50.0, 60.0),
            lot_size: 1,
            condition: (0.4, 0.7, 0.95),
            transport_units: 1,
            components: vec![
                spec("shell", false, vec![]),
                spec("lid", true, vec![]),
                spec("drum", false, vec![CompIdx(1)]),
            ],
        }
    }

    fn station_with_steps(steps: Vec<StepSpec>) -> Station {
        Station::new(
            StationId(0),
            "station_0".into(),
            ShiftWindow::new(0.0, 24.0),
            steps,
            None,
            0.0,
            2,
            5,
            5,
            5,
            Pool::default(),
            0.0,
        )
    }

    fn step(component: &str, min_condition: f64) -> StepSpec {
        StepSpec {
            component: component.into(),
            min_condition,
            demands: vec![],
        }
    }

    fn full_station() -> Station {
        station_with_steps(vec![step("shell", 0.5), step("lid", 0.0), step("drum", 0.5)])
    }

    // ---- 1. state clock ----

    #[test]
    fn state_clock_accounts_every_minute() {
        let mut clock = StateClock::new(StationState::Closed, 0.0);
        clock.enter(StationState::Idle, 10.0);
        clock.enter(StationState::Busy, 15.0);
        clock.enter(StationState::Busy, 20.0); // same-state no-op
        clock.enter(StationState::Idle, 30.0);
        clock.close_out(42.0);
        assert_eq!(clock.total(StationState::Closed), 10.0);
        assert_eq!(clock.total(StationState::Busy), 15.0);
        assert_eq!(clock.total(StationState::Idle), 17.0);
        assert_eq!(clock.accounted(), clock.elapsed(42.0));
    }

    // ---- 2. selection priority ----

    #[test]
    fn mandatory_beats_blocking_beats_eligible() {
        let station = full_station();
        let t = template();
        let mut streams = Streams::new(1, BehaviorMode::Deterministic);
        let mut p = Product::new(1, &t, 0.9, 0.0, &mut streams);
        // shell is eligible, lid is mandatory (and blocks drum)
        let outcome = station.scan(&mut p, &t, &mut streams);
        assert_eq!(outcome.selected, Some((CompIdx(1), SelectClass::Mandatory)));

        p.unit_removed(CompIdx(1), &t);
        // drum is now pending; nothing blocks, shell precedes drum structurally
        let outcome = station.scan(&mut p, &t, &mut streams);
        assert_eq!(outcome.selected, Some((CompIdx(0), SelectClass::Eligible)));
    }

    #[test]
    fn blocking_component_wins_over_earlier_eligible() {
        // lid not mandatory here, but it blocks drum
        let station = full_station();
        let mut t = template();
        t.components[1].mandatory = false;
        let mut streams = Streams::new(1, BehaviorMode::Deterministic);
        let mut p = Product::new(1, &t, 0.9, 0.0, &mut streams);
        let outcome = station.scan(&mut p, &t, &mut streams);
        assert_eq!(outcome.selected, Some((CompIdx(1), SelectClass::Blocking)));
    }

    #[test]
    fn blocked_components_are_not_selectable() {
        let station = station_with_steps(vec![step("drum", 0.0)]);
        let t = template();
        let mut streams = Streams::new(1, BehaviorMode::Deterministic);
        let mut p = Product::new(1, &t, 0.9, 0.0, &mut streams);
        // drum is the only step here, and it is blocked by the lid
        let outcome = station.scan(&mut p, &t, &mut streams);
        assert_eq!(outcome.selected, None);
        assert!(outcome.newly_skipped.is_empty());
    }

    #[test]
    fn low_condition_skips_and_abandons_dependents() {
        let station = full_station();
        let mut t = template();
        // nothing mandatory; shell gated at 0.95 which a 0.3 product misses
        t.components[1].mandatory = false;
        let station = {
            let mut s = station;
            s.steps[0].min_condition = 0.95;
            s.steps[2].min_condition = 0.0;
            s.step_index = s
                .steps
                .iter()
                .enumerate()
                .map(|(i, st)| (st.component.clone(), i))
                .collect();
            s
        };
        let mut streams = Streams::new(1, BehaviorMode::Deterministic);
        let mut p = Product::new(1, &t, 0.3, 0.0, &mut streams);
        p.unit_removed(CompIdx(1), &t); // lid gone, drum unblocked
        let outcome = station.scan(&mut p, &t, &mut streams);
        // shell skipped for condition; drum eligible
        assert_eq!(outcome.newly_skipped, vec![CompIdx(0)]);
        assert_eq!(outcome.selected, Some((CompIdx(2), SelectClass::Eligible)));
    }

    #[test]
    fn missing_components_logged_once() {
        let station = full_station();
        let mut t = template();
        t.components[0].prob_missing = 1.0;
        let mut streams = Streams::new(1, BehaviorMode::Seeded);
        let mut p = Product::new(1, &t, 0.9, 0.0, &mut streams);
        let first = station.scan(&mut p, &t, &mut streams);
        assert_eq!(first.newly_missing, vec![CompIdx(0)]);
        let second = station.scan(&mut p, &t, &mut streams);
        assert!(second.newly_missing.is_empty());
    }

    // ---- 3. misc ----

    #[test]
    fn processing_time_stretches_with_poor_condition() {
        assert_eq!(Station::processing_time(10.0, 1.0, 1.5), 10.0);
        assert_eq!(Station::processing_time(10.0, 0.0, 1.5), 15.0);
        assert_eq!(Station::processing_time(10.0, 0.5, 2.0), 15.0);
    }

    #[test]
    fn variant_allow_list_filters_products() {
        let mut station = full_station();
        assert!(station.accepts_variant(VariantId(0)));
        station.allowed_variants = Some([VariantId(1)].into_iter().collect());
        assert!(!station.accepts_variant(VariantId(0)));
        assert!(station.accepts_variant(VariantId(1)));
    }

    #[test]
    fn wants_material_only_below_the_entry_threshold() {
        let mut station = full_station();
        let mut arena: SlotMap<ProductId, ()> = SlotMap::with_key();
        assert!(station.wants_material());
        assert!(station.entry.push(Item::product(arena.insert(()))));
        assert!(station.wants_material());
        // full_station orders below 2; at the threshold the urge stops
        assert!(station.entry.push(Item::product(arena.insert(()))));
        assert!(!station.wants_material());
    }

    #[test]
    fn starts_closed_outside_shift() {
        let station = Station::new(
            StationId(1),
            "s".into(),
            ShiftWindow::new(7.0, 16.0),
            vec![],
            None,
            0.0,
            1,
            1,
            1,
            1,
            Pool::default(),
            0.0,
        );
        assert_eq!(station.state(), StationState::Closed);
    }
}
