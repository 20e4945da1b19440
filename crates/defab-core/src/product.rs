//! Product variants and live product instances.
//!
//! A [`VariantTemplate`] is the immutable, interned form of a configured
//! variant: components flattened out of the structure tree into declaration
//! order (structural order), with `blocked_by` resolved to indices. A
//! [`Product`] is one live instance moving through the factory.

use crate::id::{CompIdx, VariantId};
use crate::rng::{Stream, Streams};
use crate::time::Minutes;

// ---- templates ----

/// One removable component kind within a variant.
#[derive(Debug, Clone)]
pub struct ComponentSpec {
    pub name: String,
    /// Group path in the structure tree, empty for top-level components.
    pub group: Option<String>,
    /// Ideal disassembly time per unit at condition 1.0, minutes.
    pub time_ideal: f64,
    pub quantity: u32,
    pub mandatory: bool,
    /// Components that must be resolved before this one, as indices.
    pub blocked_by: Vec<CompIdx>,
    /// Triangular deviation added to the product condition.
    pub cond_dev: (f64, f64, f64),
    pub prob_missing: f64,
    pub transport_units: u32,
}

#[derive(Debug, Clone)]
pub struct VariantTemplate {
    pub id: VariantId,
    pub name: String,
    /// Weekly arrival volume, triangular.
    pub volume_per_week: (f64, f64, f64),
    pub lot_size: u32,
    /// Product condition at arrival, triangular.
    pub condition: (f64, f64, f64),
    pub transport_units: u32,
    /// Structural order: index is `CompIdx`.
    pub components: Vec<ComponentSpec>,
}

impl VariantTemplate {
    pub fn spec(&self, idx: CompIdx) -> &ComponentSpec {
        &self.components[idx.index()]
    }
}

// ---- live state ----

/// Lifecycle of one component instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentStatus {
    /// Removable once a station gets to it.
    Pending,
    /// Waiting on unresolved `blocked_by` edges.
    Blocked,
    /// Selected for removal at a station.
    Eligible,
    /// Absent since creation.
    Missing,
    /// Fully removed (all units).
    Disassembled,
}

/// One component instance within a live product.
#[derive(Debug, Clone)]
pub struct Component {
    pub status: ComponentStatus,
    /// Unresolved blockers; pruned as blockers resolve.
    pub blocked_by: Vec<CompIdx>,
    /// Sampled lazily at first inspection.
    pub condition: Option<f64>,
    /// Units removed so far, out of the configured quantity.
    pub units_done: u32,
    /// Passed over for low condition; never retried anywhere.
    pub skipped: bool,
    /// A missing component is logged once, at first inspection.
    pub missing_logged: bool,
}

/// Where a product's remainder currently is, for bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductLocation {
    Source,
    InTransit,
    AtElement,
    Bench,
    Exited,
}

/// A live product instance.
#[derive(Debug, Clone)]
pub struct Product {
    pub case_id: u64,
    pub variant: VariantId,
    pub arrived_at: Minutes,
    /// Overall condition in [0, 1], sampled at creation.
    pub condition: f64,
    pub components: Vec<Component>,
    pub location: ProductLocation,
}

/// Residual component census, reported at system exit and at the horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Census {
    pub disassembled: usize,
    pub missing: usize,
    pub skipped: usize,
    pub pending: usize,
}

impl Census {
    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.skipped == 0
    }
}

impl Product {
    /// Instantiate a product: sample missing components (components stream)
    /// and clear the dangling `blocked_by` edges they leave behind.
    pub fn new(
        case_id: u64,
        template: &VariantTemplate,
        condition: f64,
        arrived_at: Minutes,
        streams: &mut Streams,
    ) -> Self {
        let mut components: Vec<Component> = template
            .components
            .iter()
            .map(|spec| {
                let missing = spec.prob_missing > 0.0
                    && streams.chance(Stream::Components, spec.prob_missing);
                Component {
                    status: if missing {
                        ComponentStatus::Missing
                    } else if spec.blocked_by.is_empty() {
                        ComponentStatus::Pending
                    } else {
                        ComponentStatus::Blocked
                    },
                    blocked_by: spec.blocked_by.clone(),
                    condition: None,
                    units_done: 0,
                    skipped: false,
                    missing_logged: false,
                }
            })
            .collect();

        // Missing components can never block anything.
        let absent: Vec<CompIdx> = (0..components.len())
            .filter(|&i| components[i].status == ComponentStatus::Missing)
            .map(|i| CompIdx(i as u32))
            .collect();
        for comp in &mut components {
            comp.blocked_by.retain(|b| !absent.contains(b));
            if comp.status == ComponentStatus::Blocked && comp.blocked_by.is_empty() {
                comp.status = ComponentStatus::Pending;
            }
        }

        Self {
            case_id,
            variant: template.id,
            arrived_at,
            condition,
            components,
            location: ProductLocation::Source,
        }
    }

    pub fn component(&self, idx: CompIdx) -> &Component {
        &self.components[idx.index()]
    }

    /// Still physically present and not yet fully removed.
    pub fn is_live(&self, idx: CompIdx) -> bool {
        !matches!(
            self.component(idx).status,
            ComponentStatus::Missing | ComponentStatus::Disassembled
        )
    }

    /// Lazily sample the component condition: product condition plus a
    /// triangular deviation (quality stream), clamped to [0, 1].
    pub fn condition_of(
        &mut self,
        idx: CompIdx,
        template: &VariantTemplate,
        streams: &mut Streams,
    ) -> f64 {
        if let Some(c) = self.components[idx.index()].condition {
            return c;
        }
        let (min, mode, max) = template.spec(idx).cond_dev;
        let dev = streams.triangular(Stream::Quality, min, mode, max);
        let c = (self.condition + dev).clamp(0.0, 1.0);
        self.components[idx.index()].condition = Some(c);
        c
    }

    /// Record one removed unit. Returns true when the component is now fully
    /// disassembled, in which case its outgoing edges are pruned.
    pub fn unit_removed(&mut self, idx: CompIdx, template: &VariantTemplate) -> bool {
        let comp = &mut self.components[idx.index()];
        comp.units_done += 1;
        if comp.units_done >= template.spec(idx).quantity {
            comp.status = ComponentStatus::Disassembled;
            self.prune_blocker(idx);
            true
        } else {
            false
        }
    }

    /// Skip a component for low condition, abandoning the components it
    /// blocks. Abandonment is transitive: a component blocked only by skipped
    /// work can never become removable. Returns every newly skipped index,
    /// the argument first.
    pub fn skip(&mut self, idx: CompIdx) -> Vec<CompIdx> {
        self.components[idx.index()].skipped = true;
        let mut marked = vec![idx];
        let mut cursor = 0;
        while cursor < marked.len() {
            let cause = marked[cursor];
            cursor += 1;
            for i in 0..self.components.len() {
                let comp = &mut self.components[i];
                if !comp.skipped && comp.blocked_by.contains(&cause) {
                    comp.skipped = true;
                    marked.push(CompIdx(i as u32));
                }
            }
        }
        marked
    }

    /// Remove `idx` from every component's blocker list, promoting newly
    /// unblocked components to pending.
    fn prune_blocker(&mut self, idx: CompIdx) {
        for comp in &mut self.components {
            comp.blocked_by.retain(|b| *b != idx);
            if comp.status == ComponentStatus::Blocked && comp.blocked_by.is_empty() {
                comp.status = ComponentStatus::Pending;
            }
        }
    }

    /// Whether some other live, unskipped component still lists `idx` as a
    /// blocker. Such a component is removed regardless of its condition.
    pub fn is_blocking(&self, idx: CompIdx) -> bool {
        self.components.iter().enumerate().any(|(i, comp)| {
            i != idx.index()
                && !comp.skipped
                && !matches!(
                    comp.status,
                    ComponentStatus::Missing | ComponentStatus::Disassembled
                )
                && comp.blocked_by.contains(&idx)
        })
    }

    pub fn census(&self) -> Census {
        let mut census = Census::default();
        for comp in &self.components {
            match comp.status {
                ComponentStatus::Disassembled => census.disassembled += 1,
                ComponentStatus::Missing => census.missing += 1,
                _ if comp.skipped => census.skipped += 1,
                _ => census.pending += 1,
            }
        }
        census
    }

    /// Live, unskipped components still awaiting removal.
    pub fn workable(&self) -> impl Iterator<Item = CompIdx> + '_ {
        self.components
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                !c.skipped
                    && !matches!(
                        c.status,
                        ComponentStatus::Missing | ComponentStatus::Disassembled
                    )
            })
            .map(|(i, _)| CompIdx(i as u32))
    }
}
