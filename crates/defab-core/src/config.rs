//! Configuration model.
//!
//! The engine consumes one fully-merged configuration document: runtime
//! parameters, variant templates, factory layout, distance matrix, resource
//! catalog and (optionally) a fixed delivery schedule. Everything here is
//! plain serde data; cross-reference checking lives in [`crate::validation`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rng::BehaviorMode;

// ---- errors ----

/// Fatal configuration problems. All raised before the clock starts; a
/// running simulation never errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("variant {variant:?}: blocked_by cycle involving component {component:?}")]
    CyclicBlockedBy { variant: String, component: String },
    #[error("variant {variant:?}: component {component:?} references unknown blocker {reference:?}")]
    UnknownBlockedBy {
        variant: String,
        component: String,
        reference: String,
    },
    #[error("variant {variant:?}: duplicate component name {component:?}")]
    DuplicateComponent { variant: String, component: String },
    #[error("duplicate element name {name:?}")]
    DuplicateElement { name: String },
    #[error("station {station:?}, step {step:?}: unknown resource type {resource:?}")]
    UnknownResource {
        station: String,
        step: String,
        resource: String,
    },
    #[error(
        "station {station:?}, step {step:?}: demands {needed} of {resource:?} but only {total} exist"
    )]
    InsufficientResource {
        station: String,
        step: String,
        resource: String,
        needed: u32,
        total: u32,
    },
    #[error("station {station:?} allows unknown variant {variant:?}")]
    UnknownVariant { station: String, variant: String },
    #[error("element {element:?} lists unknown predecessor {reference:?}")]
    UnknownPredecessor { element: String, reference: String },
    #[error("vehicle {vehicle:?} starts at unknown location {location:?}")]
    UnknownLocation { vehicle: String, location: String },
    #[error("distance matrix is missing the pair ({a:?}, {b:?})")]
    MissingDistance { a: String, b: String },
    #[error("distance matrix is asymmetric for ({a:?}, {b:?}): {forward} vs {backward}")]
    AsymmetricDistance {
        a: String,
        b: String,
        forward: f64,
        backward: f64,
    },
    #[error("{context}: condition value {value} outside [0, 1]")]
    ConditionOutOfRange { context: String, value: f64 },
    #[error("{context}: triangular parameters must satisfy min <= mode <= max")]
    BadTriangular { context: String },
    #[error("{context}: capacity must be at least 1")]
    InvalidCapacity { context: String },
    #[error("{context}: value must be positive")]
    NonPositive { context: String },
    #[error("shift window must satisfy 0 <= start < end <= 24, got {start}..{end}")]
    InvalidShiftWindow { start: f64, end: f64 },
    #[error("delivery schedule entry {index} references unknown variant {variant:?}")]
    UnknownScheduleVariant { index: usize, variant: String },
    #[error("no variants configured")]
    NoVariants,
    #[error("no incoming storage configured")]
    NoIncomingStorage,
    #[error("no outgoing storage configured")]
    NoOutgoingStorage,
    #[error("no vehicles configured")]
    NoVehicles,
}

// ---- runtime parameters ----

/// How material moves between elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowMode {
    /// Downstream elements order material when their entry runs low.
    #[default]
    Pull,
    /// Upstream elements push material to successors below threshold.
    Push,
}

/// Which product a station fetches first from its entry buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionOrder {
    /// First-in-first-out by arrival.
    #[default]
    Arrival,
    /// Best condition first.
    ConditionDescending,
}

/// How products arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Sampled weekly volumes with lot batching.
    #[default]
    Stochastic,
    /// Fixed list of timed deliveries.
    Scheduled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    pub weeks: u32,
    pub seed: u64,
    pub behavior_mode: BehaviorMode,
    pub flow_mode: FlowMode,
    pub selection_order: SelectionOrder,
    pub delivery_mode: DeliveryMode,
    /// Multiplier applied to ideal step times at condition 0.
    pub scale_disassembly_time: f64,
    /// Minutes per item movement into/out of a zone.
    pub handling_time: f64,
    /// Minutes per item loaded or unloaded by a vehicle.
    pub loading_time: f64,
    /// Daily shift opening, hours.
    pub start_of_day: f64,
    /// Daily shift closing, hours.
    pub end_of_day: f64,
    /// Default entry-buffer order threshold for elements that omit their own.
    pub entry_order_threshold: u32,
    /// Minutes between pull ordering checks.
    pub order_check_frequency: f64,
    /// Minutes between push checks (push mode).
    pub push_check_frequency: f64,
    /// Minutes between buffer-occupancy snapshots. 0 disables monitoring.
    pub monitoring_frequency: f64,
    /// Mean and spread of equipment time-between-failures, minutes.
    pub mtbf_mu: f64,
    pub mtbf_sigma: f64,
    /// Mean and spread of repair durations, minutes.
    pub mttr_mu: f64,
    pub mttr_sigma: f64,
    /// Parallel repair capacity of the maintenance crew.
    pub maintenance_capacity: u32,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            weeks: 1,
            seed: 0,
            behavior_mode: BehaviorMode::Seeded,
            flow_mode: FlowMode::Pull,
            selection_order: SelectionOrder::Arrival,
            delivery_mode: DeliveryMode::Stochastic,
            scale_disassembly_time: 1.5,
            handling_time: 0.5,
            loading_time: 1.0,
            start_of_day: 7.0,
            end_of_day: 16.0,
            entry_order_threshold: 3,
            order_check_frequency: 60.0,
            push_check_frequency: 30.0,
            monitoring_frequency: 0.0,
            mtbf_mu: 2400.0,
            mtbf_sigma: 240.0,
            mttr_mu: 60.0,
            mttr_sigma: 15.0,
            maintenance_capacity: 1,
        }
    }
}

// ---- variants and structure ----

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    /// Ideal disassembly time at condition 1.0, minutes.
    pub time: f64,
    #[serde(default = "one")]
    pub quantity: u32,
    #[serde(default)]
    pub mandatory: bool,
    /// Names of components that must be removed first.
    #[serde(default)]
    pub blocked_by: Vec<String>,
    /// Triangular deviation of component condition from product condition.
    #[serde(default)]
    pub condition_dev: Triangular,
    /// Probability the component is absent at product creation.
    #[serde(default)]
    pub prob_missing: f64,
    /// Transport capacity units one detached unit occupies.
    #[serde(default = "one")]
    pub transport_units: u32,
}

/// A node in a variant's structure tree: a removable component or a named
/// group of them. Groups only organize the tree; flow treats components
/// individually, in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StructureNode {
    Component(ComponentConfig),
    Group {
        group: String,
        members: Vec<StructureNode>,
    },
}

/// Triangular distribution parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Triangular {
    pub min: f64,
    pub mode: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantConfig {
    pub name: String,
    /// Weekly arrival volume (triangular), products per week.
    pub volume_per_week: Triangular,
    #[serde(default = "one")]
    pub lot_size: u32,
    /// Product condition at arrival (triangular over [0, 1]).
    pub condition: Triangular,
    /// Transport capacity units the whole product occupies.
    #[serde(default = "one")]
    pub transport_units: u32,
    pub structure: Vec<StructureNode>,
}

// ---- layout ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceQty {
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PoolConfig {
    #[serde(default)]
    pub employees: Vec<ResourceQty>,
    #[serde(default)]
    pub equipment: Vec<ResourceQty>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Component name the step removes.
    pub name: String,
    /// Minimum component condition for non-mandatory, non-blocking removal.
    #[serde(default)]
    pub min_condition: f64,
    /// Resource demands, all-or-nothing.
    #[serde(default)]
    pub employees: Vec<ResourceQty>,
    #[serde(default)]
    pub equipment: Vec<ResourceQty>,
}

fn default_capacity() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub name: String,
    /// Upstream elements this station pulls from.
    #[serde(default)]
    pub predecessors: Vec<String>,
    pub steps: Vec<StepConfig>,
    /// Local resource pool, consulted before the global pool.
    #[serde(default)]
    pub resources: PoolConfig,
    /// Variant allow-list; empty accepts every variant.
    #[serde(default)]
    pub variants: Vec<String>,
    #[serde(default = "default_capacity")]
    pub entry_capacity: u32,
    #[serde(default = "default_capacity")]
    pub exit_next_capacity: u32,
    #[serde(default = "default_capacity")]
    pub exit_store_capacity: u32,
    /// Order when entry occupancy falls below this; defaults to the global
    /// `entry_order_threshold`.
    #[serde(default)]
    pub entry_order_threshold: Option<u32>,
    /// Minutes of setup after fetching a product, before scanning.
    #[serde(default)]
    pub preparation_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageRole {
    /// Receives arrivals from the source.
    Incoming,
    /// Buffers material between stations.
    #[default]
    Intermediate,
    /// Terminal storage; items entering it leave the system.
    Outgoing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub name: String,
    #[serde(default)]
    pub role: StorageRole,
    #[serde(default)]
    pub predecessors: Vec<String>,
    #[serde(default = "default_capacity")]
    pub entry_capacity: u32,
    #[serde(default = "default_capacity")]
    pub main_capacity: u32,
    #[serde(default = "default_capacity")]
    pub exit_capacity: u32,
    #[serde(default)]
    pub entry_order_threshold: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleConfig {
    pub name: String,
    /// Travel speed, distance units per minute.
    pub speed: f64,
    /// Carrying capacity in transport units.
    pub capacity: u32,
    /// Element the vehicle starts at.
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledDeliveryConfig {
    pub time: f64,
    pub variant: String,
    /// Overrides the sampled product condition when present.
    #[serde(default)]
    pub condition: Option<f64>,
}

// ---- the whole document ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryConfig {
    #[serde(default)]
    pub simulation: SimulationParams,
    pub variants: Vec<VariantConfig>,
    pub stations: Vec<StationConfig>,
    pub storages: Vec<StorageConfig>,
    #[serde(default)]
    pub vehicles: Vec<VehicleConfig>,
    /// Factory-wide resource pool, the fallback tier.
    #[serde(default)]
    pub resources: PoolConfig,
    /// Symmetric distances between element pairs, by element name.
    #[serde(default)]
    pub distances: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default)]
    pub delivery_schedule: Vec<ScheduledDeliveryConfig>,
}

/// Parse a merged configuration document from JSON.
pub fn load_config_json(json: &str) -> Result<FactoryConfig, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "variants": [{
            "name": "washer",
            "volume_per_week": { "min": 40.0, "mode": 50.0, "max": 60.0 },
            "condition": { "min": 0.4, "mode": 0.7, "max": 0.95 },
            "structure": [
                { "name": "lid", "time": 4.0, "mandatory": true },
                { "group": "drum_assembly", "members": [
                    { "name": "drum", "time": 9.0, "blocked_by": ["lid"] }
                ]}
            ]
        }],
        "stations": [{
            "name": "station_0",
            "predecessors": ["incoming"],
            "steps": [
                { "name": "lid", "employees": [{ "name": "worker", "quantity": 1 }] },
                { "name": "drum", "min_condition": 0.5 }
            ]
        }],
        "storages": [
            { "name": "incoming", "role": "incoming" },
            { "name": "outgoing", "role": "outgoing", "predecessors": ["station_0"] }
        ],
        "resources": { "employees": [{ "name": "worker", "quantity": 2 }] }
    }"#;

    #[test]
    fn minimal_document_parses_with_defaults() {
        let cfg = load_config_json(MINIMAL).unwrap();
        assert_eq!(cfg.simulation.weeks, 1);
        assert_eq!(cfg.simulation.scale_disassembly_time, 1.5);
        assert_eq!(cfg.simulation.flow_mode, FlowMode::Pull);
        assert_eq!(cfg.variants.len(), 1);
        assert_eq!(cfg.variants[0].lot_size, 1);
        assert_eq!(cfg.stations[0].entry_capacity, 5);
        assert_eq!(cfg.stations[0].entry_order_threshold, None);
        assert_eq!(cfg.storages[0].role, StorageRole::Incoming);
    }

    #[test]
    fn structure_tree_mixes_components_and_groups() {
        let cfg = load_config_json(MINIMAL).unwrap();
        let structure = &cfg.variants[0].structure;
        assert!(matches!(structure[0], StructureNode::Component(_)));
        match &structure[1] {
            StructureNode::Group { group, members } => {
                assert_eq!(group, "drum_assembly");
                assert_eq!(members.len(), 1);
            }
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn component_defaults_apply() {
        let cfg = load_config_json(MINIMAL).unwrap();
        match &cfg.variants[0].structure[0] {
            StructureNode::Component(c) => {
                assert_eq!(c.quantity, 1);
                assert_eq!(c.transport_units, 1);
                assert_eq!(c.prob_missing, 0.0);
                assert!(c.mandatory);
            }
            other => panic!("expected component, got {other:?}"),
        }
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        let err = load_config_json("{ not json }").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn behavior_mode_random_parses_as_seeded() {
        let params: SimulationParams =
            serde_json::from_str(r#"{ "behavior_mode": "random", "seed": 31 }"#).unwrap();
        assert_eq!(params.behavior_mode, BehaviorMode::Seeded);
        assert_eq!(params.seed, 31);
    }

    #[test]
    fn params_round_trip() {
        let params = SimulationParams {
            weeks: 4,
            seed: 99,
            monitoring_frequency: 120.0,
            ..SimulationParams::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: SimulationParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back.weeks, 4);
        assert_eq!(back.seed, 99);
        assert_eq!(back.monitoring_frequency, 120.0);
    }
}
