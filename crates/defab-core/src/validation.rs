//! Configuration validation and interning.
//!
//! Turns a parsed [`FactoryConfig`] into a [`Blueprint`]: names resolved to
//! dense ids, the variant structure trees flattened into component arenas,
//! the distance matrix checked and densified. Every error here is fatal and
//! raised before the clock starts.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{
    ConfigError, FactoryConfig, PoolConfig, ResourceQty, SimulationParams, StepConfig,
    StorageRole, StructureNode, Triangular,
};
use crate::id::{NodeRef, ResourceTypeId, StationId, StorageId, VariantId, VehicleId};
use crate::product::{ComponentSpec, VariantTemplate};
use crate::resource::{Pool, ResourceCatalog, ResourceKind};
use crate::source::ScheduledDelivery;
use crate::station::{Station, StepSpec};
use crate::storage::StorageNode;
use crate::time::ShiftWindow;
use crate::vehicle::Vehicle;

/// A fully validated, ready-to-run world description.
pub struct Blueprint {
    pub params: SimulationParams,
    pub shift: ShiftWindow,
    pub templates: Vec<VariantTemplate>,
    pub stations: Vec<Station>,
    pub storages: Vec<StorageNode>,
    pub vehicles: Vec<Vehicle>,
    pub catalog: ResourceCatalog,
    pub global_pool: Pool,
    /// Dense symmetric matrix indexed by node index (stations, then
    /// storages), zero on the diagonal.
    pub distances: Vec<Vec<f64>>,
    pub schedule: Vec<ScheduledDelivery>,
    /// The storage arrivals land in. Resolved here so every consumer of a
    /// `Blueprint` can rely on it existing.
    pub incoming: StorageId,
    /// The terminal storage items exit through.
    pub outgoing: StorageId,
}

impl Blueprint {
    pub fn node_count(&self) -> usize {
        self.stations.len() + self.storages.len()
    }

    pub fn node_index(&self, node: NodeRef) -> usize {
        match node {
            NodeRef::Station(id) => id.0 as usize,
            NodeRef::Storage(id) => self.stations.len() + id.0 as usize,
        }
    }
}

/// Validate and intern a configuration.
pub fn build(config: &FactoryConfig) -> Result<Blueprint, ConfigError> {
    let params = config.simulation.clone();
    check_params(&params)?;
    let shift = ShiftWindow::new(params.start_of_day, params.end_of_day);

    let mut catalog = ResourceCatalog::default();
    let mut global_pool = Pool::default();
    intern_pool(&mut catalog, &mut global_pool, &config.resources);

    let templates = build_templates(config)?;
    let variant_ids: BTreeMap<&str, VariantId> = templates
        .iter()
        .map(|t| (t.name.as_str(), t.id))
        .collect();

    // Element name table, stations first.
    let mut node_names: BTreeMap<&str, NodeRef> = BTreeMap::new();
    for (i, st) in config.stations.iter().enumerate() {
        if node_names
            .insert(&st.name, NodeRef::Station(StationId(i as u32)))
            .is_some()
        {
            return Err(ConfigError::DuplicateElement {
                name: st.name.clone(),
            });
        }
    }
    for (i, st) in config.storages.iter().enumerate() {
        if node_names
            .insert(&st.name, NodeRef::Storage(StorageId(i as u32)))
            .is_some()
        {
            return Err(ConfigError::DuplicateElement {
                name: st.name.clone(),
            });
        }
    }

    let stations = build_stations(
        config,
        &params,
        shift,
        &mut catalog,
        &global_pool,
        &variant_ids,
        &node_names,
    )?;
    let storages = build_storages(config, &params, &node_names)?;

    let incoming = storages
        .iter()
        .find(|s| s.role == StorageRole::Incoming)
        .map(|s| s.id)
        .ok_or(ConfigError::NoIncomingStorage)?;
    let outgoing = storages
        .iter()
        .find(|s| s.role == StorageRole::Outgoing)
        .map(|s| s.id)
        .ok_or(ConfigError::NoOutgoingStorage)?;

    let vehicles = build_vehicles(config, &node_names)?;
    let distances = build_distances(config, &stations, &storages)?;
    let schedule = build_schedule(config, &variant_ids)?;

    Ok(Blueprint {
        params,
        shift,
        templates,
        stations,
        storages,
        vehicles,
        catalog,
        global_pool,
        distances,
        schedule,
        incoming,
        outgoing,
    })
}

// ---- parameter checks ----

fn positive(value: f64, context: &str) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive {
            context: context.to_owned(),
        })
    }
}

fn check_params(params: &SimulationParams) -> Result<(), ConfigError> {
    if params.weeks == 0 {
        return Err(ConfigError::NonPositive {
            context: "simulation.weeks".to_owned(),
        });
    }
    if !(0.0..params.end_of_day).contains(&params.start_of_day) || params.end_of_day > 24.0 {
        return Err(ConfigError::InvalidShiftWindow {
            start: params.start_of_day,
            end: params.end_of_day,
        });
    }
    if params.scale_disassembly_time < 1.0 {
        return Err(ConfigError::NonPositive {
            context: "simulation.scale_disassembly_time - 1".to_owned(),
        });
    }
    positive(params.order_check_frequency, "simulation.order_check_frequency")?;
    positive(params.push_check_frequency, "simulation.push_check_frequency")?;
    if params.handling_time < 0.0 {
        return Err(ConfigError::NonPositive {
            context: "simulation.handling_time".to_owned(),
        });
    }
    if params.loading_time < 0.0 {
        return Err(ConfigError::NonPositive {
            context: "simulation.loading_time".to_owned(),
        });
    }
    Ok(())
}

fn check_triangular(t: Triangular, context: &str) -> Result<(), ConfigError> {
    if t.min <= t.mode && t.mode <= t.max {
        Ok(())
    } else {
        Err(ConfigError::BadTriangular {
            context: context.to_owned(),
        })
    }
}

fn check_condition(value: f64, context: &str) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ConditionOutOfRange {
            context: context.to_owned(),
            value,
        })
    }
}

// ---- variants ----

fn flatten_structure(
    nodes: &[StructureNode],
    group: Option<&str>,
    out: &mut Vec<(Option<String>, crate::config::ComponentConfig)>,
) {
    for node in nodes {
        match node {
            StructureNode::Component(c) => {
                out.push((group.map(str::to_owned), c.clone()));
            }
            StructureNode::Group {
                group: name,
                members,
            } => {
                let path = match group {
                    Some(parent) => format!("{parent}/{name}"),
                    None => name.clone(),
                };
                flatten_structure(members, Some(&path), out);
            }
        }
    }
}

fn build_templates(config: &FactoryConfig) -> Result<Vec<VariantTemplate>, ConfigError> {
    if config.variants.is_empty() {
        return Err(ConfigError::NoVariants);
    }
    let mut templates = Vec::with_capacity(config.variants.len());
    for (vi, variant) in config.variants.iter().enumerate() {
        let context = |suffix: &str| format!("variant {:?} {suffix}", variant.name);
        check_triangular(variant.volume_per_week, &context("volume_per_week"))?;
        positive(variant.volume_per_week.mode, &context("volume_per_week.mode"))?;
        positive(variant.volume_per_week.max, &context("volume_per_week.max"))?;
        check_triangular(variant.condition, &context("condition"))?;
        check_condition(variant.condition.min, &context("condition.min"))?;
        check_condition(variant.condition.max, &context("condition.max"))?;
        if variant.lot_size == 0 {
            return Err(ConfigError::NonPositive {
                context: context("lot_size"),
            });
        }

        let mut flat = Vec::new();
        flatten_structure(&variant.structure, None, &mut flat);

        let mut index: BTreeMap<&str, u32> = BTreeMap::new();
        for (i, (_, comp)) in flat.iter().enumerate() {
            if index.insert(&comp.name, i as u32).is_some() {
                return Err(ConfigError::DuplicateComponent {
                    variant: variant.name.clone(),
                    component: comp.name.clone(),
                });
            }
        }

        let mut components = Vec::with_capacity(flat.len());
        for (group, comp) in &flat {
            positive(comp.time, &format!(
                "variant {:?} component {:?} time",
                variant.name, comp.name
            ))?;
            if comp.quantity == 0 {
                return Err(ConfigError::NonPositive {
                    context: format!(
                        "variant {:?} component {:?} quantity",
                        variant.name, comp.name
                    ),
                });
            }
            check_condition(
                comp.prob_missing,
                &format!(
                    "variant {:?} component {:?} prob_missing",
                    variant.name, comp.name
                ),
            )?;
            let dev = comp.condition_dev;
            if !(dev.min <= dev.mode && dev.mode <= dev.max) {
                return Err(ConfigError::BadTriangular {
                    context: format!(
                        "variant {:?} component {:?} condition_dev",
                        variant.name, comp.name
                    ),
                });
            }
            let mut blocked_by = Vec::with_capacity(comp.blocked_by.len());
            for reference in &comp.blocked_by {
                let Some(&target) = index.get(reference.as_str()) else {
                    return Err(ConfigError::UnknownBlockedBy {
                        variant: variant.name.clone(),
                        component: comp.name.clone(),
                        reference: reference.clone(),
                    });
                };
                blocked_by.push(crate::id::CompIdx(target));
            }
            components.push(ComponentSpec {
                name: comp.name.clone(),
                group: group.clone(),
                time_ideal: comp.time,
                quantity: comp.quantity,
                mandatory: comp.mandatory,
                blocked_by,
                cond_dev: (dev.min, dev.mode, dev.max),
                prob_missing: comp.prob_missing,
                transport_units: comp.transport_units.max(1),
            });
        }

        check_acyclic(&variant.name, &components)?;

        templates.push(VariantTemplate {
            id: VariantId(vi as u32),
            name: variant.name.clone(),
            volume_per_week: (
                variant.volume_per_week.min,
                variant.volume_per_week.mode,
                variant.volume_per_week.max,
            ),
            lot_size: variant.lot_size,
            condition: (
                variant.condition.min,
                variant.condition.mode,
                variant.condition.max,
            ),
            transport_units: variant.transport_units.max(1),
            components,
        });
    }
    Ok(templates)
}

/// Kahn's toposort over the `blocked_by` edges; leftovers mean a cycle.
fn check_acyclic(variant: &str, components: &[ComponentSpec]) -> Result<(), ConfigError> {
    let n = components.len();
    let mut indegree = vec![0usize; n];
    for (i, comp) in components.iter().enumerate() {
        indegree[i] = comp.blocked_by.len();
    }
    let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut seen = 0;
    while let Some(next) = ready.pop() {
        seen += 1;
        let blocker = crate::id::CompIdx(next as u32);
        for (i, comp) in components.iter().enumerate() {
            if comp.blocked_by.contains(&blocker) {
                indegree[i] -= 1;
                if indegree[i] == 0 {
                    ready.push(i);
                }
            }
        }
    }
    if seen == n {
        Ok(())
    } else {
        let stuck = indegree
            .iter()
            .position(|&d| d > 0)
            .map(|i| components[i].name.clone())
            .unwrap_or_default();
        Err(ConfigError::CyclicBlockedBy {
            variant: variant.to_owned(),
            component: stuck,
        })
    }
}

// ---- resources ----

fn intern_pool(catalog: &mut ResourceCatalog, pool: &mut Pool, config: &PoolConfig) {
    for ResourceQty { name, quantity } in &config.employees {
        let ty = catalog.intern(name, ResourceKind::Employee);
        pool.add(ty, *quantity);
    }
    for ResourceQty { name, quantity } in &config.equipment {
        let ty = catalog.intern(name, ResourceKind::Equipment);
        pool.add(ty, *quantity);
    }
}

fn resolve_demands(
    station: &str,
    step: &StepConfig,
    catalog: &ResourceCatalog,
    local: &Pool,
    global: &Pool,
) -> Result<Vec<(ResourceTypeId, u32)>, ConfigError> {
    let mut demands = Vec::new();
    for qty in step.employees.iter().chain(&step.equipment) {
        let Some(ty) = catalog.lookup(&qty.name) else {
            return Err(ConfigError::UnknownResource {
                station: station.to_owned(),
                step: step.name.clone(),
                resource: qty.name.clone(),
            });
        };
        let total = if local.defines(ty) {
            local.total(ty)
        } else {
            global.total(ty)
        };
        if total < qty.quantity {
            return Err(ConfigError::InsufficientResource {
                station: station.to_owned(),
                step: step.name.clone(),
                resource: qty.name.clone(),
                needed: qty.quantity,
                total,
            });
        }
        demands.push((ty, qty.quantity));
    }
    Ok(demands)
}

// ---- elements ----

fn resolve_predecessors(
    element: &str,
    names: &[String],
    node_names: &BTreeMap<&str, NodeRef>,
) -> Result<Vec<NodeRef>, ConfigError> {
    names
        .iter()
        .map(|reference| {
            node_names.get(reference.as_str()).copied().ok_or_else(|| {
                ConfigError::UnknownPredecessor {
                    element: element.to_owned(),
                    reference: reference.clone(),
                }
            })
        })
        .collect()
}

fn check_capacity(value: u32, context: &str) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::InvalidCapacity {
            context: context.to_owned(),
        })
    } else {
        Ok(())
    }
}

fn build_stations(
    config: &FactoryConfig,
    params: &SimulationParams,
    shift: ShiftWindow,
    catalog: &mut ResourceCatalog,
    global_pool: &Pool,
    variant_ids: &BTreeMap<&str, VariantId>,
    node_names: &BTreeMap<&str, NodeRef>,
) -> Result<Vec<Station>, ConfigError> {
    let mut stations = Vec::with_capacity(config.stations.len());
    for (i, st) in config.stations.iter().enumerate() {
        check_capacity(st.entry_capacity, &format!("station {:?} entry", st.name))?;
        check_capacity(
            st.exit_next_capacity,
            &format!("station {:?} exit_next", st.name),
        )?;
        check_capacity(
            st.exit_store_capacity,
            &format!("station {:?} exit_store", st.name),
        )?;

        let mut local = Pool::default();
        intern_pool(catalog, &mut local, &st.resources);

        let mut steps = Vec::with_capacity(st.steps.len());
        for step in &st.steps {
            check_condition(
                step.min_condition,
                &format!("station {:?} step {:?} min_condition", st.name, step.name),
            )?;
            steps.push(StepSpec {
                component: step.name.clone(),
                min_condition: step.min_condition,
                demands: resolve_demands(&st.name, step, catalog, &local, global_pool)?,
            });
        }

        let allowed_variants = if st.variants.is_empty() {
            None
        } else {
            let mut allowed = BTreeSet::new();
            for name in &st.variants {
                let Some(&id) = variant_ids.get(name.as_str()) else {
                    return Err(ConfigError::UnknownVariant {
                        station: st.name.clone(),
                        variant: name.clone(),
                    });
                };
                allowed.insert(id);
            }
            Some(allowed)
        };

        let mut station = Station::new(
            StationId(i as u32),
            st.name.clone(),
            shift,
            steps,
            allowed_variants,
            st.preparation_time.max(0.0),
            st.entry_order_threshold
                .unwrap_or(params.entry_order_threshold),
            st.entry_capacity,
            st.exit_next_capacity,
            st.exit_store_capacity,
            local,
            0.0,
        );
        station.predecessors = resolve_predecessors(&st.name, &st.predecessors, node_names)?;
        stations.push(station);
    }
    Ok(stations)
}

fn build_storages(
    config: &FactoryConfig,
    params: &SimulationParams,
    node_names: &BTreeMap<&str, NodeRef>,
) -> Result<Vec<StorageNode>, ConfigError> {
    let mut storages = Vec::with_capacity(config.storages.len());
    for (i, st) in config.storages.iter().enumerate() {
        check_capacity(st.entry_capacity, &format!("storage {:?} entry", st.name))?;
        check_capacity(st.main_capacity, &format!("storage {:?} main", st.name))?;
        check_capacity(st.exit_capacity, &format!("storage {:?} exit", st.name))?;
        let mut node = StorageNode::new(
            StorageId(i as u32),
            st.name.clone(),
            st.role,
            st.entry_capacity,
            st.main_capacity,
            st.exit_capacity,
            st.entry_order_threshold
                .unwrap_or(params.entry_order_threshold),
        );
        node.predecessors = resolve_predecessors(&st.name, &st.predecessors, node_names)?;
        storages.push(node);
    }
    Ok(storages)
}

fn build_vehicles(
    config: &FactoryConfig,
    node_names: &BTreeMap<&str, NodeRef>,
) -> Result<Vec<Vehicle>, ConfigError> {
    if config.vehicles.is_empty() {
        return Err(ConfigError::NoVehicles);
    }
    let mut vehicles = Vec::with_capacity(config.vehicles.len());
    for (i, v) in config.vehicles.iter().enumerate() {
        positive(v.speed, &format!("vehicle {:?} speed", v.name))?;
        check_capacity(v.capacity, &format!("vehicle {:?} capacity", v.name))?;
        let Some(&location) = node_names.get(v.location.as_str()) else {
            return Err(ConfigError::UnknownLocation {
                vehicle: v.name.clone(),
                location: v.location.clone(),
            });
        };
        vehicles.push(Vehicle::new(
            VehicleId(i as u32),
            v.name.clone(),
            v.speed,
            v.capacity,
            location,
        ));
    }
    Ok(vehicles)
}

// ---- distances ----

fn build_distances(
    config: &FactoryConfig,
    stations: &[Station],
    storages: &[StorageNode],
) -> Result<Vec<Vec<f64>>, ConfigError> {
    let names: Vec<&str> = stations
        .iter()
        .map(|s| s.name.as_str())
        .chain(storages.iter().map(|s| s.name.as_str()))
        .collect();
    let n = names.len();

    let lookup = |a: &str, b: &str| -> Option<f64> {
        config.distances.get(a).and_then(|row| row.get(b)).copied()
    };

    let mut matrix = vec![vec![0.0; n]; n];
    for a in 0..n {
        for b in (a + 1)..n {
            let forward = lookup(names[a], names[b]);
            let backward = lookup(names[b], names[a]);
            let distance = match (forward, backward) {
                (Some(f), Some(r)) => {
                    if (f - r).abs() > 1e-9 {
                        return Err(ConfigError::AsymmetricDistance {
                            a: names[a].to_owned(),
                            b: names[b].to_owned(),
                            forward: f,
                            backward: r,
                        });
                    }
                    f
                }
                (Some(d), None) | (None, Some(d)) => d,
                (None, None) => {
                    return Err(ConfigError::MissingDistance {
                        a: names[a].to_owned(),
                        b: names[b].to_owned(),
                    });
                }
            };
            if distance < 0.0 {
                return Err(ConfigError::NonPositive {
                    context: format!("distance ({:?}, {:?})", names[a], names[b]),
                });
            }
            matrix[a][b] = distance;
            matrix[b][a] = distance;
        }
    }
    Ok(matrix)
}

// ---- schedule ----

fn build_schedule(
    config: &FactoryConfig,
    variant_ids: &BTreeMap<&str, VariantId>,
) -> Result<Vec<ScheduledDelivery>, ConfigError> {
    let mut schedule = Vec::with_capacity(config.delivery_schedule.len());
    for (index, entry) in config.delivery_schedule.iter().enumerate() {
        let Some(&variant) = variant_ids.get(entry.variant.as_str()) else {
            return Err(ConfigError::UnknownScheduleVariant {
                index,
                variant: entry.variant.clone(),
            });
        };
        if let Some(condition) = entry.condition {
            check_condition(condition, &format!("delivery_schedule[{index}] condition"))?;
        }
        schedule.push(ScheduledDelivery {
            time: entry.time.max(0.0),
            variant,
            condition: entry.condition,
        });
    }
    schedule.sort_by(|a, b| a.time.total_cmp(&b.time));
    Ok(schedule)
}
