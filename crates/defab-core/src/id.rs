use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a live product instance in the engine's arena.
    pub struct ProductId;
}

/// Identifies a product variant template. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariantId(pub u32);

/// Identifies a disassembly station in the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StationId(pub u32);

/// Identifies a storage node in the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageId(pub u32);

/// Identifies a transport vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VehicleId(pub u32);

/// Identifies an interned resource type (employee or equipment kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceTypeId(pub u32);

/// Index of a component spec within its variant's structure (structural order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompIdx(pub u32);

impl CompIdx {
    /// Convert to usize for arena indexing.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A material-flow node: either a station or a storage. Used for predecessor
/// links, vehicle locations, and distance-matrix lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeRef {
    Station(StationId),
    Storage(StorageId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_comparable() {
        assert_eq!(StationId(0), StationId(0));
        assert_ne!(StationId(0), StationId(1));
        assert!(VariantId(1) < VariantId(2));
    }

    #[test]
    fn node_refs_order_stations_before_storages() {
        let a = NodeRef::Station(StationId(7));
        let b = NodeRef::Storage(StorageId(0));
        assert!(a < b);
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ResourceTypeId(0), "forklift");
        map.insert(ResourceTypeId(1), "mechanic");
        assert_eq!(map[&ResourceTypeId(0)], "forklift");
    }
}
