//! Buffer zones and storage nodes.
//!
//! Every element exposes capacity-bounded FIFO buffer zones. Stations carry
//! an entry buffer and two exit buffers; storages add a main zone between
//! them. Zone capacity is a hard ceiling: producers suspend instead of
//! overfilling.

use std::collections::VecDeque;

use crate::config::StorageRole;
use crate::id::{CompIdx, NodeRef, ProductId, StorageId};

/// Something that occupies a buffer slot: a whole product remainder, or one
/// detached component unit of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item {
    pub product: ProductId,
    /// `None` for the product remainder itself.
    pub part: Option<CompIdx>,
}

impl Item {
    pub fn product(product: ProductId) -> Self {
        Self {
            product,
            part: None,
        }
    }

    pub fn part(product: ProductId, comp: CompIdx) -> Self {
        Self {
            product,
            part: Some(comp),
        }
    }

    pub fn is_part(&self) -> bool {
        self.part.is_some()
    }
}

/// Which exit lane of an element an item is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitLane {
    /// Material that still needs disassembly downstream.
    Next,
    /// Finished parts and exhausted remainders, headed to terminal storage.
    Store,
}

/// Zones an element can expose. Used in event records and ordering logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneKind {
    Entry,
    Main,
    ExitNext,
    ExitStore,
}

impl ZoneKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ZoneKind::Entry => "entry",
            ZoneKind::Main => "main",
            ZoneKind::ExitNext => "exit_next",
            ZoneKind::ExitStore => "exit_store",
        }
    }

    pub fn of_lane(lane: ExitLane) -> Self {
        match lane {
            ExitLane::Next => ZoneKind::ExitNext,
            ExitLane::Store => ZoneKind::ExitStore,
        }
    }
}

/// A capacity-bounded FIFO queue of items.
#[derive(Debug, Clone)]
pub struct BufferZone {
    capacity: u32,
    items: VecDeque<Item>,
}

impl BufferZone {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            items: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_space(&self) -> bool {
        (self.items.len() as u32) < self.capacity
    }

    /// Append an item. Returns false (and drops nothing) when full; callers
    /// treat that as a suspension point.
    #[must_use]
    pub fn push(&mut self, item: Item) -> bool {
        if !self.has_space() {
            return false;
        }
        self.items.push_back(item);
        true
    }

    pub fn pop(&mut self) -> Option<Item> {
        self.items.pop_front()
    }

    pub fn front(&self) -> Option<&Item> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.iter()
    }

    /// Remove and return the first item satisfying the predicate.
    pub fn take_first<F: FnMut(&Item) -> bool>(&mut self, mut pred: F) -> Option<Item> {
        let pos = self.items.iter().position(|it| pred(it))?;
        self.items.remove(pos)
    }
}

/// Relay stages inside a storage, each costing one handling period per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStage {
    /// entry -> main
    Stock,
    /// main -> exit_next
    Issue,
}

/// A storage node: entry and exit buffers around a main stock zone. The
/// incoming storage receives arrivals; the outgoing storage is terminal.
#[derive(Debug)]
pub struct StorageNode {
    pub id: StorageId,
    pub name: String,
    pub role: StorageRole,
    pub predecessors: Vec<NodeRef>,
    pub entry: BufferZone,
    pub main: BufferZone,
    pub exit_next: BufferZone,
    pub exit_store: BufferZone,
    pub order_threshold: u32,
    /// Open transport orders this storage has placed, one per lane at most.
    pub open_orders: u32,
    /// One item at a time moves per relay stage.
    pub stock_busy: bool,
    pub issue_busy: bool,
    /// Items that have left the system through this (outgoing) storage.
    pub exited: u64,
}

impl StorageNode {
    pub fn new(
        id: StorageId,
        name: String,
        role: StorageRole,
        entry_capacity: u32,
        main_capacity: u32,
        exit_capacity: u32,
        order_threshold: u32,
    ) -> Self {
        Self {
            id,
            name,
            role,
            predecessors: Vec::new(),
            entry: BufferZone::new(entry_capacity),
            main: BufferZone::new(main_capacity),
            exit_next: BufferZone::new(exit_capacity),
            exit_store: BufferZone::new(exit_capacity),
            order_threshold,
            open_orders: 0,
            stock_busy: false,
            issue_busy: false,
            exited: 0,
        }
    }

    /// Whether the entry has run low enough to place a replenishment order.
    pub fn wants_material(&self) -> bool {
        (self.entry.len() as u32) < self.order_threshold && self.entry.has_space()
    }

    pub fn zone(&self, kind: ZoneKind) -> &BufferZone {
        match kind {
            ZoneKind::Entry => &self.entry,
            ZoneKind::Main => &self.main,
            ZoneKind::ExitNext => &self.exit_next,
            ZoneKind::ExitStore => &self.exit_store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn pid(map: &mut SlotMap<ProductId, ()>) -> ProductId {
        map.insert(())
    }

    #[test]
    fn zone_enforces_hard_capacity() {
        let mut map = SlotMap::with_key();
        let mut zone = BufferZone::new(2);
        assert!(zone.push(Item::product(pid(&mut map))));
        assert!(zone.push(Item::product(pid(&mut map))));
        assert!(!zone.has_space());
        assert!(!zone.push(Item::product(pid(&mut map))));
        assert_eq!(zone.len(), 2);
    }

    #[test]
    fn zone_is_fifo() {
        let mut map = SlotMap::with_key();
        let a = pid(&mut map);
        let b = pid(&mut map);
        let mut zone = BufferZone::new(4);
        assert!(zone.push(Item::product(a)));
        assert!(zone.push(Item::product(b)));
        assert_eq!(zone.pop().unwrap().product, a);
        assert_eq!(zone.pop().unwrap().product, b);
        assert!(zone.pop().is_none());
    }

    #[test]
    fn take_first_preserves_relative_order() {
        let mut map = SlotMap::with_key();
        let a = pid(&mut map);
        let b = pid(&mut map);
        let c = pid(&mut map);
        let mut zone = BufferZone::new(4);
        assert!(zone.push(Item::product(a)));
        assert!(zone.push(Item::part(b, CompIdx(0))));
        assert!(zone.push(Item::product(c)));
        let part = zone.take_first(|it| it.is_part()).unwrap();
        assert_eq!(part.product, b);
        assert_eq!(zone.pop().unwrap().product, a);
        assert_eq!(zone.pop().unwrap().product, c);
    }

    #[test]
    fn storage_orders_only_below_threshold() {
        let mut map = SlotMap::with_key();
        let mut storage = StorageNode::new(
            StorageId(0),
            "buffer_a".into(),
            StorageRole::Intermediate,
            2,
            10,
            5,
            2,
        );
        assert!(storage.wants_material());
        assert!(storage.entry.push(Item::product(pid(&mut map))));
        assert!(storage.wants_material());
        assert!(storage.entry.push(Item::product(pid(&mut map))));
        // threshold reached and entry full
        assert!(!storage.wants_material());
    }
}
