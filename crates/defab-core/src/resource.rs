//! Resource types and two-tier pools.
//!
//! Steps demand employees and equipment. Each station may carry a local pool;
//! anything not defined locally is drawn from the factory-wide pool.
//! Acquisition is all-or-nothing: either every demand of a step is satisfied
//! in one atomic grab, or nothing is taken and the station waits.

use std::collections::BTreeMap;

use crate::id::ResourceTypeId;

// ---- catalog ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Employee,
    Equipment,
}

/// Interns resource-type names to dense ids.
#[derive(Debug, Default)]
pub struct ResourceCatalog {
    names: Vec<String>,
    kinds: Vec<ResourceKind>,
    index: BTreeMap<String, ResourceTypeId>,
}

impl ResourceCatalog {
    pub fn intern(&mut self, name: &str, kind: ResourceKind) -> ResourceTypeId {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = ResourceTypeId(self.names.len() as u32);
        self.names.push(name.to_owned());
        self.kinds.push(kind);
        self.index.insert(name.to_owned(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<ResourceTypeId> {
        self.index.get(name).copied()
    }

    pub fn name(&self, id: ResourceTypeId) -> &str {
        &self.names[id.0 as usize]
    }

    pub fn kind(&self, id: ResourceTypeId) -> ResourceKind {
        self.kinds[id.0 as usize]
    }
}

// ---- pools ----

#[derive(Debug, Clone, Copy, Default)]
struct PoolEntry {
    total: u32,
    available: u32,
    /// Breakdown withdrawals that found no idle unit; settled on release.
    pending_down: u32,
}

/// One tier of countable resource units.
#[derive(Debug, Default)]
pub struct Pool {
    entries: BTreeMap<ResourceTypeId, PoolEntry>,
}

impl Pool {
    pub fn add(&mut self, ty: ResourceTypeId, quantity: u32) {
        let entry = self.entries.entry(ty).or_default();
        entry.total += quantity;
        entry.available += quantity;
    }

    pub fn defines(&self, ty: ResourceTypeId) -> bool {
        self.entries.contains_key(&ty)
    }

    pub fn total(&self, ty: ResourceTypeId) -> u32 {
        self.entries.get(&ty).map_or(0, |e| e.total)
    }

    pub fn available(&self, ty: ResourceTypeId) -> u32 {
        self.entries.get(&ty).map_or(0, |e| e.available)
    }

    /// Every type this pool defines, with its total unit count.
    pub fn types(&self) -> impl Iterator<Item = (ResourceTypeId, u32)> + '_ {
        self.entries.iter().map(|(&ty, e)| (ty, e.total))
    }

    fn take(&mut self, ty: ResourceTypeId, quantity: u32) {
        let entry = self.entries.get_mut(&ty);
        debug_assert!(entry.as_ref().is_some_and(|e| e.available >= quantity));
        if let Some(entry) = entry {
            entry.available = entry.available.saturating_sub(quantity);
        }
    }

    /// Return units. A pending breakdown withdrawal claims returned units
    /// before they become available again.
    pub fn release(&mut self, ty: ResourceTypeId, quantity: u32) {
        if let Some(entry) = self.entries.get_mut(&ty) {
            let mut back = quantity;
            while back > 0 && entry.pending_down > 0 {
                entry.pending_down -= 1;
                back -= 1;
            }
            entry.available = (entry.available + back).min(entry.total);
        }
    }

    /// Take one unit out of service for a breakdown. A unit currently held by
    /// a step is never clawed back; the withdrawal settles when it returns.
    pub fn withdraw(&mut self, ty: ResourceTypeId) {
        if let Some(entry) = self.entries.get_mut(&ty) {
            if entry.available > 0 {
                entry.available -= 1;
            } else {
                entry.pending_down += 1;
            }
        }
    }

    /// Return a repaired unit to service.
    pub fn restore(&mut self, ty: ResourceTypeId) {
        if let Some(entry) = self.entries.get_mut(&ty) {
            if entry.pending_down > 0 {
                entry.pending_down -= 1;
            } else {
                entry.available = (entry.available + 1).min(entry.total);
            }
        }
    }
}

// ---- acquisition ----

/// Which tier a grant came from, so release returns it there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Local,
    Global,
}

/// Granted units of one step acquisition.
#[derive(Debug, Clone, Default)]
pub struct Hold {
    pub grants: Vec<(Tier, ResourceTypeId, u32)>,
}

impl Hold {
    pub fn holds_type(&self, ty: ResourceTypeId) -> bool {
        self.grants.iter().any(|(_, t, _)| *t == ty)
    }
}

/// All-or-nothing acquisition across the two tiers. A type defined in the
/// local pool is satisfied from the local pool only; everything else comes
/// from the global pool.
pub fn acquire(
    local: &mut Pool,
    global: &mut Pool,
    demands: &[(ResourceTypeId, u32)],
) -> Option<Hold> {
    for &(ty, qty) in demands {
        let tier = if local.defines(ty) { &*local } else { &*global };
        if tier.available(ty) < qty {
            return None;
        }
    }
    let mut hold = Hold::default();
    for &(ty, qty) in demands {
        if local.defines(ty) {
            local.take(ty, qty);
            hold.grants.push((Tier::Local, ty, qty));
        } else {
            global.take(ty, qty);
            hold.grants.push((Tier::Global, ty, qty));
        }
    }
    Some(hold)
}

/// Return every grant of a hold to its tier.
pub fn release(local: &mut Pool, global: &mut Pool, hold: Hold) {
    for (tier, ty, qty) in hold.grants {
        match tier {
            Tier::Local => local.release(ty, qty),
            Tier::Global => global.release(ty, qty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(n: u32) -> ResourceTypeId {
        ResourceTypeId(n)
    }

    #[test]
    fn catalog_interns_once() {
        let mut cat = ResourceCatalog::default();
        let a = cat.intern("worker", ResourceKind::Employee);
        let b = cat.intern("worker", ResourceKind::Employee);
        let c = cat.intern("press", ResourceKind::Equipment);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cat.name(a), "worker");
        assert_eq!(cat.kind(c), ResourceKind::Equipment);
        assert_eq!(cat.lookup("press"), Some(c));
        assert_eq!(cat.lookup("crane"), None);
    }

    #[test]
    fn acquire_is_all_or_nothing() {
        let mut local = Pool::default();
        let mut global = Pool::default();
        local.add(ty(0), 1);
        global.add(ty(1), 2);
        // second demand unsatisfiable: nothing is taken
        let got = acquire(&mut local, &mut global, &[(ty(0), 1), (ty(1), 3)]);
        assert!(got.is_none());
        assert_eq!(local.available(ty(0)), 1);
        assert_eq!(global.available(ty(1)), 2);
    }

    #[test]
    fn local_tier_shadows_global() {
        let mut local = Pool::default();
        let mut global = Pool::default();
        local.add(ty(0), 1);
        global.add(ty(0), 5);
        let hold = acquire(&mut local, &mut global, &[(ty(0), 1)]).unwrap();
        assert_eq!(local.available(ty(0)), 0);
        assert_eq!(global.available(ty(0)), 5);
        // local tier exhausted: acquisition fails even though global has more
        assert!(acquire(&mut local, &mut global, &[(ty(0), 1)]).is_none());
        release(&mut local, &mut global, hold);
        assert_eq!(local.available(ty(0)), 1);
    }

    #[test]
    fn release_returns_to_the_right_tier() {
        let mut local = Pool::default();
        let mut global = Pool::default();
        local.add(ty(0), 2);
        global.add(ty(1), 1);
        let hold = acquire(&mut local, &mut global, &[(ty(0), 2), (ty(1), 1)]).unwrap();
        assert!(hold.holds_type(ty(0)));
        assert!(!hold.holds_type(ty(9)));
        release(&mut local, &mut global, hold);
        assert_eq!(local.available(ty(0)), 2);
        assert_eq!(global.available(ty(1)), 1);
    }

    #[test]
    fn withdraw_prefers_idle_units() {
        let mut pool = Pool::default();
        pool.add(ty(0), 2);
        pool.withdraw(ty(0));
        assert_eq!(pool.available(ty(0)), 1);
        pool.restore(ty(0));
        assert_eq!(pool.available(ty(0)), 2);
    }

    #[test]
    fn withdraw_of_held_unit_settles_on_release() {
        let mut local = Pool::default();
        let mut global = Pool::default();
        local.add(ty(0), 1);
        let hold = acquire(&mut local, &mut global, &[(ty(0), 1)]).unwrap();
        // the only unit is in use: withdrawal is deferred
        local.withdraw(ty(0));
        assert_eq!(local.available(ty(0)), 0);
        release(&mut local, &mut global, hold);
        // the returned unit is claimed by the pending withdrawal
        assert_eq!(local.available(ty(0)), 0);
        local.restore(ty(0));
        assert_eq!(local.available(ty(0)), 1);
    }
}
