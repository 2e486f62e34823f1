// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Raw columnar component storage.
//!
//! Each component is a dense `f32` column of length `capacity` paired with
//! a presence bitmap; the bitmap doubles as the component's
//! "who-has-this" index, so `entities_with` is a bitmap intersection.
//! Entity existence is tracked by a parallel presence bitmap with a free
//! list for slot reuse.
//!
//! The store performs **no permission checks**; that is the job of the
//! [`crate::view::ModuleStore`] decorator. It does maintain per-match
//! dirty info and a mutation version for the query cache.
//!
//! Entity creation is factory-enforced: [`Store::create_entity`] is the
//! only way to mint an entity and it writes `MATCH_ID` and `ENTITY_ID`
//! before the entity becomes observable, which is what upholds the
//! *every live entity has exactly one match* invariant.

use std::sync::{Mutex, MutexGuard, PoisonError};

use arena_proto::wire::ComponentKind;

use crate::bitset::BitSet;
use crate::component::{ComponentCatalog, ComponentDef, ComponentId, PermissionLevel};
use crate::dirty::{DirtyInfo, DirtyMap};
use crate::entity::{EntityId, ENTITY_ID, MATCH_ID, OWNER_ID};
use crate::error::CoreError;
use crate::module::ModuleSlot;

/// One dense component column plus its presence bitmap.
#[derive(Debug)]
pub struct Column {
    values: Vec<f32>,
    present: BitSet,
}

impl Column {
    fn new(capacity: usize) -> Self {
        Self {
            values: vec![0.0; capacity],
            present: BitSet::with_capacity(capacity),
        }
    }

    /// Presence bitmap (the who-has-this index).
    #[must_use]
    pub fn present(&self) -> &BitSet {
        &self.present
    }

    /// Value at `slot`, `None` when not present.
    #[must_use]
    pub fn value(&self, slot: usize) -> Option<f32> {
        self.present.contains(slot).then(|| self.values[slot])
    }
}

/// Columnar component store for one container.
#[derive(Debug)]
pub struct Store {
    capacity: usize,
    alive: BitSet,
    free: Vec<u32>,
    next_slot: u32,
    columns: Vec<Column>,
    catalog: ComponentCatalog,
    dirty: Mutex<DirtyMap>,
    version: u64,
    match_id: ComponentId,
    entity_id: ComponentId,
    owner_id: ComponentId,
}

impl Store {
    /// Creates a store with `capacity` entity slots and the core
    /// components registered under [`ModuleSlot::CORE`].
    ///
    /// Capacity is clamped to 2^24 so entity ids stay exact in `f32`
    /// column cells.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(1 << 24);
        let mut catalog = ComponentCatalog::default();
        // Registration into an empty catalog cannot collide.
        let match_id = catalog
            .register(
                ModuleSlot::CORE,
                MATCH_ID,
                PermissionLevel::Read,
                ComponentKind::Int,
            )
            .unwrap_or(ComponentId(0));
        let entity_id = catalog
            .register(
                ModuleSlot::CORE,
                ENTITY_ID,
                PermissionLevel::Read,
                ComponentKind::Int,
            )
            .unwrap_or(ComponentId(1));
        let owner_id = catalog
            .register(
                ModuleSlot::CORE,
                OWNER_ID,
                PermissionLevel::Write,
                ComponentKind::Int,
            )
            .unwrap_or(ComponentId(2));
        let columns = (0..catalog.len()).map(|_| Column::new(capacity)).collect();
        Self {
            capacity,
            alive: BitSet::with_capacity(capacity),
            free: Vec::new(),
            next_slot: 0,
            columns,
            catalog,
            dirty: Mutex::new(DirtyMap::default()),
            version: 0,
            match_id,
            entity_id,
            owner_id,
        }
    }

    fn dirty_map(&self) -> MutexGuard<'_, DirtyMap> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a component column for an installing module.
    pub fn register_component(
        &mut self,
        owner: ModuleSlot,
        name: &str,
        level: PermissionLevel,
        kind: ComponentKind,
    ) -> Result<ComponentId, CoreError> {
        let id = self.catalog.register(owner, name, level, kind)?;
        self.columns.push(Column::new(self.capacity));
        Ok(id)
    }

    /// Component catalog.
    #[must_use]
    pub fn catalog(&self) -> &ComponentCatalog {
        &self.catalog
    }

    /// Definition lookup, failing `ComponentNotFound`.
    pub fn def(&self, id: ComponentId) -> Result<&ComponentDef, CoreError> {
        self.catalog
            .def(id)
            .ok_or_else(|| CoreError::ComponentNotFound(format!("#{}", id.0)))
    }

    /// Id of the `MATCH_ID` core component.
    #[must_use]
    pub fn match_id_component(&self) -> ComponentId {
        self.match_id
    }

    /// Id of the `OWNER_ID` core component.
    #[must_use]
    pub fn owner_id_component(&self) -> ComponentId {
        self.owner_id
    }

    /// Mints an entity inside `match_id`, attaching `MATCH_ID` and
    /// `ENTITY_ID` atomically. Fails `CapacityExceeded` when the presence
    /// bitmap is full.
    pub fn create_entity(&mut self, match_id: u64) -> Result<EntityId, CoreError> {
        if self.alive.len() >= self.capacity {
            return Err(CoreError::CapacityExceeded(self.capacity));
        }
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                let slot = self.next_slot;
                self.next_slot += 1;
                slot
            }
        };
        let idx = slot as usize;
        self.alive.insert(idx);
        self.write_cell(self.match_id, idx, match_id as f32);
        self.write_cell(self.entity_id, idx, slot as f32);
        self.dirty_map().add_entity(match_id, EntityId(u64::from(slot)));
        self.version += 1;
        Ok(EntityId(u64::from(slot)))
    }

    fn write_cell(&mut self, comp: ComponentId, slot: usize, value: f32) {
        let col = &mut self.columns[comp.0 as usize];
        col.values[slot] = value;
        col.present.insert(slot);
    }

    fn slot_of(&self, entity: EntityId) -> Result<usize, CoreError> {
        let slot = entity.0 as usize;
        if self.alive.contains(slot) {
            Ok(slot)
        } else {
            Err(CoreError::EntityNotFound(entity.0))
        }
    }

    /// True when `entity` is alive.
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.alive.contains(entity.0 as usize)
    }

    /// The match an entity belongs to.
    pub fn match_of(&self, entity: EntityId) -> Result<u64, CoreError> {
        let slot = self.slot_of(entity)?;
        let value = self.columns[self.match_id.0 as usize]
            .value(slot)
            .ok_or_else(|| CoreError::Internal(format!("entity {entity} has no MATCH_ID")))?;
        Ok(value as u64)
    }

    /// Writes `value` into the component column for `entity`.
    pub fn attach(
        &mut self,
        entity: EntityId,
        comp: ComponentId,
        value: f32,
    ) -> Result<(), CoreError> {
        let slot = self.slot_of(entity)?;
        self.def(comp)?;
        let match_id = self.match_of(entity)?;
        self.write_cell(comp, slot, value);
        self.dirty_map().touch(match_id, entity, comp);
        self.version += 1;
        Ok(())
    }

    /// Reads the component value for `entity`; `Ok(None)` when not present.
    pub fn get(&self, entity: EntityId, comp: ComponentId) -> Result<Option<f32>, CoreError> {
        let slot = self.slot_of(entity)?;
        self.def(comp)?;
        Ok(self.columns[comp.0 as usize].value(slot))
    }

    /// Removes the component from `entity`; returns whether it was present.
    pub fn remove(&mut self, entity: EntityId, comp: ComponentId) -> Result<bool, CoreError> {
        let slot = self.slot_of(entity)?;
        self.def(comp)?;
        let match_id = self.match_of(entity)?;
        let was = self.columns[comp.0 as usize].present.remove(slot);
        if was {
            self.dirty_map().touch(match_id, entity, comp);
            self.version += 1;
        }
        Ok(was)
    }

    /// Entities holding *all* of `comps`, ascending by id.
    ///
    /// With an empty component list this returns every live entity.
    #[must_use]
    pub fn entities_with(&self, comps: &[ComponentId]) -> Vec<EntityId> {
        if comps.is_empty() {
            return self.alive.iter().map(|s| EntityId(s as u64)).collect();
        }
        let mut sets: Vec<&BitSet> = Vec::with_capacity(comps.len() + 1);
        sets.push(&self.alive);
        for comp in comps {
            match self.catalog.def(*comp) {
                Some(_) => sets.push(self.columns[comp.0 as usize].present()),
                None => return Vec::new(),
            }
        }
        BitSet::intersection(&sets)
            .map(|s| EntityId(s as u64))
            .collect()
    }

    /// Destroys an entity, clearing every column cell.
    pub fn delete_entity(&mut self, entity: EntityId) -> Result<(), CoreError> {
        let slot = self.slot_of(entity)?;
        let match_id = self.match_of(entity)?;
        for col in &mut self.columns {
            col.present.remove(slot);
        }
        self.alive.remove(slot);
        self.free.push(slot as u32);
        self.dirty_map().remove_entity(match_id, entity);
        self.version += 1;
        Ok(())
    }

    /// Live entities belonging to `match_id`, ascending by id.
    #[must_use]
    pub fn entities_in_match(&self, match_id: u64) -> Vec<EntityId> {
        let needle = match_id as f32;
        let col = &self.columns[self.match_id.0 as usize];
        self.alive
            .iter()
            .filter(|&slot| col.value(slot) == Some(needle))
            .map(|s| EntityId(s as u64))
            .collect()
    }

    /// Destroys every entity of `match_id`; returns how many died.
    pub fn destroy_match_entities(&mut self, match_id: u64) -> usize {
        let doomed = self.entities_in_match(match_id);
        let count = doomed.len();
        for entity in doomed {
            // Entities came from the live scan; deletion cannot fail.
            let _ = self.delete_entity(entity);
        }
        self.dirty_map().forget(match_id);
        count
    }

    /// Raw cell read by slot, for the snapshot builder (caller guarantees
    /// the slot is alive).
    #[must_use]
    pub fn cell(&self, comp: ComponentId, entity: EntityId) -> Option<f32> {
        self.columns
            .get(comp.0 as usize)
            .and_then(|c| c.value(entity.0 as usize))
    }

    /// Takes and resets dirty info for `match_id`.
    #[must_use]
    pub fn consume_dirty(&self, match_id: u64) -> DirtyInfo {
        self.dirty_map().consume(match_id)
    }

    /// Live entity count.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.alive.len()
    }

    /// Entity slot capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mutation counter; bumps on every write. Used by the query cache.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Resident bytes one component column costs at this capacity.
    #[must_use]
    pub fn column_resident_bytes(&self) -> usize {
        self.capacity * 4 + self.alive.resident_bytes()
    }

    /// Estimated resident bytes of columns and bitmaps.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        self.columns.len() * self.column_resident_bytes() + self.alive.resident_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::new(8)
    }

    #[test]
    fn create_attaches_match_and_entity_ids_atomically() {
        let mut s = store();
        let e = s.create_entity(3).expect("create");
        assert_eq!(s.match_of(e).expect("match"), 3);
        let eid_comp = s.catalog().id_of(ModuleSlot::CORE, ENTITY_ID).expect("ENTITY_ID");
        assert_eq!(s.get(e, eid_comp).expect("get"), Some(e.0 as f32));
    }

    #[test]
    fn create_at_capacity_fails_capacity_exceeded() {
        let mut s = store();
        for _ in 0..8 {
            s.create_entity(1).expect("under capacity");
        }
        let err = s.create_entity(1).expect_err("at capacity");
        assert!(matches!(err, CoreError::CapacityExceeded(8)), "{err:?}");
    }

    #[test]
    fn slots_are_reused_after_delete() {
        let mut s = store();
        let e = s.create_entity(1).expect("create");
        s.delete_entity(e).expect("delete");
        let e2 = s.create_entity(1).expect("recreate");
        assert_eq!(e2, e, "freed slot should be reused");
        assert_eq!(s.live_count(), 1);
    }

    #[test]
    fn attach_get_remove_round_trip() {
        let mut s = store();
        let comp = s
            .register_component(
                ModuleSlot(1),
                "POSITION_X",
                PermissionLevel::Read,
                ComponentKind::Float,
            )
            .expect("register");
        let e = s.create_entity(1).expect("create");
        assert_eq!(s.get(e, comp).expect("get"), None, "absent before attach");
        s.attach(e, comp, 4.5).expect("attach");
        assert_eq!(s.get(e, comp).expect("get"), Some(4.5));
        assert!(s.remove(e, comp).expect("remove"));
        assert_eq!(s.get(e, comp).expect("get"), None, "absent after remove");
        assert!(!s.remove(e, comp).expect("second remove"), "idempotent");
    }

    #[test]
    fn zero_value_is_distinct_from_absent() {
        let mut s = store();
        let comp = s
            .register_component(
                ModuleSlot(1),
                "HEAT",
                PermissionLevel::Read,
                ComponentKind::Float,
            )
            .expect("register");
        let e = s.create_entity(1).expect("create");
        s.attach(e, comp, 0.0).expect("attach zero");
        assert_eq!(s.get(e, comp).expect("get"), Some(0.0));
    }

    #[test]
    fn ops_on_dead_entity_fail_not_found() {
        let mut s = store();
        let e = s.create_entity(1).expect("create");
        s.delete_entity(e).expect("delete");
        let comp = s.match_id_component();
        assert!(!s.contains(e), "deleted entity is gone");
        assert!(matches!(
            s.get(e, comp),
            Err(CoreError::EntityNotFound(_))
        ));
        assert!(matches!(
            s.attach(e, comp, 1.0),
            Err(CoreError::EntityNotFound(_))
        ));
        assert!(matches!(s.delete_entity(e), Err(CoreError::EntityNotFound(_))));
    }

    #[test]
    fn entities_with_intersects_indexes() {
        let mut s = store();
        let a = s
            .register_component(ModuleSlot(1), "A", PermissionLevel::Read, ComponentKind::Float)
            .expect("register A");
        let b = s
            .register_component(ModuleSlot(1), "B", PermissionLevel::Read, ComponentKind::Float)
            .expect("register B");
        let e1 = s.create_entity(1).expect("e1");
        let e2 = s.create_entity(1).expect("e2");
        let e3 = s.create_entity(1).expect("e3");
        s.attach(e1, a, 1.0).expect("attach");
        s.attach(e2, a, 1.0).expect("attach");
        s.attach(e2, b, 1.0).expect("attach");
        s.attach(e3, b, 1.0).expect("attach");
        assert_eq!(s.entities_with(&[a]), vec![e1, e2]);
        assert_eq!(s.entities_with(&[a, b]), vec![e2]);
        assert_eq!(s.entities_with(&[]), vec![e1, e2, e3], "empty list = all");
    }

    #[test]
    fn match_isolation_holds_across_matches() {
        let mut s = store();
        let e1 = s.create_entity(1).expect("e1");
        let _e2 = s.create_entity(2).expect("e2");
        let e3 = s.create_entity(1).expect("e3");
        assert_eq!(s.entities_in_match(1), vec![e1, e3]);
        assert_eq!(s.destroy_match_entities(1), 2);
        assert!(s.entities_in_match(1).is_empty());
        assert_eq!(s.live_count(), 1, "match 2 survives");
    }

    #[test]
    fn dirty_tracking_reports_and_resets() {
        let mut s = store();
        let comp = s
            .register_component(ModuleSlot(1), "X", PermissionLevel::Read, ComponentKind::Float)
            .expect("register");
        let e = s.create_entity(1).expect("create");
        let info = s.consume_dirty(1);
        assert!(info.added.contains(&e), "creation is an add");
        s.attach(e, comp, 2.0).expect("attach");
        let info = s.consume_dirty(1);
        assert!(info.modified.contains(&e));
        assert!(info.components.contains(&comp));
        assert!(!info.is_structural());
        assert!(s.consume_dirty(1).is_empty(), "consume resets");
    }

    #[test]
    fn version_bumps_on_every_mutation() {
        let mut s = store();
        let v0 = s.version();
        let e = s.create_entity(1).expect("create");
        assert!(s.version() > v0);
        let v1 = s.version();
        s.delete_entity(e).expect("delete");
        assert!(s.version() > v1);
    }
}
