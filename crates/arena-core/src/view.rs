// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Module-scoped store view: the permission decorator.
//!
//! Every module touches the store through a [`ModuleStore`] carrying its
//! slot; no ambient caller identity exists. The decorator delegates each
//! operation through the permission table:
//!
//! | caller vs. owner | PRIVATE | READ | WRITE |
//! |---|---|---|---|
//! | owner | full | full | full |
//! | other | denied | read only | full |
//!
//! Denials surface as [`CoreError::PermissionDenied`] to the calling
//! command or system handler; they never crash the tick.
//!
//! Intersection queries route through the container's [`QueryCache`], so
//! systems repeating a query within one tick hit the memo.

use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::QueryCache;
use crate::component::ComponentId;
use crate::entity::EntityId;
use crate::error::CoreError;
use crate::module::ModuleSlot;
use crate::store::Store;

/// Permission-scoped view over the raw store for one module.
pub struct ModuleStore<'a> {
    store: &'a mut Store,
    queries: &'a Mutex<QueryCache>,
    caller: ModuleSlot,
    caller_name: &'a str,
}

impl<'a> ModuleStore<'a> {
    /// Wraps the raw store with a caller identity.
    pub fn new(
        store: &'a mut Store,
        queries: &'a Mutex<QueryCache>,
        caller: ModuleSlot,
        caller_name: &'a str,
    ) -> Self {
        Self {
            store,
            queries,
            caller,
            caller_name,
        }
    }

    fn denied(&self, component: &str) -> CoreError {
        CoreError::PermissionDenied {
            module: self.caller_name.to_owned(),
            component: component.to_owned(),
        }
    }

    fn check_read(&self, comp: ComponentId) -> Result<(), CoreError> {
        let def = self.store.def(comp)?;
        if def.readable_by(self.caller) {
            Ok(())
        } else {
            Err(self.denied(&def.name))
        }
    }

    fn check_write(&self, comp: ComponentId) -> Result<(), CoreError> {
        let def = self.store.def(comp)?;
        if def.writable_by(self.caller) {
            Ok(())
        } else {
            Err(self.denied(&def.name))
        }
    }

    /// Mints an entity in `match_id` (factory path; attaches `MATCH_ID`
    /// and `ENTITY_ID` atomically).
    pub fn create_entity(&mut self, match_id: u64) -> Result<EntityId, CoreError> {
        self.store.create_entity(match_id)
    }

    /// Destroys an entity and clears all its columns.
    pub fn delete_entity(&mut self, entity: EntityId) -> Result<(), CoreError> {
        self.store.delete_entity(entity)
    }

    /// Writes a component value; requires write access.
    pub fn attach(
        &mut self,
        entity: EntityId,
        comp: ComponentId,
        value: f32,
    ) -> Result<(), CoreError> {
        self.check_write(comp)?;
        self.store.attach(entity, comp, value)
    }

    /// Reads a component value; requires read access.
    pub fn get(&self, entity: EntityId, comp: ComponentId) -> Result<Option<f32>, CoreError> {
        self.check_read(comp)?;
        self.store.get(entity, comp)
    }

    /// Removes a component; requires write access.
    pub fn remove(&mut self, entity: EntityId, comp: ComponentId) -> Result<bool, CoreError> {
        self.check_write(comp)?;
        self.store.remove(entity, comp)
    }

    /// Entities holding all of `comps`; every listed component must be
    /// readable by the caller. Served from the query memo when the store
    /// is unchanged since the last identical query.
    pub fn entities_with(&self, comps: &[ComponentId]) -> Result<Arc<Vec<EntityId>>, CoreError> {
        for comp in comps {
            self.check_read(*comp)?;
        }
        let mut queries = self.queries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(queries.entities_with(self.store, comps))
    }

    /// The match an entity belongs to.
    pub fn match_of(&self, entity: EntityId) -> Result<u64, CoreError> {
        self.store.match_of(entity)
    }

    /// Resolves a component declared by the caller's own module.
    #[must_use]
    pub fn own_component(&self, name: &str) -> Option<ComponentId> {
        self.store.catalog().id_of(self.caller, name)
    }

    /// Resolves a component by owning module slot and name; access is
    /// still checked per operation.
    #[must_use]
    pub fn component_of(&self, owner: ModuleSlot, name: &str) -> Option<ComponentId> {
        self.store.catalog().id_of(owner, name)
    }

    /// Id of the core `OWNER_ID` component.
    #[must_use]
    pub fn owner_id_component(&self) -> ComponentId {
        self.store.owner_id_component()
    }

    /// The calling module's slot.
    #[must_use]
    pub fn caller(&self) -> ModuleSlot {
        self.caller
    }
}

#[cfg(test)]
mod tests {
    use arena_proto::wire::ComponentKind;

    use super::*;
    use crate::component::PermissionLevel;

    const A: ModuleSlot = ModuleSlot(1);
    const B: ModuleSlot = ModuleSlot(2);

    fn store_with(level: PermissionLevel) -> (Store, Mutex<QueryCache>, ComponentId) {
        let mut store = Store::new(8);
        let comp = store
            .register_component(B, "B_X", level, ComponentKind::Float)
            .expect("register");
        (store, Mutex::new(QueryCache::default()), comp)
    }

    #[test]
    fn foreign_private_component_is_denied_both_ways() {
        let (mut store, queries, comp) = store_with(PermissionLevel::Private);
        let e = store.create_entity(1).expect("entity");
        {
            let mut owner_view = ModuleStore::new(&mut store, &queries, B, "b");
            owner_view.attach(e, comp, 5.0).expect("owner writes freely");
        }
        let mut view = ModuleStore::new(&mut store, &queries, A, "a");
        let err = view.get(e, comp).expect_err("read should be denied");
        assert!(
            matches!(err, CoreError::PermissionDenied { ref component, .. } if component == "B_X"),
            "{err:?}"
        );
        let err = view.attach(e, comp, 1.0).expect_err("write should be denied");
        assert!(matches!(err, CoreError::PermissionDenied { .. }), "{err:?}");
    }

    #[test]
    fn foreign_read_component_is_read_only() {
        let (mut store, queries, comp) = store_with(PermissionLevel::Read);
        let e = store.create_entity(1).expect("entity");
        {
            let mut owner_view = ModuleStore::new(&mut store, &queries, B, "b");
            owner_view.attach(e, comp, 5.0).expect("owner write");
        }
        let mut view = ModuleStore::new(&mut store, &queries, A, "a");
        assert_eq!(view.get(e, comp).expect("read allowed"), Some(5.0));
        assert!(
            view.attach(e, comp, 1.0).is_err(),
            "write to READ component must be denied"
        );
        assert!(
            view.remove(e, comp).is_err(),
            "remove of READ component must be denied"
        );
    }

    #[test]
    fn foreign_write_component_allows_everything() {
        let (mut store, queries, comp) = store_with(PermissionLevel::Write);
        let e = store.create_entity(1).expect("entity");
        let mut view = ModuleStore::new(&mut store, &queries, A, "a");
        view.attach(e, comp, 2.5).expect("write allowed");
        assert_eq!(view.get(e, comp).expect("read allowed"), Some(2.5));
        assert!(view.remove(e, comp).expect("remove allowed"));
    }

    #[test]
    fn entities_with_checks_every_listed_component() {
        let (mut store, queries, private) = store_with(PermissionLevel::Private);
        let readable = store
            .register_component(B, "B_Y", PermissionLevel::Read, ComponentKind::Float)
            .expect("register");
        let view = ModuleStore::new(&mut store, &queries, A, "a");
        let result = view.entities_with(&[readable, private]);
        assert!(
            matches!(result, Err(CoreError::PermissionDenied { .. })),
            "one unreadable component poisons the query"
        );
    }

    #[test]
    fn entities_with_serves_repeats_from_the_memo() {
        let (mut store, queries, comp) = store_with(PermissionLevel::Read);
        let e = store.create_entity(1).expect("entity");
        {
            let mut owner_view = ModuleStore::new(&mut store, &queries, B, "b");
            owner_view.attach(e, comp, 1.0).expect("attach");
        }
        let view = ModuleStore::new(&mut store, &queries, A, "a");
        let first = view.entities_with(&[comp]).expect("first");
        let second = view.entities_with(&[comp]).expect("second");
        assert!(Arc::ptr_eq(&first, &second), "repeat query hits the memo");
        assert_eq!(first.as_slice(), &[e]);
    }

    #[test]
    fn owner_keeps_full_access_to_private_components() {
        let (mut store, queries, comp) = store_with(PermissionLevel::Private);
        let e = store.create_entity(1).expect("entity");
        let mut view = ModuleStore::new(&mut store, &queries, B, "b");
        view.attach(e, comp, 3.0).expect("owner write");
        assert_eq!(view.get(e, comp).expect("owner read"), Some(3.0));
        assert!(view.remove(e, comp).expect("owner remove"));
    }
}
