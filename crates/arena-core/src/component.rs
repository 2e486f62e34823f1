// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Component identity, permission levels, and the catalog.
//!
//! A component is a named, typed column owned by exactly one module. The
//! catalog assigns each registered component a dense [`ComponentId`] used
//! to index column storage; ids are stable for the lifetime of a
//! container.

use arena_proto::wire::ComponentKind;
use rustc_hash::FxHashMap;

use crate::error::CoreError;
use crate::module::ModuleSlot;

/// Dense component handle; index into a container's column storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u32);

/// Cross-module access level declared per component.
///
/// The owning module always has full access; the level only constrains
/// other modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PermissionLevel {
    /// Invisible to other modules.
    Private,
    /// Other modules may read.
    Read,
    /// Other modules may read, write, and remove.
    Write,
}

/// A component as declared by its owning module.
#[derive(Debug, Clone)]
pub struct ComponentDef {
    /// Dense handle.
    pub id: ComponentId,
    /// Stable name, unique within the owning module.
    pub name: String,
    /// Owning module slot.
    pub owner: ModuleSlot,
    /// Cross-module access level.
    pub level: PermissionLevel,
    /// Render tag for clients.
    pub kind: ComponentKind,
}

impl ComponentDef {
    /// Whether `caller` may read this component.
    #[must_use]
    pub fn readable_by(&self, caller: ModuleSlot) -> bool {
        caller == self.owner || self.level >= PermissionLevel::Read
    }

    /// Whether `caller` may write or remove this component.
    #[must_use]
    pub fn writable_by(&self, caller: ModuleSlot) -> bool {
        caller == self.owner || self.level == PermissionLevel::Write
    }
}

/// Registry of all components installed in one container.
#[derive(Debug, Default)]
pub struct ComponentCatalog {
    defs: Vec<ComponentDef>,
    by_name: FxHashMap<(ModuleSlot, String), ComponentId>,
}

impl ComponentCatalog {
    /// Registers a component and returns its dense id.
    ///
    /// Fails `AlreadyExists`-flavored `InvalidSpec` when the owning module
    /// already declared the name; uniqueness is per module, not global.
    pub fn register(
        &mut self,
        owner: ModuleSlot,
        name: &str,
        level: PermissionLevel,
        kind: ComponentKind,
    ) -> Result<ComponentId, CoreError> {
        if name.is_empty() {
            return Err(CoreError::InvalidSpec("empty component name".into()));
        }
        let key = (owner, name.to_owned());
        if self.by_name.contains_key(&key) {
            return Err(CoreError::InvalidSpec(format!(
                "duplicate component `{name}` in module slot {}",
                owner.0
            )));
        }
        let id = ComponentId(self.defs.len() as u32);
        self.defs.push(ComponentDef {
            id,
            name: name.to_owned(),
            owner,
            level,
            kind,
        });
        self.by_name.insert(key, id);
        Ok(id)
    }

    /// Looks up a component declared by `owner`.
    #[must_use]
    pub fn id_of(&self, owner: ModuleSlot, name: &str) -> Option<ComponentId> {
        self.by_name.get(&(owner, name.to_owned())).copied()
    }

    /// Definition for `id`; `None` for a foreign/unregistered id.
    #[must_use]
    pub fn def(&self, id: ComponentId) -> Option<&ComponentDef> {
        self.defs.get(id.0 as usize)
    }

    /// All definitions in registration order.
    #[must_use]
    pub fn defs(&self) -> &[ComponentDef] {
        &self.defs
    }

    /// Number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// True when no component is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: ModuleSlot = ModuleSlot(1);
    const OTHER: ModuleSlot = ModuleSlot(2);

    fn def(level: PermissionLevel) -> ComponentDef {
        ComponentDef {
            id: ComponentId(0),
            name: "X".into(),
            owner: OWNER,
            level,
            kind: ComponentKind::Float,
        }
    }

    #[test]
    fn permission_table_matches_the_contract() {
        // owner: full access at every level
        for level in [
            PermissionLevel::Private,
            PermissionLevel::Read,
            PermissionLevel::Write,
        ] {
            let d = def(level);
            assert!(d.readable_by(OWNER), "owner read at {level:?}");
            assert!(d.writable_by(OWNER), "owner write at {level:?}");
        }
        // other: denied / read-only / full
        let private = def(PermissionLevel::Private);
        assert!(!private.readable_by(OTHER));
        assert!(!private.writable_by(OTHER));
        let read = def(PermissionLevel::Read);
        assert!(read.readable_by(OTHER));
        assert!(!read.writable_by(OTHER));
        let write = def(PermissionLevel::Write);
        assert!(write.readable_by(OTHER));
        assert!(write.writable_by(OTHER));
    }

    #[test]
    fn catalog_rejects_duplicate_names_per_module() {
        let mut catalog = ComponentCatalog::default();
        catalog
            .register(OWNER, "X", PermissionLevel::Read, ComponentKind::Float)
            .expect("first registration");
        let err = catalog
            .register(OWNER, "X", PermissionLevel::Read, ComponentKind::Float)
            .expect_err("duplicate should fail");
        assert!(matches!(err, CoreError::InvalidSpec(_)));
        // same name under a different module is fine
        catalog
            .register(OTHER, "X", PermissionLevel::Read, ComponentKind::Float)
            .expect("same name, different module");
    }
}
