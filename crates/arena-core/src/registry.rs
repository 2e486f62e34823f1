// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Module library and the per-container installed-module set.
//!
//! The [`ModuleLibrary`] is the process-wide registry of statically linked
//! module factories, populated at start-up from configuration. A
//! container's [`ModuleSet`] holds what is actually installed: resolved
//! component ids, systems in declared order, commands under their
//! qualified names, and published exports.
//!
//! Installation is validate-then-commit: every declaration check runs
//! before the store or module set is touched, so a failed install leaves
//! no partial registration behind.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::component::ComponentId;
use crate::error::CoreError;
use crate::module::{
    CommandSpec, ExportRegistry, ModuleContext, ModuleDecl, ModuleFactory, ModuleIdentifier,
    ModuleSlot, System, Version,
};
use crate::store::Store;

/// Process-wide registry of module factories.
#[derive(Default)]
pub struct ModuleLibrary {
    factories: Vec<Arc<dyn ModuleFactory>>,
    by_id: FxHashMap<String, usize>,
}

impl ModuleLibrary {
    /// Creates an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory; fails `AlreadyInstalled` on a duplicate
    /// name-version.
    pub fn register(&mut self, factory: Arc<dyn ModuleFactory>) -> Result<(), CoreError> {
        let key = factory.identifier().to_string();
        if self.by_id.contains_key(&key) {
            return Err(CoreError::AlreadyInstalled(key));
        }
        self.by_id.insert(key, self.factories.len());
        self.factories.push(factory);
        Ok(())
    }

    /// Resolves a factory by identifier.
    #[must_use]
    pub fn resolve(&self, identifier: &ModuleIdentifier) -> Option<Arc<dyn ModuleFactory>> {
        self.by_id
            .get(&identifier.to_string())
            .map(|&i| Arc::clone(&self.factories[i]))
    }

    /// Identifiers of every registered factory.
    #[must_use]
    pub fn identifiers(&self) -> Vec<ModuleIdentifier> {
        self.factories.iter().map(|f| f.identifier()).collect()
    }
}

impl std::fmt::Debug for ModuleLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLibrary")
            .field("factories", &self.by_id.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One command as installed, under its qualified name.
pub struct InstalledCommand {
    /// `module.command`.
    pub qualified_name: String,
    /// Declaration including the handler.
    pub spec: CommandSpec,
}

/// One module as installed into a container.
pub struct InstalledModule {
    /// Slot within the container.
    pub slot: ModuleSlot,
    /// Identity.
    pub identifier: ModuleIdentifier,
    /// Component ids in declaration order.
    pub component_ids: Vec<ComponentId>,
    /// The membership flag component.
    pub flag: ComponentId,
    /// Systems in declaration order.
    pub systems: Vec<Box<dyn System>>,
    /// Commands in declaration order.
    pub commands: Vec<InstalledCommand>,
}

/// Modules installed into one container. Slot 0 is the implicit core
/// module.
pub struct ModuleSet {
    modules: Vec<InstalledModule>,
    by_name: FxHashMap<String, ModuleSlot>,
    commands: FxHashMap<String, (ModuleSlot, usize)>,
    exports: ExportRegistry,
}

impl ModuleSet {
    /// Creates a module set holding only the core module, whose
    /// components are already registered in `store`.
    #[must_use]
    pub fn new(store: &Store) -> Self {
        let core_components: Vec<ComponentId> = store
            .catalog()
            .defs()
            .iter()
            .filter(|d| d.owner == ModuleSlot::CORE)
            .map(|d| d.id)
            .collect();
        let core = InstalledModule {
            slot: ModuleSlot::CORE,
            identifier: ModuleIdentifier::new("core", Version::new(1, 0)),
            flag: store.match_id_component(),
            component_ids: core_components,
            systems: Vec::new(),
            commands: Vec::new(),
        };
        let mut by_name = FxHashMap::default();
        by_name.insert("core".to_owned(), ModuleSlot::CORE);
        Self {
            modules: vec![core],
            by_name,
            commands: FxHashMap::default(),
            exports: ExportRegistry::default(),
        }
    }

    /// Builds a factory's declaration against the current exports.
    pub fn build_decl(&self, factory: &dyn ModuleFactory) -> Result<ModuleDecl, CoreError> {
        let ctx = ModuleContext {
            exports: &self.exports,
        };
        factory.build(&ctx)
    }

    /// Validates and installs a declaration built by `factory`.
    pub fn install(
        &mut self,
        store: &mut Store,
        factory: &dyn ModuleFactory,
    ) -> Result<ModuleSlot, CoreError> {
        let decl = self.build_decl(factory)?;
        self.install_decl(store, decl)
    }

    /// Validates and installs an already-built declaration.
    pub fn install_decl(
        &mut self,
        store: &mut Store,
        decl: ModuleDecl,
    ) -> Result<ModuleSlot, CoreError> {
        validate_decl(&decl)?;
        if self.by_name.contains_key(&decl.identifier.name) {
            return Err(CoreError::AlreadyInstalled(decl.identifier.to_string()));
        }

        // Commit. Component registration cannot collide: the slot is
        // fresh and declaration-internal duplicates were rejected above.
        let slot = ModuleSlot(self.modules.len() as u16);
        let mut component_ids = Vec::with_capacity(decl.components.len());
        let mut flag = None;
        for spec in &decl.components {
            let id = store.register_component(slot, &spec.name, spec.level, spec.kind)?;
            if spec.name == decl.flag_component {
                flag = Some(id);
            }
            component_ids.push(id);
        }
        let flag = flag.ok_or_else(|| {
            CoreError::Internal(format!(
                "flag component `{}` vanished during install",
                decl.flag_component
            ))
        })?;

        let commands = decl
            .commands
            .into_iter()
            .map(|spec| InstalledCommand {
                qualified_name: format!("{}.{}", decl.identifier.name, spec.name),
                spec,
            })
            .collect::<Vec<_>>();
        for (index, command) in commands.iter().enumerate() {
            self.commands
                .insert(command.qualified_name.clone(), (slot, index));
        }
        self.exports.publish(&decl.identifier.name, decl.exports);
        self.by_name.insert(decl.identifier.name.clone(), slot);
        self.modules.push(InstalledModule {
            slot,
            identifier: decl.identifier,
            component_ids,
            flag,
            systems: decl.systems,
            commands,
        });
        Ok(slot)
    }

    /// Slot of an installed module by name.
    #[must_use]
    pub fn slot_of(&self, name: &str) -> Option<ModuleSlot> {
        self.by_name.get(name).copied()
    }

    /// Installed module by slot.
    #[must_use]
    pub fn get(&self, slot: ModuleSlot) -> Option<&InstalledModule> {
        self.modules.get(slot.0 as usize)
    }

    /// Resolves a qualified command name to its module slot and index.
    #[must_use]
    pub fn command(&self, qualified_name: &str) -> Option<(ModuleSlot, usize)> {
        self.commands.get(qualified_name).copied()
    }

    /// All installed modules in slot order (core first).
    #[must_use]
    pub fn modules(&self) -> &[InstalledModule] {
        &self.modules
    }

    /// Mutable access for the tick loop (systems take `&mut self`).
    pub fn modules_mut(&mut self) -> &mut [InstalledModule] {
        &mut self.modules
    }
}

impl std::fmt::Debug for ModuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSet")
            .field(
                "modules",
                &self
                    .modules
                    .iter()
                    .map(|m| m.identifier.to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Declaration checks, run before any state is touched.
fn validate_decl(decl: &ModuleDecl) -> Result<(), CoreError> {
    if decl.identifier.name.is_empty() {
        return Err(CoreError::InvalidSpec("empty module name".into()));
    }
    let mut comp_names = std::collections::HashSet::new();
    for comp in &decl.components {
        if comp.name.is_empty() {
            return Err(CoreError::InvalidSpec(format!(
                "module `{}` declares an unnamed component",
                decl.identifier
            )));
        }
        if !comp_names.insert(comp.name.as_str()) {
            return Err(CoreError::InvalidSpec(format!(
                "module `{}` declares component `{}` twice",
                decl.identifier, comp.name
            )));
        }
    }
    if !comp_names.contains(decl.flag_component.as_str()) {
        return Err(CoreError::InvalidSpec(format!(
            "module `{}` flag component `{}` is not declared",
            decl.identifier, decl.flag_component
        )));
    }
    let mut cmd_names = std::collections::HashSet::new();
    for cmd in &decl.commands {
        if cmd.name.is_empty() {
            return Err(CoreError::InvalidSpec(format!(
                "module `{}` declares an unnamed command",
                decl.identifier
            )));
        }
        if !cmd_names.insert(cmd.name.as_str()) {
            return Err(CoreError::InvalidSpec(format!(
                "module `{}` declares command `{}` twice",
                decl.identifier, cmd.name
            )));
        }
        let mut param_names = std::collections::HashSet::new();
        for param in &cmd.parameters {
            if !param_names.insert(param.name.as_str()) {
                return Err(CoreError::InvalidSpec(format!(
                    "command `{}.{}` declares parameter `{}` twice",
                    decl.identifier.name, cmd.name, param.name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use arena_proto::wire::ComponentKind;

    use super::*;
    use crate::component::PermissionLevel;
    use crate::module::{ComponentSpec, ExportMap};

    struct TestFactory {
        name: &'static str,
    }

    impl ModuleFactory for TestFactory {
        fn identifier(&self) -> ModuleIdentifier {
            ModuleIdentifier::new(self.name, Version::new(1, 0))
        }

        fn build(&self, _ctx: &ModuleContext<'_>) -> Result<ModuleDecl, CoreError> {
            Ok(ModuleDecl {
                identifier: self.identifier(),
                components: vec![
                    ComponentSpec {
                        name: "FLAG".into(),
                        level: PermissionLevel::Read,
                        kind: ComponentKind::Bool,
                    },
                    ComponentSpec {
                        name: "VALUE".into(),
                        level: PermissionLevel::Write,
                        kind: ComponentKind::Float,
                    },
                ],
                flag_component: "FLAG".into(),
                systems: vec![],
                commands: vec![],
                exports: ExportMap::default(),
            })
        }
    }

    #[test]
    fn library_rejects_duplicate_registration() {
        let mut lib = ModuleLibrary::new();
        lib.register(Arc::new(TestFactory { name: "m" }))
            .expect("first");
        let err = lib
            .register(Arc::new(TestFactory { name: "m" }))
            .expect_err("duplicate");
        assert!(matches!(err, CoreError::AlreadyInstalled(_)), "{err:?}");
    }

    #[test]
    fn install_registers_components_and_resolves_by_name() {
        let mut store = Store::new(8);
        let mut set = ModuleSet::new(&store);
        let factory = TestFactory { name: "combat" };
        let slot = set.install(&mut store, &factory).expect("install");
        assert_eq!(set.slot_of("combat"), Some(slot));
        let module = set.get(slot).expect("module");
        assert_eq!(module.component_ids.len(), 2);
        assert_eq!(
            store.catalog().id_of(slot, "FLAG"),
            Some(module.flag),
            "flag resolves to the declared component"
        );
    }

    #[test]
    fn duplicate_module_name_fails_already_installed() {
        let mut store = Store::new(8);
        let mut set = ModuleSet::new(&store);
        set.install(&mut store, &TestFactory { name: "combat" })
            .expect("first install");
        let before = store.catalog().len();
        let err = set
            .install(&mut store, &TestFactory { name: "combat" })
            .expect_err("duplicate install");
        assert!(matches!(err, CoreError::AlreadyInstalled(_)), "{err:?}");
        assert_eq!(
            store.catalog().len(),
            before,
            "failed install leaves no partial registration"
        );
    }

    #[test]
    fn decl_validation_rejects_bad_shapes() {
        let base = || ModuleDecl {
            identifier: ModuleIdentifier::new("m", Version::new(1, 0)),
            components: vec![ComponentSpec {
                name: "FLAG".into(),
                level: PermissionLevel::Read,
                kind: ComponentKind::Bool,
            }],
            flag_component: "FLAG".into(),
            systems: vec![],
            commands: vec![],
            exports: ExportMap::default(),
        };

        let mut dup_comp = base();
        dup_comp.components.push(ComponentSpec {
            name: "FLAG".into(),
            level: PermissionLevel::Read,
            kind: ComponentKind::Bool,
        });
        assert!(validate_decl(&dup_comp).is_err(), "duplicate component");

        let mut missing_flag = base();
        missing_flag.flag_component = "NOPE".into();
        assert!(validate_decl(&missing_flag).is_err(), "undeclared flag");

        assert!(validate_decl(&base()).is_ok(), "well-formed decl passes");
    }
}
