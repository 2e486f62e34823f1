// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The permission-scoped module system.
//!
//! Modules are statically linked plugins discovered through a stable
//! capability interface: a [`ModuleFactory`] produces a [`ModuleDecl`]
//! (components with permission levels, a flag component, ordered systems,
//! schema-typed commands, and typed exports) when given a
//! [`ModuleContext`]. Factories are collected in a
//! [`crate::registry::ModuleLibrary`] at process start-up; containers
//! install from the library by identifier.
//!
//! A module identifier is `name:version`. Versions are `major.minor` with
//! an optional `.patch`.

use std::any::{Any, TypeId};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arena_proto::dto::ParamInfo;
use arena_proto::wire::ComponentKind;
use rustc_hash::FxHashMap;
use serde_json::Map;

use crate::component::PermissionLevel;
use crate::error::{CoreError, SystemError};
use crate::view::ModuleStore;

/// Installed-module handle within one container; slot 0 is the core
/// module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleSlot(pub u16);

impl ModuleSlot {
    /// The implicit core module (owns `MATCH_ID`, `ENTITY_ID`,
    /// `OWNER_ID`).
    pub const CORE: Self = Self(0);
}

/// Module version: `major.minor` or `major.minor.patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    /// Breaking-change counter.
    pub major: u32,
    /// Feature counter.
    pub minor: u32,
    /// Optional fix counter.
    pub patch: Option<u32>,
}

impl Version {
    /// Builds a two-part version.
    #[must_use]
    pub fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            patch: None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

impl FromStr for Version {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CoreError::InvalidSpec(format!("invalid version `{s}`"));
        let mut parts = s.split('.');
        let major = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let minor = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let patch = match parts.next() {
            Some(p) => Some(p.parse().map_err(|_| bad())?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

/// Module identity: `name:version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleIdentifier {
    /// Module name.
    pub name: String,
    /// Module version.
    pub version: Version,
}

impl ModuleIdentifier {
    /// Builds an identifier from parts.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ModuleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

impl FromStr for ModuleIdentifier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = s.split_once(':').ok_or_else(|| {
            CoreError::InvalidSpec(format!("module spec `{s}` is missing a colon"))
        })?;
        if name.is_empty() {
            return Err(CoreError::InvalidSpec(format!(
                "module spec `{s}` has an empty name"
            )));
        }
        if version.is_empty() {
            return Err(CoreError::InvalidSpec(format!(
                "module spec `{s}` has an empty version"
            )));
        }
        Ok(Self {
            name: name.to_owned(),
            version: version.parse()?,
        })
    }
}

/// One component as declared by a module.
#[derive(Debug, Clone)]
pub struct ComponentSpec {
    /// Component name, unique within the module.
    pub name: String,
    /// Cross-module access level.
    pub level: PermissionLevel,
    /// Render tag.
    pub kind: ComponentKind,
}

/// Tick-phase callback owned by a module.
///
/// Systems run to completion synchronously within the tick; long-running
/// work must be modelled as a multi-tick state machine.
pub trait System: Send + Sync {
    /// Stable system name for attribution in logs and metrics.
    fn name(&self) -> &str;
    /// Runs one tick against the module-scoped store.
    fn run(&mut self, tick: u64, store: &mut ModuleStore<'_>) -> Result<(), SystemError>;
}

/// Resolved invocation handed to a command handler.
#[derive(Debug)]
pub struct CommandInvocation<'a> {
    /// Target match for match-scoped commands.
    pub match_id: Option<u64>,
    /// Schema-validated parameters.
    pub parameters: &'a Map<String, serde_json::Value>,
    /// Submitting player, when the command arrived over a player socket.
    pub player_id: Option<&'a str>,
}

/// Externally invokable action owned by a module.
pub trait CommandHandler: Send + Sync {
    /// Executes the command against the module-scoped store.
    fn execute(
        &mut self,
        invocation: &CommandInvocation<'_>,
        store: &mut ModuleStore<'_>,
    ) -> Result<(), CoreError>;
}

/// One command declaration: schema plus handler.
pub struct CommandSpec {
    /// Command name, unique within the module; exposed as
    /// `module.command`.
    pub name: String,
    /// Human-readable description for the metadata surface.
    pub description: String,
    /// Parameter schema.
    pub parameters: Vec<ParamInfo>,
    /// The handler invoked during command drain.
    pub handler: Box<dyn CommandHandler>,
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Typed capability exports a module offers to other modules.
///
/// Keys are Rust types; values are `Arc`s of those types. Consumers fetch
/// with [`ExportMap::get`] and downcast safely.
#[derive(Default)]
pub struct ExportMap {
    entries: FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ExportMap {
    /// Publishes a capability under its type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: Arc<T>) {
        self.entries.insert(TypeId::of::<T>(), value);
    }

    /// Fetches a capability by type.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }

    /// True when nothing is exported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ExportMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportMap")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Exports of all installed modules, keyed by module name.
#[derive(Debug, Default)]
pub struct ExportRegistry {
    by_module: FxHashMap<String, ExportMap>,
}

impl ExportRegistry {
    /// Records a module's exports at install time.
    pub fn publish(&mut self, module: &str, exports: ExportMap) {
        self.by_module.insert(module.to_owned(), exports);
    }

    /// Fetches a capability exported by `module`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, module: &str) -> Option<Arc<T>> {
        self.by_module.get(module).and_then(ExportMap::get::<T>)
    }

    /// Removes a module's exports (uninstall/rollback).
    pub fn retract(&mut self, module: &str) {
        self.by_module.remove(module);
    }
}

/// Everything a factory needs to assemble its declaration.
///
/// The context is the injection seam: factories resolve capabilities
/// exported by previously installed modules here instead of reaching for
/// ambient state.
pub struct ModuleContext<'a> {
    /// Exports of modules installed before this one.
    pub exports: &'a ExportRegistry,
}

/// Complete declaration produced by a factory.
pub struct ModuleDecl {
    /// Module identity.
    pub identifier: ModuleIdentifier,
    /// Declared components in order.
    pub components: Vec<ComponentSpec>,
    /// Name of the component used to test module membership; must appear
    /// in `components`.
    pub flag_component: String,
    /// Ordered tick systems.
    pub systems: Vec<Box<dyn System>>,
    /// Declared commands.
    pub commands: Vec<CommandSpec>,
    /// Typed capability exports.
    pub exports: ExportMap,
}

impl fmt::Debug for ModuleDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDecl")
            .field("identifier", &self.identifier)
            .field("components", &self.components)
            .field("flag_component", &self.flag_component)
            .field("systems", &self.systems.len())
            .field("commands", &self.commands.len())
            .finish_non_exhaustive()
    }
}

/// Factory contract every module bundle exports.
pub trait ModuleFactory: Send + Sync {
    /// Identity the factory will declare; used for library lookups before
    /// paying for a build.
    fn identifier(&self) -> ModuleIdentifier;
    /// Builds the declaration.
    fn build(&self, ctx: &ModuleContext<'_>) -> Result<ModuleDecl, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_parses_name_and_version() {
        let id: ModuleIdentifier = "movement:1.2".parse().expect("parse");
        assert_eq!(id.name, "movement");
        assert_eq!(id.version, Version::new(1, 2));
        assert_eq!(id.to_string(), "movement:1.2");

        let id: ModuleIdentifier = "physics:2.0.7".parse().expect("parse patch");
        assert_eq!(id.version.patch, Some(7));
        assert_eq!(id.to_string(), "physics:2.0.7");
    }

    #[test]
    fn identifier_rejects_malformed_specs() {
        for input in ["movement", ":1.0", "movement:", "m:1", "m:1.x", "m:1.2.3.4"] {
            let err = input
                .parse::<ModuleIdentifier>()
                .expect_err("should reject malformed spec");
            assert!(matches!(err, CoreError::InvalidSpec(_)), "for `{input}`");
        }
    }

    #[test]
    fn export_map_round_trips_typed_values() {
        #[derive(Debug, PartialEq)]
        struct Teleporter(u32);

        let mut exports = ExportMap::default();
        exports.insert(Arc::new(Teleporter(9)));
        let mut registry = ExportRegistry::default();
        registry.publish("movement", exports);

        let fetched: Arc<Teleporter> = registry.get("movement").expect("export present");
        assert_eq!(*fetched, Teleporter(9));
        assert!(
            registry.get::<String>("movement").is_none(),
            "wrong type yields nothing"
        );
        assert!(
            registry.get::<Teleporter>("physics").is_none(),
            "wrong module yields nothing"
        );
    }
}
