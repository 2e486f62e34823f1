// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Per-match snapshot construction and the snapshot cache.
//!
//! A snapshot walks the match's enabled modules in install order and each
//! module's declared components in declaration order, gathering one dense
//! column per component aligned with the sorted entity-id vector. Column
//! alignment invariant: every column has `values.len() ==
//! entity_ids.len()` and `values[i]` belongs to `entity_ids[i]`.
//!
//! Cache rule set per match (in decision order):
//! 1. no cache → full build
//! 2. cache older than `max_age_ticks` → full build
//! 3. dirty info empty → cached as-is (hit)
//! 4. dirty fraction above `rebuild_threshold`, or any structural change
//!    → full build
//! 5. otherwise → incremental update of the modified entities' touched
//!    cells
//!
//! Player-scoped snapshots filter the entity vector by `OWNER_ID` first
//! and are never cached; they are derived per subscriber on demand.

use std::sync::Arc;

use arena_proto::wire::{ComponentColumn, ModuleSection, SnapshotWire};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::dirty::DirtyInfo;
use crate::entity::EntityId;
use crate::module::ModuleSlot;
use crate::registry::ModuleSet;
use crate::store::Store;

/// Tunables for the per-match snapshot cache.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotPolicy {
    /// Cached snapshots older than this are rebuilt outright.
    pub max_age_ticks: u64,
    /// Dirty fraction (`changes / totalEntities`) above which an
    /// incremental update is not worth it.
    pub rebuild_threshold: f64,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            max_age_ticks: 100,
            rebuild_threshold: 0.5,
        }
    }
}

/// Builds a full snapshot of `match_id` at `tick`.
#[must_use]
pub fn build_snapshot(
    store: &Store,
    modules: &ModuleSet,
    enabled: &[ModuleSlot],
    match_id: u64,
    tick: u64,
) -> SnapshotWire {
    let ids = store.entities_in_match(match_id);
    build_with_ids(store, modules, enabled, match_id, tick, ids)
}

/// Builds a player-scoped snapshot: entities whose `OWNER_ID` equals the
/// player's slot. A player owning nothing yields zero-length columns.
#[must_use]
pub fn build_player_snapshot(
    store: &Store,
    modules: &ModuleSet,
    enabled: &[ModuleSlot],
    match_id: u64,
    tick: u64,
    player_slot: u32,
) -> SnapshotWire {
    let owner = store.owner_id_component();
    let needle = player_slot as f32;
    let ids = store
        .entities_in_match(match_id)
        .into_iter()
        .filter(|&e| store.cell(owner, e) == Some(needle))
        .collect();
    build_with_ids(store, modules, enabled, match_id, tick, ids)
}

fn build_with_ids(
    store: &Store,
    modules: &ModuleSet,
    enabled: &[ModuleSlot],
    match_id: u64,
    tick: u64,
    ids: Vec<EntityId>,
) -> SnapshotWire {
    let mut sections = Vec::with_capacity(enabled.len());
    for &slot in enabled {
        let Some(module) = modules.get(slot) else {
            continue;
        };
        let mut components = Vec::with_capacity(module.component_ids.len());
        for &comp in &module.component_ids {
            let Some(def) = store.catalog().def(comp) else {
                continue;
            };
            components.push(ComponentColumn {
                name: def.name.clone(),
                kind: def.kind,
                values: ids.iter().map(|&e| store.cell(comp, e)).collect(),
            });
        }
        sections.push(ModuleSection {
            name: module.identifier.name.clone(),
            version: module.identifier.version.to_string(),
            components,
        });
    }
    SnapshotWire {
        match_id,
        tick,
        entity_ids: ids.into_iter().map(EntityId::raw).collect(),
        modules: sections,
    }
}

/// Per-match snapshot caches for one container.
///
/// Single-writer: only the broadcaster calls [`SnapshotCaches::snapshot`],
/// and the container guards the whole struct with one lock. Dirty info is
/// consumed under that same lock.
#[derive(Debug)]
pub struct SnapshotCaches {
    policy: SnapshotPolicy,
    per_match: FxHashMap<u64, Arc<SnapshotWire>>,
}

impl SnapshotCaches {
    /// Creates caches with the given policy.
    #[must_use]
    pub fn new(policy: SnapshotPolicy) -> Self {
        Self {
            policy,
            per_match: FxHashMap::default(),
        }
    }

    /// Returns the match snapshot for `tick`, applying the cache rules.
    pub fn snapshot(
        &mut self,
        store: &Store,
        modules: &ModuleSet,
        enabled: &[ModuleSlot],
        match_id: u64,
        tick: u64,
    ) -> Arc<SnapshotWire> {
        let dirty = store.consume_dirty(match_id);
        let decision = self.decide(match_id, tick, &dirty);
        let built = match decision {
            CacheDecision::Hit => {
                // consume() already reset the (empty) window.
                return Arc::clone(&self.per_match[&match_id]);
            }
            CacheDecision::Full => Arc::new(build_snapshot(store, modules, enabled, match_id, tick)),
            CacheDecision::Incremental => {
                let cached = Arc::clone(&self.per_match[&match_id]);
                Arc::new(incremental_update(store, modules, enabled, &cached, &dirty, tick))
            }
        };
        debug!(match_id, tick, ?decision, "snapshot built");
        self.per_match.insert(match_id, Arc::clone(&built));
        built
    }

    fn decide(&self, match_id: u64, tick: u64, dirty: &DirtyInfo) -> CacheDecision {
        let Some(cached) = self.per_match.get(&match_id) else {
            return CacheDecision::Full;
        };
        if tick.saturating_sub(cached.tick) > self.policy.max_age_ticks {
            return CacheDecision::Full;
        }
        if dirty.is_empty() {
            return CacheDecision::Hit;
        }
        if dirty.is_structural() {
            return CacheDecision::Full;
        }
        let total = cached.entity_ids.len();
        if total == 0 {
            return CacheDecision::Full;
        }
        let fraction = dirty.change_count() as f64 / total as f64;
        if fraction > self.policy.rebuild_threshold {
            CacheDecision::Full
        } else {
            CacheDecision::Incremental
        }
    }

    /// Drops the cache for `match_id` (match deletion).
    pub fn invalidate(&mut self, match_id: u64) {
        self.per_match.remove(&match_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheDecision {
    Hit,
    Full,
    Incremental,
}

/// Copies the cached columns and overwrites just the modified entities'
/// touched cells. Only valid when the dirty window had no structural
/// change, so the entity vector is unchanged.
fn incremental_update(
    store: &Store,
    modules: &ModuleSet,
    enabled: &[ModuleSlot],
    cached: &SnapshotWire,
    dirty: &DirtyInfo,
    tick: u64,
) -> SnapshotWire {
    let mut next = cached.clone();
    next.tick = tick;

    // Walk sections in the same order they were built so columns line up
    // with the modules' component-id lists.
    let mut section_ix = 0;
    for &slot in enabled {
        let Some(module) = modules.get(slot) else {
            continue;
        };
        let Some(section) = next.modules.get_mut(section_ix) else {
            break;
        };
        section_ix += 1;
        for (col_ix, &comp) in module.component_ids.iter().enumerate() {
            if !dirty.components.contains(&comp) {
                continue;
            }
            let Some(column) = section.components.get_mut(col_ix) else {
                continue;
            };
            for &entity in &dirty.modified {
                if let Ok(ix) = next.entity_ids.binary_search(&entity.raw()) {
                    column.values[ix] = store.cell(comp, entity);
                }
            }
        }
    }
    next
}
