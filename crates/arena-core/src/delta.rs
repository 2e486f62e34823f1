// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Delta computation and application between two snapshots of one match.
//!
//! A delta has three parts: per-component scalar changes keyed by the
//! *target* snapshot's entity index, the added-entity set, and the
//! removed-entity set. Round-trip contract: for any base and target with
//! the same module layout, `apply(base, compute(Some(base), target))`
//! equals `target`.
//!
//! Deltas are cumulative: the broadcaster computes each client's delta
//! from that client's last-sent tick, so missed ticks coalesce.

use arena_proto::wire::{ChangedComponents, DeltaWire, SnapshotWire};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Failure to apply a delta to a base snapshot.
#[derive(Debug, Error)]
pub enum DeltaError {
    /// The delta's base tick does not match the snapshot it is being
    /// applied to.
    #[error("delta base tick {expected:?} does not match snapshot tick {actual}")]
    BaseMismatch {
        /// `fromTick` carried by the delta.
        expected: Option<u64>,
        /// Tick of the snapshot being patched.
        actual: u64,
    },
    /// The delta references an entity index outside the merged vector.
    #[error("delta index {index} out of bounds for {len} entities")]
    IndexOutOfBounds {
        /// Offending index.
        index: usize,
        /// Entity vector length.
        len: usize,
    },
}

/// Computes the delta from `base` to `curr`.
///
/// With `base = None` this is the full-snapshot case: every entity is
/// added and every present cell is a change.
#[must_use]
pub fn compute(base: Option<&SnapshotWire>, curr: &SnapshotWire) -> DeltaWire {
    let base_ids: &[u64] = base.map_or(&[], |b| &b.entity_ids);
    let added = diff_sorted(&curr.entity_ids, base_ids);
    let removed = diff_sorted(base_ids, &curr.entity_ids);

    let base_index: FxHashMap<u64, usize> = base_ids
        .iter()
        .enumerate()
        .map(|(i, &e)| (e, i))
        .collect();

    let mut changed = ChangedComponents::new();
    let mut change_count = 0usize;
    for section in &curr.modules {
        let base_section = base.and_then(|b| b.modules.iter().find(|m| m.name == section.name));
        for column in &section.components {
            let base_column =
                base_section.and_then(|s| s.components.iter().find(|c| c.name == column.name));
            for (ix, value) in column.values.iter().enumerate() {
                let entity = curr.entity_ids[ix];
                let include = match base_index.get(&entity) {
                    Some(&base_ix) => {
                        let base_value = base_column.and_then(|c| c.values[base_ix]);
                        *value != base_value
                    }
                    // Newly added entity: only present cells matter.
                    None => value.is_some(),
                };
                if include {
                    changed
                        .entry(section.name.clone())
                        .or_default()
                        .entry(column.name.clone())
                        .or_default()
                        .insert(ix, *value);
                    change_count += 1;
                }
            }
        }
    }

    DeltaWire {
        match_id: curr.match_id,
        from_tick: base.map(|b| b.tick),
        to_tick: curr.tick,
        changed_components: changed,
        added_entities: added,
        removed_entities: removed,
        change_count,
    }
}

/// Applies `delta` to `base`, producing the target snapshot.
///
/// The module/column layout of the result is the base's; sections the
/// delta references but the base lacks are ignored (module sets are
/// stable within a match).
pub fn apply(base: &SnapshotWire, delta: &DeltaWire) -> Result<SnapshotWire, DeltaError> {
    if delta.from_tick != Some(base.tick) {
        return Err(DeltaError::BaseMismatch {
            expected: delta.from_tick,
            actual: base.tick,
        });
    }

    let removed: std::collections::HashSet<u64> = delta.removed_entities.iter().copied().collect();
    let mut ids: Vec<u64> = base
        .entity_ids
        .iter()
        .copied()
        .filter(|e| !removed.contains(e))
        .chain(delta.added_entities.iter().copied())
        .collect();
    ids.sort_unstable();
    ids.dedup();

    let base_index: FxHashMap<u64, usize> = base
        .entity_ids
        .iter()
        .enumerate()
        .map(|(i, &e)| (e, i))
        .collect();

    let mut out = SnapshotWire {
        match_id: base.match_id,
        tick: delta.to_tick,
        entity_ids: ids,
        modules: Vec::with_capacity(base.modules.len()),
    };

    for section in &base.modules {
        let changed_section = delta.changed_components.get(&section.name);
        let mut components = Vec::with_capacity(section.components.len());
        for column in &section.components {
            let changed_column = changed_section.and_then(|s| s.get(&column.name));
            let mut values = Vec::with_capacity(out.entity_ids.len());
            for (ix, entity) in out.entity_ids.iter().enumerate() {
                let value = match changed_column.and_then(|c| c.get(&ix)) {
                    Some(&patched) => patched,
                    None => match base_index.get(entity) {
                        Some(&base_ix) => column.values[base_ix],
                        None => None,
                    },
                };
                values.push(value);
            }
            components.push(arena_proto::wire::ComponentColumn {
                name: column.name.clone(),
                kind: column.kind,
                values,
            });
        }
        out.modules.push(arena_proto::wire::ModuleSection {
            name: section.name.clone(),
            version: section.version.clone(),
            components,
        });
    }

    // Bounds check: every referenced index must fall inside the merged
    // vector, otherwise the delta and base disagree about the world.
    let len = out.entity_ids.len();
    for columns in delta.changed_components.values() {
        for cells in columns.values() {
            if let Some((&index, _)) = cells.iter().next_back() {
                if index >= len {
                    return Err(DeltaError::IndexOutOfBounds { index, len });
                }
            }
        }
    }

    Ok(out)
}

/// Elements of sorted `a` missing from sorted `b`.
fn diff_sorted(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = Vec::new();
    let mut bi = 0usize;
    for &x in a {
        while bi < b.len() && b[bi] < x {
            bi += 1;
        }
        if bi >= b.len() || b[bi] != x {
            out.push(x);
        }
    }
    out
}
