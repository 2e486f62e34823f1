// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Columnar snapshot and delta stream formats.
//!
//! Invariants
//! - Every [`ComponentColumn`] in a snapshot has `values.len() ==
//!   entity_ids.len()`; `values[i]` belongs to entity `entity_ids[i]`.
//! - `entity_ids` is sorted ascending; module sections appear in module
//!   install order and columns in declaration order, so two snapshots of the
//!   same state are byte-identical.
//! - A delta with an empty base (`from_tick == None`) is the full-snapshot
//!   case: every entity appears in `added_entities` and every present value
//!   in `changed_components`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Logical type tag for a component column.
///
/// Storage is always a 32-bit float; the tag tells clients how to render
/// the value (booleans are `0.0` / `1.0`, integers are exact up to 2^24).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// IEEE-754 single-precision scalar.
    Float,
    /// Integral value stored in the float mantissa.
    Int,
    /// Boolean flag (`0.0` absentable truth value).
    Bool,
}

/// One dense component column of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentColumn {
    /// Component name, unique within its module.
    pub name: String,
    /// Render tag for the column.
    pub kind: ComponentKind,
    /// Value per entity; `None` encodes *not present*.
    pub values: Vec<Option<f32>>,
}

/// All columns declared by one module, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSection {
    /// Module name.
    pub name: String,
    /// Module version string (`major.minor` or `major.minor.patch`).
    pub version: String,
    /// Declared component columns.
    pub components: Vec<ComponentColumn>,
}

/// Tick-aligned columnar dump of one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotWire {
    /// Local match id within the container.
    pub match_id: u64,
    /// Tick at which the snapshot was taken.
    pub tick: u64,
    /// Sorted entity-id vector indexing every column.
    pub entity_ids: Vec<u64>,
    /// Module sections in install order.
    pub modules: Vec<ModuleSection>,
}

impl SnapshotWire {
    /// Returns the number of entities captured by the snapshot.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entity_ids.len()
    }
}

/// Per-component scalar changes: `module → component → entity index → value`.
///
/// Entity indices refer to the *target* snapshot's `entity_ids` vector. A
/// `None` value encodes component removal.
pub type ChangedComponents = BTreeMap<String, BTreeMap<String, BTreeMap<usize, Option<f32>>>>;

/// Change set between two snapshots of the same match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaWire {
    /// Local match id within the container.
    pub match_id: u64,
    /// Base tick, `None` for the full-snapshot case.
    pub from_tick: Option<u64>,
    /// Target tick; strictly greater than `from_tick` when present.
    pub to_tick: u64,
    /// Scalar changes keyed by target entity index.
    pub changed_components: ChangedComponents,
    /// Entities present in the target but not the base.
    pub added_entities: Vec<u64>,
    /// Entities present in the base but not the target.
    pub removed_entities: Vec<u64>,
    /// Total number of changed cells, for observability.
    pub change_count: usize,
}

impl DeltaWire {
    /// True when the delta carries no changes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.change_count == 0 && self.added_entities.is_empty() && self.removed_entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_with_camel_case_fields() {
        let snap = SnapshotWire {
            match_id: 1,
            tick: 5,
            entity_ids: vec![0, 1],
            modules: vec![ModuleSection {
                name: "movement".into(),
                version: "1.0".into(),
                components: vec![ComponentColumn {
                    name: "POSITION_X".into(),
                    kind: ComponentKind::Float,
                    values: vec![Some(1.0), None],
                }],
            }],
        };
        let json = serde_json::to_value(&snap).expect("serialize");
        assert!(json.get("matchId").is_some(), "matchId field: {json}");
        assert!(json.get("entityIds").is_some(), "entityIds field: {json}");
        let col = &json["modules"][0]["components"][0];
        assert_eq!(col["kind"], "float");
        assert_eq!(col["values"][1], serde_json::Value::Null);
    }

    #[test]
    fn empty_delta_is_empty() {
        let delta = DeltaWire {
            match_id: 1,
            from_tick: Some(4),
            to_tick: 5,
            changed_components: ChangedComponents::new(),
            added_entities: vec![],
            removed_entities: vec![],
            change_count: 0,
        };
        assert!(delta.is_empty());
    }
}
