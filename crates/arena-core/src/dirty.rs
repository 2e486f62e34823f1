// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Per-match dirty tracking for the snapshot pipeline.
//!
//! The store records which entities were modified, added, or removed and
//! which components were touched since the last [`DirtyMap::consume`].
//! Consume-and-reset is atomic with respect to the store's locking: the
//! snapshot cache takes dirty info under its own lock while holding the
//! store read lock, and writers only run under the write lock.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::component::ComponentId;
use crate::entity::EntityId;

/// Dirty information for one match since the last consume.
#[derive(Debug, Default, Clone)]
pub struct DirtyInfo {
    /// Entities with at least one component cell written or removed.
    pub modified: FxHashSet<EntityId>,
    /// Entities created in the window.
    pub added: FxHashSet<EntityId>,
    /// Entities destroyed in the window.
    pub removed: FxHashSet<EntityId>,
    /// Components with at least one touched cell.
    pub components: FxHashSet<ComponentId>,
}

impl DirtyInfo {
    /// True when nothing changed in the window.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }

    /// Entities added or removed; forces a full snapshot rebuild.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Count of entities affected in any way.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.modified.len() + self.added.len() + self.removed.len()
    }
}

/// Dirty info per match.
#[derive(Debug, Default)]
pub struct DirtyMap {
    per_match: FxHashMap<u64, DirtyInfo>,
}

impl DirtyMap {
    /// Records a cell write or removal.
    pub fn touch(&mut self, match_id: u64, entity: EntityId, component: ComponentId) {
        let info = self.per_match.entry(match_id).or_default();
        info.components.insert(component);
        // An entity added in this window stays "added"; modification is
        // implied by the full build its addition will trigger anyway.
        if !info.added.contains(&entity) {
            info.modified.insert(entity);
        }
    }

    /// Records an entity creation.
    pub fn add_entity(&mut self, match_id: u64, entity: EntityId) {
        self.per_match.entry(match_id).or_default().added.insert(entity);
    }

    /// Records an entity destruction.
    pub fn remove_entity(&mut self, match_id: u64, entity: EntityId) {
        let info = self.per_match.entry(match_id).or_default();
        info.modified.remove(&entity);
        // Created and destroyed within one window: net effect is nothing.
        if !info.added.remove(&entity) {
            info.removed.insert(entity);
        }
    }

    /// Takes and resets the dirty info for `match_id`.
    pub fn consume(&mut self, match_id: u64) -> DirtyInfo {
        self.per_match.remove(&match_id).unwrap_or_default()
    }

    /// Drops all tracking for `match_id` (match deletion).
    pub fn forget(&mut self, match_id: u64) {
        self.per_match.remove(&match_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: ComponentId = ComponentId(7);

    #[test]
    fn consume_resets_the_window() {
        let mut map = DirtyMap::default();
        map.add_entity(1, EntityId(10));
        map.touch(1, EntityId(11), C);
        let info = map.consume(1);
        assert!(info.added.contains(&EntityId(10)));
        assert!(info.modified.contains(&EntityId(11)));
        assert!(info.components.contains(&C));
        assert!(map.consume(1).is_empty(), "second consume sees nothing");
    }

    #[test]
    fn add_then_remove_cancels_out() {
        let mut map = DirtyMap::default();
        map.add_entity(1, EntityId(10));
        map.remove_entity(1, EntityId(10));
        let info = map.consume(1);
        assert!(info.added.is_empty(), "added set should be empty");
        assert!(info.removed.is_empty(), "removed set should be empty");
    }

    #[test]
    fn touch_on_added_entity_does_not_mark_modified() {
        let mut map = DirtyMap::default();
        map.add_entity(1, EntityId(10));
        map.touch(1, EntityId(10), C);
        let info = map.consume(1);
        assert!(info.added.contains(&EntityId(10)));
        assert!(!info.modified.contains(&EntityId(10)));
        assert!(info.is_structural());
    }

    #[test]
    fn matches_are_tracked_independently() {
        let mut map = DirtyMap::default();
        map.touch(1, EntityId(10), C);
        map.touch(2, EntityId(20), C);
        let one = map.consume(1);
        assert_eq!(one.modified.len(), 1);
        let two = map.consume(2);
        assert!(two.modified.contains(&EntityId(20)));
    }
}
