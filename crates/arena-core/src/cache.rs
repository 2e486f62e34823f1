// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Memoizing decorator for `entities_with` queries.
//!
//! Results are keyed by the sorted component set and stamped with the
//! store's mutation version; any write invalidates every entry on the
//! next lookup. Systems that repeat the same query within one tick hit
//! the memo, which is the case this cache exists for.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::component::ComponentId;
use crate::entity::EntityId;
use crate::store::Store;

#[derive(Debug)]
struct CacheEntry {
    version: u64,
    result: Arc<Vec<EntityId>>,
}

/// Query memo over [`Store::entities_with`].
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: FxHashMap<Vec<ComponentId>, CacheEntry>,
    hits: u64,
    misses: u64,
}

impl QueryCache {
    /// Memoized intersection query.
    pub fn entities_with(&mut self, store: &Store, comps: &[ComponentId]) -> Arc<Vec<EntityId>> {
        let mut key: Vec<ComponentId> = comps.to_vec();
        key.sort_unstable();
        key.dedup();
        let version = store.version();
        if let Some(entry) = self.entries.get(&key) {
            if entry.version == version {
                self.hits += 1;
                return Arc::clone(&entry.result);
            }
        }
        self.misses += 1;
        let result = Arc::new(store.entities_with(comps));
        self.entries.insert(
            key,
            CacheEntry {
                version,
                result: Arc::clone(&result),
            },
        );
        result
    }

    /// `(hits, misses)` counters for the stats surface.
    #[must_use]
    pub fn counters(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Drops every entry (match deletion, module install).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
