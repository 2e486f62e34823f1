// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Match registry: `clusterMatchId → (node, container, local match)`.
//!
//! Entries are updated with single-item transactions under the shard
//! lock (create, status transition, player-count change, delete); no
//! multi-entry transaction exists or is needed. Player admission is
//! atomic: the capacity check and the count increment happen under one
//! entry guard, so two racing joins cannot both take the last seat.

use arena_proto::dto::{MatchEntry, MatchStatus};
use arena_proto::ClusterMatchId;
use dashmap::DashMap;

use crate::error::ControlError;

/// In-memory match registry.
#[derive(Debug, Default)]
pub struct MatchRegistry {
    entries: DashMap<String, MatchEntry>,
}

impl MatchRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new entry (status `CREATING`).
    pub fn insert(&self, entry: MatchEntry) {
        self.entries
            .insert(entry.cluster_match_id.to_string(), entry);
    }

    /// Entry lookup.
    #[must_use]
    pub fn get(&self, id: &ClusterMatchId) -> Option<MatchEntry> {
        self.entries.get(&id.to_string()).map(|e| e.clone())
    }

    /// All entries, ordered by cluster match id.
    #[must_use]
    pub fn list(&self) -> Vec<MatchEntry> {
        let mut out: Vec<MatchEntry> = self.entries.iter().map(|e| e.clone()).collect();
        out.sort_by_key(|e| e.cluster_match_id.to_string());
        out
    }

    /// Removes an entry.
    pub fn remove(&self, id: &ClusterMatchId) -> Result<MatchEntry, ControlError> {
        self.entries
            .remove(&id.to_string())
            .map(|(_, entry)| entry)
            .ok_or_else(|| ControlError::MatchNotFound(id.to_string()))
    }

    /// Transitions an entry to `RUNNING`.
    pub fn mark_running(&self, id: &ClusterMatchId) -> Result<MatchEntry, ControlError> {
        self.update(id, |entry| {
            entry.status = MatchStatus::Running;
            Ok(())
        })
    }

    /// Transitions an entry to `ERROR`, recording the cause.
    pub fn mark_error(&self, id: &ClusterMatchId, cause: &str) -> Result<MatchEntry, ControlError> {
        self.update(id, |entry| {
            entry.status = MatchStatus::Error;
            entry.error = Some(cause.to_owned());
            Ok(())
        })
    }

    /// Admits a player atomically; fails `MatchFull` at the limit.
    pub fn admit_player(&self, id: &ClusterMatchId) -> Result<MatchEntry, ControlError> {
        self.update(id, |entry| {
            if !entry.can_accept_player() {
                return Err(ControlError::MatchFull(entry.cluster_match_id.to_string()));
            }
            entry.player_count += 1;
            Ok(())
        })
    }

    /// Records a player departure.
    pub fn release_player(&self, id: &ClusterMatchId) -> Result<MatchEntry, ControlError> {
        self.update(id, |entry| {
            entry.player_count = entry.player_count.saturating_sub(1);
            Ok(())
        })
    }

    /// Single-entry transaction under the shard lock.
    fn update<F>(&self, id: &ClusterMatchId, mutate: F) -> Result<MatchEntry, ControlError>
    where
        F: FnOnce(&mut MatchEntry) -> Result<(), ControlError>,
    {
        let mut entry = self
            .entries
            .get_mut(&id.to_string())
            .ok_or_else(|| ControlError::MatchNotFound(id.to_string()))?;
        mutate(&mut entry)?;
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use arena_proto::dto::StreamUrls;

    use super::*;

    fn entry(limit: u32) -> MatchEntry {
        MatchEntry {
            cluster_match_id: ClusterMatchId::new("n1", "c1", 1),
            node_id: "n1".into(),
            container_id: "c1".into(),
            module_names: vec!["counter:1.0".into()],
            advertise_address: "host:7350".into(),
            advertise_tls: false,
            stream_urls: StreamUrls {
                snapshot: String::new(),
                delta: String::new(),
                commands: String::new(),
                player_snapshot: None,
                player_delta: None,
                errors: None,
            },
            player_count: 0,
            player_limit: limit,
            status: MatchStatus::Creating,
            error: None,
        }
    }

    #[test]
    fn lifecycle_transitions_are_single_item_updates() {
        let registry = MatchRegistry::new();
        let id = ClusterMatchId::new("n1", "c1", 1);
        registry.insert(entry(0));

        let running = registry.mark_running(&id).expect("running");
        assert_eq!(running.status, MatchStatus::Running);

        let failed = registry.mark_error(&id, "node vanished").expect("error");
        assert_eq!(failed.status, MatchStatus::Error);
        assert_eq!(failed.error.as_deref(), Some("node vanished"));

        registry.remove(&id).expect("remove");
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn admission_honors_the_player_limit() {
        let registry = MatchRegistry::new();
        let id = ClusterMatchId::new("n1", "c1", 1);
        registry.insert(entry(2));

        registry.admit_player(&id).expect("first seat");
        registry.admit_player(&id).expect("second seat");
        let err = registry.admit_player(&id).expect_err("full");
        assert!(matches!(err, ControlError::MatchFull(_)), "{err:?}");

        // A departure frees a seat.
        let after = registry.release_player(&id).expect("release");
        assert_eq!(after.player_count, 1);
        let joined = registry.admit_player(&id).expect("rejoin");
        assert_eq!(joined.player_count, 2);
    }

    #[test]
    fn zero_limit_means_unlimited() {
        let registry = MatchRegistry::new();
        let id = ClusterMatchId::new("n1", "c1", 1);
        registry.insert(entry(0));
        for _ in 0..100 {
            registry.admit_player(&id).expect("unlimited");
        }
        assert_eq!(registry.get(&id).map(|e| e.player_count), Some(100));
    }

    #[test]
    fn missing_entries_fail_not_found() {
        let registry = MatchRegistry::new();
        let id = ClusterMatchId::new("n1", "c1", 9);
        assert!(matches!(
            registry.admit_player(&id),
            Err(ControlError::MatchNotFound(_))
        ));
        assert!(matches!(
            registry.remove(&id),
            Err(ControlError::MatchNotFound(_))
        ));
    }
}
