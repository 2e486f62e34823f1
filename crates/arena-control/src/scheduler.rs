// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Match-placement scheduler.
//!
//! Given the schedulable candidate set (healthy nodes with container
//! capacity), placement is:
//! 1. the preferred node, when it is in the candidate set;
//! 2. otherwise the candidate with the lowest saturation, ties broken by
//!    most recent `last_seen`, then by node id lexicographically.
//!
//! The decision is a pure function of its inputs, so identical candidate
//! sets and metrics always place identically.

use crate::error::ControlError;
use crate::registry::NodeRecord;

/// Picks a node for a new container.
///
/// `candidates` must already be filtered to schedulable nodes. Fails
/// `NoCapacity` when the set is empty.
pub fn pick<'a>(
    candidates: &'a [NodeRecord],
    preferred: Option<&str>,
) -> Result<&'a NodeRecord, ControlError> {
    if candidates.is_empty() {
        return Err(ControlError::NoCapacity);
    }
    if let Some(preferred_id) = preferred {
        if let Some(node) = candidates.iter().find(|n| n.node_id == preferred_id) {
            return Ok(node);
        }
    }
    let best = candidates.iter().min_by(|a, b| {
        a.saturation()
            .partial_cmp(&b.saturation())
            .unwrap_or(std::cmp::Ordering::Equal)
            // More recent last_seen wins the saturation tie.
            .then_with(|| b.last_seen.cmp(&a.last_seen))
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    best.ok_or(ControlError::NoCapacity)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use arena_proto::dto::NodeStatus;

    use super::*;

    fn node(id: &str, active: u32, max: u32, seen_offset_secs: u64, base: Instant) -> NodeRecord {
        NodeRecord {
            node_id: id.to_owned(),
            advertise_address: format!("{id}:7350"),
            advertise_tls: false,
            max_containers: max,
            active_containers: active,
            entity_count: 0,
            used_memory_bytes: 0,
            drained: false,
            status: NodeStatus::Healthy,
            registered_at: base,
            last_seen: base + Duration::from_secs(seen_offset_secs),
        }
    }

    #[test]
    fn lowest_saturation_wins_with_recency_tie_break() {
        let base = Instant::now();
        // n1 and n2 tie on saturation; n2 was seen more recently.
        let candidates = vec![
            node("n1", 0, 10, 0, base),
            node("n2", 0, 10, 300, base),
            node("n3", 5, 10, 600, base),
        ];
        let picked = pick(&candidates, None).expect("pick");
        assert_eq!(picked.node_id, "n2");
    }

    #[test]
    fn ineligible_preferred_falls_back_to_lowest_saturation() {
        let base = Instant::now();
        let candidates = vec![
            node("n1", 0, 10, 0, base),
            node("n2", 0, 10, 300, base),
            node("n3", 5, 10, 600, base),
        ];
        // The preferred node is not in the candidate set (not registered
        // or not schedulable), so placement falls back.
        let picked = pick(&candidates, Some("n9")).expect("pick");
        assert_eq!(picked.node_id, "n2");
    }

    #[test]
    fn eligible_preferred_is_honored_even_at_higher_saturation() {
        let base = Instant::now();
        let candidates = vec![node("n1", 8, 10, 0, base), node("n2", 2, 10, 0, base)];
        let picked = pick(&candidates, Some("n1")).expect("pick");
        assert_eq!(picked.node_id, "n1", "healthy preferred node wins");
    }

    #[test]
    fn empty_candidate_set_fails_no_capacity() {
        assert!(matches!(pick(&[], None), Err(ControlError::NoCapacity)));
    }

    #[test]
    fn identical_inputs_place_identically() {
        let base = Instant::now();
        let candidates = vec![
            node("b", 1, 10, 5, base),
            node("a", 1, 10, 5, base),
            node("c", 0, 10, 5, base),
        ];
        let first = pick(&candidates, None).expect("pick").node_id.clone();
        for _ in 0..10 {
            assert_eq!(pick(&candidates, None).expect("pick").node_id, first);
        }
        assert_eq!(first, "c", "lowest saturation, then lexicographic id");
    }

    #[test]
    fn saturation_tie_at_equal_recency_breaks_lexicographically() {
        let base = Instant::now();
        let candidates = vec![node("n2", 0, 10, 0, base), node("n1", 0, 10, 0, base)];
        assert_eq!(pick(&candidates, None).expect("pick").node_id, "n1");
    }
}
