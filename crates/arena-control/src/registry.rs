// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Node registry with TTL-based liveness.
//!
//! Nodes register, then heartbeat at the configured interval. A
//! background sweeper marks nodes silent longer than the TTL as
//! `EXPIRED`; scheduler queries skip them. A missed heartbeat never
//! fails in-flight matches: their registry entries stay `RUNNING` until
//! the node re-registers (a heartbeat revives an expired record) or an
//! operator intervenes.
//!
//! Storage is a sharded concurrent map; scheduler reads clone a snapshot
//! instead of holding shard locks across the placement decision.

use std::time::{Duration, Instant};

use arena_proto::dto::{HeartbeatRequest, NodeStatus, NodeSummary, RegisterNodeRequest};
use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ControlError;

/// One registered engine node.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    /// Assigned node id (UUID simple form).
    pub node_id: String,
    /// Address the node is reachable at.
    pub advertise_address: String,
    /// Whether clients reach the node over TLS (`wss://` stream URLs).
    pub advertise_tls: bool,
    /// Container capacity.
    pub max_containers: u32,
    /// Containers reported by the last heartbeat.
    pub active_containers: u32,
    /// Entities reported by the last heartbeat.
    pub entity_count: usize,
    /// Memory reported by the last heartbeat.
    pub used_memory_bytes: usize,
    /// Operator drain flag; drained nodes are skipped by the scheduler
    /// but keep their matches.
    pub drained: bool,
    /// Current liveness status.
    pub status: NodeStatus,
    /// When the node registered.
    pub registered_at: Instant,
    /// When the node was last heard from.
    pub last_seen: Instant,
}

impl NodeRecord {
    /// `active_containers / max_containers`, `1.0` for a zero-capacity
    /// node.
    #[must_use]
    pub fn saturation(&self) -> f64 {
        if self.max_containers == 0 {
            1.0
        } else {
            f64::from(self.active_containers) / f64::from(self.max_containers)
        }
    }

    /// Whether the scheduler may place a container here.
    #[must_use]
    pub fn schedulable(&self) -> bool {
        self.status == NodeStatus::Healthy && self.active_containers < self.max_containers
    }

    /// Wire summary relative to `now`.
    #[must_use]
    pub fn summary(&self, now: Instant) -> NodeSummary {
        NodeSummary {
            node_id: self.node_id.clone(),
            advertise_address: self.advertise_address.clone(),
            status: self.status,
            max_containers: self.max_containers,
            active_containers: self.active_containers,
            saturation: self.saturation(),
            last_seen_ms_ago: now.saturating_duration_since(self.last_seen).as_millis() as u64,
        }
    }

    fn live_status(&self) -> NodeStatus {
        if self.drained {
            NodeStatus::Drained
        } else {
            self.status
        }
    }
}

/// Process-wide registry of engine nodes.
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: DashMap<String, NodeRecord>,
    ttl: Duration,
}

impl NodeRegistry {
    /// Creates a registry with the given liveness TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            nodes: DashMap::new(),
            ttl,
        }
    }

    /// Registers a node, assigning it an id.
    pub fn register(&self, request: &RegisterNodeRequest, now: Instant) -> NodeRecord {
        let record = NodeRecord {
            node_id: Uuid::new_v4().simple().to_string(),
            advertise_address: request.advertise_address.clone(),
            advertise_tls: request.advertise_tls,
            max_containers: request.max_containers,
            active_containers: 0,
            entity_count: 0,
            used_memory_bytes: 0,
            drained: false,
            status: NodeStatus::Healthy,
            registered_at: now,
            last_seen: now,
        };
        info!(node_id = %record.node_id, address = %record.advertise_address, "node registered");
        self.nodes.insert(record.node_id.clone(), record.clone());
        record
    }

    /// Records a heartbeat; revives an expired node.
    pub fn heartbeat(
        &self,
        node_id: &str,
        metrics: &HeartbeatRequest,
        now: Instant,
    ) -> Result<(), ControlError> {
        let mut entry = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ControlError::NodeNotFound(node_id.to_owned()))?;
        entry.active_containers = metrics.active_containers;
        entry.entity_count = metrics.entity_count;
        entry.used_memory_bytes = metrics.used_memory_bytes;
        entry.last_seen = now;
        entry.status = if metrics.degraded {
            NodeStatus::Degraded
        } else {
            NodeStatus::Healthy
        };
        entry.status = entry.live_status();
        Ok(())
    }

    /// Removes a node immediately.
    pub fn deregister(&self, node_id: &str) -> Result<(), ControlError> {
        self.nodes
            .remove(node_id)
            .map(|_| info!(node_id, "node deregistered"))
            .ok_or_else(|| ControlError::NodeNotFound(node_id.to_owned()))
    }

    /// Marks a node drained: kept alive, skipped by the scheduler.
    pub fn drain(&self, node_id: &str) -> Result<(), ControlError> {
        let mut entry = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ControlError::NodeNotFound(node_id.to_owned()))?;
        entry.drained = true;
        entry.status = NodeStatus::Drained;
        info!(node_id, "node drained");
        Ok(())
    }

    /// Marks silent nodes expired; returns the ids that newly expired.
    pub fn sweep(&self, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        for mut entry in self.nodes.iter_mut() {
            if entry.status != NodeStatus::Expired
                && now.saturating_duration_since(entry.last_seen) > self.ttl
            {
                entry.status = NodeStatus::Expired;
                expired.push(entry.node_id.clone());
            }
        }
        for node_id in &expired {
            warn!(node_id, "node expired (missed heartbeats)");
        }
        expired
    }

    /// Record for `node_id`, expired or not.
    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<NodeRecord> {
        self.nodes.get(node_id).map(|r| r.clone())
    }

    /// Snapshot copy of every record, ordered by node id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        let mut out: Vec<NodeRecord> = self.nodes.iter().map(|r| r.clone()).collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        out
    }

    /// Snapshot of schedulable nodes (healthy with capacity).
    #[must_use]
    pub fn schedulable(&self) -> Vec<NodeRecord> {
        self.snapshot()
            .into_iter()
            .filter(NodeRecord::schedulable)
            .collect()
    }

    /// Cluster saturation: `Σ active / Σ max` over non-expired nodes.
    #[must_use]
    pub fn cluster_saturation(&self) -> f64 {
        let (active, max) = self
            .nodes
            .iter()
            .filter(|r| r.status != NodeStatus::Expired)
            .fold((0u64, 0u64), |(a, m), r| {
                (
                    a + u64::from(r.active_containers),
                    m + u64::from(r.max_containers),
                )
            });
        if max == 0 {
            0.0
        } else {
            active as f64 / max as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(addr: &str, cap: u32) -> RegisterNodeRequest {
        RegisterNodeRequest {
            advertise_address: addr.to_owned(),
            advertise_tls: false,
            max_containers: cap,
        }
    }

    fn beat(active: u32) -> HeartbeatRequest {
        HeartbeatRequest {
            active_containers: active,
            entity_count: 0,
            used_memory_bytes: 0,
            degraded: false,
        }
    }

    #[test]
    fn silent_node_expires_after_the_ttl_and_is_skipped() {
        let registry = NodeRegistry::new(Duration::from_secs(30));
        let t0 = Instant::now();
        let node = registry.register(&request("host:1", 10), t0);

        // At T=29s the node is still healthy.
        assert!(registry.sweep(t0 + Duration::from_secs(29)).is_empty());
        assert!(registry.get(&node.node_id).map(|r| r.schedulable()).unwrap_or(false));

        // At T=31s it expires and scheduler queries skip it.
        let expired = registry.sweep(t0 + Duration::from_secs(31));
        assert_eq!(expired, vec![node.node_id.clone()]);
        assert_eq!(
            registry.get(&node.node_id).map(|r| r.status),
            Some(NodeStatus::Expired)
        );
        assert!(registry.schedulable().is_empty(), "expired nodes are skipped");
    }

    #[test]
    fn heartbeat_revives_an_expired_node() {
        let registry = NodeRegistry::new(Duration::from_secs(30));
        let t0 = Instant::now();
        let node = registry.register(&request("host:1", 10), t0);
        registry.sweep(t0 + Duration::from_secs(31));

        registry
            .heartbeat(&node.node_id, &beat(2), t0 + Duration::from_secs(40))
            .expect("heartbeat");
        let record = registry.get(&node.node_id).expect("record");
        assert_eq!(record.status, NodeStatus::Healthy);
        assert_eq!(record.active_containers, 2);
    }

    #[test]
    fn drained_nodes_are_kept_but_not_schedulable() {
        let registry = NodeRegistry::new(Duration::from_secs(30));
        let t0 = Instant::now();
        let node = registry.register(&request("host:1", 10), t0);
        registry.drain(&node.node_id).expect("drain");
        assert!(registry.schedulable().is_empty());

        // Heartbeats keep it alive without clearing the drain.
        registry
            .heartbeat(&node.node_id, &beat(1), t0 + Duration::from_secs(5))
            .expect("heartbeat");
        assert_eq!(
            registry.get(&node.node_id).map(|r| r.status),
            Some(NodeStatus::Drained)
        );
    }

    #[test]
    fn deregister_removes_immediately() {
        let registry = NodeRegistry::new(Duration::from_secs(30));
        let node = registry.register(&request("host:1", 10), Instant::now());
        registry.deregister(&node.node_id).expect("deregister");
        assert!(registry.get(&node.node_id).is_none());
        assert!(matches!(
            registry.deregister(&node.node_id),
            Err(ControlError::NodeNotFound(_))
        ));
    }

    #[test]
    fn cluster_saturation_spans_live_nodes() {
        let registry = NodeRegistry::new(Duration::from_secs(30));
        let t0 = Instant::now();
        let a = registry.register(&request("a:1", 10), t0);
        let b = registry.register(&request("b:1", 10), t0);
        registry.heartbeat(&a.node_id, &beat(8), t0).expect("beat a");
        registry.heartbeat(&b.node_id, &beat(4), t0).expect("beat b");
        assert!((registry.cluster_saturation() - 0.6).abs() < 1e-9);
    }
}
