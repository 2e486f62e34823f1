// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Node-local shared state: the container table, the player error
//! router, and per-connection stream accounting.

use std::sync::Arc;
use std::time::Instant;

use arena_auth::TokenValidator;
use arena_config::sections::{EngineConfig, NodeServiceConfig};
use arena_core::command::PlayerErrorSink;
use arena_core::snapshot::SnapshotPolicy;
use arena_core::{Container, ContainerConfig, CoreError, ModuleIdentifier, ModuleLibrary};
use arena_proto::ErrorBody;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Routes player-stream errors to the open error streams.
///
/// Keyed by `(localMatchId, playerId)` to mirror the error-stream URL.
/// One subscriber per key; a new subscription replaces the previous one,
/// and the subscription id keeps a stale disconnect from tearing down
/// its replacement.
#[derive(Debug, Default)]
pub struct ErrorRouter {
    next_id: std::sync::atomic::AtomicU64,
    subscribers: DashMap<(u64, String), (u64, mpsc::Sender<ErrorBody>)>,
}

impl ErrorRouter {
    /// Subscribes to errors for `(match_id, player_id)`.
    #[must_use]
    pub fn subscribe(&self, match_id: u64, player_id: &str) -> (u64, mpsc::Receiver<ErrorBody>) {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(32);
        self.subscribers
            .insert((match_id, player_id.to_owned()), (id, tx));
        (id, rx)
    }

    /// Drops subscription `id` for `(match_id, player_id)`; a stale id
    /// (already replaced) is a no-op.
    pub fn unsubscribe(&self, match_id: u64, player_id: &str, id: u64) {
        self.subscribers
            .remove_if(&(match_id, player_id.to_owned()), |_, (current, _)| {
                *current == id
            });
    }
}

impl PlayerErrorSink for ErrorRouter {
    fn report(&self, match_id: u64, player_id: &str, error: ErrorBody) {
        match self.subscribers.get(&(match_id, player_id.to_owned())) {
            // Fire-and-forget: a slow consumer loses frames rather than
            // blocking the tick worker.
            Some(entry) => {
                if entry.1.try_send(error).is_err() {
                    debug!(match_id, player_id, "error stream backlogged; frame dropped");
                }
            }
            None => {
                warn!(match_id, player_id, "player error with no open error stream");
            }
        }
    }
}

/// Per-container / per-user stream accounting.
#[derive(Debug, Default)]
pub struct StreamLimits {
    per_container: DashMap<String, usize>,
    per_user: DashMap<(String, String), usize>,
}

impl StreamLimits {
    /// Reserves a stream slot; `None` when a limit is hit.
    #[must_use]
    pub fn acquire(
        self: &Arc<Self>,
        container_id: &str,
        subject: &str,
        max_per_container: usize,
        max_per_user: usize,
    ) -> Option<StreamSlot> {
        {
            let mut container = self
                .per_container
                .entry(container_id.to_owned())
                .or_insert(0);
            if *container >= max_per_container {
                return None;
            }
            *container += 1;
        }
        let user_key = (container_id.to_owned(), subject.to_owned());
        {
            let mut user = self.per_user.entry(user_key.clone()).or_insert(0);
            if *user >= max_per_user {
                // Roll the container count back.
                if let Some(mut container) = self.per_container.get_mut(container_id) {
                    *container = container.saturating_sub(1);
                }
                return None;
            }
            *user += 1;
        }
        Some(StreamSlot {
            limits: Arc::clone(self),
            container_id: container_id.to_owned(),
            user_key,
        })
    }
}

/// RAII stream slot; releases its counts on drop (disconnect path).
#[derive(Debug)]
pub struct StreamSlot {
    limits: Arc<StreamLimits>,
    container_id: String,
    user_key: (String, String),
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        if let Some(mut count) = self.limits.per_container.get_mut(&self.container_id) {
            *count = count.saturating_sub(1);
        }
        if let Some(mut count) = self.limits.per_user.get_mut(&self.user_key) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Shared state behind the node's HTTP and WS surfaces.
pub struct NodeState {
    /// Hosted containers by id.
    pub containers: DashMap<String, Arc<Container>>,
    /// Statically linked module factories.
    pub library: Arc<ModuleLibrary>,
    /// Engine limits applied to new containers.
    pub engine: EngineConfig,
    /// Node service config.
    pub config: NodeServiceConfig,
    /// Token validator.
    pub validator: Arc<TokenValidator>,
    /// Player error router (also each container's error sink).
    pub errors: Arc<ErrorRouter>,
    /// Stream accounting.
    pub streams: Arc<StreamLimits>,
    /// Process start, for uptime.
    pub started_at: Instant,
}

impl NodeState {
    /// Builds node state.
    #[must_use]
    pub fn new(
        library: Arc<ModuleLibrary>,
        engine: EngineConfig,
        config: NodeServiceConfig,
        validator: Arc<TokenValidator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            containers: DashMap::new(),
            library,
            engine,
            config,
            validator,
            errors: Arc::new(ErrorRouter::default()),
            streams: Arc::new(StreamLimits::default()),
            started_at: Instant::now(),
        })
    }

    fn container_config(&self) -> ContainerConfig {
        ContainerConfig {
            max_entities: self.engine.max_entities,
            max_memory_bytes: self.engine.max_memory_bytes,
            max_commands_per_tick: self.engine.max_commands_per_tick,
            max_command_queue: self.engine.max_command_queue,
            snapshot_policy: SnapshotPolicy {
                max_age_ticks: self.engine.snapshot_max_age_ticks,
                rebuild_threshold: self.engine.snapshot_rebuild_threshold,
            },
        }
    }

    /// Creates a container, installing `modules` from the library.
    /// Fails `CapacityExceeded` at the node's container limit.
    pub fn create_container(&self, modules: &[String]) -> Result<String, CoreError> {
        if self.containers.len() >= self.config.max_containers as usize {
            return Err(CoreError::CapacityExceeded(
                self.config.max_containers as usize,
            ));
        }
        let identifiers = modules
            .iter()
            .map(|m| m.parse::<ModuleIdentifier>())
            .collect::<Result<Vec<_>, _>>()?;
        let container_id = Uuid::new_v4().simple().to_string();
        let sink: Arc<dyn PlayerErrorSink> = Arc::clone(&self.errors) as Arc<dyn PlayerErrorSink>;
        let container = Container::new(
            container_id.clone(),
            self.container_config(),
            Arc::clone(&self.library),
            &identifiers,
            Some(sink),
        )?;
        self.containers.insert(container_id.clone(), container);
        Ok(container_id)
    }

    /// Looks up a container.
    #[must_use]
    pub fn container(&self, container_id: &str) -> Option<Arc<Container>> {
        self.containers.get(container_id).map(|c| Arc::clone(&c))
    }

    /// Stops and removes a container.
    pub fn delete_container(&self, container_id: &str) -> Result<(), CoreError> {
        let (_, container) = self
            .containers
            .remove(container_id)
            .ok_or_else(|| CoreError::ContainerNotFound(container_id.to_owned()))?;
        container.stop()
    }

    /// Stops every container (shutdown path).
    pub fn stop_all(&self) {
        for entry in self.containers.iter() {
            let _ = entry.value().stop();
        }
    }

    /// Aggregate metrics for heartbeats.
    #[must_use]
    pub fn aggregate_stats(&self) -> (u32, usize, usize) {
        let mut containers = 0u32;
        let mut entities = 0usize;
        let mut memory = 0usize;
        for entry in self.containers.iter() {
            let stats = entry.value().stats();
            containers += 1;
            entities += stats.entity_count;
            memory += stats.used_memory_bytes;
        }
        (containers, entities, memory)
    }
}

impl std::fmt::Debug for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeState")
            .field("containers", &self.containers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Arc<StreamLimits> {
        Arc::new(StreamLimits::default())
    }

    #[test]
    fn stream_slots_enforce_both_limits_and_release_on_drop() {
        let limits = limits();
        let a = limits.acquire("c1", "alice", 2, 1).expect("first slot");
        assert!(
            limits.acquire("c1", "alice", 2, 1).is_none(),
            "per-user limit"
        );
        let _b = limits.acquire("c1", "bob", 2, 1).expect("other user fits");
        assert!(
            limits.acquire("c1", "carol", 2, 1).is_none(),
            "per-container limit"
        );
        drop(a);
        assert!(
            limits.acquire("c1", "carol", 2, 1).is_some(),
            "slot freed on disconnect"
        );
    }

    #[test]
    fn error_router_delivers_to_the_open_stream() {
        let router = ErrorRouter::default();
        let (id, mut rx) = router.subscribe(4, "alice");
        router.report(4, "alice", ErrorBody::new(arena_proto::ErrorKind::NotFound, "x"));
        let got = rx.try_recv().expect("delivered");
        assert_eq!(got.kind, arena_proto::ErrorKind::NotFound);

        // Unsubscribed players just log.
        router.unsubscribe(4, "alice", id);
        router.report(4, "alice", ErrorBody::new(arena_proto::ErrorKind::NotFound, "y"));
        assert!(rx.try_recv().is_err(), "nothing delivered after unsubscribe");
    }

    #[test]
    fn stale_unsubscribe_keeps_the_replacement_subscription() {
        let router = ErrorRouter::default();
        let (old_id, _old_rx) = router.subscribe(4, "alice");
        let (_new_id, mut new_rx) = router.subscribe(4, "alice");
        router.unsubscribe(4, "alice", old_id);
        router.report(4, "alice", ErrorBody::new(arena_proto::ErrorKind::NotFound, "z"));
        assert!(
            new_rx.try_recv().is_ok(),
            "replacement subscription survives the stale unsubscribe"
        );
    }

    #[test]
    fn containers_are_created_from_empty_module_lists() {
        let state = NodeState::new(
            crate::default_library(),
            EngineConfig::default(),
            NodeServiceConfig::default(),
            Arc::new(
                arena_auth::TokenValidator::new(arena_auth::ValidationMode::Local(
                    arena_auth::KeyMaterial::HmacSecret(b"s".to_vec()),
                ))
                .expect("validator"),
            ),
        );
        let cid = state.create_container(&[]).expect("create");
        assert!(state.container(&cid).is_some());
        let (containers, entities, _) = state.aggregate_stats();
        assert_eq!((containers, entities), (1, 0));
        state.delete_container(&cid).expect("delete");
        assert!(state.container(&cid).is_none());
    }
}
