// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Typed config sections for the Arena services.
//!
//! Durations are millisecond fields so the JSON files stay obvious to
//! edit. Defaults follow the platform contract: 10 s heartbeats, 30 s
//! node TTL, autoscaler thresholds 0.8/0.3 with a 300 s cooldown.

use serde::{Deserialize, Serialize};

/// Engine container limits and snapshot tunables (`engine.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Entity slots per container.
    pub max_entities: usize,
    /// Resident-memory budget per container.
    pub max_memory_bytes: usize,
    /// Commands drained per tick.
    pub max_commands_per_tick: usize,
    /// Command queue depth limit.
    pub max_command_queue: usize,
    /// Snapshot cache max age in ticks.
    pub snapshot_max_age_ticks: u64,
    /// Dirty fraction forcing a full rebuild.
    pub snapshot_rebuild_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_entities: 4096,
            max_memory_bytes: 64 * 1024 * 1024,
            max_commands_per_tick: 64,
            max_command_queue: 1024,
            snapshot_max_age_ticks: 100,
            snapshot_rebuild_threshold: 0.5,
        }
    }
}

/// Engine node service section (`node.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeServiceConfig {
    /// Bind address for the HTTP/WS listener.
    pub listen_addr: String,
    /// Address advertised to the control plane and clients.
    pub advertise_address: String,
    /// Whether the advertised address is reached over TLS (a
    /// terminating proxy in front of the node); selects `wss://` in the
    /// stream URLs handed to clients.
    pub advertise_tls: bool,
    /// Control plane base URL; empty disables registration.
    pub control_plane_url: String,
    /// Service token presented to the control plane; empty lets the node
    /// self-mint one from the shared dev secret.
    pub service_token: String,
    /// Container capacity reported at registration.
    pub max_containers: u32,
    /// Snapshot/delta broadcast interval.
    pub broadcast_interval_ms: u64,
    /// Streams one user may hold open per container.
    pub max_streams_per_user: usize,
    /// Streams one container may serve in total.
    pub max_streams_per_container: usize,
}

impl Default for NodeServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7350".to_owned(),
            advertise_address: "127.0.0.1:7350".to_owned(),
            advertise_tls: false,
            control_plane_url: "http://127.0.0.1:7300".to_owned(),
            service_token: String::new(),
            max_containers: 16,
            broadcast_interval_ms: 50,
            max_streams_per_user: 8,
            max_streams_per_container: 256,
        }
    }
}

/// Control plane service section (`control.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlServiceConfig {
    /// Bind address for the HTTP listener.
    pub listen_addr: String,
    /// Interval nodes are told to heartbeat at.
    pub heartbeat_interval_ms: u64,
    /// Liveness TTL; nodes silent longer than this expire.
    pub node_ttl_ms: u64,
    /// Registry sweep cadence.
    pub sweep_interval_ms: u64,
    /// Cluster saturation above which scale-up is recommended.
    pub scale_up_threshold: f64,
    /// Cluster saturation below which scale-down is recommended.
    pub scale_down_threshold: f64,
    /// Minimum spacing between same-direction recommendations.
    pub autoscale_cooldown_ms: u64,
    /// Autoscaler evaluation cadence.
    pub autoscale_interval_ms: u64,
    /// Whether the node proxy façade is enabled.
    pub proxy_enabled: bool,
    /// Advertise `wss://` stream URLs for every node regardless of the
    /// node's own flag (cluster-wide TLS termination).
    pub advertise_tls: bool,
    /// Outbound timeout for node calls and proxying.
    pub node_request_timeout_ms: u64,
    /// Match token lifetime.
    pub match_token_ttl_secs: u64,
}

impl Default for ControlServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7300".to_owned(),
            heartbeat_interval_ms: 10_000,
            node_ttl_ms: 30_000,
            sweep_interval_ms: 5_000,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            autoscale_cooldown_ms: 300_000,
            autoscale_interval_ms: 30_000,
            proxy_enabled: true,
            advertise_tls: false,
            node_request_timeout_ms: 5_000,
            match_token_ttl_secs: 300,
        }
    }
}

/// Token validation/minting section (`auth.json`).
///
/// `mode` selects local signature verification or remote introspection.
/// Key material is referenced by path so secrets stay out of the config
/// file; the inline secret exists for development setups only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// `"local"` or `"remote"`.
    pub mode: String,
    /// Development-only inline HS256 secret.
    pub hmac_secret: String,
    /// Path to an Ed25519 public key PEM (local mode).
    pub public_key_pem_path: String,
    /// Path to an Ed25519 private key PEM (control plane minting).
    pub private_key_pem_path: String,
    /// Introspection endpoint (remote mode).
    pub remote_url: String,
    /// Introspection timeout.
    pub remote_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: "local".to_owned(),
            hmac_secret: "dev-secret-change-me".to_owned(),
            public_key_pem_path: String::new(),
            private_key_pem_path: String::new(),
            remote_url: String::new(),
            remote_timeout_ms: 2_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_platform_contract() {
        let control = ControlServiceConfig::default();
        assert_eq!(control.heartbeat_interval_ms, 10_000);
        assert_eq!(control.node_ttl_ms, 30_000);
        assert!((control.scale_up_threshold - 0.8).abs() < f64::EPSILON);
        assert!((control.scale_down_threshold - 0.3).abs() < f64::EPSILON);
        assert_eq!(control.autoscale_cooldown_ms, 300_000);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let node: NodeServiceConfig =
            serde_json::from_str(r#"{"maxContainers": 4}"#).expect("parse");
        assert_eq!(node.max_containers, 4);
        assert_eq!(node.broadcast_interval_ms, 50, "default survives");
    }
}
