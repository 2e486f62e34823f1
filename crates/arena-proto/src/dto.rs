// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! REST request/response bodies shared by the engine node and the control
//! plane.
//!
//! These are wire contracts: field names are camelCase and additions must be
//! backwards-compatible (new optional fields only).

use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::cluster_id::ClusterMatchId;

// ── Node container API ──────────────────────────────────────────────

/// `POST /api/containers` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContainerRequest {
    /// Module identifiers (`name:version`) to install at creation.
    pub modules: Vec<String>,
}

/// `POST /api/containers` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContainerResponse {
    /// Assigned container id (UUID simple form).
    pub container_id: String,
}

/// `POST /api/containers/{cid}/matches` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLocalMatchRequest {
    /// Modules to enable for the match (must be installed in the container).
    pub modules: Vec<String>,
    /// Player limit; `None` or `0` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_limit: Option<u32>,
}

/// `POST /api/containers/{cid}/matches` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLocalMatchResponse {
    /// Match id local to the container.
    pub match_id: u64,
}

/// `POST /api/containers/{cid}/commands` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCommandRequest {
    /// Qualified command name (`module.command`).
    pub command_name: String,
    /// Target match for match-scoped commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<u64>,
    /// Schema-typed parameters.
    #[serde(default)]
    pub parameters: Map<String, serde_json::Value>,
}

/// Parameter type tag in a command schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// JSON number, fractional allowed.
    Float,
    /// JSON number, integral.
    Int,
    /// JSON boolean.
    Bool,
    /// JSON string.
    String,
}

/// One parameter of a command schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamInfo {
    /// Parameter name.
    pub name: String,
    /// Expected JSON type.
    pub kind: ParamKind,
    /// Whether the parameter must be present.
    pub required: bool,
}

/// `GET /api/containers/{cid}/commands` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandInfo {
    /// Qualified command name (`module.command`).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Owning module name.
    pub module: String,
    /// Parameter schema.
    pub parameters: Vec<ParamInfo>,
}

/// `POST /api/containers/{cid}/tick` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickResponse {
    /// Tick number just completed.
    pub tick: u64,
}

/// `GET /api/containers/{cid}/stats` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatsResponse {
    /// Live entity count across all matches.
    pub entity_count: usize,
    /// Entity slot capacity.
    pub max_entities: usize,
    /// Estimated resident bytes for the component columns.
    pub used_memory_bytes: usize,
    /// Current tick number.
    pub tick: u64,
    /// Lifecycle state name.
    pub state: String,
    /// Matches hosted by the container.
    pub match_count: usize,
    /// Commands currently queued.
    pub command_queue_len: usize,
    /// Duration of the most recent tick, microseconds.
    pub last_tick_duration_us: u64,
    /// Ticks executed since creation.
    pub ticks_total: u64,
    /// Commands consumed since creation.
    pub commands_total: u64,
}

// ── Control-plane node API ──────────────────────────────────────────

/// Node liveness status as seen by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Heartbeating within the TTL.
    Healthy,
    /// Heartbeating but self-reported degraded.
    Degraded,
    /// TTL elapsed without a heartbeat.
    Expired,
    /// Operator-drained: kept alive but skipped by the scheduler.
    Drained,
}

/// `POST /api/nodes` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterNodeRequest {
    /// Address clients and the control plane reach the node at
    /// (`host:port`).
    pub advertise_address: String,
    /// Whether clients reach the node over TLS; selects `wss://` stream
    /// URLs.
    #[serde(default)]
    pub advertise_tls: bool,
    /// Container capacity of the node.
    pub max_containers: u32,
}

/// `POST /api/nodes` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterNodeResponse {
    /// Assigned node id (UUID simple form).
    pub node_id: String,
    /// Interval the node should heartbeat at.
    pub heartbeat_interval_ms: u64,
    /// Liveness TTL applied by the registry.
    pub ttl_ms: u64,
}

/// `POST /api/nodes/{nid}/heartbeat` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    /// Containers currently hosted.
    pub active_containers: u32,
    /// Live entities across all containers.
    pub entity_count: usize,
    /// Estimated resident bytes across all containers.
    pub used_memory_bytes: usize,
    /// Self-reported degradation flag.
    #[serde(default)]
    pub degraded: bool,
}

/// `GET /api/nodes` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    /// Node id.
    pub node_id: String,
    /// Advertised address.
    pub advertise_address: String,
    /// Liveness status.
    pub status: NodeStatus,
    /// Container capacity.
    pub max_containers: u32,
    /// Containers currently hosted.
    pub active_containers: u32,
    /// `active_containers / max_containers`.
    pub saturation: f64,
    /// Milliseconds since the last heartbeat.
    pub last_seen_ms_ago: u64,
}

/// `GET /api/nodes` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNodesResponse {
    /// Registered, non-expired nodes.
    pub nodes: Vec<NodeSummary>,
}

// ── Control-plane match API ─────────────────────────────────────────

/// Match lifecycle status in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    /// Placement decided; node-side creation in flight.
    Creating,
    /// Confirmed running on the node.
    Running,
    /// Completed normally.
    Finished,
    /// Node-side creation or operation failed.
    Error,
}

/// Stream URLs handed to clients for a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUrls {
    /// Full-snapshot stream.
    pub snapshot: String,
    /// Delta stream.
    pub delta: String,
    /// Command submission socket.
    pub commands: String,
    /// Player-scoped snapshot stream (join responses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_snapshot: Option<String>,
    /// Player-scoped delta stream (join responses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_delta: Option<String>,
    /// Player error stream (join responses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<String>,
}

/// `POST /api/matches` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMatchRequest {
    /// Modules to enable (`name:version`).
    pub modules: Vec<String>,
    /// Preferred placement target, honored when healthy with capacity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_node_id: Option<String>,
    /// Player limit; `None` or `0` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_limit: Option<u32>,
}

/// Match registry entry as returned by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEntry {
    /// Cluster-unique match id.
    pub cluster_match_id: ClusterMatchId,
    /// Hosting node.
    pub node_id: String,
    /// Hosting container.
    pub container_id: String,
    /// Enabled module identifiers.
    pub module_names: Vec<String>,
    /// Node advertise address.
    pub advertise_address: String,
    /// Whether the node's streams are reached over TLS (`wss://`).
    #[serde(default)]
    pub advertise_tls: bool,
    /// Match-scoped stream URLs.
    pub stream_urls: StreamUrls,
    /// Players currently joined.
    pub player_count: u32,
    /// Player limit; `0` means unlimited.
    pub player_limit: u32,
    /// Lifecycle status.
    pub status: MatchStatus,
    /// Failure cause when `status == Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MatchEntry {
    /// Whether another player may join (`playerLimit = 0` means unlimited).
    #[must_use]
    pub fn can_accept_player(&self) -> bool {
        self.player_limit == 0 || self.player_count < self.player_limit
    }
}

/// `GET /api/matches` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMatchesResponse {
    /// All registry entries.
    pub matches: Vec<MatchEntry>,
}

/// `POST /api/matches/{cmid}/join` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMatchRequest {
    /// Caller-chosen player identifier, bound into the match token.
    pub player_id: String,
}

/// `POST /api/matches/{cmid}/join` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMatchResponse {
    /// Short-lived match token for the streaming endpoints.
    pub match_token: String,
    /// Token expiry, unix milliseconds.
    pub expires_at_unix_ms: u64,
    /// Stream URLs including the player-scoped endpoints.
    pub stream_urls: StreamUrls,
}

// ── Autoscaler & health ─────────────────────────────────────────────

/// Scale direction recommended by the autoscaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScaleDirection {
    /// Add capacity.
    Up,
    /// Remove capacity.
    Down,
}

/// One autoscaler recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleRecommendation {
    /// Recommended direction.
    pub direction: ScaleDirection,
    /// Cluster saturation that triggered the recommendation.
    pub saturation: f64,
    /// Emission time, unix milliseconds.
    pub at_unix_ms: u64,
}

/// `GET /api/health` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the service can answer.
    pub status: String,
    /// Milliseconds since process start.
    pub uptime_ms: u64,
    /// Hosted containers (engine nodes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_count: Option<usize>,
}
