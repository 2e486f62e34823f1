// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Identity and capability tokens for the Arena cluster.
//!
//! Opaque bearer tokens come off the wire (HTTP headers, WebSocket
//! subprotocol, or query fallback) and validate into a [`Principal`]:
//! subject, scope set, expiry, and (for match tokens) a
//! `(matchId, playerId)` binding that the streaming endpoints check
//! against their URL path.
//!
//! Two validation modes exist: *local* (verify the signature against a
//! configured key) and *remote* (introspection call to the auth
//! service). Scope checks use a hierarchical dot-separated scheme with a
//! `*` suffix wildcard.

pub mod error;
pub mod extract;
pub mod principal;
pub mod scope;
pub mod validator;

pub use error::AuthError;
pub use principal::{Claims, MatchBinding, Principal};
pub use scope::scope_matches;
pub use validator::{KeyMaterial, SigningMaterial, TokenMinter, TokenValidator, ValidationMode};

/// Capability scope names used across the platform.
pub mod scopes {
    /// Manage containers on an engine node.
    pub const CONTAINERS: &str = "arena.containers";
    /// Manage matches on the control plane.
    pub const MATCHES: &str = "arena.matches";
    /// Register and heartbeat engine nodes.
    pub const NODES: &str = "arena.nodes";
    /// Subscribe to snapshot/delta/error streams.
    pub const STREAMS: &str = "arena.streams";
    /// Use the control-plane proxy façade.
    pub const PROXY: &str = "arena.proxy";
}
