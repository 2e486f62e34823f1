// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Arena engine node.
//!
//! Hosts execution containers behind two wire surfaces: the container
//! HTTP API (create/start/tick/matches/commands/stats) and the streaming
//! WebSocket endpoints (full snapshots, deltas, player-scoped variants,
//! the per-player error stream, and command submission).
//!
//! On boot the node registers with the control plane and heartbeats at
//! the interval it is told; container placement decisions stay on the
//! control plane, engine state stays here.

pub mod http;
pub mod register;
pub mod state;
pub mod ws;

use std::sync::Arc;

use arena_core::ModuleLibrary;

pub use state::NodeState;

/// The statically linked module registry for this binary.
///
/// Deployments link their game-module crates and register each factory
/// here before boot; the library is the only seam through which module
/// code enters a node. The stock binary ships none (game modules are a
/// deployment concern), so the library starts empty.
#[must_use]
pub fn default_library() -> Arc<ModuleLibrary> {
    Arc::new(ModuleLibrary::new())
}
