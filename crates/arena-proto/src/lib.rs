// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Wire schema for the Arena cluster.
//!
//! Everything that crosses a process boundary is defined here and nowhere
//! else: the domain error taxonomy with its deterministic HTTP mapping, the
//! columnar snapshot and delta stream formats, the WebSocket frame enums,
//! the REST request/response bodies shared by the engine node and the
//! control plane, and the cluster match-id codec.
//!
//! Conventions
//! - All JSON field names are camelCase on the wire.
//! - Component values are `Option<f32>`: `null` encodes *not present*,
//!   which is distinct from `0.0`.
//! - Snapshot columns are dense and index-aligned with the snapshot's
//!   `entityIds` vector; every column in a snapshot has the same length.

pub mod cluster_id;
pub mod dto;
pub mod error;
pub mod frames;
pub mod wire;

pub use cluster_id::ClusterMatchId;
pub use error::{ErrorBody, ErrorKind};
pub use frames::{ClientFrame, ServerFrame};
pub use wire::{ComponentColumn, ComponentKind, DeltaWire, ModuleSection, SnapshotWire};
