// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Arena control plane.
//!
//! The control plane owns cluster state but never engine state: a node
//! registry with TTL liveness, a match registry mapping cluster match ids
//! to `(node, container, local match)`, the placement scheduler, the
//! autoscaling control loop, and a node proxy façade for clients that
//! cannot reach engine nodes directly.
//!
//! Data flow for `CreateMatch`: router asks the scheduler for a node,
//! drives the node's container API, records the registry entry, and hands
//! the client stream URLs plus (on join) a short-lived match token.

pub mod autoscaler;
pub mod error;
pub mod http;
pub mod matches;
pub mod node_client;
pub mod proxy;
pub mod registry;
pub mod router;
pub mod scheduler;

pub use error::ControlError;
pub use registry::{NodeRecord, NodeRegistry};
