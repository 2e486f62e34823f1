// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! WebSocket frame enums for the streaming endpoints.
//!
//! Frames are JSON text messages tagged by an `op` field. Servers ignore
//! unknown client frames rather than dropping the connection; clients must
//! tolerate new server frame kinds.

use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::error::ErrorBody;
use crate::wire::{DeltaWire, SnapshotWire};

/// Frames a client may send on a streaming socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Force the next emitted frame to be a full snapshot.
    Reset,
    /// Submit a command on the command socket.
    #[serde(rename_all = "camelCase")]
    Command {
        /// Qualified command name (`module.command`).
        command_name: String,
        /// Target match, when the command is match-scoped.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_id: Option<u64>,
        /// Schema-typed parameters.
        #[serde(default)]
        parameters: Map<String, serde_json::Value>,
    },
}

/// Frames the server emits on streaming sockets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Full snapshot of the subscribed match.
    Snapshot(SnapshotWire),
    /// Cumulative delta since the client's last acknowledged tick.
    Delta(DeltaWire),
    /// Error surfaced on this stream (also used by the error stream).
    Error(ErrorBody),
}
