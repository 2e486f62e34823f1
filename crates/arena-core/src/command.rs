// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Command queue and parameter-schema validation.
//!
//! Commands are queued from request handlers and drained by the tick loop
//! (at most `max_commands_per_tick` per tick, FIFO). Ordering contract:
//! a command submitted before `advance()` returns is observed no later
//! than the following tick.
//!
//! Rejections and handler failures are reported back on the submitting
//! player's error stream through a [`PlayerErrorSink`]; they never abort
//! the tick.

use std::collections::VecDeque;

use arena_proto::dto::{ParamInfo, ParamKind};
use arena_proto::ErrorBody;
use serde_json::Map;
use tracing::warn;

use crate::error::CoreError;

/// Identity of the player a command came from, for error routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRef {
    /// Match the player belongs to.
    pub match_id: u64,
    /// Player identifier from the match token.
    pub player_id: String,
}

/// A queued command awaiting the next drain.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    /// Qualified name (`module.command`).
    pub name: String,
    /// Target match for match-scoped commands.
    pub match_id: Option<u64>,
    /// Raw parameters; validated against the schema at drain time.
    pub parameters: Map<String, serde_json::Value>,
    /// Submitting player, when known.
    pub player: Option<PlayerRef>,
}

/// Bounded in-memory FIFO of pending commands.
#[derive(Debug)]
pub struct CommandQueue {
    items: VecDeque<QueuedCommand>,
    max_depth: usize,
}

impl CommandQueue {
    /// Creates a queue bounded at `max_depth` entries.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_depth,
        }
    }

    /// Enqueues a command; fails `CapacityExceeded` at the depth limit.
    pub fn push(&mut self, command: QueuedCommand) -> Result<(), CoreError> {
        if self.items.len() >= self.max_depth {
            return Err(CoreError::QueueFull(self.max_depth));
        }
        self.items.push_back(command);
        Ok(())
    }

    /// Pops at most `max` commands in FIFO order.
    pub fn drain(&mut self, max: usize) -> Vec<QueuedCommand> {
        let take = max.min(self.items.len());
        self.items.drain(..take).collect()
    }

    /// Empties the queue, returning the abandoned commands.
    pub fn fail_all(&mut self) -> Vec<QueuedCommand> {
        self.items.drain(..).collect()
    }

    /// Commands currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Sink for errors that belong on a player's error stream.
///
/// The engine node implements this with a router to the per-player
/// WebSocket error streams; tests use a collecting sink.
pub trait PlayerErrorSink: Send + Sync {
    /// Reports an error for `(match_id, player_id)`.
    fn report(&self, match_id: u64, player_id: &str, error: ErrorBody);
}

/// Default sink: logs and drops.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl PlayerErrorSink for LogErrorSink {
    fn report(&self, match_id: u64, player_id: &str, error: ErrorBody) {
        warn!(match_id, player_id, %error, "player error with no stream attached");
    }
}

/// Validates `params` against a command's schema.
///
/// Rules: required parameters must be present, present parameters must
/// match their declared kind, and unknown parameters are rejected.
pub fn validate_params(
    schema: &[ParamInfo],
    params: &Map<String, serde_json::Value>,
) -> Result<(), CoreError> {
    for spec in schema {
        match params.get(&spec.name) {
            None if spec.required => {
                return Err(CoreError::InvalidArgument(format!(
                    "missing required parameter `{}`",
                    spec.name
                )));
            }
            None => {}
            Some(value) => {
                if !kind_matches(spec.kind, value) {
                    return Err(CoreError::InvalidArgument(format!(
                        "parameter `{}` is not a {:?}",
                        spec.name, spec.kind
                    )));
                }
            }
        }
    }
    for name in params.keys() {
        if !schema.iter().any(|spec| spec.name == *name) {
            return Err(CoreError::InvalidArgument(format!(
                "unknown parameter `{name}`"
            )));
        }
    }
    Ok(())
}

fn kind_matches(kind: ParamKind, value: &serde_json::Value) -> bool {
    match kind {
        ParamKind::Float => value.is_number(),
        ParamKind::Int => value.as_i64().is_some() || value.as_u64().is_some(),
        ParamKind::Bool => value.is_boolean(),
        ParamKind::String => value.is_string(),
    }
}
