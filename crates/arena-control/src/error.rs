// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Control-plane error type, classified into the wire taxonomy.

use arena_proto::{ErrorBody, ErrorKind};
use thiserror::Error;

/// Failure of a control-plane operation.
#[derive(Debug, Error)]
pub enum ControlError {
    /// No healthy node has container capacity left.
    #[error("no node has capacity for the match")]
    NoCapacity,
    /// The addressed node is not registered (or has expired).
    #[error("node `{0}` not found")]
    NodeNotFound(String),
    /// The addressed match is not in the registry.
    #[error("match `{0}` not found")]
    MatchNotFound(String),
    /// The match is at its player limit.
    #[error("match `{0}` is full")]
    MatchFull(String),
    /// A request parameter failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The proxy façade is disabled by configuration.
    #[error("node proxy is disabled")]
    ProxyDisabled,
    /// An outbound node call exceeded its deadline.
    #[error("node call timed out: {0}")]
    ProxyTimeout(String),
    /// An outbound node call failed at the transport level.
    #[error("node call failed: {0}")]
    ProxyIo(String),
    /// The node answered with a failure status.
    #[error("node answered {status}: {message}")]
    NodeRejected {
        /// HTTP status returned by the node.
        status: u16,
        /// Node-provided error message.
        message: String,
    },
    /// Token minting failed.
    #[error("token minting failed: {0}")]
    Minting(String),
    /// Invariant violation; indicates a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Classification into the wire taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoCapacity | Self::MatchFull(_) => ErrorKind::CapacityExceeded,
            Self::NodeNotFound(_) | Self::MatchNotFound(_) => ErrorKind::NotFound,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::ProxyDisabled => ErrorKind::Unavailable,
            Self::ProxyTimeout(_) => ErrorKind::Timeout,
            Self::ProxyIo(_) => ErrorKind::Unavailable,
            Self::NodeRejected { status, .. } => match status {
                400 => ErrorKind::InvalidArgument,
                404 => ErrorKind::NotFound,
                409 => ErrorKind::Conflict,
                503 => ErrorKind::Unavailable,
                _ => ErrorKind::Internal,
            },
            Self::Minting(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Converts to the wire error body.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.kind(), self.to_string())
    }
}
