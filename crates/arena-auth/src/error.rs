// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Authentication failures, classified into the wire taxonomy.

use arena_proto::{ErrorBody, ErrorKind};
use thiserror::Error;

/// Failure to authenticate or authorize a request.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was presented.
    #[error("missing bearer token")]
    MissingToken,
    /// Signature, structure, or expiry check failed.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// The token is valid but lacks a required scope.
    #[error("insufficient scope: `{required}` is required")]
    InsufficientScope {
        /// The scope the operation demanded.
        required: String,
    },
    /// A match token's `(matchId, playerId)` does not match the URL.
    #[error("match token does not match the addressed match/player")]
    WrongBinding,
    /// The remote validator could not be reached.
    #[error("auth service unavailable: {0}")]
    RemoteUnavailable(String),
}

impl AuthError {
    /// Classification into the wire taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingToken | Self::InvalidToken(_) => ErrorKind::Unauthenticated,
            Self::InsufficientScope { .. } | Self::WrongBinding => ErrorKind::PermissionDenied,
            Self::RemoteUnavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// Converts to the wire error body.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.kind(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_the_contract() {
        assert_eq!(AuthError::MissingToken.kind(), ErrorKind::Unauthenticated);
        assert_eq!(
            AuthError::InvalidToken("expired".into()).kind(),
            ErrorKind::Unauthenticated
        );
        assert_eq!(
            AuthError::InsufficientScope {
                required: "arena.nodes".into()
            }
            .kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(AuthError::WrongBinding.kind(), ErrorKind::PermissionDenied);
    }
}
