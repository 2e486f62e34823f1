// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Validated principals and the JWT claim set they come from.

use std::collections::HashSet;

use arena_proto::ClusterMatchId;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::scope::any_scope_matches;

/// JWT claim set carried by Arena tokens.
///
/// Match tokens additionally carry `matchId` (the cluster match id) and
/// `playerId`; those tokens are only accepted at streaming endpoints
/// addressing the same match and player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user or service identity).
    pub sub: String,
    /// Expiry, unix seconds.
    pub exp: u64,
    /// Granted capability scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// API-token id when the token was minted from a long-lived key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Cluster match id, match tokens only.
    #[serde(rename = "matchId", default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    /// Player id, match tokens only.
    #[serde(rename = "playerId", default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
}

/// The `(matchId, playerId)` pair a match token is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchBinding {
    /// Cluster match id from the token.
    pub match_id: ClusterMatchId,
    /// Player id from the token.
    pub player_id: String,
}

/// A validated caller identity.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Subject (user or service identity).
    pub subject: String,
    /// Granted capability scopes.
    pub scopes: HashSet<String>,
    /// API-token id, when present.
    pub api_token_id: Option<String>,
    /// Expiry, unix seconds.
    pub expires_at: u64,
    /// Match binding, match tokens only.
    pub binding: Option<MatchBinding>,
}

impl Principal {
    /// Builds a principal from a validated claim set.
    ///
    /// Fails `InvalidToken` when a match token carries an unparsable
    /// match id or a match id without a player id.
    pub fn from_claims(claims: Claims) -> Result<Self, AuthError> {
        let binding = match (claims.match_id, claims.player_id) {
            (None, None) => None,
            (Some(match_id), Some(player_id)) => Some(MatchBinding {
                match_id: match_id
                    .parse()
                    .map_err(|e| AuthError::InvalidToken(format!("bad matchId claim: {e}")))?,
                player_id,
            }),
            _ => {
                return Err(AuthError::InvalidToken(
                    "match token must carry both matchId and playerId".into(),
                ))
            }
        };
        Ok(Self {
            subject: claims.sub,
            scopes: claims.scopes.into_iter().collect(),
            api_token_id: claims.jti,
            expires_at: claims.exp,
            binding,
        })
    }

    /// Whether the principal holds a scope satisfying `required`.
    #[must_use]
    pub fn has_scope(&self, required: &str) -> bool {
        any_scope_matches(self.scopes.iter().map(String::as_str), required)
    }

    /// Demands a scope, failing `InsufficientScope`.
    pub fn require_scope(&self, required: &str) -> Result<(), AuthError> {
        if self.has_scope(required) {
            Ok(())
        } else {
            Err(AuthError::InsufficientScope {
                required: required.to_owned(),
            })
        }
    }

    /// Checks a match token against the streaming URL's addressing.
    ///
    /// Non-match tokens pass if they hold the streams scope; match
    /// tokens must be bound to exactly this container, match, and
    /// player (when the endpoint is player-scoped).
    pub fn require_match_access(
        &self,
        stream_scope: &str,
        container_id: &str,
        local_match_id: u64,
        player_id: Option<&str>,
    ) -> Result<(), AuthError> {
        match &self.binding {
            None => self.require_scope(stream_scope),
            Some(binding) => {
                let bound = &binding.match_id;
                if bound.container_id != container_id || bound.local_match_id != local_match_id {
                    return Err(AuthError::WrongBinding);
                }
                if let Some(pid) = player_id {
                    if binding.player_id != pid {
                        return Err(AuthError::WrongBinding);
                    }
                }
                Ok(())
            }
        }
    }
}
