// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Cluster-unique match identifier codec.
//!
//! A cluster match id is `{nodeId}.{containerId}.{localMatchId}`. Node and
//! container ids are hyphen-free hex (UUID simple form), the local match id
//! is decimal, and `.` never occurs inside a field, so the encoding is
//! reversible by splitting on the two dots.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to parse a cluster match id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cluster match id `{input}`: {reason}")]
pub struct ClusterMatchIdError {
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

/// Cluster-unique match identifier: `(nodeId, containerId, localMatchId)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterMatchId {
    /// Registered node id (UUID simple form).
    pub node_id: String,
    /// Container id on that node (UUID simple form).
    pub container_id: String,
    /// Local match id within the container.
    pub local_match_id: u64,
}

impl ClusterMatchId {
    /// Builds an id from its three parts.
    pub fn new(
        node_id: impl Into<String>,
        container_id: impl Into<String>,
        local_match_id: u64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            container_id: container_id.into(),
            local_match_id,
        }
    }
}

impl fmt::Display for ClusterMatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.node_id, self.container_id, self.local_match_id
        )
    }
}

impl FromStr for ClusterMatchId {
    type Err = ClusterMatchIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reject = |reason| ClusterMatchIdError {
            input: s.to_owned(),
            reason,
        };
        let mut parts = s.split('.');
        let (node, container, local) = match (parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(c), Some(l)) => (n, c, l),
            _ => return Err(reject("expected three dot-separated fields")),
        };
        if parts.next().is_some() {
            return Err(reject("expected exactly three dot-separated fields"));
        }
        if node.is_empty() || container.is_empty() {
            return Err(reject("empty node or container field"));
        }
        let local_match_id = local
            .parse::<u64>()
            .map_err(|_| reject("local match id is not a decimal integer"))?;
        Ok(Self {
            node_id: node.to_owned(),
            container_id: container.to_owned(),
            local_match_id,
        })
    }
}

impl TryFrom<String> for ClusterMatchId {
    type Error = ClusterMatchIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClusterMatchId> for String {
    fn from(id: ClusterMatchId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = ClusterMatchId::new("ab12", "cd34", 7);
        let text = id.to_string();
        assert_eq!(text, "ab12.cd34.7");
        let back: ClusterMatchId = text.parse().expect("parse");
        assert_eq!(back, id);
    }

    #[test]
    fn rejects_malformed_inputs() {
        for input in ["", "a.b", "a.b.c.d", "a..3", ".b.3", "a.b.x"] {
            assert!(
                input.parse::<ClusterMatchId>().is_err(),
                "should reject `{input}`"
            );
        }
    }

    #[test]
    fn serde_uses_the_string_form() {
        let id = ClusterMatchId::new("n1", "c1", 42);
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, r#""n1.c1.42""#);
        let back: ClusterMatchId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }
}
