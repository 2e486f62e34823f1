// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Domain-wide error taxonomy and its HTTP mapping.
//!
//! Every service error that crosses the wire is classified into exactly one
//! [`ErrorKind`]. The kind → status mapping is deterministic; handlers never
//! pick status codes ad hoc.

use serde::{Deserialize, Serialize};

/// Domain-wide error classification.
///
/// The set is closed: new failure modes must be expressed through one of
/// these kinds so that clients can rely on the HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed or semantically invalid input.
    InvalidArgument,
    /// The addressed resource does not exist.
    NotFound,
    /// The resource already exists (duplicate install, duplicate register).
    AlreadyExists,
    /// The caller is authenticated but not allowed to perform the operation.
    PermissionDenied,
    /// Missing or invalid credentials.
    Unauthenticated,
    /// A hard resource limit was hit (entity slots, queue depth, player
    /// limit, cluster capacity).
    CapacityExceeded,
    /// The operation conflicts with current state (lifecycle, concurrent
    /// update).
    Conflict,
    /// An outbound call exceeded its deadline.
    Timeout,
    /// A collaborator is unreachable or not ready to serve.
    Unavailable,
    /// Invariant violation or unexpected internal failure.
    Internal,
    /// The operation was abandoned because its owner is shutting down.
    Cancelled,
}

impl ErrorKind {
    /// Deterministic HTTP status for this kind.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidArgument => 400,
            Self::NotFound => 404,
            Self::AlreadyExists | Self::Conflict => 409,
            Self::PermissionDenied => 403,
            Self::Unauthenticated => 401,
            Self::CapacityExceeded | Self::Unavailable => 503,
            Self::Timeout => 504,
            Self::Internal => 500,
            Self::Cancelled => 499,
        }
    }

    /// Stable wire identifier (the serde representation).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::CapacityExceeded => "CAPACITY_EXCEEDED",
            Self::Conflict => "CONFLICT",
            Self::Timeout => "TIMEOUT",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// Error body carried in REST responses and stream error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Classification of the failure.
    pub kind: ErrorKind,
    /// Human-readable message. Not stable; clients branch on `kind`.
    pub message: String,
}

impl ErrorBody {
    /// Builds an error body from a kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_deterministic() {
        let cases = [
            (ErrorKind::InvalidArgument, 400),
            (ErrorKind::NotFound, 404),
            (ErrorKind::AlreadyExists, 409),
            (ErrorKind::PermissionDenied, 403),
            (ErrorKind::Unauthenticated, 401),
            (ErrorKind::CapacityExceeded, 503),
            (ErrorKind::Conflict, 409),
            (ErrorKind::Timeout, 504),
            (ErrorKind::Unavailable, 503),
            (ErrorKind::Internal, 500),
            (ErrorKind::Cancelled, 499),
        ];
        for (kind, status) in cases {
            assert_eq!(kind.http_status(), status, "mapping for {kind:?}");
        }
    }

    #[test]
    fn error_body_round_trips_through_json() {
        let body = ErrorBody::new(ErrorKind::CapacityExceeded, "match is full");
        let json = serde_json::to_string(&body).expect("serialize");
        assert!(
            json.contains("CAPACITY_EXCEEDED"),
            "kind should serialize as screaming snake case: {json}"
        );
        let back: ErrorBody = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, body);
    }
}
