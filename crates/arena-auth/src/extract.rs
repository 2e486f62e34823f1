// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Framework-free token extraction from wire headers.
//!
//! HTTP requests present `Authorization: Bearer <token>` or
//! `X-Api-Token: <token>`. WebSocket upgrades prefer
//! `Sec-WebSocket-Protocol: Bearer.<token>` (the matched protocol must be
//! echoed back in the accept) and fall back to a `?token=` query
//! parameter.

/// Subprotocol prefix carrying a bearer token on WebSocket upgrades.
pub const WS_BEARER_PREFIX: &str = "Bearer.";

/// Extracts a token from HTTP auth headers.
///
/// `authorization` wins over `x_api_token` when both are present.
#[must_use]
pub fn token_from_headers(
    authorization: Option<&str>,
    x_api_token: Option<&str>,
) -> Option<String> {
    if let Some(value) = authorization {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_owned());
            }
        }
    }
    x_api_token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

/// Extracts a token from a WebSocket upgrade.
///
/// Returns `(token, negotiated_subprotocol)`; the subprotocol is present
/// only when the token came in via `Sec-WebSocket-Protocol` and must be
/// echoed in the `101` response for browsers to accept the upgrade.
#[must_use]
pub fn token_from_ws(
    protocols_header: Option<&str>,
    query_token: Option<&str>,
) -> Option<(String, Option<String>)> {
    if let Some(header) = protocols_header {
        for candidate in header.split(',').map(str::trim) {
            if let Some(token) = candidate.strip_prefix(WS_BEARER_PREFIX) {
                if !token.is_empty() {
                    return Some((token.to_owned(), Some(candidate.to_owned())));
                }
            }
        }
    }
    query_token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| (t.to_owned(), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_header_wins() {
        let token = token_from_headers(Some("Bearer abc"), Some("xyz"));
        assert_eq!(token.as_deref(), Some("abc"));
    }

    #[test]
    fn api_token_header_is_the_fallback() {
        assert_eq!(
            token_from_headers(None, Some("xyz")).as_deref(),
            Some("xyz")
        );
        assert_eq!(token_from_headers(Some("Basic zz"), None), None);
        assert_eq!(token_from_headers(None, None), None);
    }

    #[test]
    fn ws_subprotocol_is_preferred_and_echoed() {
        let (token, proto) =
            token_from_ws(Some("Bearer.t0k3n, other"), Some("ignored")).expect("token");
        assert_eq!(token, "t0k3n");
        assert_eq!(proto.as_deref(), Some("Bearer.t0k3n"));
    }

    #[test]
    fn ws_query_fallback_has_no_subprotocol() {
        let (token, proto) = token_from_ws(None, Some("qtoken")).expect("token");
        assert_eq!(token, "qtoken");
        assert_eq!(proto, None);
        assert!(token_from_ws(Some("unrelated"), None).is_none());
    }
}
