// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Node proxy façade.
//!
//! Forwards an HTTP request to a registered node for clients that cannot
//! reach nodes directly. Hop-by-hop headers and HTTP/2 pseudo-headers
//! are stripped in both directions; query strings pass through encoded
//! as received.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use tracing::debug;

use crate::error::ControlError;

/// Hop-by-hop headers never forwarded through the proxy.
pub const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Removes hop-by-hop and pseudo-headers.
#[must_use]
pub fn strip_hop_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.as_str();
        if lower.starts_with(':') || HOP_BY_HOP.contains(&lower) {
            continue;
        }
        out.append(name, value.clone());
    }
    out
}

/// Forwarded response: status, filtered headers, body.
pub type ProxiedResponse = (StatusCode, HeaderMap, Bytes);

/// Proxy client with its enable flag and timeout.
#[derive(Debug)]
pub struct NodeProxy {
    client: reqwest::Client,
    enabled: bool,
    timeout: Duration,
}

impl NodeProxy {
    /// Creates the proxy façade.
    #[must_use]
    pub fn new(enabled: bool, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            enabled,
            timeout,
        }
    }

    /// Forwards `method path?query` to the node at `advertise_address`.
    pub async fn forward(
        &self,
        advertise_address: &str,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ProxiedResponse, ControlError> {
        if !self.enabled {
            return Err(ControlError::ProxyDisabled);
        }
        let mut url = format!("http://{advertise_address}/{path}");
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }
        debug!(%method, %url, "proxying to node");

        let response = self
            .client
            .request(method, &url)
            .headers(strip_hop_headers(headers))
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ControlError::ProxyTimeout(err.to_string())
                } else {
                    ControlError::ProxyIo(err.to_string())
                }
            })?;

        let status = response.status();
        let mut response_headers = HeaderMap::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            let lower = name.as_str();
            if lower.starts_with(':') || HOP_BY_HOP.contains(&lower) {
                continue;
            }
            if let Ok(name) = HeaderName::from_bytes(name.as_str().as_bytes()) {
                response_headers.append(name, value.clone());
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| ControlError::ProxyIo(err.to_string()))?;
        Ok((status, response_headers, body))
    }
}
