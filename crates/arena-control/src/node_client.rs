// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Typed HTTP client for the engine nodes' container API.
//!
//! Every call carries the configured timeout; timeouts and transport
//! failures map to `Timeout`/`Unavailable`, node-side rejections keep the
//! node's status code so the router can surface the original cause.

use std::time::Duration;

use arena_proto::dto::{
    CreateContainerRequest, CreateContainerResponse, CreateLocalMatchRequest,
    CreateLocalMatchResponse,
};
use arena_proto::ErrorBody;
use tracing::debug;

use crate::error::ControlError;

/// HTTP client for node container APIs.
#[derive(Debug, Clone)]
pub struct NodeClient {
    client: reqwest::Client,
    timeout: Duration,
    bearer: Option<String>,
}

impl NodeClient {
    /// Creates a client with a per-request timeout and an optional
    /// service token presented to nodes.
    #[must_use]
    pub fn new(timeout: Duration, bearer: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            bearer,
        }
    }

    fn url(advertise_address: &str, path: &str) -> String {
        format!("http://{advertise_address}{path}")
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url).timeout(self.timeout);
        if let Some(token) = &self.bearer {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ControlError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_owned(),
        };
        Err(ControlError::NodeRejected {
            status: status.as_u16(),
            message,
        })
    }

    fn transport(err: reqwest::Error) -> ControlError {
        if err.is_timeout() {
            ControlError::ProxyTimeout(err.to_string())
        } else {
            ControlError::ProxyIo(err.to_string())
        }
    }

    /// `POST /api/containers` on the node.
    pub async fn create_container(
        &self,
        advertise_address: &str,
        modules: &[String],
    ) -> Result<String, ControlError> {
        let response = self
            .request(
                reqwest::Method::POST,
                Self::url(advertise_address, "/api/containers"),
            )
            .json(&CreateContainerRequest {
                modules: modules.to_vec(),
            })
            .send()
            .await
            .map_err(Self::transport)?;
        let body: CreateContainerResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(Self::transport)?;
        debug!(node = advertise_address, container_id = %body.container_id, "container created");
        Ok(body.container_id)
    }

    /// `POST /api/containers/{cid}/start` on the node.
    pub async fn start_container(
        &self,
        advertise_address: &str,
        container_id: &str,
    ) -> Result<(), ControlError> {
        let response = self
            .request(
                reqwest::Method::POST,
                Self::url(
                    advertise_address,
                    &format!("/api/containers/{container_id}/start"),
                ),
            )
            .send()
            .await
            .map_err(Self::transport)?;
        Self::check(response).await.map(|_| ())
    }

    /// `DELETE /api/containers/{cid}` on the node (best-effort rollback
    /// path).
    pub async fn delete_container(
        &self,
        advertise_address: &str,
        container_id: &str,
    ) -> Result<(), ControlError> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                Self::url(advertise_address, &format!("/api/containers/{container_id}")),
            )
            .send()
            .await
            .map_err(Self::transport)?;
        Self::check(response).await.map(|_| ())
    }

    /// `POST /api/containers/{cid}/matches` on the node.
    pub async fn create_match(
        &self,
        advertise_address: &str,
        container_id: &str,
        modules: &[String],
        player_limit: Option<u32>,
    ) -> Result<u64, ControlError> {
        let response = self
            .request(
                reqwest::Method::POST,
                Self::url(
                    advertise_address,
                    &format!("/api/containers/{container_id}/matches"),
                ),
            )
            .json(&CreateLocalMatchRequest {
                modules: modules.to_vec(),
                player_limit,
            })
            .send()
            .await
            .map_err(Self::transport)?;
        let body: CreateLocalMatchResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(Self::transport)?;
        Ok(body.match_id)
    }

    /// `DELETE /api/containers/{cid}/matches/{mid}` on the node.
    pub async fn delete_match(
        &self,
        advertise_address: &str,
        container_id: &str,
        match_id: u64,
    ) -> Result<(), ControlError> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                Self::url(
                    advertise_address,
                    &format!("/api/containers/{container_id}/matches/{match_id}"),
                ),
            )
            .send()
            .await
            .map_err(Self::transport)?;
        Self::check(response).await.map(|_| ())
    }
}
