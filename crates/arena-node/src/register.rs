// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Control-plane registration and heartbeat client.
//!
//! On boot the node registers and then heartbeats at the interval the
//! control plane assigns. Heartbeat failures are silent towards clients:
//! they only influence the node's status on the control plane. A `404`
//! on heartbeat means the registration was swept; the loop re-registers
//! on the next pass.

use std::sync::Arc;
use std::time::Duration;

use arena_auth::Claims;
use arena_config::sections::{AuthConfig, NodeServiceConfig};
use arena_proto::dto::{HeartbeatRequest, RegisterNodeRequest, RegisterNodeResponse};
use jsonwebtoken::{encode, EncodingKey, Header};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::state::NodeState;

/// Client half of the node ↔ control-plane liveness contract.
pub struct ClusterLink {
    client: reqwest::Client,
    base_url: String,
    token: String,
    node_id: Mutex<Option<String>>,
    heartbeat_interval: Mutex<Duration>,
}

impl ClusterLink {
    /// Builds the link; `None` when no control plane is configured.
    ///
    /// Without a provisioned service token the node self-mints one from
    /// the shared development secret; deployments provision a real
    /// token instead.
    #[must_use]
    pub fn new(config: &NodeServiceConfig, auth: &AuthConfig) -> Option<Arc<Self>> {
        if config.control_plane_url.is_empty() {
            info!("no control plane configured; running standalone");
            return None;
        }
        let token = if config.service_token.is_empty() {
            mint_dev_token(&auth.hmac_secret)?
        } else {
            config.service_token.clone()
        };
        Some(Arc::new(Self {
            client: reqwest::Client::new(),
            base_url: config.control_plane_url.trim_end_matches('/').to_owned(),
            token,
            node_id: Mutex::new(None),
            heartbeat_interval: Mutex::new(Duration::from_secs(10)),
        }))
    }

    /// Registration + heartbeat loop; runs until the task is aborted.
    pub async fn run(self: Arc<Self>, state: Arc<NodeState>) {
        loop {
            let registered = { self.node_id.lock().await.clone() };
            match registered {
                None => {
                    if let Err(err) = self.register(&state).await {
                        warn!(%err, "registration failed; retrying");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                }
                Some(node_id) => {
                    if let Err(err) = self.heartbeat(&node_id, &state).await {
                        warn!(%err, "heartbeat failed");
                    }
                }
            }
            let interval = *self.heartbeat_interval.lock().await;
            tokio::time::sleep(interval).await;
        }
    }

    async fn register(&self, state: &NodeState) -> Result<(), reqwest::Error> {
        let response: RegisterNodeResponse = self
            .client
            .post(format!("{}/api/nodes", self.base_url))
            .bearer_auth(&self.token)
            .json(&RegisterNodeRequest {
                advertise_address: state.config.advertise_address.clone(),
                advertise_tls: state.config.advertise_tls,
                max_containers: state.config.max_containers,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        info!(node_id = %response.node_id, "registered with control plane");
        *self.heartbeat_interval.lock().await =
            Duration::from_millis(response.heartbeat_interval_ms.max(1000));
        *self.node_id.lock().await = Some(response.node_id);
        Ok(())
    }

    async fn heartbeat(&self, node_id: &str, state: &NodeState) -> Result<(), reqwest::Error> {
        let (active_containers, entity_count, used_memory_bytes) = state.aggregate_stats();
        let response = self
            .client
            .post(format!("{}/api/nodes/{node_id}/heartbeat", self.base_url))
            .bearer_auth(&self.token)
            .json(&HeartbeatRequest {
                active_containers,
                entity_count,
                used_memory_bytes,
                degraded: false,
            })
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            // Swept while we were silent; re-register on the next pass.
            warn!(node_id, "registration expired; will re-register");
            *self.node_id.lock().await = None;
            return Ok(());
        }
        response.error_for_status().map(|_| ())
    }

    /// Best-effort deregistration on shutdown.
    pub async fn deregister(&self) {
        let node_id = { self.node_id.lock().await.take() };
        if let Some(node_id) = node_id {
            let result = self
                .client
                .delete(format!("{}/api/nodes/{node_id}", self.base_url))
                .bearer_auth(&self.token)
                .send()
                .await;
            if let Err(err) = result {
                warn!(%err, "deregistration failed");
            }
        }
    }
}

impl std::fmt::Debug for ClusterLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterLink")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn mint_dev_token(secret: &str) -> Option<String> {
    if secret.is_empty() {
        warn!("no service token and no shared secret; cannot register");
        return None;
    }
    let claims = Claims {
        sub: "arena-node".to_owned(),
        // Long-lived development token; provisioned tokens replace this.
        exp: now_unix_secs() + 30 * 24 * 3600,
        scopes: vec![arena_auth::scopes::NODES.to_owned()],
        jti: None,
        match_id: None,
        player_id: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .ok()
}

fn now_unix_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
