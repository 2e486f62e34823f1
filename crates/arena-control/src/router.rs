// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Match router: placement, node-side creation, registry bookkeeping,
//! and player admission.
//!
//! `create_match` drives the node's container API and records the
//! mapping; failures after partial node-side creation are rolled back
//! best-effort (`DeleteContainer`/`DeleteMatch`) and the original error
//! is surfaced. `join_match` admits atomically against the player limit
//! and mints a short-lived match token bound to `(matchId, playerId)`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arena_auth::TokenMinter;
use arena_proto::dto::{
    CreateMatchRequest, JoinMatchResponse, MatchEntry, MatchStatus, StreamUrls,
};
use arena_proto::ClusterMatchId;
use tracing::{info, warn};

use crate::error::ControlError;
use crate::matches::MatchRegistry;
use crate::node_client::NodeClient;
use crate::registry::NodeRegistry;
use crate::scheduler;

/// Orchestrates match creation, deletion, and joins.
pub struct MatchRouter {
    nodes: Arc<NodeRegistry>,
    matches: Arc<MatchRegistry>,
    client: NodeClient,
    minter: Arc<TokenMinter>,
    /// Advertise `wss://` for every node (cluster-wide TLS termination);
    /// nodes behind their own terminating proxy opt in at registration.
    advertise_tls: bool,
}

impl MatchRouter {
    /// Builds a router over the shared registries.
    #[must_use]
    pub fn new(
        nodes: Arc<NodeRegistry>,
        matches: Arc<MatchRegistry>,
        client: NodeClient,
        minter: Arc<TokenMinter>,
        advertise_tls: bool,
    ) -> Self {
        Self {
            nodes,
            matches,
            client,
            minter,
            advertise_tls,
        }
    }

    /// The match registry (for the HTTP listing handlers).
    #[must_use]
    pub fn matches(&self) -> &MatchRegistry {
        &self.matches
    }

    /// Creates a match: schedule → create container → create match →
    /// start → `RUNNING`.
    pub async fn create_match(
        &self,
        request: CreateMatchRequest,
    ) -> Result<MatchEntry, ControlError> {
        if request.modules.is_empty() {
            return Err(ControlError::InvalidArgument(
                "a match needs at least one module".into(),
            ));
        }
        let candidates = self.nodes.schedulable();
        let node = scheduler::pick(&candidates, request.preferred_node_id.as_deref())?.clone();

        let container_id = self
            .client
            .create_container(&node.advertise_address, &request.modules)
            .await?;

        let local_match_id = match self
            .client
            .create_match(
                &node.advertise_address,
                &container_id,
                &request.modules,
                request.player_limit,
            )
            .await
        {
            Ok(id) => id,
            Err(err) => {
                // Roll back the orphaned container; the original error
                // is what the client sees.
                if let Err(cleanup) = self
                    .client
                    .delete_container(&node.advertise_address, &container_id)
                    .await
                {
                    warn!(%cleanup, "container rollback failed");
                }
                return Err(err);
            }
        };

        let cluster_match_id =
            ClusterMatchId::new(node.node_id.clone(), container_id.clone(), local_match_id);
        let advertise_tls = self.advertise_tls || node.advertise_tls;
        let entry = MatchEntry {
            cluster_match_id: cluster_match_id.clone(),
            node_id: node.node_id.clone(),
            container_id: container_id.clone(),
            module_names: request.modules.clone(),
            advertise_address: node.advertise_address.clone(),
            advertise_tls,
            stream_urls: stream_urls(
                &node.advertise_address,
                advertise_tls,
                &container_id,
                local_match_id,
                None,
            ),
            player_count: 0,
            player_limit: request.player_limit.unwrap_or(0),
            status: MatchStatus::Creating,
            error: None,
        };
        self.matches.insert(entry);

        match self
            .client
            .start_container(&node.advertise_address, &container_id)
            .await
        {
            Ok(()) => {
                let entry = self.matches.mark_running(&cluster_match_id)?;
                info!(cluster_match_id = %cluster_match_id, node_id = %node.node_id, "match running");
                Ok(entry)
            }
            Err(err) => {
                let _ = self.matches.mark_error(&cluster_match_id, &err.to_string());
                if let Err(cleanup) = self
                    .client
                    .delete_container(&node.advertise_address, &container_id)
                    .await
                {
                    warn!(%cleanup, "container rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Admits a player and mints their match token.
    pub async fn join_match(
        &self,
        cluster_match_id: &ClusterMatchId,
        player_id: &str,
    ) -> Result<JoinMatchResponse, ControlError> {
        if player_id.is_empty() {
            return Err(ControlError::InvalidArgument("empty player id".into()));
        }
        let entry = self.matches.admit_player(cluster_match_id)?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let minted = self
            .minter
            .mint_match_token(player_id, cluster_match_id, player_id, now);
        let (match_token, expires_at_unix_ms) = match minted {
            Ok(pair) => pair,
            Err(err) => {
                // The seat was taken optimistically; give it back.
                let _ = self.matches.release_player(cluster_match_id);
                return Err(ControlError::Minting(err.to_string()));
            }
        };
        Ok(JoinMatchResponse {
            match_token,
            expires_at_unix_ms,
            stream_urls: stream_urls(
                &entry.advertise_address,
                entry.advertise_tls,
                &entry.container_id,
                cluster_match_id.local_match_id,
                Some(player_id),
            ),
        })
    }

    /// Deletes a match from the registry and, best-effort, from its
    /// node.
    pub async fn delete_match(
        &self,
        cluster_match_id: &ClusterMatchId,
    ) -> Result<(), ControlError> {
        let entry = self.matches.remove(cluster_match_id)?;
        if let Err(err) = self
            .client
            .delete_match(
                &entry.advertise_address,
                &entry.container_id,
                cluster_match_id.local_match_id,
            )
            .await
        {
            warn!(cluster_match_id = %cluster_match_id, %err, "node-side match deletion failed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for MatchRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchRouter").finish_non_exhaustive()
    }
}

/// Builds the `ws[s]://` stream URLs for a match, including the
/// player-scoped endpoints when a player id is given.
#[must_use]
pub fn stream_urls(
    advertise_address: &str,
    tls: bool,
    container_id: &str,
    local_match_id: u64,
    player_id: Option<&str>,
) -> StreamUrls {
    let scheme = if tls { "wss" } else { "ws" };
    let base = format!("{scheme}://{advertise_address}");
    let match_base = format!("{base}/ws/containers/{container_id}/matches/{local_match_id}");
    StreamUrls {
        snapshot: format!("{match_base}/snapshot"),
        delta: format!("{match_base}/delta"),
        commands: format!("{base}/containers/{container_id}/commands"),
        player_snapshot: player_id.map(|p| format!("{match_base}/players/{p}/snapshot")),
        player_delta: player_id.map(|p| format!("{match_base}/players/{p}/delta")),
        errors: player_id
            .map(|p| format!("{base}/ws/matches/{local_match_id}/players/{p}/errors")),
    }
}
