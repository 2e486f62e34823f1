// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Control-plane HTTP surface.
//!
//! Every handler authenticates explicitly with the scope its operation
//! demands; errors map onto HTTP through the wire taxonomy, never ad
//! hoc. The proxy route forwards any method under
//! `/proxy/{nid}/{*path}` to the addressed node.

use std::sync::Arc;
use std::time::Instant;

use arena_auth::extract::token_from_headers;
use arena_auth::{scopes, AuthError, Principal, TokenValidator};
use arena_config::sections::ControlServiceConfig;
use arena_proto::dto::{
    CreateMatchRequest, HealthResponse, HeartbeatRequest, JoinMatchRequest, JoinMatchResponse,
    ListMatchesResponse, ListNodesResponse, MatchEntry, RegisterNodeRequest, RegisterNodeResponse,
    ScaleRecommendation,
};
use arena_proto::{ClusterMatchId, ErrorBody, ErrorKind};
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};

use crate::autoscaler::Autoscaler;
use crate::error::ControlError;
use crate::proxy::NodeProxy;
use crate::registry::NodeRegistry;
use crate::router::MatchRouter;

/// Shared state behind the control-plane router.
pub struct AppState {
    /// Node registry.
    pub nodes: Arc<NodeRegistry>,
    /// Match router (owns the match registry).
    pub router: Arc<MatchRouter>,
    /// Autoscaler.
    pub autoscaler: Arc<Autoscaler>,
    /// Node proxy façade.
    pub proxy: Arc<NodeProxy>,
    /// Token validator.
    pub validator: Arc<TokenValidator>,
    /// Service config.
    pub config: ControlServiceConfig,
    /// Process start, for uptime.
    pub started_at: Instant,
}

/// Shared state handle.
pub type SharedState = Arc<AppState>;

/// HTTP error wrapper carrying the taxonomy mapping.
#[derive(Debug)]
pub struct ApiError(pub ErrorBody);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0)).into_response()
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        Self(err.to_body())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err.to_body())
    }
}

/// Builds the control-plane router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/nodes", post(register_node).get(list_nodes))
        .route("/api/nodes/{nid}", axum::routing::delete(deregister_node))
        .route("/api/nodes/{nid}/heartbeat", post(heartbeat))
        .route("/api/nodes/{nid}/drain", post(drain_node))
        .route("/api/matches", post(create_match).get(list_matches))
        .route(
            "/api/matches/{cmid}",
            get(get_match).delete(delete_match),
        )
        .route("/api/matches/{cmid}/join", post(join_match))
        .route("/api/autoscaler", get(autoscaler_latest))
        .route("/proxy/{nid}/{*path}", any(proxy_request))
        .with_state(state)
}

async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    required_scope: &str,
) -> Result<Principal, ApiError> {
    let token = token_from_headers(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
        headers.get("x-api-token").and_then(|v| v.to_str().ok()),
    )
    .ok_or(AuthError::MissingToken)?;
    let principal = state.validator.validate(&token).await?;
    principal.require_scope(required_scope)?;
    Ok(principal)
}

fn parse_cluster_id(raw: &str) -> Result<ClusterMatchId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError(ErrorBody::new(
            ErrorKind::InvalidArgument,
            format!("malformed cluster match id `{raw}`"),
        ))
    })
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
        uptime_ms: state.started_at.elapsed().as_millis() as u64,
        container_count: None,
    })
}

async fn register_node(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<RegisterNodeRequest>,
) -> Result<Json<RegisterNodeResponse>, ApiError> {
    authenticate(&state, &headers, scopes::NODES).await?;
    if request.max_containers == 0 {
        return Err(ControlError::InvalidArgument("maxContainers must be positive".into()).into());
    }
    let record = state.nodes.register(&request, Instant::now());
    Ok(Json(RegisterNodeResponse {
        node_id: record.node_id,
        heartbeat_interval_ms: state.config.heartbeat_interval_ms,
        ttl_ms: state.config.node_ttl_ms,
    }))
}

async fn list_nodes(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<ListNodesResponse>, ApiError> {
    authenticate(&state, &headers, scopes::NODES).await?;
    let now = Instant::now();
    let nodes = state
        .nodes
        .snapshot()
        .iter()
        .map(|record| record.summary(now))
        .collect();
    Ok(Json(ListNodesResponse { nodes }))
}

async fn deregister_node(
    State(state): State<SharedState>,
    Path(nid): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authenticate(&state, &headers, scopes::NODES).await?;
    state.nodes.deregister(&nid)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn heartbeat(
    State(state): State<SharedState>,
    Path(nid): Path<String>,
    headers: HeaderMap,
    Json(request): Json<HeartbeatRequest>,
) -> Result<StatusCode, ApiError> {
    authenticate(&state, &headers, scopes::NODES).await?;
    state.nodes.heartbeat(&nid, &request, Instant::now())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn drain_node(
    State(state): State<SharedState>,
    Path(nid): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authenticate(&state, &headers, scopes::NODES).await?;
    state.nodes.drain(&nid)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_match(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<CreateMatchRequest>,
) -> Result<Json<MatchEntry>, ApiError> {
    authenticate(&state, &headers, scopes::MATCHES).await?;
    let entry = state.router.create_match(request).await?;
    Ok(Json(entry))
}

async fn list_matches(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<ListMatchesResponse>, ApiError> {
    authenticate(&state, &headers, scopes::MATCHES).await?;
    Ok(Json(ListMatchesResponse {
        matches: state.router.matches().list(),
    }))
}

async fn get_match(
    State(state): State<SharedState>,
    Path(cmid): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MatchEntry>, ApiError> {
    authenticate(&state, &headers, scopes::MATCHES).await?;
    let id = parse_cluster_id(&cmid)?;
    let entry = state
        .router
        .matches()
        .get(&id)
        .ok_or_else(|| ControlError::MatchNotFound(cmid))?;
    Ok(Json(entry))
}

async fn delete_match(
    State(state): State<SharedState>,
    Path(cmid): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authenticate(&state, &headers, scopes::MATCHES).await?;
    let id = parse_cluster_id(&cmid)?;
    state.router.delete_match(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn join_match(
    State(state): State<SharedState>,
    Path(cmid): Path<String>,
    headers: HeaderMap,
    Json(request): Json<JoinMatchRequest>,
) -> Result<Json<JoinMatchResponse>, ApiError> {
    authenticate(&state, &headers, scopes::MATCHES).await?;
    let id = parse_cluster_id(&cmid)?;
    let response = state.router.join_match(&id, &request.player_id).await?;
    Ok(Json(response))
}

async fn autoscaler_latest(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<Option<ScaleRecommendation>>, ApiError> {
    authenticate(&state, &headers, scopes::NODES).await?;
    Ok(Json(state.autoscaler.latest()))
}

async fn proxy_request(
    State(state): State<SharedState>,
    Path((nid, path)): Path<(String, String)>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers, scopes::PROXY).await?;
    let node = state
        .nodes
        .get(&nid)
        .ok_or_else(|| ControlError::NodeNotFound(nid.clone()))?;
    let (status, response_headers, response_body) = state
        .proxy
        .forward(
            &node.advertise_address,
            method,
            &path,
            query.as_deref(),
            &headers,
            body,
        )
        .await?;
    Ok((status, response_headers, response_body).into_response())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use arena_auth::{
        Claims, KeyMaterial, SigningMaterial, TokenMinter, ValidationMode,
    };
    use arena_proto::dto::{MatchStatus, NodeStatus, StreamUrls};
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;
    use crate::matches::MatchRegistry;
    use crate::node_client::NodeClient;

    const SECRET: &[u8] = b"control-test-secret";

    fn service_token(scopes: &[&str]) -> String {
        let claims = Claims {
            sub: "svc".into(),
            exp: 4_102_444_800,
            scopes: scopes.iter().map(|s| (*s).to_owned()).collect(),
            jti: None,
            match_id: None,
            player_id: None,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .expect("encode")
    }

    fn auth_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().expect("header"),
        );
        headers
    }

    fn state() -> SharedState {
        let nodes = Arc::new(NodeRegistry::new(Duration::from_secs(30)));
        let matches = Arc::new(MatchRegistry::new());
        let minter = Arc::new(
            TokenMinter::new(
                SigningMaterial::HmacSecret(SECRET.to_vec()),
                Duration::from_secs(300),
            )
            .expect("minter"),
        );
        let router = Arc::new(MatchRouter::new(
            Arc::clone(&nodes),
            Arc::clone(&matches),
            NodeClient::new(Duration::from_secs(1), None),
            minter,
            false,
        ));
        let validator = Arc::new(
            TokenValidator::new(ValidationMode::Local(KeyMaterial::HmacSecret(
                SECRET.to_vec(),
            )))
            .expect("validator"),
        );
        Arc::new(AppState {
            nodes,
            router,
            autoscaler: Arc::new(Autoscaler::new(crate::autoscaler::AutoscalerConfig::default())),
            proxy: Arc::new(NodeProxy::new(true, Duration::from_secs(1))),
            validator,
            config: ControlServiceConfig::default(),
            started_at: Instant::now(),
        })
    }

    fn seeded_match(state: &AppState, limit: u32) -> ClusterMatchId {
        let id = ClusterMatchId::new("n1", "c1", 1);
        state.router.matches().insert(MatchEntry {
            cluster_match_id: id.clone(),
            node_id: "n1".into(),
            container_id: "c1".into(),
            module_names: vec!["counter:1.0".into()],
            advertise_address: "host:7350".into(),
            advertise_tls: false,
            stream_urls: StreamUrls {
                snapshot: String::new(),
                delta: String::new(),
                commands: String::new(),
                player_snapshot: None,
                player_delta: None,
                errors: None,
            },
            player_count: 0,
            player_limit: limit,
            status: MatchStatus::Running,
            error: None,
        });
        id
    }

    #[tokio::test]
    async fn register_then_list_round_trips() {
        let state = state();
        let token = service_token(&[arena_auth::scopes::NODES]);
        let response = register_node(
            State(Arc::clone(&state)),
            auth_headers(&token),
            Json(RegisterNodeRequest {
                advertise_address: "host:7350".into(),
                advertise_tls: false,
                max_containers: 8,
            }),
        )
        .await
        .expect("register");
        assert_eq!(response.0.heartbeat_interval_ms, 10_000);
        assert_eq!(response.0.ttl_ms, 30_000);

        let list = list_nodes(State(Arc::clone(&state)), auth_headers(&token))
            .await
            .expect("list");
        assert_eq!(list.0.nodes.len(), 1);
        assert_eq!(list.0.nodes[0].status, NodeStatus::Healthy);
    }

    #[tokio::test]
    async fn requests_without_scope_are_rejected() {
        let state = state();
        let token = service_token(&["arena.matches"]);
        let err = list_nodes(State(Arc::clone(&state)), auth_headers(&token))
            .await
            .expect_err("wrong scope");
        assert_eq!(err.0.kind, ErrorKind::PermissionDenied);

        let err = list_nodes(State(state), HeaderMap::new())
            .await
            .expect_err("no token");
        assert_eq!(err.0.kind, ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn join_enforces_the_player_limit_and_mints_a_bound_token() {
        let state = state();
        let id = seeded_match(&state, 2);
        let token = service_token(&[arena_auth::scopes::MATCHES]);

        for player in ["alice", "bob"] {
            let joined = join_match(
                State(Arc::clone(&state)),
                Path(id.to_string()),
                auth_headers(&token),
                Json(JoinMatchRequest {
                    player_id: player.into(),
                }),
            )
            .await
            .expect("join");
            assert!(
                joined.0.stream_urls.player_snapshot.is_some(),
                "join returns player-scoped URLs"
            );
            // The minted token binds to this match and player.
            let principal = state
                .validator
                .validate(&joined.0.match_token)
                .await
                .expect("minted token validates");
            principal
                .require_match_access("arena.streams", "c1", 1, Some(player))
                .expect("binding matches");
        }

        let err = join_match(
            State(state),
            Path(id.to_string()),
            auth_headers(&token),
            Json(JoinMatchRequest {
                player_id: "carol".into(),
            }),
        )
        .await
        .expect_err("match full");
        assert_eq!(err.0.kind, ErrorKind::CapacityExceeded);
    }

    #[tokio::test]
    async fn malformed_cluster_ids_are_invalid_arguments() {
        let state = state();
        let token = service_token(&[arena_auth::scopes::MATCHES]);
        let err = get_match(
            State(state),
            Path("not-a-cluster-id".into()),
            auth_headers(&token),
        )
        .await
        .expect_err("malformed id");
        assert_eq!(err.0.kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let state = state();
        let response = health(State(state)).await;
        assert_eq!(response.0.status, "ok");
    }
}
