// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Node container HTTP API.
//!
//! The control plane (and operators, possibly through the control-plane
//! proxy) drive containers here: lifecycle, manual ticks, the periodic
//! tick scheduler, matches, command submission, and stats. All routes
//! demand the container-management scope except `/api/health`.

use std::sync::Arc;

use arena_auth::extract::token_from_headers;
use arena_auth::{scopes, AuthError, Principal};
use arena_core::command::QueuedCommand;
use arena_core::CoreError;
use arena_proto::dto::{
    CommandInfo, ContainerStatsResponse, CreateContainerRequest, CreateContainerResponse,
    CreateLocalMatchRequest, CreateLocalMatchResponse, HealthResponse, SubmitCommandRequest,
    TickResponse,
};
use arena_proto::ErrorBody;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::state::NodeState;
use crate::ws;

/// Shared state handle.
pub type SharedState = Arc<NodeState>;

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

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err.to_body())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err.to_body())
    }
}

/// Builds the node router (HTTP API plus streaming endpoints).
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/containers", post(create_container))
        .route(
            "/api/containers/{cid}",
            axum::routing::delete(delete_container),
        )
        .route("/api/containers/{cid}/start", post(start_container))
        .route("/api/containers/{cid}/stop", post(stop_container))
        .route("/api/containers/{cid}/pause", post(pause_container))
        .route("/api/containers/{cid}/resume", post(resume_container))
        .route("/api/containers/{cid}/tick", post(tick_container))
        .route("/api/containers/{cid}/play", post(play_container))
        .route("/api/containers/{cid}/stop-auto", post(stop_auto))
        .route("/api/containers/{cid}/stats", get(container_stats))
        .route("/api/containers/{cid}/matches", post(create_match))
        .route(
            "/api/containers/{cid}/matches/{mid}",
            axum::routing::delete(delete_match),
        )
        .route(
            "/api/containers/{cid}/commands",
            post(submit_command).get(list_commands),
        )
        .merge(ws::router())
        .with_state(state)
}

pub(crate) async fn authenticate(
    state: &NodeState,
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

pub(crate) fn lookup(
    state: &NodeState,
    container_id: &str,
) -> Result<Arc<arena_core::Container>, ApiError> {
    state
        .container(container_id)
        .ok_or_else(|| CoreError::ContainerNotFound(container_id.to_owned()).into())
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
        uptime_ms: state.started_at.elapsed().as_millis() as u64,
        container_count: Some(state.containers.len()),
    })
}

async fn create_container(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<CreateContainerRequest>,
) -> Result<Json<CreateContainerResponse>, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    let container_id = state.create_container(&request.modules)?;
    Ok(Json(CreateContainerResponse { container_id }))
}

async fn delete_container(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    state.delete_container(&cid)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_container(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    lookup(&state, &cid)?.start()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_container(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    lookup(&state, &cid)?.stop()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pause_container(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    lookup(&state, &cid)?.pause()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume_container(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    lookup(&state, &cid)?.resume()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn tick_container(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TickResponse>, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    let tick = lookup(&state, &cid)?.advance()?;
    Ok(Json(TickResponse { tick }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayParams {
    interval_ms: Option<u64>,
}

async fn play_container(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    Query(params): Query<PlayParams>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    let interval = params.interval_ms.unwrap_or(50);
    lookup(&state, &cid)?.play(interval)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_auto(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    lookup(&state, &cid)?.stop_auto();
    Ok(StatusCode::NO_CONTENT)
}

async fn container_stats(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ContainerStatsResponse>, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    Ok(Json(lookup(&state, &cid)?.stats()))
}

async fn create_match(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CreateLocalMatchRequest>,
) -> Result<Json<CreateLocalMatchResponse>, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    let match_id = lookup(&state, &cid)?.create_match(&request.modules, request.player_limit)?;
    Ok(Json(CreateLocalMatchResponse { match_id }))
}

async fn delete_match(
    State(state): State<SharedState>,
    Path((cid, mid)): Path<(String, u64)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    lookup(&state, &cid)?.delete_match(mid)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_command(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SubmitCommandRequest>,
) -> Result<StatusCode, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    lookup(&state, &cid)?.submit_command(QueuedCommand {
        name: request.command_name,
        match_id: request.match_id,
        parameters: request.parameters,
        player: None,
    })?;
    Ok(StatusCode::ACCEPTED)
}

async fn list_commands(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<CommandInfo>>, ApiError> {
    authenticate(&state, &headers, scopes::CONTAINERS).await?;
    Ok(Json(lookup(&state, &cid)?.command_infos()))
}

#[cfg(test)]
mod tests {
    use arena_auth::{Claims, KeyMaterial, TokenValidator, ValidationMode};
    use arena_config::sections::{EngineConfig, NodeServiceConfig};
    use arena_proto::ErrorKind;
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    const SECRET: &[u8] = b"node-test-secret";

    fn token(scopes: &[&str]) -> String {
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
        NodeState::new(
            crate::default_library(),
            EngineConfig::default(),
            NodeServiceConfig::default(),
            Arc::new(
                TokenValidator::new(ValidationMode::Local(KeyMaterial::HmacSecret(
                    SECRET.to_vec(),
                )))
                .expect("validator"),
            ),
        )
    }

    #[tokio::test]
    async fn container_lifecycle_over_http() {
        let state = state();
        let token = token(&[arena_auth::scopes::CONTAINERS]);

        let created = create_container(
            State(Arc::clone(&state)),
            auth_headers(&token),
            Json(CreateContainerRequest { modules: vec![] }),
        )
        .await
        .expect("create");
        let cid = created.0.container_id;

        start_container(
            State(Arc::clone(&state)),
            Path(cid.clone()),
            auth_headers(&token),
        )
        .await
        .expect("start");

        let ticked = tick_container(
            State(Arc::clone(&state)),
            Path(cid.clone()),
            auth_headers(&token),
        )
        .await
        .expect("tick");
        assert_eq!(ticked.0.tick, 1);

        let stats = container_stats(
            State(Arc::clone(&state)),
            Path(cid.clone()),
            auth_headers(&token),
        )
        .await
        .expect("stats");
        assert_eq!(stats.0.tick, 1);
        assert_eq!(stats.0.state, "running");

        let deleted = delete_container(State(state), Path(cid), auth_headers(&token))
            .await
            .expect("delete");
        assert_eq!(deleted, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn missing_token_and_missing_container_map_to_the_taxonomy() {
        let state = state();
        let err = tick_container(
            State(Arc::clone(&state)),
            Path("nope".into()),
            HeaderMap::new(),
        )
        .await
        .expect_err("no token");
        assert_eq!(err.0.kind, ErrorKind::Unauthenticated);

        let token = token(&[arena_auth::scopes::CONTAINERS]);
        let err = tick_container(State(state), Path("nope".into()), auth_headers(&token))
            .await
            .expect_err("missing container");
        assert_eq!(err.0.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn match_creation_rejects_unknown_modules() {
        let state = state();
        let token = token(&[arena_auth::scopes::CONTAINERS]);
        let created = create_container(
            State(Arc::clone(&state)),
            auth_headers(&token),
            Json(CreateContainerRequest { modules: vec![] }),
        )
        .await
        .expect("create");

        let err = create_match(
            State(state),
            Path(created.0.container_id),
            auth_headers(&token),
            Json(CreateLocalMatchRequest {
                modules: vec!["ghost:1.0".into()],
                player_limit: None,
            }),
        )
        .await
        .expect_err("unknown module");
        assert_eq!(err.0.kind, ErrorKind::NotFound);
    }
}
