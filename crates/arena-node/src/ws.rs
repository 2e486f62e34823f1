// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Streaming WebSocket endpoints.
//!
//! Every subscription runs its own emission loop: on the broadcast
//! interval it derives the current snapshot and sends either a full
//! snapshot or a cumulative delta from the client's last-acknowledged
//! base. Emissions are monotonic in `toTick`; missed ticks coalesce
//! because deltas are computed against the last *emitted* snapshot. A
//! client `reset` frame forces the next emission to be a full snapshot.
//!
//! Authentication happens before the upgrade: bearer tokens arrive via
//! the `Bearer.<token>` subprotocol (echoed back when used) or the
//! `?token=` query fallback. Match tokens must be bound to the addressed
//! container, match, and player.

use std::sync::Arc;
use std::time::Duration;

use arena_auth::extract::token_from_ws;
use arena_auth::{scopes, AuthError, MatchBinding, Principal};
use arena_core::command::{PlayerRef, QueuedCommand};
use arena_core::{delta, Container, CoreError};
use arena_proto::wire::SnapshotWire;
use arena_proto::{ClientFrame, ErrorBody, ErrorKind, ServerFrame};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::http::{lookup, ApiError, SharedState};
use crate::state::{ErrorRouter, StreamSlot};

/// Streaming routes, merged into the node router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route(
            "/ws/containers/{cid}/matches/{mid}/snapshot",
            get(match_snapshot_ws),
        )
        .route(
            "/ws/containers/{cid}/matches/{mid}/delta",
            get(match_delta_ws),
        )
        .route(
            "/ws/containers/{cid}/matches/{mid}/players/{pid}/snapshot",
            get(player_snapshot_ws),
        )
        .route(
            "/ws/containers/{cid}/matches/{mid}/players/{pid}/delta",
            get(player_delta_ws),
        )
        .route("/ws/matches/{mid}/players/{pid}/errors", get(error_stream_ws))
        .route("/containers/{cid}/commands", get(commands_ws))
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

struct WsAuth {
    principal: Principal,
    protocol: Option<String>,
}

async fn ws_authenticate(
    state: &SharedState,
    headers: &HeaderMap,
    query_token: Option<String>,
) -> Result<WsAuth, ApiError> {
    let protocols = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok());
    let (token, protocol) =
        token_from_ws(protocols, query_token.as_deref()).ok_or(AuthError::MissingToken)?;
    let principal = state.validator.validate(&token).await?;
    Ok(WsAuth {
        principal,
        protocol,
    })
}

fn acquire_slot(state: &SharedState, cid: &str, subject: &str) -> Result<StreamSlot, ApiError> {
    state
        .streams
        .acquire(
            cid,
            subject,
            state.config.max_streams_per_container,
            state.config.max_streams_per_user,
        )
        .ok_or_else(|| {
            ApiError(ErrorBody::new(
                ErrorKind::CapacityExceeded,
                "stream limit reached",
            ))
        })
}

fn accept(upgrade: WebSocketUpgrade, protocol: Option<String>) -> WebSocketUpgrade {
    match protocol {
        Some(protocol) => upgrade.protocols([protocol]),
        None => upgrade,
    }
}

/// What a stream emits each interval.
enum StreamMode {
    /// Full snapshots of the match.
    Snapshot,
    /// Cumulative deltas of the match.
    Delta,
    /// Full snapshots filtered to one player's entities.
    PlayerSnapshot(String),
    /// Cumulative deltas filtered to one player's entities.
    PlayerDelta(String),
}

async fn match_snapshot_ws(
    State(state): State<SharedState>,
    Path((cid, mid)): Path<(String, u64)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    subscribe_stream(state, cid, mid, None, StreamMode::Snapshot, query, headers, ws).await
}

async fn match_delta_ws(
    State(state): State<SharedState>,
    Path((cid, mid)): Path<(String, u64)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    subscribe_stream(state, cid, mid, None, StreamMode::Delta, query, headers, ws).await
}

async fn player_snapshot_ws(
    State(state): State<SharedState>,
    Path((cid, mid, pid)): Path<(String, u64, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let mode = StreamMode::PlayerSnapshot(pid.clone());
    subscribe_stream(state, cid, mid, Some(pid), mode, query, headers, ws).await
}

async fn player_delta_ws(
    State(state): State<SharedState>,
    Path((cid, mid, pid)): Path<(String, u64, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let mode = StreamMode::PlayerDelta(pid.clone());
    subscribe_stream(state, cid, mid, Some(pid), mode, query, headers, ws).await
}

#[allow(clippy::too_many_arguments)]
async fn subscribe_stream(
    state: SharedState,
    cid: String,
    mid: u64,
    pid: Option<String>,
    mode: StreamMode,
    query: TokenQuery,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let auth = ws_authenticate(&state, &headers, query.token).await?;
    auth.principal
        .require_match_access(scopes::STREAMS, &cid, mid, pid.as_deref())?;
    let container = lookup(&state, &cid)?;
    if !container.match_exists(mid) {
        return Err(CoreError::MatchNotFound(mid).into());
    }
    let slot = acquire_slot(&state, &cid, &auth.principal.subject)?;
    let interval = state.config.broadcast_interval_ms;
    Ok(accept(ws, auth.protocol).on_upgrade(move |socket| {
        stream_task(socket, container, mode, mid, interval, slot)
    }))
}

type WsSink = SplitSink<WebSocket, Message>;

async fn send_frame(sink: &mut WsSink, frame: &ServerFrame) -> Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(text) => sink.send(Message::Text(text.into())).await,
        Err(err) => {
            debug!(%err, "frame serialization failed");
            Ok(())
        }
    }
}

/// Computes the next frame for a subscription, advancing `last` only
/// when something is emitted (so skipped intervals coalesce into the
/// next delta).
fn next_frame(
    container: &Container,
    mode: &StreamMode,
    match_id: u64,
    last: &mut Option<SnapshotWire>,
) -> Result<Option<ServerFrame>, ErrorBody> {
    let current: SnapshotWire = match mode {
        StreamMode::Snapshot | StreamMode::Delta => container
            .match_snapshot(match_id)
            .map(|snap| (*snap).clone())
            .map_err(|e| e.to_body())?,
        StreamMode::PlayerSnapshot(pid) | StreamMode::PlayerDelta(pid) => container
            .player_snapshot(match_id, pid)
            .map_err(|e| e.to_body())?,
    };

    let Some(base) = last.as_ref() else {
        // First frame (or post-reset): always a full snapshot.
        let frame = ServerFrame::Snapshot(current.clone());
        *last = Some(current);
        return Ok(Some(frame));
    };
    if current.tick <= base.tick {
        return Ok(None);
    }

    match mode {
        StreamMode::Snapshot | StreamMode::PlayerSnapshot(_) => {
            let frame = ServerFrame::Snapshot(current.clone());
            *last = Some(current);
            Ok(Some(frame))
        }
        StreamMode::Delta | StreamMode::PlayerDelta(_) => {
            let diff = delta::compute(Some(base), &current);
            if diff.is_empty() {
                // Nothing changed; keep the base so later changes since
                // the client's actual state stay included.
                return Ok(None);
            }
            *last = Some(current);
            Ok(Some(ServerFrame::Delta(diff)))
        }
    }
}

async fn stream_task(
    socket: WebSocket,
    container: Arc<Container>,
    mode: StreamMode,
    match_id: u64,
    interval_ms: u64,
    _slot: StreamSlot,
) {
    let (mut sink, mut incoming) = socket.split();
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last: Option<SnapshotWire> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match next_frame(&container, &mode, match_id, &mut last) {
                    Ok(Some(frame)) => {
                        if send_frame(&mut sink, &frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(body) => {
                        // Match deleted or container stopped: tell the
                        // client why, then drop the subscription.
                        let _ = send_frame(&mut sink, &ServerFrame::Error(body)).await;
                        break;
                    }
                }
            }
            message = incoming.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if matches!(
                            serde_json::from_str::<ClientFrame>(&text),
                            Ok(ClientFrame::Reset)
                        ) {
                            last = None;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!(match_id, "stream closed");
}

async fn commands_ws(
    State(state): State<SharedState>,
    Path(cid): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let auth = ws_authenticate(&state, &headers, query.token).await?;
    let binding = match &auth.principal.binding {
        Some(binding) => {
            if binding.match_id.container_id != cid {
                return Err(AuthError::WrongBinding.into());
            }
            Some(binding.clone())
        }
        None => {
            auth.principal.require_scope(scopes::CONTAINERS)?;
            None
        }
    };
    let container = lookup(&state, &cid)?;
    let slot = acquire_slot(&state, &cid, &auth.principal.subject)?;
    Ok(accept(ws, auth.protocol)
        .on_upgrade(move |socket| command_task(socket, container, binding, slot)))
}

async fn command_task(
    socket: WebSocket,
    container: Arc<Container>,
    binding: Option<MatchBinding>,
    _slot: StreamSlot,
) {
    let (mut sink, mut incoming) = socket.split();
    while let Some(message) = incoming.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(err) => {
                let body = ErrorBody::new(ErrorKind::InvalidArgument, err.to_string());
                if send_frame(&mut sink, &ServerFrame::Error(body)).await.is_err() {
                    break;
                }
                continue;
            }
        };
        let ClientFrame::Command {
            command_name,
            match_id,
            parameters,
        } = frame
        else {
            continue;
        };

        // Match tokens may only command their own match.
        let (match_id, player) = match &binding {
            Some(binding) => {
                let bound = binding.match_id.local_match_id;
                let target = match_id.unwrap_or(bound);
                if target != bound {
                    let body = AuthError::WrongBinding.to_body();
                    if send_frame(&mut sink, &ServerFrame::Error(body)).await.is_err() {
                        break;
                    }
                    continue;
                }
                (
                    Some(target),
                    Some(PlayerRef {
                        match_id: target,
                        player_id: binding.player_id.clone(),
                    }),
                )
            }
            None => (match_id, None),
        };

        let submitted = container.submit_command(QueuedCommand {
            name: command_name,
            match_id,
            parameters,
            player,
        });
        if let Err(err) = submitted {
            if send_frame(&mut sink, &ServerFrame::Error(err.to_body()))
                .await
                .is_err()
            {
                break;
            }
        }
    }
}

async fn error_stream_ws(
    State(state): State<SharedState>,
    Path((mid, pid)): Path<(u64, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let auth = ws_authenticate(&state, &headers, query.token).await?;
    match &auth.principal.binding {
        Some(binding) => {
            if binding.match_id.local_match_id != mid || binding.player_id != pid {
                return Err(AuthError::WrongBinding.into());
            }
        }
        None => auth.principal.require_scope(scopes::STREAMS)?,
    }
    let errors = Arc::clone(&state.errors);
    let (subscription_id, receiver) = errors.subscribe(mid, &pid);
    Ok(accept(ws, auth.protocol).on_upgrade(move |socket| {
        error_task(socket, errors, receiver, subscription_id, mid, pid)
    }))
}

async fn error_task(
    socket: WebSocket,
    router: Arc<ErrorRouter>,
    mut receiver: mpsc::Receiver<ErrorBody>,
    subscription_id: u64,
    match_id: u64,
    player_id: String,
) {
    let (mut sink, mut incoming) = socket.split();
    loop {
        tokio::select! {
            error = receiver.recv() => {
                match error {
                    Some(body) => {
                        if send_frame(&mut sink, &ServerFrame::Error(body)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            message = incoming.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    router.unsubscribe(match_id, &player_id, subscription_id);
}

#[cfg(test)]
mod tests {
    use arena_core::container::ContainerConfig;
    use arena_core::ModuleLibrary;

    use super::*;

    fn running_container() -> Arc<Container> {
        let container = Container::new(
            "c-ws",
            ContainerConfig::default(),
            Arc::new(ModuleLibrary::new()),
            &[],
            None,
        )
        .expect("container");
        container.start().expect("start");
        container
    }

    #[test]
    fn first_frame_is_always_a_full_snapshot() {
        let container = running_container();
        let mid = container.create_match(&[], None).expect("match");
        container.advance().expect("tick");

        let mut last = None;
        let frame = next_frame(&container, &StreamMode::Delta, mid, &mut last)
            .expect("frame")
            .expect("emitted");
        assert!(matches!(frame, ServerFrame::Snapshot(_)), "full first");
        assert!(last.is_some(), "base recorded after emission");
    }

    #[test]
    fn unchanged_ticks_emit_nothing_and_keep_the_base() {
        let container = running_container();
        let mid = container.create_match(&[], None).expect("match");
        container.advance().expect("tick");

        let mut last = None;
        let _ = next_frame(&container, &StreamMode::Delta, mid, &mut last).expect("first");
        let base_tick = last.as_ref().map(|s| s.tick);

        let second = next_frame(&container, &StreamMode::Delta, mid, &mut last).expect("second");
        assert!(second.is_none(), "no change, no emission");
        assert_eq!(
            last.as_ref().map(|s| s.tick),
            base_tick,
            "base is only advanced on emission"
        );
    }

    #[test]
    fn reset_semantics_reissue_a_full_snapshot() {
        let container = running_container();
        let mid = container.create_match(&[], None).expect("match");
        container.advance().expect("tick");

        let mut last = None;
        let _ = next_frame(&container, &StreamMode::Snapshot, mid, &mut last).expect("first");
        // Client sent `reset`: the task clears its base.
        last = None;
        let frame = next_frame(&container, &StreamMode::Snapshot, mid, &mut last)
            .expect("frame")
            .expect("emitted");
        assert!(matches!(frame, ServerFrame::Snapshot(_)));
    }

    #[test]
    fn deleted_match_surfaces_an_error_frame() {
        let container = running_container();
        let mid = container.create_match(&[], None).expect("match");
        let mut last = None;
        let _ = next_frame(&container, &StreamMode::Snapshot, mid, &mut last);
        container.delete_match(mid).expect("delete");
        let err = next_frame(&container, &StreamMode::Snapshot, mid, &mut last)
            .expect_err("match is gone");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
