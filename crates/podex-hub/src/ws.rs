// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! WebSocket endpoints — thin shims between axum sockets and the [`Hub`].
//!
//! # Wire format
//!
//! JSON over WebSocket text frames, comfortable for browsers and for pod
//! agents alike. Authentication happens *before* the upgrade: a bad
//! credential is refused at the handshake with 401, never after.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, info, warn};

use crate::client::ClientConn;
use crate::hub::Hub;
use crate::pods::PodRecord;
use crate::protocol::{ClientMessage, PodMessage, ServerMessage};

#[derive(Clone)]
pub struct WsState {
    pub hub: Arc<Hub>,
}

fn bearer_or_query<'a>(
    headers: &'a HeaderMap,
    params: &'a HashMap<String, String>,
) -> Option<&'a str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| params.get("token").map(String::as_str))
}

// ── Pod endpoint (`GET /ws/pod`) ─────────────────────────────────────────────

pub async fn pod_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(token) = bearer_or_query(&headers, &params) else {
        warn!("pod connection without token refused");
        return (StatusCode::UNAUTHORIZED, "missing pod token").into_response();
    };
    let record = match state.hub.authenticate_pod(token).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!("pod connection with invalid token refused");
            return (StatusCode::UNAUTHORIZED, "invalid pod token").into_response();
        }
        Err(e) => {
            warn!("pod auth backend failure: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "auth unavailable").into_response();
        }
    };
    ws.on_upgrade(move |socket| run_pod_socket(state.hub, record, socket))
}

async fn run_pod_socket(hub: Arc<Hub>, record: PodRecord, mut socket: WebSocket) {
    let pod_id = record.pod_id.clone();
    let (mut commands, takeover, generation) = hub.pods.register(&pod_id);
    hub.pod_connected(&record).await;
    info!(%pod_id, name = %record.name, "pod socket open");

    loop {
        tokio::select! {
            // A newer connection for the same pod id took over.
            _ = takeover.cancelled() => {
                debug!(%pod_id, "pod socket superseded");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            // Outbound RPC requests toward the pod.
            command = commands.recv() => {
                let Some(command) = command else { break };
                match serde_json::to_string(&command) {
                    Ok(frame) => {
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%pod_id, "unserializable pod command: {e}"),
                }
            }
            // Inbound pushes from the pod.
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<PodMessage>(&text) {
                            Ok(message) => hub.handle_pod_message(&pod_id, message).await,
                            Err(e) => warn!(%pod_id, "invalid pod frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary frames ignored
                    Some(Err(e)) => {
                        debug!(%pod_id, "pod socket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    hub.pod_disconnected(&pod_id, generation).await;
    info!(%pod_id, "pod socket closed");
}

// ── Session endpoint (`GET /ws/session`) ─────────────────────────────────────

pub async fn session_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(token) = bearer_or_query(&headers, &params) else {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    };
    let user_id = match state.hub.authenticate_user(token).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid token").into_response(),
        Err(e) => {
            warn!("user auth backend failure: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "auth unavailable").into_response();
        }
    };
    ws.on_upgrade(move |socket| run_client_socket(state.hub, user_id, socket))
}

async fn run_client_socket(hub: Arc<Hub>, user_id: String, mut socket: WebSocket) {
    let (tx, mut outbound) = tokio::sync::mpsc::channel::<ServerMessage>(256);
    let mut client = ClientConn::new(user_id, tx);
    info!(client_id = %client.client_id, user_id = %client.user_id, "client socket open");

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else { break };
                match serde_json::to_string(&message) {
                    Ok(frame) => {
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("unserializable server message: {e}"),
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                hub.handle_client_message(&mut client, message).await;
                            }
                            Err(e) => {
                                client.error(400, format!("invalid message: {e}"));
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary frames ignored
                    Some(Err(e)) => {
                        debug!(client_id = %client.client_id, "client socket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    hub.client_disconnected(&client);
    info!(client_id = %client.client_id, "client socket closed");
}
