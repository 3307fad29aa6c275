// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use podex_core::Result;

use crate::client::ClientConn;
use crate::pods::{PodDirectory, PodRecord, PodRegistry};
use crate::protocol::{ClientMessage, PodMessage, RpcMethod, ServerMessage};
use crate::rooms::{agent_room, session_room, terminal_room, yjs_room, RoomRegistry};
use crate::yjs::YjsState;

/// Resource guards enforced before any inbound message is routed.
#[derive(Debug, Clone)]
pub struct HubLimits {
    pub terminal_input_max_bytes: usize,
    pub disconnect_grace: Duration,
    pub rpc_timeout: Duration,
}

impl Default for HubLimits {
    fn default() -> Self {
        Self {
            terminal_input_max_bytes: 8 * 1024,
            disconnect_grace: Duration::from_secs(5),
            rpc_timeout: Duration::from_secs(30),
        }
    }
}

/// Session/workspace facts the hub needs for access checks and routing.
/// Backed by the relational store in production; tests wire stubs.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Verify a user JWT (sub/exp plus the JTI blacklist). Returns the
    /// user id for valid tokens.
    async fn verify_user(&self, token: &str) -> Result<Option<String>>;
    async fn user_owns_session(&self, user_id: &str, session_id: &str) -> Result<bool>;
    /// The owning session of a workspace, if any.
    async fn workspace_session(&self, workspace_id: &str) -> Result<Option<String>>;
    /// The pod hosting a workspace — `None` for cloud-host workspaces,
    /// whose terminals are serviced directly.
    async fn workspace_pod(&self, workspace_id: &str) -> Result<Option<String>>;
}

/// Voice frames relayed to the speech collaborators (transcription, TTS),
/// which live outside the hub.
#[derive(Debug, Clone)]
pub struct VoiceFrame {
    pub session_id: String,
    pub user_id: String,
    pub kind: VoiceFrameKind,
}

#[derive(Debug, Clone)]
pub enum VoiceFrameKind {
    StreamStart,
    /// Base64 audio payload.
    Chunk(String),
    StreamEnd,
    /// Text to synthesize.
    TtsRequest(String),
}

pub struct Hub {
    pub pods: Arc<PodRegistry>,
    rooms: Arc<RoomRegistry>,
    yjs: Arc<YjsState>,
    sessions: Arc<dyn SessionDirectory>,
    pod_directory: Arc<dyn PodDirectory>,
    voice_tx: broadcast::Sender<VoiceFrame>,
    limits: HubLimits,
}

impl Hub {
    pub fn new(
        pods: Arc<PodRegistry>,
        sessions: Arc<dyn SessionDirectory>,
        pod_directory: Arc<dyn PodDirectory>,
        yjs: Arc<YjsState>,
        limits: HubLimits,
    ) -> Self {
        let (voice_tx, _) = broadcast::channel(256);
        Self {
            pods,
            rooms: Arc::new(RoomRegistry::new()),
            yjs,
            sessions,
            pod_directory,
            voice_tx,
            limits,
        }
    }

    pub fn limits(&self) -> &HubLimits {
        &self.limits
    }

    /// Subscribe to relayed voice frames (the transcription/TTS services).
    pub fn voice_frames(&self) -> broadcast::Receiver<VoiceFrame> {
        self.voice_tx.subscribe()
    }

    // ── Pod lifecycle ─────────────────────────────────────────────────────────

    pub async fn authenticate_pod(&self, token: &str) -> Result<Option<PodRecord>> {
        self.pod_directory.verify_token(token).await
    }

    pub async fn authenticate_user(&self, token: &str) -> Result<Option<String>> {
        self.sessions.verify_user(token).await
    }

    pub async fn pod_connected(&self, record: &PodRecord) {
        if let Err(e) = self.pod_directory.set_status(&record.pod_id, true, None).await {
            warn!(pod_id = %record.pod_id, "pod status update failed: {e}");
        }
    }

    /// Generation-checked teardown; a stale reader losing to a takeover
    /// must not mark the fresh connection offline.
    pub async fn pod_disconnected(&self, pod_id: &str, generation: u64) {
        if self.pods.disconnect(pod_id, generation) {
            if let Err(e) = self.pod_directory.set_status(pod_id, false, None).await {
                warn!(%pod_id, "pod status update failed: {e}");
            }
        }
    }

    pub async fn handle_pod_message(&self, pod_id: &str, message: PodMessage) {
        match message {
            PodMessage::Capabilities {
                os,
                architecture,
                total_memory_mb,
                cpu_cores,
            } => {
                let caps = json!({
                    "os": os,
                    "architecture": architecture,
                    "total_memory_mb": total_memory_mb,
                    "cpu_cores": cpu_cores,
                });
                if let Err(e) = self.pod_directory.update_capabilities(pod_id, caps).await {
                    warn!(%pod_id, "capabilities update failed: {e}");
                }
            }
            PodMessage::Heartbeat { active_workspaces } => {
                self.pods.heartbeat(pod_id, active_workspaces);
                if let Err(e) = self
                    .pod_directory
                    .update_heartbeat(pod_id, active_workspaces)
                    .await
                {
                    warn!(%pod_id, "heartbeat persist failed: {e}");
                }
            }
            PodMessage::RpcResponse {
                call_id,
                result,
                error,
            } => {
                self.pods.handle_response(call_id, result, error);
            }
            PodMessage::WorkspaceEvent {
                workspace_id,
                event_type,
                data,
            } => {
                if let Ok(Some(session_id)) = self.sessions.workspace_session(&workspace_id).await
                {
                    self.emit_to_session(
                        &session_id,
                        ServerMessage::WorkspaceEvent {
                            workspace_id,
                            event_type,
                            data,
                        },
                    );
                } else {
                    debug!(%workspace_id, "workspace event for unmapped workspace");
                }
            }
            PodMessage::TerminalOutput { workspace_id, data } => {
                self.emit_to_terminal(&workspace_id, &data);
            }
        }
    }

    // ── Client messages ───────────────────────────────────────────────────────

    pub async fn handle_client_message(&self, client: &mut ClientConn, message: ClientMessage) {
        match message {
            ClientMessage::SessionJoin { session_id } => {
                if !self.owns(client, &session_id).await {
                    client.error(403, "not a member of this session");
                    return;
                }
                self.rooms
                    .join(&session_room(&session_id), client.client_id, client.tx.clone());
                client.sessions.insert(session_id.clone());
                self.emit_to_session(
                    &session_id,
                    ServerMessage::SessionData {
                        session_id: session_id.clone(),
                        event: "user_joined".into(),
                        data: json!({ "user_id": client.user_id }),
                    },
                );
            }
            ClientMessage::SessionLeave { session_id } => {
                self.rooms.leave(&session_room(&session_id), client.client_id);
                client.sessions.remove(&session_id);
            }
            ClientMessage::CursorUpdate {
                session_id,
                file,
                line,
                column,
            } => {
                if !client.sessions.contains(&session_id) {
                    client.error(403, "join the session first");
                    return;
                }
                self.rooms.emit(
                    &session_room(&session_id),
                    &ServerMessage::CursorData {
                        session_id,
                        user_id: client.user_id.clone(),
                        file,
                        line,
                        column,
                    },
                    Some(client.client_id),
                );
            }
            ClientMessage::FileChange {
                session_id,
                path,
                change,
            } => {
                if !client.sessions.contains(&session_id) {
                    client.error(403, "join the session first");
                    return;
                }
                self.rooms.emit(
                    &session_room(&session_id),
                    &ServerMessage::FileData {
                        session_id,
                        user_id: client.user_id.clone(),
                        path,
                        change,
                    },
                    Some(client.client_id),
                );
            }
            ClientMessage::AgentMessage {
                session_id,
                agent_id,
                content,
            } => {
                if !client.sessions.contains(&session_id) {
                    client.error(403, "join the session first");
                    return;
                }
                self.rooms.emit(
                    &agent_room(&agent_id),
                    &ServerMessage::AgentData {
                        session_id: session_id.clone(),
                        agent_id,
                        event: "user_message".into(),
                        data: json!({ "content": content, "user_id": client.user_id }),
                    },
                    None,
                );
            }

            // ── Terminals ─────────────────────────────────────────────────────
            ClientMessage::TerminalAttach { workspace_id } => {
                if !self.owns_workspace(client, &workspace_id).await {
                    client.error(403, "not your workspace");
                    return;
                }
                let room = terminal_room(&workspace_id);
                self.rooms.join(&room, client.client_id, client.tx.clone());
                client.terminals.insert(workspace_id);
            }
            ClientMessage::TerminalDetach { workspace_id } => {
                client.terminals.remove(&workspace_id);
                let room = terminal_room(&workspace_id);
                if self.rooms.leave(&room, client.client_id) {
                    self.schedule_terminal_cleanup(&workspace_id);
                }
            }
            ClientMessage::TerminalInput { workspace_id, data } => {
                if data.len() > self.limits.terminal_input_max_bytes {
                    warn!(
                        %workspace_id,
                        size = data.len(),
                        "oversized terminal input dropped"
                    );
                    client.send(ServerMessage::TerminalError {
                        workspace_id,
                        message: format!(
                            "input exceeds {} bytes",
                            self.limits.terminal_input_max_bytes
                        ),
                    });
                    return;
                }
                if !client.terminals.contains(&workspace_id) {
                    client.error(400, "terminal is not attached");
                    return;
                }
                self.forward_terminal_input(&workspace_id, &data).await;
            }

            // ── Yjs ───────────────────────────────────────────────────────────
            ClientMessage::YjsSubscribe { session_id, doc } => {
                if !self.owns(client, &session_id).await {
                    client.error(403, "not a member of this session");
                    return;
                }
                let room = yjs_room(&session_id, &doc);
                self.rooms.join(&room, client.client_id, client.tx.clone());
                client.yjs_docs.insert((session_id.clone(), doc.clone()));
                // Catch the late subscriber up, in arrival order.
                for update in self.yjs.snapshot(&session_id, &doc) {
                    client.send(ServerMessage::YjsData {
                        session_id: session_id.clone(),
                        doc: doc.clone(),
                        update: base64::engine::general_purpose::STANDARD.encode(update),
                    });
                }
            }
            ClientMessage::YjsUnsubscribe { session_id, doc } => {
                client.yjs_docs.remove(&(session_id.clone(), doc.clone()));
                let room = yjs_room(&session_id, &doc);
                if self.rooms.leave(&room, client.client_id) {
                    self.schedule_yjs_cleanup(&session_id, &doc);
                }
            }
            ClientMessage::YjsUpdate {
                session_id,
                doc,
                update,
            } => {
                if !client.yjs_docs.contains(&(session_id.clone(), doc.clone())) {
                    client.error(400, "subscribe to the doc first");
                    return;
                }
                let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(&update) else {
                    client.error(400, "yjs update is not valid base64");
                    return;
                };
                if !self.yjs.push_update(&session_id, &doc, bytes) {
                    client.error(429, "yjs buffer limits exceeded; update dropped");
                    return;
                }
                self.rooms.emit(
                    &yjs_room(&session_id, &doc),
                    &ServerMessage::YjsData {
                        session_id,
                        doc,
                        update,
                    },
                    Some(client.client_id),
                );
            }
            ClientMessage::YjsAwareness {
                session_id,
                doc,
                state,
            } => {
                self.rooms.emit(
                    &yjs_room(&session_id, &doc),
                    &ServerMessage::YjsAwarenessData {
                        session_id,
                        doc,
                        state,
                    },
                    Some(client.client_id),
                );
            }

            // ── Voice / TTS (relayed to collaborators) ────────────────────────
            ClientMessage::VoiceStreamStart { session_id } => {
                self.relay_voice(client, session_id, VoiceFrameKind::StreamStart);
            }
            ClientMessage::VoiceChunk { session_id, chunk } => {
                self.relay_voice(client, session_id, VoiceFrameKind::Chunk(chunk));
            }
            ClientMessage::VoiceStreamEnd { session_id } => {
                self.relay_voice(client, session_id, VoiceFrameKind::StreamEnd);
            }
            ClientMessage::TtsRequest { session_id, text } => {
                self.relay_voice(client, session_id, VoiceFrameKind::TtsRequest(text));
            }

            // ── Attention ─────────────────────────────────────────────────────
            ClientMessage::AgentAttentionRead {
                session_id,
                attention_id,
            }
            | ClientMessage::AgentAttentionDismiss {
                session_id,
                attention_id,
            } => {
                if !client.sessions.contains(&session_id) {
                    client.error(403, "join the session first");
                    return;
                }
                self.emit_to_session(
                    &session_id,
                    ServerMessage::SessionData {
                        session_id: session_id.clone(),
                        event: "agent_attention_update".into(),
                        data: json!({
                            "attention_id": attention_id,
                            "user_id": client.user_id,
                        }),
                    },
                );
            }
        }
    }

    /// Socket teardown: leave every room; terminal and Yjs state is freed
    /// only if nobody rejoins within the grace period.
    pub fn client_disconnected(&self, client: &ClientConn) {
        for session_id in &client.sessions {
            self.rooms.leave(&session_room(session_id), client.client_id);
        }
        for workspace_id in &client.terminals {
            if self.rooms.leave(&terminal_room(workspace_id), client.client_id) {
                self.schedule_terminal_cleanup(workspace_id);
            }
        }
        for (session_id, doc) in &client.yjs_docs {
            if self.rooms.leave(&yjs_room(session_id, doc), client.client_id) {
                self.schedule_yjs_cleanup(session_id, doc);
            }
        }
    }

    // ── Emit helpers ──────────────────────────────────────────────────────────

    pub fn emit_to_session(&self, session_id: &str, message: ServerMessage) {
        self.rooms.emit(&session_room(session_id), &message, None);
    }

    pub fn emit_to_terminal(&self, workspace_id: &str, data: &str) {
        self.rooms.emit(
            &terminal_room(workspace_id),
            &ServerMessage::TerminalData {
                workspace_id: workspace_id.to_string(),
                data: data.to_string(),
            },
            None,
        );
    }

    pub fn emit_to_agent(&self, agent_id: &str, message: ServerMessage) {
        self.rooms.emit(&agent_room(agent_id), &message, None);
    }

    pub fn emit_voice_transcription(&self, session_id: &str, text: &str, is_final: bool) {
        self.emit_to_session(
            session_id,
            ServerMessage::VoiceTranscription {
                session_id: session_id.to_string(),
                text: text.to_string(),
                is_final,
            },
        );
    }

    pub fn emit_tts_audio(&self, session_id: &str, audio_base64: &str) {
        self.emit_to_session(
            session_id,
            ServerMessage::TtsAudioReady {
                session_id: session_id.to_string(),
                audio: audio_base64.to_string(),
            },
        );
    }

    pub fn emit_agent_attention(
        &self,
        session_id: &str,
        agent_id: &str,
        attention_id: &str,
        message: &str,
    ) {
        self.emit_to_session(
            session_id,
            ServerMessage::AgentAttention {
                session_id: session_id.to_string(),
                agent_id: agent_id.to_string(),
                attention_id: attention_id.to_string(),
                message: message.to_string(),
            },
        );
    }

    pub fn emit_workspace_status(&self, session_id: &str, workspace_id: &str, status: &str) {
        self.emit_to_session(
            session_id,
            ServerMessage::WorkspaceStatus {
                workspace_id: workspace_id.to_string(),
                status: status.to_string(),
            },
        );
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn owns(&self, client: &ClientConn, session_id: &str) -> bool {
        self.sessions
            .user_owns_session(&client.user_id, session_id)
            .await
            .unwrap_or(false)
    }

    async fn owns_workspace(&self, client: &ClientConn, workspace_id: &str) -> bool {
        match self.sessions.workspace_session(workspace_id).await {
            Ok(Some(session_id)) => self.owns(client, &session_id).await,
            _ => false,
        }
    }

    async fn forward_terminal_input(&self, workspace_id: &str, data: &str) {
        match self.sessions.workspace_pod(workspace_id).await {
            Ok(Some(pod_id)) => {
                let result = self
                    .pods
                    .call_pod(
                        &pod_id,
                        RpcMethod::TerminalInput,
                        json!({ "workspace_id": workspace_id, "data": data }),
                        self.limits.rpc_timeout,
                    )
                    .await;
                if let Err(e) = result {
                    warn!(%workspace_id, %pod_id, "terminal input relay failed: {e}");
                    self.rooms.emit(
                        &terminal_room(workspace_id),
                        &ServerMessage::TerminalError {
                            workspace_id: workspace_id.to_string(),
                            message: e.to_string(),
                        },
                        None,
                    );
                }
            }
            // Cloud-host terminals are serviced by the exec attach path,
            // not the hub.
            Ok(None) => debug!(%workspace_id, "terminal input for non-pod workspace"),
            Err(e) => warn!(%workspace_id, "terminal route lookup failed: {e}"),
        }
    }

    fn relay_voice(&self, client: &ClientConn, session_id: String, kind: VoiceFrameKind) {
        if !client.sessions.contains(&session_id) {
            client.send(ServerMessage::VoiceError {
                session_id,
                message: "join the session first".into(),
            });
            return;
        }
        let _ = self.voice_tx.send(VoiceFrame {
            session_id,
            user_id: client.user_id.clone(),
            kind,
        });
    }

    fn schedule_terminal_cleanup(&self, workspace_id: &str) {
        let room = terminal_room(workspace_id);
        let rooms = self.rooms.clone();
        let workspace_id = workspace_id.to_string();
        let check_room = room.clone();
        self.rooms
            .schedule_cleanup(&room, self.limits.disconnect_grace, async move {
                if rooms.member_count(&check_room) == 0 {
                    debug!(%workspace_id, "terminal attachment state freed after grace");
                }
            });
    }

    fn schedule_yjs_cleanup(&self, session_id: &str, doc: &str) {
        let room = yjs_room(session_id, doc);
        let rooms = self.rooms.clone();
        let yjs = self.yjs.clone();
        let session_id = session_id.to_string();
        let doc = doc.to_string();
        let check_room = room.clone();
        self.rooms
            .schedule_cleanup(&room, self.limits.disconnect_grace, async move {
                if rooms.member_count(&check_room) == 0 {
                    yjs.free_doc(&session_id, &doc);
                    debug!(%session_id, %doc, "yjs replica freed after grace");
                }
            });
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pods::MemoryPodDirectory;
    use tokio::sync::mpsc;

    /// Everything owned by user "u1"; workspace "w1" belongs to session
    /// "s1" and lives on pod "pod-1".
    struct StubDirectory;

    #[async_trait]
    impl SessionDirectory for StubDirectory {
        async fn verify_user(&self, token: &str) -> Result<Option<String>> {
            Ok((token == "good-token").then(|| "u1".to_string()))
        }
        async fn user_owns_session(&self, user_id: &str, session_id: &str) -> Result<bool> {
            Ok(user_id == "u1" && session_id == "s1")
        }
        async fn workspace_session(&self, workspace_id: &str) -> Result<Option<String>> {
            Ok((workspace_id == "w1").then(|| "s1".to_string()))
        }
        async fn workspace_pod(&self, workspace_id: &str) -> Result<Option<String>> {
            Ok((workspace_id == "w1").then(|| "pod-1".to_string()))
        }
    }

    fn hub() -> Hub {
        Hub::new(
            Arc::new(PodRegistry::new()),
            Arc::new(StubDirectory),
            Arc::new(MemoryPodDirectory::new()),
            Arc::new(YjsState::new(100, 1024 * 1024)),
            HubLimits {
                terminal_input_max_bytes: 64,
                disconnect_grace: Duration::from_millis(50),
                rpc_timeout: Duration::from_millis(200),
            },
        )
    }

    fn client() -> (ClientConn, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(64);
        (ClientConn::new("u1", tx), rx)
    }

    async fn joined_client(hub: &Hub) -> (ClientConn, mpsc::Receiver<ServerMessage>) {
        let (mut c, rx) = client();
        hub.handle_client_message(
            &mut c,
            ClientMessage::SessionJoin {
                session_id: "s1".into(),
            },
        )
        .await;
        (c, rx)
    }

    #[tokio::test]
    async fn session_join_validates_ownership() {
        let hub = hub();
        let (mut c, mut rx) = client();
        hub.handle_client_message(
            &mut c,
            ClientMessage::SessionJoin {
                session_id: "someone-elses".into(),
            },
        )
        .await;
        let reply = rx.try_recv().unwrap();
        assert!(matches!(reply, ServerMessage::Error { code: 403, .. }));
        assert!(c.sessions.is_empty());
    }

    #[tokio::test]
    async fn joined_client_receives_session_events() {
        let hub = hub();
        let (_c, mut rx) = joined_client(&hub).await;
        // Drain the join broadcast.
        let _ = rx.try_recv();

        hub.emit_workspace_status("s1", "w1", "running");
        let msg = rx.try_recv().unwrap();
        assert!(matches!(msg, ServerMessage::WorkspaceStatus { .. }));
    }

    #[tokio::test]
    async fn cursor_updates_exclude_the_sender() {
        let hub = hub();
        let (mut sender, mut sender_rx) = joined_client(&hub).await;
        let (_other, mut other_rx) = joined_client(&hub).await;
        while sender_rx.try_recv().is_ok() {}
        while other_rx.try_recv().is_ok() {}

        hub.handle_client_message(
            &mut sender,
            ClientMessage::CursorUpdate {
                session_id: "s1".into(),
                file: Some("main.rs".into()),
                line: 10,
                column: 4,
            },
        )
        .await;

        assert!(matches!(
            other_rx.try_recv().unwrap(),
            ServerMessage::CursorData { line: 10, .. }
        ));
        assert!(sender_rx.try_recv().is_err(), "no echo to the sender");
    }

    #[tokio::test]
    async fn oversized_terminal_input_is_dropped_with_an_error() {
        let hub = hub();
        let (mut c, mut rx) = joined_client(&hub).await;
        let _ = rx.try_recv();
        hub.handle_client_message(
            &mut c,
            ClientMessage::TerminalAttach {
                workspace_id: "w1".into(),
            },
        )
        .await;

        hub.handle_client_message(
            &mut c,
            ClientMessage::TerminalInput {
                workspace_id: "w1".into(),
                data: "x".repeat(65),
            },
        )
        .await;
        let reply = rx.try_recv().unwrap();
        assert!(matches!(reply, ServerMessage::TerminalError { .. }));
    }

    #[tokio::test]
    async fn terminal_attach_requires_workspace_ownership() {
        let hub = hub();
        let (mut c, mut rx) = joined_client(&hub).await;
        let _ = rx.try_recv();
        hub.handle_client_message(
            &mut c,
            ClientMessage::TerminalAttach {
                workspace_id: "not-mine".into(),
            },
        )
        .await;
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::Error { code: 403, .. }
        ));
    }

    #[tokio::test]
    async fn yjs_updates_fan_out_and_late_subscribers_catch_up() {
        let hub = hub();
        let (mut writer, _writer_rx) = joined_client(&hub).await;
        hub.handle_client_message(
            &mut writer,
            ClientMessage::YjsSubscribe {
                session_id: "s1".into(),
                doc: "notes".into(),
            },
        )
        .await;

        let payload = base64::engine::general_purpose::STANDARD.encode(b"crdt-update");
        hub.handle_client_message(
            &mut writer,
            ClientMessage::YjsUpdate {
                session_id: "s1".into(),
                doc: "notes".into(),
                update: payload.clone(),
            },
        )
        .await;

        // A late subscriber receives the buffered update on subscribe.
        let (mut late, mut late_rx) = joined_client(&hub).await;
        let _ = late_rx.try_recv();
        hub.handle_client_message(
            &mut late,
            ClientMessage::YjsSubscribe {
                session_id: "s1".into(),
                doc: "notes".into(),
            },
        )
        .await;
        let caught_up = late_rx.try_recv().unwrap();
        assert!(
            matches!(caught_up, ServerMessage::YjsData { update, .. } if update == payload)
        );
    }

    #[tokio::test]
    async fn yjs_update_without_subscription_is_rejected() {
        let hub = hub();
        let (mut c, mut rx) = joined_client(&hub).await;
        let _ = rx.try_recv();
        hub.handle_client_message(
            &mut c,
            ClientMessage::YjsUpdate {
                session_id: "s1".into(),
                doc: "notes".into(),
                update: "AAAA".into(),
            },
        )
        .await;
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::Error { code: 400, .. }
        ));
    }

    #[tokio::test]
    async fn yjs_replica_is_freed_after_grace_without_rejoin() {
        let hub = hub();
        let (mut c, _rx) = joined_client(&hub).await;
        hub.handle_client_message(
            &mut c,
            ClientMessage::YjsSubscribe {
                session_id: "s1".into(),
                doc: "notes".into(),
            },
        )
        .await;
        let payload = base64::engine::general_purpose::STANDARD.encode(b"data");
        hub.handle_client_message(
            &mut c,
            ClientMessage::YjsUpdate {
                session_id: "s1".into(),
                doc: "notes".into(),
                update: payload,
            },
        )
        .await;

        hub.client_disconnected(&c);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hub.yjs.session_bytes("s1"), 0, "replica freed after grace");
    }

    #[tokio::test]
    async fn voice_frames_reach_the_collaborator_channel() {
        let hub = hub();
        let mut frames = hub.voice_frames();
        let (mut c, _rx) = joined_client(&hub).await;
        hub.handle_client_message(
            &mut c,
            ClientMessage::VoiceStreamStart {
                session_id: "s1".into(),
            },
        )
        .await;
        let frame = frames.try_recv().unwrap();
        assert!(matches!(frame.kind, VoiceFrameKind::StreamStart));
        assert_eq!(frame.session_id, "s1");
    }

    #[tokio::test]
    async fn pod_terminal_output_reaches_attached_clients() {
        let hub = hub();
        let (mut c, mut rx) = joined_client(&hub).await;
        let _ = rx.try_recv();
        hub.handle_client_message(
            &mut c,
            ClientMessage::TerminalAttach {
                workspace_id: "w1".into(),
            },
        )
        .await;

        hub.handle_pod_message(
            "pod-1",
            PodMessage::TerminalOutput {
                workspace_id: "w1".into(),
                data: "$ ls\n".into(),
            },
        )
        .await;
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::TerminalData { data, .. } if data == "$ ls\n"
        ));
    }

    #[tokio::test]
    async fn pod_workspace_events_are_forwarded_to_the_owning_session() {
        let hub = hub();
        let (_c, mut rx) = joined_client(&hub).await;
        let _ = rx.try_recv();

        hub.handle_pod_message(
            "pod-1",
            PodMessage::WorkspaceEvent {
                workspace_id: "w1".into(),
                event_type: "build_finished".into(),
                data: json!({"ok": true}),
            },
        )
        .await;
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::WorkspaceEvent { event_type, .. } if event_type == "build_finished"
        ));
    }
}
