// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Wire protocol for the hub's WebSocket endpoints.
//!
//! All frames are JSON text, internally tagged on `type` — comfortable for
//! browsers and for pod agents in any language. Three vocabularies:
//! pod→coordinator pushes, coordinator→pod requests, and the
//! client↔coordinator session events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ── Pod → coordinator ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PodMessage {
    /// Sent once after connect.
    Capabilities {
        #[serde(default)]
        os: Option<String>,
        #[serde(default)]
        architecture: Option<String>,
        #[serde(default)]
        total_memory_mb: Option<u64>,
        #[serde(default)]
        cpu_cores: Option<f64>,
    },
    /// Every 30 s, carrying the live workspace count.
    Heartbeat {
        #[serde(default)]
        active_workspaces: u32,
    },
    /// Reply to an earlier `rpc_request`.
    RpcResponse {
        call_id: Uuid,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Unsolicited workspace status/progress events.
    WorkspaceEvent {
        workspace_id: String,
        event_type: String,
        #[serde(default)]
        data: Value,
    },
    /// Terminal output stream for an attached terminal.
    TerminalOutput {
        workspace_id: String,
        data: String,
    },
}

// ── Coordinator → pod ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PodCommand {
    RpcRequest {
        call_id: Uuid,
        method: RpcMethod,
        params: Value,
    },
}

/// The verbs a pod implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcMethod {
    CreateWorkspace,
    StopWorkspace,
    DeleteWorkspace,
    UpdateWorkspace,
    ListWorkspaces,
    ExecCommand,
    ReadFile,
    WriteFile,
    ListFiles,
    TerminalCreate,
    TerminalInput,
    TerminalResize,
    TerminalClose,
    ListPorts,
    HttpProxy,
    TunnelStart,
    TunnelStop,
    TunnelStatus,
    BrowseHost,
    HealthCheck,
}

impl RpcMethod {
    /// Parse the wire name (used by [`PodRegistry::call_pod`] callers that
    /// carry methods as strings, e.g. the docker proxy backend).
    pub fn parse(name: &str) -> Option<Self> {
        serde_json::from_value(Value::String(name.to_string())).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::CreateWorkspace => "create_workspace",
            RpcMethod::StopWorkspace => "stop_workspace",
            RpcMethod::DeleteWorkspace => "delete_workspace",
            RpcMethod::UpdateWorkspace => "update_workspace",
            RpcMethod::ListWorkspaces => "list_workspaces",
            RpcMethod::ExecCommand => "exec_command",
            RpcMethod::ReadFile => "read_file",
            RpcMethod::WriteFile => "write_file",
            RpcMethod::ListFiles => "list_files",
            RpcMethod::TerminalCreate => "terminal_create",
            RpcMethod::TerminalInput => "terminal_input",
            RpcMethod::TerminalResize => "terminal_resize",
            RpcMethod::TerminalClose => "terminal_close",
            RpcMethod::ListPorts => "list_ports",
            RpcMethod::HttpProxy => "http_proxy",
            RpcMethod::TunnelStart => "tunnel_start",
            RpcMethod::TunnelStop => "tunnel_stop",
            RpcMethod::TunnelStatus => "tunnel_status",
            RpcMethod::BrowseHost => "browse_host",
            RpcMethod::HealthCheck => "health_check",
        }
    }
}

// ── Client → coordinator ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SessionJoin {
        session_id: String,
    },
    SessionLeave {
        session_id: String,
    },
    CursorUpdate {
        session_id: String,
        #[serde(default)]
        file: Option<String>,
        line: u32,
        column: u32,
    },
    FileChange {
        session_id: String,
        path: String,
        #[serde(default)]
        change: Value,
    },
    AgentMessage {
        session_id: String,
        agent_id: String,
        content: String,
    },
    TerminalAttach {
        workspace_id: String,
    },
    TerminalDetach {
        workspace_id: String,
    },
    TerminalInput {
        workspace_id: String,
        data: String,
    },
    YjsSubscribe {
        session_id: String,
        doc: String,
    },
    YjsUnsubscribe {
        session_id: String,
        doc: String,
    },
    YjsUpdate {
        session_id: String,
        doc: String,
        /// Base64-encoded CRDT update.
        update: String,
    },
    YjsAwareness {
        session_id: String,
        doc: String,
        #[serde(default)]
        state: Value,
    },
    VoiceStreamStart {
        session_id: String,
    },
    VoiceChunk {
        session_id: String,
        /// Base64-encoded audio.
        chunk: String,
    },
    VoiceStreamEnd {
        session_id: String,
    },
    TtsRequest {
        session_id: String,
        text: String,
    },
    AgentAttentionRead {
        session_id: String,
        attention_id: String,
    },
    AgentAttentionDismiss {
        session_id: String,
        attention_id: String,
    },
}

// ── Coordinator → client ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Error {
        code: u16,
        message: String,
    },
    SessionData {
        session_id: String,
        event: String,
        #[serde(default)]
        data: Value,
    },
    CursorData {
        session_id: String,
        user_id: String,
        #[serde(default)]
        file: Option<String>,
        line: u32,
        column: u32,
    },
    FileData {
        session_id: String,
        user_id: String,
        path: String,
        #[serde(default)]
        change: Value,
    },
    AgentData {
        session_id: String,
        agent_id: String,
        event: String,
        #[serde(default)]
        data: Value,
    },
    TerminalData {
        workspace_id: String,
        data: String,
    },
    TerminalError {
        workspace_id: String,
        message: String,
    },
    YjsData {
        session_id: String,
        doc: String,
        update: String,
    },
    YjsAwarenessData {
        session_id: String,
        doc: String,
        #[serde(default)]
        state: Value,
    },
    VoiceTranscription {
        session_id: String,
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    VoiceError {
        session_id: String,
        message: String,
    },
    TtsAudioReady {
        session_id: String,
        /// Base64-encoded audio.
        audio: String,
    },
    AgentAttention {
        session_id: String,
        agent_id: String,
        attention_id: String,
        message: String,
    },
    WorkspaceStatus {
        workspace_id: String,
        status: String,
    },
    WorkspaceEvent {
        workspace_id: String,
        event_type: String,
        #[serde(default)]
        data: Value,
    },
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_messages_are_tagged_snake_case() {
        let msg: PodMessage =
            serde_json::from_str(r#"{"type": "heartbeat", "active_workspaces": 3}"#).unwrap();
        assert!(matches!(msg, PodMessage::Heartbeat { active_workspaces: 3 }));
    }

    #[test]
    fn rpc_request_round_trips() {
        let call_id = Uuid::new_v4();
        let cmd = PodCommand::RpcRequest {
            call_id,
            method: RpcMethod::ExecCommand,
            params: serde_json::json!({"command": "ls"}),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"method\":\"exec_command\""));
        let back: PodCommand = serde_json::from_str(&json).unwrap();
        let PodCommand::RpcRequest { call_id: cid, method, .. } = back;
        assert_eq!(cid, call_id);
        assert_eq!(method, RpcMethod::ExecCommand);
    }

    #[test]
    fn rpc_method_parse_matches_wire_names() {
        assert_eq!(
            RpcMethod::parse("terminal_resize"),
            Some(RpcMethod::TerminalResize)
        );
        assert_eq!(RpcMethod::parse("no_such_verb"), None);
        // as_str and parse agree for every verb.
        for method in [
            RpcMethod::CreateWorkspace,
            RpcMethod::HealthCheck,
            RpcMethod::TunnelStatus,
            RpcMethod::HttpProxy,
        ] {
            assert_eq!(RpcMethod::parse(method.as_str()), Some(method));
        }
    }

    #[test]
    fn client_messages_parse_from_browser_json() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type": "terminal_input", "workspace_id": "w1", "data": "ls\n"}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMessage::TerminalInput { .. }));
    }

    #[test]
    fn server_error_serializes_with_code() {
        let json = serde_json::to_string(&ServerMessage::Error {
            code: 403,
            message: "not your session".into(),
        })
        .unwrap();
        assert!(json.contains("\"code\":403"));
        assert!(json.contains("\"type\":\"error\""));
    }
}
