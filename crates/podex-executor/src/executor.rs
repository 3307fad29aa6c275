// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The per-session tool executor.
//!
//! Wiring: [`PermissionEngine`] gates, the [`ApprovalBroker`] parks calls
//! that need a user decision, and allowed calls are dispatched into the
//! session's workspace through the [`WorkspaceBridge`] capability — after
//! the dispatch side effects required here: path containment for WRITE
//! tools, environment sanitization for DEPLOY tools, and a structured
//! audit entry for every invocation.
//!
//! ```text
//!   agent loop ── dispatch(call) ──► Denied(result)
//!                                 ─► Completed(output)
//!                                 ─► Pending { approval }   (surface to user,
//!                                        │                   then block)
//!                      finish_pending(call, approval) ◄──────┘
//!                                 └─► user resolves via resolve_approval()
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use podex_core::{AgentMode, Error, PermissionResult, Result, ToolCategory};

use crate::approval::{ApprovalBroker, ApprovalDecision, PendingApproval};
use crate::audit::{summarize_args, AuditEntry, AuditLog, AuditOutcome};
use crate::catalog::ToolCatalog;
use crate::command::first_forbidden_pattern;
use crate::permission::PermissionEngine;
use crate::sanitize::{contain_path, sanitize_environment};

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier from the model, forwarded verbatim.
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// The result handed back to the agent loop.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: Value,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: Value) -> Self {
        Self {
            call_id: call_id.into(),
            content,
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: Value::String(message.into()),
            is_error: true,
        }
    }
}

/// Outcome of a non-blocking dispatch attempt.
pub enum ToolDispatch {
    Denied(PermissionResult),
    Completed(ToolOutput),
    /// Surface `approval.approval_id` to the user, then block on
    /// [`ToolExecutor::finish_pending`].
    Pending { approval: PendingApproval },
}

/// Workspace-facing tool suite. Implementations route into the container
/// (cloud hosts via the orchestrator, self-hosted pods via reverse RPC);
/// tests wire an in-memory double.
#[async_trait]
pub trait WorkspaceBridge: Send + Sync {
    async fn invoke(&self, call: &ToolCall) -> Result<Value>;
}

pub struct ToolExecutor {
    session_id: String,
    agent_id: String,
    workspace_root: PathBuf,
    mode: RwLock<AgentMode>,
    allowlist: Mutex<Vec<String>>,
    catalog: Arc<ToolCatalog>,
    broker: Arc<ApprovalBroker>,
    audit: Arc<AuditLog>,
    bridge: Arc<dyn WorkspaceBridge>,
}

impl ToolExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        workspace_root: impl Into<PathBuf>,
        mode: AgentMode,
        catalog: Arc<ToolCatalog>,
        broker: Arc<ApprovalBroker>,
        audit: Arc<AuditLog>,
        bridge: Arc<dyn WorkspaceBridge>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            workspace_root: workspace_root.into(),
            mode: RwLock::new(mode),
            allowlist: Mutex::new(Vec::new()),
            catalog,
            broker,
            audit,
            bridge,
        }
    }

    pub fn mode(&self) -> AgentMode {
        *read_lock(&self.mode)
    }

    /// Case-insensitive; unknown strings fall back to `ask`.
    pub fn set_mode(&self, mode: &str) {
        *write_lock(&self.mode) = AgentMode::parse(mode);
    }

    pub fn allowlist(&self) -> Vec<String> {
        lock(&self.allowlist).clone()
    }

    /// Append a command to the session allowlist. The string is
    /// re-validated first so a tainted value can never be persisted — even
    /// one arriving from an approval resolution.
    pub fn add_to_allowlist(&self, command: &str) -> Result<()> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("cannot allowlist an empty command".into()));
        }
        if let Some(pattern) = first_forbidden_pattern(trimmed) {
            return Err(Error::Validation(format!(
                "cannot allowlist a command containing {pattern:?}"
            )));
        }
        let mut allowlist = lock(&self.allowlist);
        if !allowlist.iter().any(|e| e == trimmed) {
            allowlist.push(trimmed.to_string());
        }
        Ok(())
    }

    pub fn check_permission(&self, tool: &str, args: &Value) -> PermissionResult {
        let engine = PermissionEngine::new(&self.catalog);
        engine.check_permission(self.mode(), tool, args, &self.allowlist())
    }

    /// Non-blocking dispatch: deny, complete, or park on an approval.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolDispatch {
        let permission = self.check_permission(&call.name, &call.args);

        if !permission.allowed {
            self.record(call, None, AuditOutcome::Denied, 0);
            return ToolDispatch::Denied(permission);
        }

        if permission.requires_approval {
            let approval = self.broker.request(&self.session_id);
            self.record(call, Some(approval.approval_id), AuditOutcome::ApprovalPending, 0);
            return ToolDispatch::Pending { approval };
        }

        ToolDispatch::Completed(self.run(call, None).await)
    }

    /// Block on a parked approval, then run or refuse.
    pub async fn finish_pending(&self, call: &ToolCall, approval: PendingApproval) -> ToolOutput {
        let approval_id = approval.approval_id;
        match approval.decision().await {
            ApprovalDecision::Approved { add_to_allowlist } => {
                if add_to_allowlist {
                    if let Some(command) = command_arg(&call.args) {
                        if let Err(e) = self.add_to_allowlist(command) {
                            debug!(%approval_id, "allowlist append refused: {e}");
                        }
                    }
                }
                self.run(call, Some(approval_id)).await
            }
            ApprovalDecision::Denied => {
                self.record(call, Some(approval_id), AuditOutcome::ApprovalDenied, 0);
                ToolOutput::err(&call.id, format!("{} was denied by the user", call.name))
            }
            ApprovalDecision::Expired => {
                self.record(call, Some(approval_id), AuditOutcome::ApprovalDenied, 0);
                ToolOutput::err(
                    &call.id,
                    format!("approval for {} expired without an answer", call.name),
                )
            }
        }
    }

    /// HTTP-surface entry point: resolve a pending approval by id.
    pub fn resolve_approval(&self, approval_id: Uuid, approved: bool, add: bool) -> Result<()> {
        self.broker.resolve(approval_id, approved, add)
    }

    /// Execute an allowed call: apply dispatch side effects, forward to the
    /// bridge, audit the outcome.
    async fn run(&self, call: &ToolCall, approval_id: Option<Uuid>) -> ToolOutput {
        let started = Instant::now();
        let prepared = match self.prepare(call) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.record(call, approval_id, AuditOutcome::Denied, 0);
                return ToolOutput::err(&call.id, e.to_string());
            }
        };

        let result = self.bridge.invoke(&prepared).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(content) => {
                self.record(call, approval_id, AuditOutcome::Completed, duration_ms);
                ToolOutput::ok(&call.id, content)
            }
            Err(e) => {
                self.record(call, approval_id, AuditOutcome::Failed, duration_ms);
                ToolOutput::err(&call.id, e.to_string())
            }
        }
    }

    /// Per-category argument hardening before anything reaches a workspace.
    fn prepare(&self, call: &ToolCall) -> Result<ToolCall> {
        let category = self.catalog.category_of(&call.name);
        let mut args = call.args.clone();

        match category {
            Some(ToolCategory::Write) => {
                if let Some(path) = path_arg(&args) {
                    let contained = contain_path(&self.workspace_root, &path)?;
                    set_path_arg(&mut args, contained.to_string_lossy().as_ref());
                }
            }
            Some(ToolCategory::Deploy) => {
                let clean = args.get("environment").and_then(Value::as_object).map(|env| {
                    let raw: HashMap<String, String> = env
                        .iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect();
                    sanitize_environment(&raw)
                });
                if let Some(clean) = clean {
                    args["environment"] = serde_json::to_value(clean)
                        .map_err(|e| Error::Validation(e.to_string()))?;
                }
            }
            _ => {}
        }

        Ok(ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            args,
        })
    }

    fn record(
        &self,
        call: &ToolCall,
        approval_id: Option<Uuid>,
        outcome: AuditOutcome,
        duration_ms: u64,
    ) {
        self.audit.record(AuditEntry {
            at: chrono::Utc::now(),
            session_id: self.session_id.clone(),
            agent_id: self.agent_id.clone(),
            tool: call.name.clone(),
            args_summary: summarize_args(&call.args),
            approval_id,
            outcome,
            duration_ms,
        });
    }
}

fn command_arg(args: &Value) -> Option<&str> {
    args.get("command").and_then(Value::as_str)
}

fn path_arg(args: &Value) -> Option<String> {
    args.get("path")
        .or_else(|| args.get("file_path"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn set_path_arg(args: &mut Value, contained: &str) {
    let key = if args.get("path").is_some() {
        "path"
    } else {
        "file_path"
    };
    args[key] = Value::String(contained.to_string());
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_lock<T>(m: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match m.read() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(m: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match m.write() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Records every invocation; echoes the prepared args back so tests can
    /// inspect what would have reached the workspace.
    #[derive(Default)]
    struct RecordingBridge {
        invocations: StdMutex<Vec<ToolCall>>,
    }

    #[async_trait]
    impl WorkspaceBridge for RecordingBridge {
        async fn invoke(&self, call: &ToolCall) -> Result<Value> {
            self.invocations.lock().unwrap().push(call.clone());
            Ok(json!({ "tool": call.name, "args": call.args }))
        }
    }

    struct Rig {
        executor: ToolExecutor,
        bridge: Arc<RecordingBridge>,
        audit: Arc<AuditLog>,
    }

    fn rig(mode: AgentMode) -> Rig {
        let bridge = Arc::new(RecordingBridge::default());
        let audit = Arc::new(AuditLog::new());
        let executor = ToolExecutor::new(
            "s1",
            "a1",
            "/workspace",
            mode,
            Arc::new(ToolCatalog::builtin()),
            Arc::new(ApprovalBroker::new(Duration::from_secs(600))),
            audit.clone(),
            bridge.clone(),
        );
        Rig {
            executor,
            bridge,
            audit,
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "call-1".into(),
            name: name.into(),
            args,
        }
    }

    fn invocation_count(rig: &Rig) -> usize {
        rig.bridge.invocations.lock().unwrap().len()
    }

    // ── Plan-mode denial ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn plan_mode_denies_writes_and_never_touches_the_bridge() {
        let rig = rig(AgentMode::Plan);
        let out = rig
            .executor
            .dispatch(&call("write_file", json!({"path": "a.txt", "content": "x"})))
            .await;
        let ToolDispatch::Denied(result) = out else {
            panic!("expected denial");
        };
        assert!(result.error.unwrap().contains("Plan mode"));
        assert_eq!(invocation_count(&rig), 0);
    }

    #[tokio::test]
    async fn plan_mode_allows_reads() {
        let rig = rig(AgentMode::Plan);
        let out = rig
            .executor
            .dispatch(&call("read_file", json!({"path": "a.txt"})))
            .await;
        assert!(matches!(out, ToolDispatch::Completed(o) if !o.is_error));
    }

    // ── Approval round-trip ───────────────────────────────────────────────────

    #[tokio::test]
    async fn ask_mode_write_waits_for_approval_then_runs() {
        let rig = rig(AgentMode::Ask);
        let c = call("write_file", json!({"path": "a.txt", "content": "x"}));

        let ToolDispatch::Pending { approval } = rig.executor.dispatch(&c).await else {
            panic!("expected pending approval");
        };
        assert_eq!(invocation_count(&rig), 0, "nothing runs before approval");

        rig.executor
            .resolve_approval(approval.approval_id, true, false)
            .unwrap();
        let out = rig.executor.finish_pending(&c, approval).await;
        assert!(!out.is_error);
        assert_eq!(invocation_count(&rig), 1);
    }

    #[tokio::test]
    async fn denied_approval_refuses_without_running() {
        let rig = rig(AgentMode::Ask);
        let c = call("run_command", json!({"command": "rm -rf build"}));

        let ToolDispatch::Pending { approval } = rig.executor.dispatch(&c).await else {
            panic!("expected pending approval");
        };
        rig.executor
            .resolve_approval(approval.approval_id, false, false)
            .unwrap();
        let out = rig.executor.finish_pending(&c, approval).await;
        assert!(out.is_error);
        assert_eq!(invocation_count(&rig), 0);
    }

    #[tokio::test]
    async fn double_resolution_reports_unknown_approval() {
        let rig = rig(AgentMode::Ask);
        let c = call("write_file", json!({"path": "a.txt", "content": "x"}));
        let ToolDispatch::Pending { approval } = rig.executor.dispatch(&c).await else {
            panic!("expected pending approval");
        };
        let id = approval.approval_id;
        rig.executor.resolve_approval(id, true, false).unwrap();
        assert!(rig.executor.resolve_approval(id, true, false).is_err());
    }

    // ── Allowlist behavior ────────────────────────────────────────────────────

    #[tokio::test]
    async fn auto_mode_allowlisted_command_runs_immediately() {
        let rig = rig(AgentMode::Auto);
        rig.executor.add_to_allowlist("npm install").unwrap();
        let out = rig
            .executor
            .dispatch(&call("run_command", json!({"command": "npm install lodash"})))
            .await;
        assert!(matches!(out, ToolDispatch::Completed(o) if !o.is_error));
    }

    #[tokio::test]
    async fn approval_with_add_to_allowlist_persists_the_command() {
        let rig = rig(AgentMode::Auto);
        let c = call("run_command", json!({"command": "cargo test"}));

        let ToolDispatch::Pending { approval } = rig.executor.dispatch(&c).await else {
            panic!("expected pending approval");
        };
        rig.executor
            .resolve_approval(approval.approval_id, true, true)
            .unwrap();
        rig.executor.finish_pending(&c, approval).await;

        assert!(rig.executor.allowlist().contains(&"cargo test".to_string()));
        // Second dispatch of the same command now flows straight through.
        let again = rig.executor.dispatch(&c).await;
        assert!(matches!(again, ToolDispatch::Completed(_)));
    }

    #[tokio::test]
    async fn tainted_command_is_never_persisted_to_the_allowlist() {
        let rig = rig(AgentMode::Auto);
        let c = call("run_command", json!({"command": "npm install && rm -rf /"}));

        let ToolDispatch::Pending { approval } = rig.executor.dispatch(&c).await else {
            panic!("expected pending approval");
        };
        rig.executor
            .resolve_approval(approval.approval_id, true, true)
            .unwrap();
        rig.executor.finish_pending(&c, approval).await;

        assert!(
            rig.executor.allowlist().is_empty(),
            "metacharacter command must not enter the allowlist"
        );
    }

    #[test]
    fn add_to_allowlist_rejects_forbidden_patterns() {
        let rig = rig(AgentMode::Auto);
        assert!(rig.executor.add_to_allowlist("a && b").is_err());
        assert!(rig.executor.add_to_allowlist("  ").is_err());
        assert!(rig.executor.add_to_allowlist("npm install").is_ok());
    }

    // ── Dispatch side effects ─────────────────────────────────────────────────

    #[tokio::test]
    async fn write_paths_are_contained_before_reaching_the_bridge() {
        let rig = rig(AgentMode::Sovereign);
        rig.executor
            .dispatch(&call("write_file", json!({"path": "src/main.rs", "content": "x"})))
            .await;
        let forwarded = rig.bridge.invocations.lock().unwrap()[0].clone();
        assert_eq!(
            forwarded.args["path"].as_str().unwrap(),
            "/workspace/src/main.rs"
        );
    }

    #[tokio::test]
    async fn write_path_traversal_is_rejected() {
        let rig = rig(AgentMode::Sovereign);
        let out = rig
            .executor
            .dispatch(&call(
                "write_file",
                json!({"path": "../../etc/passwd", "content": "x"}),
            ))
            .await;
        let ToolDispatch::Completed(output) = out else {
            panic!("expected completed-with-error");
        };
        assert!(output.is_error);
        assert_eq!(invocation_count(&rig), 0);
    }

    #[tokio::test]
    async fn deploy_environment_is_sanitized() {
        let rig = rig(AgentMode::Sovereign);
        rig.executor
            .dispatch(&call(
                "deploy_preview",
                json!({"environment": {"LD_PRELOAD": "/evil.so", "API_URL": "https://x"}}),
            ))
            .await;
        let forwarded = rig.bridge.invocations.lock().unwrap()[0].clone();
        let env = forwarded.args["environment"].as_object().unwrap();
        assert!(!env.contains_key("LD_PRELOAD"));
        assert_eq!(env["API_URL"], "https://x");
    }

    #[tokio::test]
    async fn every_dispatch_leaves_an_audit_entry() {
        let rig = rig(AgentMode::Sovereign);
        rig.executor
            .dispatch(&call("read_file", json!({"path": "a.txt"})))
            .await;
        let entries = rig.audit.recent(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tool, "read_file");
        assert!(matches!(entries[0].outcome, AuditOutcome::Completed));
    }

    // ── Mode handling ─────────────────────────────────────────────────────────

    #[test]
    fn set_mode_parses_case_insensitively_with_ask_fallback() {
        let rig = rig(AgentMode::Plan);
        rig.executor.set_mode("SOVEREIGN");
        assert_eq!(rig.executor.mode(), AgentMode::Sovereign);
        rig.executor.set_mode("gibberish");
        assert_eq!(rig.executor.mode(), AgentMode::Ask);
    }
}
