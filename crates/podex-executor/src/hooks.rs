// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Safe execution of user-defined hooks.
//!
//! Hook commands share the executor's forbidden-metacharacter set, are
//! lexed into an argv array with `shlex`, and exec'd directly — never
//! through a shell. The child gets a bounded environment (sanitized
//! caller variables plus the whitelisted `PODEX_*` context) and a per-hook
//! timeout. Results land in a 100-entry ring with explicit push-and-trim.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use crate::command::first_forbidden_pattern;
use crate::sanitize::sanitize_environment;

/// Ring capacity for execution history.
const HISTORY_CAP: usize = 100;

/// Tool results injected into hook env are truncated to this many bytes.
const MAX_TOOL_RESULT_BYTES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    PreToolCall,
    PostToolCall,
    SessionStart,
    SessionEnd,
    MessageReceived,
    ResponseGenerated,
}

/// When a registered hook fires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum HookCondition {
    #[default]
    Always,
    OnTool {
        tool_names: Vec<String>,
    },
    OnFileExt {
        extensions: Vec<String>,
    },
    OnPattern {
        pattern: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDefinition {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub event: HookEvent,
    /// Plain command line; forbidden patterns are rejected at execution.
    pub command: String,
    #[serde(default)]
    pub condition: HookCondition,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Context handed to hooks via `PODEX_*` environment variables.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub session_id: String,
    pub agent_id: String,
    pub tool_name: Option<String>,
    pub tool_args: Option<serde_json::Value>,
    pub tool_result: Option<String>,
    pub file_path: Option<String>,
    /// Caller-supplied extra variables; sanitized before injection.
    pub extra_env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookResult {
    pub hook_id: Uuid,
    pub success: bool,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
}

pub struct HookExecutor {
    history: Mutex<VecDeque<HookResult>>,
    default_timeout: Duration,
}

impl HookExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAP)),
            default_timeout,
        }
    }

    /// Whether `hook` fires for this context.
    pub fn matches(hook: &HookDefinition, context: &HookContext) -> bool {
        if !hook.enabled {
            return false;
        }
        match &hook.condition {
            HookCondition::Always => true,
            HookCondition::OnTool { tool_names } => context
                .tool_name
                .as_deref()
                .map(|t| tool_names.iter().any(|n| n == t))
                .unwrap_or(false),
            HookCondition::OnFileExt { extensions } => context
                .file_path
                .as_deref()
                .and_then(|p| p.rsplit('.').next())
                .map(|ext| extensions.iter().any(|e| e.trim_start_matches('.') == ext))
                .unwrap_or(false),
            HookCondition::OnPattern { pattern } => {
                let Some(target) = context.file_path.as_deref().or(context.tool_name.as_deref())
                else {
                    return false;
                };
                Regex::new(pattern)
                    .map(|re| re.is_match(target))
                    .unwrap_or(false)
            }
        }
    }

    /// Execute every matching hook in order, recording results in the ring.
    pub async fn execute_hooks(
        &self,
        hooks: &[HookDefinition],
        context: &HookContext,
    ) -> Vec<HookResult> {
        let mut results = Vec::new();
        for hook in hooks {
            if !Self::matches(hook, context) {
                continue;
            }
            let result = self.execute_hook(hook, context).await;
            self.push_and_trim(result.clone());
            results.push(result);
        }
        results
    }

    async fn execute_hook(&self, hook: &HookDefinition, context: &HookContext) -> HookResult {
        let started = Instant::now();
        let timeout = if hook.timeout_ms == 0 {
            self.default_timeout
        } else {
            Duration::from_millis(hook.timeout_ms)
        };

        match self.run_command(&hook.command, context, timeout).await {
            Ok(output) => {
                info!(hook = %hook.name, "hook executed");
                HookResult {
                    hook_id: hook.id,
                    success: true,
                    output: Some(output),
                    error: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
            Err(error) => {
                warn!(hook = %hook.name, %error, "hook failed");
                HookResult {
                    hook_id: hook.id,
                    success: false,
                    output: None,
                    error: Some(error),
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
        }
    }

    async fn run_command(
        &self,
        command: &str,
        context: &HookContext,
        timeout: Duration,
    ) -> Result<String, String> {
        if let Some(pattern) = first_forbidden_pattern(command) {
            return Err(format!("hook command contains forbidden pattern {pattern:?}"));
        }
        let argv = shlex::split(command).ok_or("invalid command syntax")?;
        let Some((program, args)) = argv.split_first() else {
            return Err("empty command".into());
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A bounded environment, never the coordinator's own.
            .env_clear()
            .envs(hook_environment(context))
            .kill_on_drop(true);

        let run = async {
            let output = cmd.output().await.map_err(|e| e.to_string())?;
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            if output.status.success() {
                Ok(stdout)
            } else {
                Err(format!(
                    "exit {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr)
                ))
            }
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(format!("hook timed out after {}ms", timeout.as_millis())),
        }
    }

    fn push_and_trim(&self, result: HookResult) {
        let mut history = match self.history.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.push_back(result);
        while history.len() > HISTORY_CAP {
            history.pop_front();
        }
    }

    pub fn history(&self) -> Vec<HookResult> {
        match self.history.lock() {
            Ok(g) => g.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

/// The whitelisted platform variables plus sanitized caller extras. The
/// child never inherits the coordinator's environment; PATH is pinned to
/// the system directories so binary resolution stays predictable.
fn hook_environment(context: &HookContext) -> HashMap<String, String> {
    let mut env = sanitize_environment(&context.extra_env);
    env.insert("PATH".into(), "/usr/local/bin:/usr/bin:/bin".into());
    env.insert("PODEX_SESSION_ID".into(), context.session_id.clone());
    env.insert("PODEX_AGENT_ID".into(), context.agent_id.clone());
    if let Some(tool) = &context.tool_name {
        env.insert("PODEX_TOOL_NAME".into(), tool.clone());
    }
    if let Some(args) = &context.tool_args {
        env.insert("PODEX_TOOL_ARGS".into(), args.to_string());
    }
    if let Some(result) = &context.tool_result {
        let mut result = result.clone();
        if result.len() > MAX_TOOL_RESULT_BYTES {
            let mut cut = MAX_TOOL_RESULT_BYTES;
            while !result.is_char_boundary(cut) {
                cut -= 1;
            }
            result.truncate(cut);
        }
        env.insert("PODEX_TOOL_RESULT".into(), result);
    }
    if let Some(path) = &context.file_path {
        env.insert("PODEX_FILE_PATH".into(), path.clone());
    }
    env
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(command: &str) -> HookDefinition {
        HookDefinition {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            name: "test-hook".into(),
            event: HookEvent::PostToolCall,
            command: command.into(),
            condition: HookCondition::Always,
            enabled: true,
            timeout_ms: 5_000,
        }
    }

    fn context() -> HookContext {
        HookContext {
            session_id: "s1".into(),
            agent_id: "a1".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn hook_runs_and_captures_stdout() {
        let executor = HookExecutor::new(Duration::from_secs(5));
        let results = executor.execute_hooks(&[hook("echo hello")], &context()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].output.as_deref().map(str::trim), Some("hello"));
    }

    #[tokio::test]
    async fn forbidden_patterns_are_rejected_before_execution() {
        let executor = HookExecutor::new(Duration::from_secs(5));
        for cmd in ["echo a && rm -rf /", "echo `id`", "echo $(id)", "a | b"] {
            let results = executor.execute_hooks(&[hook(cmd)], &context()).await;
            assert!(!results[0].success, "{cmd}");
            assert!(
                results[0].error.as_deref().unwrap().contains("forbidden"),
                "{cmd}"
            );
        }
    }

    #[tokio::test]
    async fn hook_timeout_is_enforced() {
        let executor = HookExecutor::new(Duration::from_secs(5));
        let mut slow = hook("sleep 10");
        slow.timeout_ms = 100;
        let results = executor.execute_hooks(&[slow], &context()).await;
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn context_variables_reach_the_child() {
        let executor = HookExecutor::new(Duration::from_secs(5));
        let mut ctx = context();
        ctx.tool_name = Some("write_file".into());
        let results = executor
            .execute_hooks(&[hook("printenv PODEX_TOOL_NAME")], &ctx)
            .await;
        assert!(results[0].success);
        assert_eq!(
            results[0].output.as_deref().map(str::trim),
            Some("write_file")
        );
    }

    #[tokio::test]
    async fn dangerous_caller_env_never_reaches_the_child() {
        let executor = HookExecutor::new(Duration::from_secs(5));
        let mut ctx = context();
        ctx.extra_env
            .insert("LD_PRELOAD".into(), "/tmp/evil.so".into());
        let results = executor
            .execute_hooks(&[hook("printenv LD_PRELOAD")], &ctx)
            .await;
        // printenv exits non-zero when the variable is absent.
        assert!(!results[0].success);
    }

    #[tokio::test]
    async fn disabled_hooks_are_skipped() {
        let executor = HookExecutor::new(Duration::from_secs(5));
        let mut h = hook("echo x");
        h.enabled = false;
        let results = executor.execute_hooks(&[h], &context()).await;
        assert!(results.is_empty());
    }

    #[test]
    fn on_tool_condition_matches_by_name() {
        let mut h = hook("echo x");
        h.condition = HookCondition::OnTool {
            tool_names: vec!["write_file".into()],
        };
        let mut ctx = context();
        assert!(!HookExecutor::matches(&h, &ctx));
        ctx.tool_name = Some("write_file".into());
        assert!(HookExecutor::matches(&h, &ctx));
        ctx.tool_name = Some("read_file".into());
        assert!(!HookExecutor::matches(&h, &ctx));
    }

    #[test]
    fn on_file_ext_condition_matches_extensions() {
        let mut h = hook("echo x");
        h.condition = HookCondition::OnFileExt {
            extensions: vec![".rs".into(), "py".into()],
        };
        let mut ctx = context();
        ctx.file_path = Some("src/main.rs".into());
        assert!(HookExecutor::matches(&h, &ctx));
        ctx.file_path = Some("app.py".into());
        assert!(HookExecutor::matches(&h, &ctx));
        ctx.file_path = Some("notes.md".into());
        assert!(!HookExecutor::matches(&h, &ctx));
    }

    #[test]
    fn on_pattern_condition_uses_regex() {
        let mut h = hook("echo x");
        h.condition = HookCondition::OnPattern {
            pattern: r"^src/.*\.rs$".into(),
        };
        let mut ctx = context();
        ctx.file_path = Some("src/lib.rs".into());
        assert!(HookExecutor::matches(&h, &ctx));
        ctx.file_path = Some("tests/lib.rs".into());
        assert!(!HookExecutor::matches(&h, &ctx));
    }

    #[tokio::test]
    async fn history_ring_is_capped_at_100() {
        let executor = HookExecutor::new(Duration::from_secs(5));
        let h = hook("true");
        for _ in 0..110 {
            executor.execute_hooks(&[h.clone()], &context()).await;
        }
        assert_eq!(executor.history().len(), 100);
    }
}
