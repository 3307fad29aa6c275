// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Workspace bridge over the container exec path.
//!
//! Agent tools ultimately run *inside* the workspace container. This
//! bridge maps each tool call onto one shell invocation, with every
//! user-influenced value shell-quoted — the executor has already
//! validated permissions, paths, and environments by the time a call
//! lands here.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use podex_core::{Error, Result};
use podex_executor::{ToolCall, WorkspaceBridge};

/// One command execution inside a session's workspace. Implemented over
/// the orchestrator for cloud hosts and over pod RPC for self-hosted
/// pods; tests wire a script.
#[async_trait]
pub trait CommandExec: Send + Sync {
    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutcome>;
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

pub struct ExecBridge<E: CommandExec> {
    exec: E,
    timeout: Duration,
}

impl<E: CommandExec> ExecBridge<E> {
    pub fn new(exec: E, timeout: Duration) -> Self {
        Self { exec, timeout }
    }

    async fn run(&self, command: String) -> Result<Value> {
        let outcome = self.exec.exec(&command, self.timeout).await?;
        Ok(json!({
            "exit_code": outcome.exit_code,
            "stdout": outcome.stdout,
            "stderr": outcome.stderr,
        }))
    }
}

fn quoted(value: &str) -> Result<String> {
    shlex::try_quote(value)
        .map(|q| q.into_owned())
        .map_err(|_| Error::Validation("argument contains a NUL byte".into()))
}

fn str_arg<'a>(call: &'a ToolCall, key: &str) -> Result<&'a str> {
    call.args
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation(format!("{} requires a {key} argument", call.name)))
}

#[async_trait]
impl<E: CommandExec> WorkspaceBridge for ExecBridge<E> {
    async fn invoke(&self, call: &ToolCall) -> Result<Value> {
        let command = match call.name.as_str() {
            "read_file" => format!("cat {}", quoted(str_arg(call, "path")?)?),
            "list_directory" => {
                let path = call.args.get("path").and_then(Value::as_str).unwrap_or(".");
                format!("ls -la {}", quoted(path)?)
            }
            "search_code" | "grep" => {
                let pattern = str_arg(call, "pattern")?;
                let path = call.args.get("path").and_then(Value::as_str).unwrap_or(".");
                format!("grep -rn {} {}", quoted(pattern)?, quoted(path)?)
            }
            "glob_files" => {
                let pattern = str_arg(call, "pattern")?;
                format!("find . -path {} -not -path './.git/*'", quoted(pattern)?)
            }
            "fetch_url" => format!("curl -fsSL --max-time 20 {}", quoted(str_arg(call, "url")?)?),
            "git_status" => "git status --porcelain=v1 --branch".to_string(),
            "git_diff" => "git diff".to_string(),
            "git_log" => "git log --oneline -n 50".to_string(),
            "git_branch" => "git branch --all".to_string(),

            "write_file" | "create_file" => {
                let path = quoted(str_arg(call, "path")?)?;
                let content = quoted(str_arg(call, "content")?)?;
                format!("mkdir -p \"$(dirname {path})\" && printf %s {content} > {path}")
            }
            "delete_file" => format!("rm -f {}", quoted(str_arg(call, "path")?)?),
            "apply_patch" => {
                let patch = quoted(str_arg(call, "patch")?)?;
                format!("printf %s {patch} | git apply --whitespace=nowarn -")
            }
            "git_commit" => {
                let message = quoted(str_arg(call, "message")?)?;
                format!("git add -A && git commit -m {message}")
            }
            "git_push" => "git push".to_string(),
            "create_pr" => {
                let title = quoted(str_arg(call, "title")?)?;
                format!("gh pr create --fill --title {title}")
            }

            "run_command" => str_arg(call, "command")?.to_string(),

            // Preview deploys and e2e runs are serviced by the deploy
            // collaborator, not the exec path.
            other => {
                return Err(Error::Validation(format!(
                    "tool {other} is not available on this workspace"
                )));
            }
        };
        self.run(command).await
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandExec for &Recorder {
        async fn exec(&self, command: &str, _timeout: Duration) -> Result<ExecOutcome> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(ExecOutcome {
                exit_code: 0,
                stdout: "ok".into(),
                stderr: String::new(),
            })
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            args,
        }
    }

    async fn command_for(call_value: ToolCall) -> String {
        let recorder = Recorder {
            commands: Mutex::new(vec![]),
        };
        {
            let bridge = ExecBridge::new(&recorder, Duration::from_secs(30));
            bridge.invoke(&call_value).await.unwrap();
        }
        recorder.commands.into_inner().unwrap().remove(0)
    }

    #[tokio::test]
    async fn read_file_quotes_the_path() {
        let cmd = command_for(call("read_file", json!({"path": "a file.txt"}))).await;
        assert_eq!(cmd, "cat 'a file.txt'");
    }

    #[tokio::test]
    async fn write_file_quotes_path_and_content() {
        let cmd = command_for(call(
            "write_file",
            json!({"path": "src/x.rs", "content": "fn main() { /* $(boom) */ }"}),
        ))
        .await;
        assert!(cmd.contains("printf %s"));
        assert!(cmd.contains("'fn main() { /* $(boom) */ }'"));
        // The substitution stays inside single quotes — inert.
        assert!(!cmd.contains("> $(boom)"));
    }

    #[tokio::test]
    async fn run_command_passes_through_verbatim() {
        // Permission-layer validation already happened; the bridge must not
        // mangle the approved command.
        let cmd = command_for(call("run_command", json!({"command": "cargo test -p podex-core"})))
            .await;
        assert_eq!(cmd, "cargo test -p podex-core");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_validation_error() {
        let recorder = Recorder {
            commands: Mutex::new(vec![]),
        };
        let bridge = ExecBridge::new(&recorder, Duration::from_secs(30));
        let err = bridge
            .invoke(&call("deploy_preview", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn missing_required_argument_is_reported() {
        let recorder = Recorder {
            commands: Mutex::new(vec![]),
        };
        let bridge = ExecBridge::new(&recorder, Duration::from_secs(30));
        let err = bridge.invoke(&call("read_file", json!({}))).await.unwrap_err();
        assert!(err.to_string().contains("path"));
    }
}
