// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use podex_core::Task;
use podex_executor::{ToolCall, ToolDispatch, ToolExecutor};
use podex_hub::{Hub, ServerMessage};
use podex_llm::{ChatMessage, ChatRequest, ChatResponse, Provider, StreamEvent, ToolCallRequest};
use podex_queue::TaskQueue;

/// Sentinel prefix for user-visible agent failures. These surface as
/// assistant messages, never as raw errors.
const FAILURE_SENTINEL: &str = "❌ Execution failed: ";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub session_id: String,
    pub agent_id: String,
    /// Role filter for dequeue; workers only take their own tasks.
    pub agent_role: String,
    pub model: String,
    /// Rounds of model↔tool ping-pong before a task is declared stuck.
    pub max_tool_rounds: usize,
    /// Idle poll interval when the queue is empty.
    pub poll_interval: Duration,
    pub system_prompt: String,
}

impl WorkerConfig {
    pub fn new(session_id: impl Into<String>, agent_role: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: Uuid::new_v4().to_string(),
            agent_role: agent_role.into(),
            model: "llama3.2".into(),
            max_tool_rounds: 8,
            poll_interval: Duration::from_millis(500),
            system_prompt: "You are a coding agent working inside a cloud development workspace."
                .into(),
        }
    }
}

pub struct AgentWorker {
    config: WorkerConfig,
    queue: Arc<TaskQueue>,
    provider: Arc<dyn Provider>,
    executor: Arc<ToolExecutor>,
    hub: Arc<Hub>,
}

impl AgentWorker {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<TaskQueue>,
        provider: Arc<dyn Provider>,
        executor: Arc<ToolExecutor>,
        hub: Arc<Hub>,
    ) -> Self {
        Self {
            config,
            queue,
            provider,
            executor,
            hub,
        }
    }

    /// Drive the worker until the session's cancellation token fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            session_id = %self.config.session_id,
            role = %self.config.agent_role,
            "agent worker started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                task = self.queue.dequeue(
                    &self.config.session_id,
                    Some(&self.config.agent_role),
                    &self.config.agent_id,
                ) => {
                    match task {
                        Ok(Some(task)) => self.run_task(task, &cancel).await,
                        Ok(None) => tokio::time::sleep(self.config.poll_interval).await,
                        Err(e) => {
                            warn!(session_id = %self.config.session_id, "dequeue failed: {e}");
                            tokio::time::sleep(self.config.poll_interval).await;
                        }
                    }
                }
            }
        }
        info!(session_id = %self.config.session_id, "agent worker stopped");
    }

    /// One task = one turn loop: prompt, stream, dispatch tool calls,
    /// repeat until the model stops calling tools.
    pub async fn run_task(&self, task: Task, cancel: &CancellationToken) {
        info!(task_id = %task.id, "task picked up");
        let mut messages = vec![
            ChatMessage::system(&self.config.system_prompt),
            ChatMessage::user(&task.description),
        ];

        for round in 0..self.config.max_tool_rounds {
            if cancel.is_cancelled() {
                // Advisory cancellation: the task goes back to the queue's
                // bookkeeping as cancelled, not failed.
                let _ = self.queue.cancel(task.id).await;
                return;
            }

            let response = match self.one_round(&messages).await {
                Ok(response) => response,
                Err(e) => {
                    self.surface_failure(&task, &e.to_string());
                    let _ = self
                        .queue
                        .fail(task.id, &e.to_string(), e.is_retryable())
                        .await;
                    return;
                }
            };

            if response.tool_calls.is_empty() {
                // The model is done; the final text is the task result.
                let _ = self
                    .queue
                    .complete(task.id, Some(json!({ "response": response.content })))
                    .await;
                self.emit_agent_event("task_completed", json!({ "task_id": task.id }));
                return;
            }

            messages.push(ChatMessage::assistant(&response.content));
            for call in &response.tool_calls {
                let outcome = self.dispatch_tool(call).await;
                messages.push(ChatMessage::tool_result(&call.id, outcome));
            }
            debug!(task_id = %task.id, round, "tool round finished");
        }

        let reason = format!(
            "task exceeded {} tool rounds without converging",
            self.config.max_tool_rounds
        );
        self.surface_failure(&task, &reason);
        let _ = self.queue.fail(task.id, &reason, false).await;
    }

    /// Stream one model response, forwarding deltas to the session room.
    async fn one_round(&self, messages: &[ChatMessage]) -> podex_core::Result<ChatResponse> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            tools: vec![],
            temperature: None,
            max_tokens: None,
        };
        let mut stream = self.provider.stream(request).await?;
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta(delta) => {
                    self.emit_agent_event("delta", json!({ "delta": delta }));
                }
                StreamEvent::ToolCall(call) => {
                    self.emit_agent_event(
                        "tool_call",
                        json!({ "call_id": call.id, "tool": call.name }),
                    );
                }
                StreamEvent::Done(response) => return Ok(response),
            }
        }
        Err(podex_core::Error::Transport(
            "provider stream ended without a terminal event".into(),
        ))
    }

    /// Route a tool call through the permission engine. Pending approvals
    /// are surfaced as agent-attention notifications, then awaited.
    async fn dispatch_tool(&self, call: &ToolCallRequest) -> String {
        let tool_call = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            args: call.args.clone(),
        };
        match self.executor.dispatch(&tool_call).await {
            ToolDispatch::Denied(result) => {
                let reason = result
                    .error
                    .unwrap_or_else(|| format!("{} is not permitted", call.name));
                self.emit_agent_event(
                    "tool_denied",
                    json!({ "call_id": call.id, "reason": reason }),
                );
                format!("permission denied: {reason}")
            }
            ToolDispatch::Completed(output) => summarize(&output.content, output.is_error),
            ToolDispatch::Pending { approval } => {
                self.hub.emit_agent_attention(
                    &self.config.session_id,
                    &self.config.agent_id,
                    &approval.approval_id.to_string(),
                    &format!("Approval required for {}", call.name),
                );
                let output = self.executor.finish_pending(&tool_call, approval).await;
                summarize(&output.content, output.is_error)
            }
        }
    }

    fn surface_failure(&self, task: &Task, reason: &str) {
        error!(task_id = %task.id, %reason, "task execution failed");
        self.hub.emit_to_session(
            &self.config.session_id,
            ServerMessage::AgentData {
                session_id: self.config.session_id.clone(),
                agent_id: self.config.agent_id.clone(),
                event: "assistant_message".into(),
                data: json!({ "content": format!("{FAILURE_SENTINEL}{reason}") }),
            },
        );
    }

    fn emit_agent_event(&self, event: &str, data: serde_json::Value) {
        self.hub.emit_to_session(
            &self.config.session_id,
            ServerMessage::AgentData {
                session_id: self.config.session_id.clone(),
                agent_id: self.config.agent_id.clone(),
                event: event.into(),
                data,
            },
        );
    }
}

fn summarize(content: &serde_json::Value, is_error: bool) -> String {
    let text = match content {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if is_error {
        format!("tool error: {text}")
    } else {
        text
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use podex_core::{AgentMode, TaskPriority, TaskStatus};
    use podex_executor::{ApprovalBroker, AuditLog, ToolCatalog, WorkspaceBridge};
    use podex_hub::{HubLimits, MemoryPodDirectory, SessionDirectory, YjsState};
    use podex_llm::MockProvider;
    use podex_queue::EnqueueParams;
    use podex_redis::MemoryRedis;

    struct OpenDirectory;

    #[async_trait]
    impl SessionDirectory for OpenDirectory {
        async fn verify_user(&self, _token: &str) -> podex_core::Result<Option<String>> {
            Ok(Some("u1".into()))
        }
        async fn user_owns_session(&self, _u: &str, _s: &str) -> podex_core::Result<bool> {
            Ok(true)
        }
        async fn workspace_session(&self, _w: &str) -> podex_core::Result<Option<String>> {
            Ok(None)
        }
        async fn workspace_pod(&self, _w: &str) -> podex_core::Result<Option<String>> {
            Ok(None)
        }
    }

    struct OkBridge;

    #[async_trait]
    impl WorkspaceBridge for OkBridge {
        async fn invoke(&self, call: &ToolCall) -> podex_core::Result<serde_json::Value> {
            Ok(json!({ "ran": call.name }))
        }
    }

    struct Rig {
        worker: AgentWorker,
        queue: Arc<TaskQueue>,
        provider: Arc<MockProvider>,
    }

    fn rig(mode: AgentMode) -> Rig {
        let queue = Arc::new(TaskQueue::new(Arc::new(MemoryRedis::new()), 300));
        let provider = Arc::new(MockProvider::new());
        let hub = Arc::new(Hub::new(
            Arc::new(podex_hub::PodRegistry::new()),
            Arc::new(OpenDirectory),
            Arc::new(MemoryPodDirectory::new()),
            Arc::new(YjsState::new(100, 1024 * 1024)),
            HubLimits::default(),
        ));
        let executor = Arc::new(ToolExecutor::new(
            "s1",
            "a1",
            "/workspace",
            mode,
            Arc::new(ToolCatalog::builtin()),
            Arc::new(ApprovalBroker::new(Duration::from_secs(600))),
            Arc::new(AuditLog::new()),
            Arc::new(OkBridge),
        ));
        let worker = AgentWorker::new(
            WorkerConfig::new("s1", "coder"),
            queue.clone(),
            provider.clone(),
            executor,
            hub,
        );
        Rig {
            worker,
            queue,
            provider,
        }
    }

    async fn enqueue_and_claim(rig: &Rig) -> Task {
        rig.queue
            .enqueue(EnqueueParams::new("s1", "coder", "do the thing", TaskPriority::High))
            .await
            .unwrap();
        rig.queue.dequeue("s1", Some("coder"), "w1").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn text_only_response_completes_the_task() {
        let rig = rig(AgentMode::Sovereign);
        rig.provider.push(ChatResponse {
            content: "all done".into(),
            tool_calls: vec![],
        });
        let task = enqueue_and_claim(&rig).await;

        rig.worker.run_task(task.clone(), &CancellationToken::new()).await;

        let stored = rig.queue.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.result.unwrap()["response"], "all done");
    }

    #[tokio::test]
    async fn tool_calls_run_then_the_followup_completes() {
        let rig = rig(AgentMode::Sovereign);
        rig.provider.push(ChatResponse {
            content: "let me look".into(),
            tool_calls: vec![ToolCallRequest {
                id: "c1".into(),
                name: "read_file".into(),
                args: json!({"path": "src/main.rs"}),
            }],
        });
        rig.provider.push(ChatResponse {
            content: "found it".into(),
            tool_calls: vec![],
        });
        let task = enqueue_and_claim(&rig).await;

        rig.worker.run_task(task.clone(), &CancellationToken::new()).await;

        let stored = rig.queue.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.result.unwrap()["response"], "found it");
    }

    #[tokio::test]
    async fn plan_mode_denial_feeds_back_into_the_conversation() {
        let rig = rig(AgentMode::Plan);
        rig.provider.push(ChatResponse {
            content: "writing".into(),
            tool_calls: vec![ToolCallRequest {
                id: "c1".into(),
                name: "write_file".into(),
                args: json!({"path": "a.txt", "content": "x"}),
            }],
        });
        rig.provider.push(ChatResponse {
            content: "understood, plan only".into(),
            tool_calls: vec![],
        });
        let task = enqueue_and_claim(&rig).await;

        rig.worker.run_task(task.clone(), &CancellationToken::new()).await;

        // The denial is not fatal: the model gets the refusal as a tool
        // result and can continue.
        let stored = rig.queue.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn runaway_tool_loops_fail_the_task() {
        let rig = rig(AgentMode::Sovereign);
        // Every round returns another tool call; the worker must cut it off.
        for _ in 0..20 {
            rig.provider.push(ChatResponse {
                content: "again".into(),
                tool_calls: vec![ToolCallRequest {
                    id: "c".into(),
                    name: "read_file".into(),
                    args: json!({"path": "a"}),
                }],
            });
        }
        let task = enqueue_and_claim(&rig).await;

        rig.worker.run_task(task.clone(), &CancellationToken::new()).await;

        let stored = rig.queue.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.error.unwrap().contains("tool rounds"));
    }

    #[tokio::test]
    async fn cancelled_session_cancels_the_in_flight_task() {
        let rig = rig(AgentMode::Sovereign);
        let task = enqueue_and_claim(&rig).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        rig.worker.run_task(task.clone(), &cancel).await;

        let stored = rig.queue.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
    }
}
