// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end coordinator flow over in-memory components: a user turn is
//! enqueued, the agent worker drives the mock model, tool calls pass the
//! permission engine (with a real approval round-trip), and results land
//! back in the queue and the session room.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use podex_core::{AgentMode, Result, TaskPriority, TaskStatus};
use podex_executor::{
    ApprovalBroker, AuditLog, ToolCall, ToolCatalog, ToolExecutor, WorkspaceBridge,
};
use podex_hub::{Hub, HubLimits, MemoryPodDirectory, PodRegistry, SessionDirectory, YjsState};
use podex_llm::{ChatResponse, MockProvider, ToolCallRequest};
use podex_agent::{AgentWorker, WorkerConfig};
use podex_queue::{EnqueueParams, TaskQueue};
use podex_redis::MemoryRedis;

struct OpenSessions;

#[async_trait]
impl SessionDirectory for OpenSessions {
    async fn verify_user(&self, _token: &str) -> Result<Option<String>> {
        Ok(Some("u1".into()))
    }
    async fn user_owns_session(&self, _user: &str, _session: &str) -> Result<bool> {
        Ok(true)
    }
    async fn workspace_session(&self, _workspace: &str) -> Result<Option<String>> {
        Ok(None)
    }
    async fn workspace_pod(&self, _workspace: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

struct EchoBridge;

#[async_trait]
impl WorkspaceBridge for EchoBridge {
    async fn invoke(&self, call: &ToolCall) -> Result<serde_json::Value> {
        Ok(json!({ "tool": call.name, "ok": true }))
    }
}

struct World {
    queue: Arc<TaskQueue>,
    provider: Arc<MockProvider>,
    executor: Arc<ToolExecutor>,
    hub: Arc<Hub>,
    worker: AgentWorker,
}

fn world(mode: AgentMode) -> World {
    let redis = Arc::new(MemoryRedis::new());
    let queue = Arc::new(TaskQueue::new(redis, 300));
    let provider = Arc::new(MockProvider::new());
    let broker = Arc::new(ApprovalBroker::new(Duration::from_secs(600)));
    let hub = Arc::new(Hub::new(
        Arc::new(PodRegistry::new()),
        Arc::new(OpenSessions),
        Arc::new(MemoryPodDirectory::new()),
        Arc::new(YjsState::new(100, 1024 * 1024)),
        HubLimits::default(),
    ));
    let executor = Arc::new(ToolExecutor::new(
        "s1",
        "agent-1",
        "/workspace",
        mode,
        Arc::new(ToolCatalog::builtin()),
        broker.clone(),
        Arc::new(AuditLog::new()),
        Arc::new(EchoBridge),
    ));
    let worker = AgentWorker::new(
        WorkerConfig::new("s1", "coder"),
        queue.clone(),
        provider.clone(),
        executor.clone(),
        hub.clone(),
    );
    World {
        queue,
        provider,
        executor,
        hub,
        worker,
    }
}

#[tokio::test]
async fn user_turn_flows_from_queue_to_completion() {
    let w = world(AgentMode::Sovereign);
    w.provider.push(ChatResponse {
        content: "inspecting".into(),
        tool_calls: vec![ToolCallRequest {
            id: "c1".into(),
            name: "read_file".into(),
            args: json!({"path": "src/lib.rs"}),
        }],
    });
    w.provider.push(ChatResponse {
        content: "done, the bug is in lib.rs".into(),
        tool_calls: vec![],
    });

    w.queue
        .enqueue(EnqueueParams::new(
            "s1",
            "coder",
            "find the bug",
            TaskPriority::High,
        ))
        .await
        .unwrap();

    let task = w.queue.dequeue("s1", Some("coder"), "w1").await.unwrap().unwrap();
    w.worker.run_task(task.clone(), &CancellationToken::new()).await;

    let done = w.queue.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result.unwrap()["response"], "done, the bug is in lib.rs");
}

#[tokio::test]
async fn command_approval_round_trip_unblocks_the_agent() {
    let w = world(AgentMode::Ask);
    w.provider.push(ChatResponse {
        content: "running tests".into(),
        tool_calls: vec![ToolCallRequest {
            id: "c1".into(),
            name: "run_command".into(),
            args: json!({"command": "cargo test"}),
        }],
    });
    w.provider.push(ChatResponse {
        content: "tests pass".into(),
        tool_calls: vec![],
    });

    w.queue
        .enqueue(EnqueueParams::new("s1", "coder", "run the tests", TaskPriority::Medium))
        .await
        .unwrap();
    let task = w.queue.dequeue("s1", Some("coder"), "w1").await.unwrap().unwrap();

    // A browser client joined to the session sees the agent-attention
    // notification carrying the approval id; "the HTTP surface" then
    // resolves it, which unblocks the worker.
    let (tx, mut room_rx) = tokio::sync::mpsc::channel(64);
    let mut client = podex_hub::ClientConn::new("u1", tx);
    w.hub
        .handle_client_message(
            &mut client,
            podex_hub::ClientMessage::SessionJoin {
                session_id: "s1".into(),
            },
        )
        .await;

    let executor = w.executor.clone();
    let resolver = tokio::spawn(async move {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), room_rx.recv())
                .await
                .expect("no approval notification arrived")
                .expect("room channel closed");
            if let podex_hub::ServerMessage::AgentAttention { attention_id, .. } = message {
                let approval_id: uuid::Uuid = attention_id.parse().unwrap();
                executor.resolve_approval(approval_id, true, true).unwrap();
                break;
            }
        }
    });

    w.worker.run_task(task.clone(), &CancellationToken::new()).await;
    resolver.await.unwrap();

    let done = w.queue.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    // The approval carried add_to_allowlist, so the command is persisted.
    assert!(w
        .executor
        .allowlist()
        .contains(&"cargo test".to_string()));
}

#[tokio::test]
async fn retry_then_permanent_failure_via_visibility_timeout() {
    let redis = Arc::new(MemoryRedis::new());
    let queue = Arc::new(TaskQueue::new(redis, 0));
    let id = queue
        .enqueue(EnqueueParams::new("s1", "coder", "hangs forever", TaskPriority::Medium))
        .await
        .unwrap();

    for _ in 0..3 {
        queue.dequeue("s1", None, "w1").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        queue.check_timed_out_tasks("s1").await.unwrap();
    }

    let task = queue.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("timed out"));
    assert_eq!(task.retry_count, 3);
}
