// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use podex_core::{Result, Task, TaskPriority, TaskStatus};
use podex_redis::{get_json, set_json, RedisApi};

use crate::events::TaskEvent;

pub const TASK_TTL_SECS: u64 = 86_400;
pub const COMPLETED_TTL_SECS: u64 = 3_600;
const COMPLETED_KEEP: isize = 99;

pub const UPDATES_CHANNEL: &str = "podex:tasks:updates";

fn pending_key(session_id: &str) -> String {
    format!("podex:tasks:{session_id}:pending")
}
fn active_key(session_id: &str) -> String {
    format!("podex:tasks:{session_id}:active")
}
fn completed_key(session_id: &str) -> String {
    format!("podex:tasks:{session_id}:completed")
}
fn task_key(task_id: Uuid) -> String {
    format!("podex:task:{task_id}")
}

#[derive(Debug, Clone)]
pub struct EnqueueParams {
    pub session_id: String,
    pub agent_role: String,
    pub description: String,
    pub priority: TaskPriority,
    pub context: HashMap<String, serde_json::Value>,
    pub callback_event: Option<String>,
}

impl EnqueueParams {
    pub fn new(
        session_id: impl Into<String>,
        agent_role: impl Into<String>,
        description: impl Into<String>,
        priority: TaskPriority,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent_role: agent_role.into(),
            description: description.into(),
            priority,
            context: HashMap::new(),
            callback_event: None,
        }
    }
}

/// Counts by status for one session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionStats {
    pub pending: u64,
    pub active: u64,
    pub completed: u64,
}

pub struct TaskQueue {
    redis: Arc<dyn RedisApi>,
    /// Local mirror of the pub/sub channel so in-process consumers (the
    /// realtime hub) never need a Redis round trip.
    events: broadcast::Sender<TaskEvent>,
    /// Strictly-increasing microsecond cursor for FIFO scoring within a
    /// priority class.
    fifo_cursor: AtomicU64,
    /// Seconds a claimed task may sit in the active set before the sweeper
    /// considers it lost.
    visibility_timeout_secs: i64,
}

impl TaskQueue {
    pub fn new(redis: Arc<dyn RedisApi>, visibility_timeout_secs: u64) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            redis,
            events,
            fifo_cursor: AtomicU64::new(0),
            visibility_timeout_secs: visibility_timeout_secs as i64,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Fractional timestamp component of a pending score: strictly
    /// increasing inside this process so same-class tasks keep arrival
    /// order, always < 0.1 so it never crosses into retry demotion.
    fn fifo_fraction(&self) -> f64 {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        let mut prev = self.fifo_cursor.load(Ordering::Relaxed);
        let next = loop {
            let candidate = now.max(prev + 1);
            match self.fifo_cursor.compare_exchange(
                prev,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => break candidate,
                Err(actual) => prev = actual,
            }
        };
        (next % 1_000_000_000) as f64 / 1e10
    }

    // ── enqueue ───────────────────────────────────────────────────────────────

    pub async fn enqueue(&self, params: EnqueueParams) -> Result<Uuid> {
        let mut task = Task::new(
            params.session_id.clone(),
            params.agent_role,
            params.description,
            params.priority,
        );
        task.context = params.context;
        task.callback_event = params.callback_event;

        let score = task.enqueue_score(self.fifo_fraction());
        self.save(&task, TASK_TTL_SECS).await?;
        self.redis
            .zadd(&pending_key(&params.session_id), &task.id.to_string(), score)
            .await?;
        self.publish("task_created", &task).await;

        info!(
            task_id = %task.id,
            session_id = %task.session_id,
            priority = ?task.priority,
            "task enqueued"
        );
        Ok(task.id)
    }

    // ── dequeue / claim ───────────────────────────────────────────────────────

    /// Pop the highest-priority pending task, skipping entries whose body
    /// was garbage-collected (and cleaning up the stale reference).
    pub async fn dequeue(
        &self,
        session_id: &str,
        agent_role: Option<&str>,
        worker_id: &str,
    ) -> Result<Option<Task>> {
        let pending = pending_key(session_id);
        let candidates = self.redis.zrange(&pending, 0, -1).await?;

        for raw_id in candidates {
            let Ok(task_id) = raw_id.parse::<Uuid>() else {
                warn!(%raw_id, "non-uuid member in pending set; dropping");
                self.redis.zrem(&pending, &raw_id).await?;
                continue;
            };
            let Some(task) = self.get_task(task_id).await? else {
                debug!(%task_id, "pending entry without body; cleaning up");
                self.redis.zrem(&pending, &raw_id).await?;
                self.redis.del(&task_key(task_id)).await?;
                continue;
            };
            if let Some(role) = agent_role {
                if task.agent_role != role {
                    continue;
                }
            }
            if self.claim(session_id, task, worker_id).await?.is_some() {
                return self.get_task(task_id).await;
            }
        }
        Ok(None)
    }

    /// Atomic claim: the `ZREM` return value is the authoritative
    /// race-winner signal.
    async fn claim(
        &self,
        session_id: &str,
        mut task: Task,
        worker_id: &str,
    ) -> Result<Option<Uuid>> {
        let removed = self
            .redis
            .zrem(&pending_key(session_id), &task.id.to_string())
            .await?;
        if removed == 0 {
            // Another worker won.
            return Ok(None);
        }

        self.redis
            .sadd(&active_key(session_id), &task.id.to_string())
            .await?;
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        task.assigned_worker = Some(worker_id.to_string());
        self.save(&task, TASK_TTL_SECS).await?;
        self.publish("task_started", &task).await;
        Ok(Some(task.id))
    }

    // ── completion paths ──────────────────────────────────────────────────────

    /// Idempotent: completing an already-completed task succeeds without a
    /// second event.
    pub async fn complete(&self, task_id: Uuid, result: Option<serde_json::Value>) -> Result<bool> {
        let Some(mut task) = self.get_task(task_id).await? else {
            return Ok(false);
        };
        if task.status == TaskStatus::Completed {
            debug!(%task_id, "task already completed");
            return Ok(true);
        }

        self.redis
            .srem(&active_key(&task.session_id), &task_id.to_string())
            .await?;
        let completed = completed_key(&task.session_id);
        self.redis.lpush(&completed, &task_id.to_string()).await?;
        self.redis.ltrim(&completed, 0, COMPLETED_KEEP).await?;

        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.result = result;
        self.save(&task, COMPLETED_TTL_SECS).await?;
        self.publish("task_completed", &task).await;

        info!(%task_id, session_id = %task.session_id, "task completed");
        Ok(true)
    }

    /// Fail a task: requeue (demoted within its class) while retries
    /// remain and `retry` is requested, terminal otherwise.
    pub async fn fail(&self, task_id: Uuid, error: &str, retry: bool) -> Result<bool> {
        let Some(mut task) = self.get_task(task_id).await? else {
            return Ok(false);
        };

        self.redis
            .srem(&active_key(&task.session_id), &task_id.to_string())
            .await?;
        task.error = Some(error.to_string());
        task.retry_count += 1;

        if retry && task.retries_remaining() {
            task.status = TaskStatus::Pending;
            task.started_at = None;
            task.assigned_worker = None;
            self.save(&task, TASK_TTL_SECS).await?;
            self.redis
                .zadd(
                    &pending_key(&task.session_id),
                    &task_id.to_string(),
                    task.requeue_score(),
                )
                .await?;
            warn!(%task_id, retry_count = task.retry_count, %error, "task requeued for retry");
            self.publish("task_retry", &task).await;
        } else {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(Utc::now());
            self.save(&task, COMPLETED_TTL_SECS).await?;
            tracing::error!(%task_id, retry_count = task.retry_count, %error, "task failed permanently");
            self.publish("task_failed", &task).await;
        }
        Ok(true)
    }

    /// Cancel a pending or running task; terminal tasks cannot be
    /// cancelled.
    pub async fn cancel(&self, task_id: Uuid) -> Result<bool> {
        let Some(mut task) = self.get_task(task_id).await? else {
            return Ok(false);
        };
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Running) {
            return Ok(false);
        }

        self.redis
            .zrem(&pending_key(&task.session_id), &task_id.to_string())
            .await?;
        self.redis
            .srem(&active_key(&task.session_id), &task_id.to_string())
            .await?;

        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        self.save(&task, COMPLETED_TTL_SECS).await?;
        self.publish("task_cancelled", &task).await;

        info!(%task_id, "task cancelled");
        Ok(true)
    }

    // ── queries ───────────────────────────────────────────────────────────────

    pub async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        get_json(self.redis.as_ref(), &task_key(task_id)).await
    }

    pub async fn pending_tasks(
        &self,
        session_id: &str,
        agent_role: Option<&str>,
        limit: isize,
    ) -> Result<Vec<Task>> {
        let ids = self
            .redis
            .zrange(&pending_key(session_id), 0, limit - 1)
            .await?;
        let mut tasks = Vec::new();
        for raw in ids {
            if let Ok(id) = raw.parse::<Uuid>() {
                if let Some(task) = self.get_task(id).await? {
                    if agent_role.is_none() || agent_role == Some(task.agent_role.as_str()) {
                        tasks.push(task);
                    }
                }
            }
        }
        Ok(tasks)
    }

    pub async fn active_tasks(&self, session_id: &str) -> Result<Vec<Task>> {
        let ids = self.redis.smembers(&active_key(session_id)).await?;
        let mut tasks = Vec::new();
        for raw in ids {
            if let Ok(id) = raw.parse::<Uuid>() {
                if let Some(task) = self.get_task(id).await? {
                    tasks.push(task);
                }
            }
        }
        Ok(tasks)
    }

    pub async fn session_stats(&self, session_id: &str) -> Result<SessionStats> {
        Ok(SessionStats {
            pending: self.redis.zcard(&pending_key(session_id)).await?,
            active: self.redis.scard(&active_key(session_id)).await?,
            completed: self.redis.llen(&completed_key(session_id)).await?,
        })
    }

    /// Drop every task and queue structure for a session. Returns the
    /// number of task bodies removed.
    pub async fn clear_session(&self, session_id: &str) -> Result<usize> {
        let pending = self.redis.zrange(&pending_key(session_id), 0, -1).await?;
        let active = self.redis.smembers(&active_key(session_id)).await?;
        let completed = self.redis.lrange(&completed_key(session_id), 0, -1).await?;

        let mut all: Vec<String> = pending;
        all.extend(active);
        all.extend(completed);
        all.sort();
        all.dedup();

        for raw in &all {
            if let Ok(id) = raw.parse::<Uuid>() {
                self.redis.del(&task_key(id)).await?;
            }
        }
        self.redis.del(&pending_key(session_id)).await?;
        self.redis.del(&active_key(session_id)).await?;
        self.redis.del(&completed_key(session_id)).await?;

        info!(%session_id, count = all.len(), "session tasks cleared");
        Ok(all.len())
    }

    // ── background maintenance ────────────────────────────────────────────────

    /// Fail-and-requeue every active task whose claim outlived the
    /// visibility timeout. Returns the ids that were timed out.
    pub async fn check_timed_out_tasks(&self, session_id: &str) -> Result<Vec<Uuid>> {
        let active = active_key(session_id);
        let ids = self.redis.smembers(&active).await?;
        let now = Utc::now();
        let mut timed_out = Vec::new();

        for raw in ids {
            let Ok(task_id) = raw.parse::<Uuid>() else {
                self.redis.srem(&active, &raw).await?;
                continue;
            };
            let Some(task) = self.get_task(task_id).await? else {
                // Orphaned reference.
                self.redis.srem(&active, &raw).await?;
                self.redis.del(&task_key(task_id)).await?;
                continue;
            };
            if task.status != TaskStatus::Running {
                continue;
            }
            let Some(started_at) = task.started_at else {
                continue;
            };
            let elapsed = (now - started_at).num_seconds();
            if elapsed > self.visibility_timeout_secs {
                warn!(%task_id, elapsed, "task exceeded visibility timeout");
                self.fail(task_id, &format!("timed out after {elapsed} s"), true)
                    .await?;
                timed_out.push(task_id);
            }
        }
        Ok(timed_out)
    }

    /// Delete task bodies no queue structure references for this session.
    pub async fn cleanup_orphaned_tasks(&self, session_id: &str) -> Result<usize> {
        let referenced: std::collections::HashSet<String> = {
            let mut set = std::collections::HashSet::new();
            set.extend(self.redis.zrange(&pending_key(session_id), 0, -1).await?);
            set.extend(self.redis.smembers(&active_key(session_id)).await?);
            set.extend(self.redis.lrange(&completed_key(session_id), 0, -1).await?);
            set
        };

        let mut cleaned = 0;
        for key in self.redis.scan_match("podex:task:*").await? {
            let Some(raw_id) = key.rsplit(':').next() else {
                continue;
            };
            let Ok(task_id) = raw_id.parse::<Uuid>() else {
                continue;
            };
            let Some(task) = self.get_task(task_id).await? else {
                continue;
            };
            if task.session_id == session_id && !referenced.contains(raw_id) {
                self.redis.del(&key).await?;
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            info!(%session_id, cleaned, "orphaned task bodies removed");
        }
        Ok(cleaned)
    }

    // ── internals ─────────────────────────────────────────────────────────────

    async fn save(&self, task: &Task, ttl_secs: u64) -> Result<()> {
        set_json(self.redis.as_ref(), &task_key(task.id), task, Some(ttl_secs)).await
    }

    async fn publish(&self, event: &str, task: &Task) {
        let ev = TaskEvent {
            event: event.to_string(),
            task_id: task.id,
            session_id: task.session_id.clone(),
            agent_role: task.agent_role.clone(),
            status: task.status,
            timestamp: Utc::now(),
        };
        // Local mirror first (no subscribers is fine) …
        let _ = self.events.send(ev.clone());
        // … then the cross-process channel; a publish failure must never
        // fail the queue operation itself.
        if let Ok(payload) = serde_json::to_string(&ev) {
            if let Err(e) = self.redis.publish(UPDATES_CHANNEL, &payload).await {
                warn!(event = %ev.event, "task event publish failed: {e}");
            }
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
