// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Queue task records.
//!
//! Priority classes map to sorted-set base scores (lower score = dequeued
//! first); a fractional timestamp keeps FIFO order within a class, and
//! requeued retries are demoted by `10 × retry_count` inside their class.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl TaskPriority {
    /// Sorted-set base score for this class.
    pub fn base_score(self) -> f64 {
        match self {
            TaskPriority::High => 0.0,
            TaskPriority::Medium => 50.0,
            TaskPriority::Low => 100.0,
        }
    }

    /// Lenient parse for values arriving over the wire: unknown strings
    /// fall back to `Medium`, matching what the queue has always done.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "high" => TaskPriority::High,
            "low" => TaskPriority::Low,
            _ => TaskPriority::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One queue entry. The serialized form is the authoritative task body
/// stored under `podex:task:{id}`; the `status` field is authoritative over
/// pending/active set membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub session_id: String,
    pub agent_role: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub assigned_worker: Option<String>,
    #[serde(default)]
    pub callback_event: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl Task {
    pub fn new(
        session_id: impl Into<String>,
        agent_role: impl Into<String>,
        description: impl Into<String>,
        priority: TaskPriority,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            agent_role: agent_role.into(),
            description: description.into(),
            priority,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            assigned_worker: None,
            callback_event: None,
            context: HashMap::new(),
            retry_count: 0,
            max_retries: default_max_retries(),
        }
    }

    /// Whether another retry is allowed *after* `retry_count` has been
    /// incremented for the current failure. With the default of 3 the third
    /// failure is terminal — three total attempts.
    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Pending-set score on first enqueue. `fifo_fraction` must be in
    /// `[0, 1)` and monotone within a session so same-class tasks keep
    /// arrival order.
    pub fn enqueue_score(&self, fifo_fraction: f64) -> f64 {
        self.priority.base_score() + fifo_fraction
    }

    /// Pending-set score on requeue: retries are demoted within their class.
    pub fn requeue_score(&self) -> f64 {
        self.priority.base_score() + 10.0 * f64::from(self.retry_count)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_base_scores_are_ordered() {
        assert!(TaskPriority::High.base_score() < TaskPriority::Medium.base_score());
        assert!(TaskPriority::Medium.base_score() < TaskPriority::Low.base_score());
    }

    #[test]
    fn lenient_parse_defaults_to_medium() {
        assert_eq!(TaskPriority::parse_lenient("HIGH"), TaskPriority::High);
        assert_eq!(TaskPriority::parse_lenient("low"), TaskPriority::Low);
        assert_eq!(TaskPriority::parse_lenient("urgent"), TaskPriority::Medium);
        assert_eq!(TaskPriority::parse_lenient(""), TaskPriority::Medium);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn three_failures_exhaust_default_retries() {
        let mut t = Task::new("s1", "coder", "do it", TaskPriority::Medium);
        for _ in 0..2 {
            t.retry_count += 1;
            assert!(t.retries_remaining());
        }
        t.retry_count += 1;
        assert!(!t.retries_remaining());
    }

    #[test]
    fn requeue_score_demotes_within_class() {
        let mut t = Task::new("s1", "coder", "x", TaskPriority::High);
        t.retry_count = 2;
        let score = t.requeue_score();
        assert_eq!(score, 20.0);
        // A retried HIGH task still outranks a fresh MEDIUM task.
        assert!(score < TaskPriority::Medium.base_score());
    }

    #[test]
    fn body_round_trips_through_json() {
        let mut t = Task::new("s1", "coder", "build", TaskPriority::Low);
        t.context
            .insert("branch".into(), serde_json::json!("main"));
        let json = serde_json::to_string(&t).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, t.id);
        assert_eq!(back.priority, TaskPriority::Low);
        assert_eq!(back.context["branch"], serde_json::json!("main"));
        assert_eq!(back.max_retries, 3);
    }
}
