// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use podex_core::TaskStatus;

/// One message on `podex:tasks:updates` (and the local broadcast mirror).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    /// `task_created`, `task_started`, `task_completed`, `task_retry`,
    /// `task_failed`, or `task_cancelled`.
    pub event: String,
    pub task_id: Uuid,
    pub session_id: String,
    pub agent_role: String,
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_with_lowercase_status() {
        let ev = TaskEvent {
            event: "task_started".into(),
            task_id: Uuid::new_v4(),
            session_id: "s1".into(),
            agent_role: "coder".into(),
            status: TaskStatus::Running,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"status\":\"running\""));
        let back: TaskEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id, ev.task_id);
    }
}
