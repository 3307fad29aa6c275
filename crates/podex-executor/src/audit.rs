// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Structured audit records for tool invocations.
//!
//! Every dispatch writes one entry: to the tracing pipeline (for the
//! operator) and into a bounded in-process ring (for the session debug
//! surface). Argument values are summarized, never recorded verbatim —
//! file contents and command output do not belong in an audit stream.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

const AUDIT_CAP: usize = 1000;
const SUMMARY_VALUE_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Allowed,
    Denied,
    ApprovalPending,
    ApprovalDenied,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: String,
    pub tool: String,
    pub args_summary: String,
    #[serde(default)]
    pub approval_id: Option<Uuid>,
    pub outcome: AuditOutcome,
    pub duration_ms: u64,
}

#[derive(Default)]
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: AuditEntry) {
        info!(
            session_id = %entry.session_id,
            agent_id = %entry.agent_id,
            tool = %entry.tool,
            outcome = ?entry.outcome,
            duration_ms = entry.duration_ms,
            args = %entry.args_summary,
            "tool audit"
        );
        let mut entries = match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push_back(entry);
        while entries.len() > AUDIT_CAP {
            entries.pop_front();
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.iter().rev().take(limit).cloned().collect()
    }
}

/// Compress tool arguments into a one-line summary: keys always, values
/// truncated, nested structures reduced to their type.
pub fn summarize_args(args: &Value) -> String {
    let Some(object) = args.as_object() else {
        return truncate(&args.to_string());
    };
    let parts: Vec<String> = object
        .iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("{key}={}", truncate(s)),
            Value::Array(a) => format!("{key}=[{} items]", a.len()),
            Value::Object(o) => format!("{key}={{{} keys}}", o.len()),
            other => format!("{key}={other}"),
        })
        .collect();
    parts.join(" ")
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= SUMMARY_VALUE_CHARS {
        s.to_string()
    } else {
        let head: String = s.chars().take(SUMMARY_VALUE_CHARS).collect();
        format!("{head}…")
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
