// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Workspace records and the lifecycle state machine.
//!
//! State transitions are all driven through the orchestrator — the single
//! writer. This module only encodes which transitions are legal so that
//! invalid ones fail fast instead of being silently absorbed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::tier::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    Creating,
    Running,
    Stopped,
    /// Transient marker during cold migration; a failure past this point
    /// leaves the workspace in `Error`, never silently resumed on source.
    Migrating,
    Error,
    /// Terminal.
    Deleted,
}

impl WorkspaceStatus {
    /// Legal transitions: `creating → running`, `running ↔ stopped`,
    /// `running/stopped → migrating → running`, any → `error`,
    /// any non-deleted → `deleted`.
    pub fn can_transition_to(self, next: WorkspaceStatus) -> bool {
        use WorkspaceStatus::*;
        match (self, next) {
            (Deleted, _) => false,
            (_, Deleted) | (_, Error) => true,
            (Creating, Running) => true,
            (Running, Stopped) | (Stopped, Running) => true,
            (Running, Migrating) | (Stopped, Migrating) => true,
            (Migrating, Running) | (Migrating, Stopped) => true,
            (Error, Running) | (Error, Stopped) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == WorkspaceStatus::Deleted
    }
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkspaceStatus::Creating => "creating",
            WorkspaceStatus::Running => "running",
            WorkspaceStatus::Stopped => "stopped",
            WorkspaceStatus::Migrating => "migrating",
            WorkspaceStatus::Error => "error",
            WorkspaceStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Caller-supplied configuration for a new workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub tier: Option<Tier>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub repositories: Vec<String>,
    /// GPU escalation on top of the tier's baseline.
    #[serde(default)]
    pub gpu_enabled: bool,
    #[serde(default)]
    pub gpu_kind: Option<String>,
    /// Keep data volumes across delete.
    #[serde(default)]
    pub preserve_data: bool,
}

/// A container workspace bound to exactly one session and (once placed)
/// exactly one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: String,
    pub status: WorkspaceStatus,
    pub tier: Tier,
    pub image: String,
    /// Nullable until placed.
    pub host_id: Option<String>,
    pub container_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub preserve_data: bool,
    /// Populated when status is `Error`.
    #[serde(default)]
    pub error: Option<String>,
}

impl Workspace {
    /// Validate and apply a status change. Returns `Conflict` for illegal
    /// transitions.
    pub fn transition(&mut self, next: WorkspaceStatus) -> Result<(), Error> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Conflict(format!(
                "workspace {} cannot go {} -> {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
