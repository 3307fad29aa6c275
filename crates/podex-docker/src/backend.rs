// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use podex_core::{HostCapacity, Result};

/// All workspace containers run as this non-root user.
pub const EXEC_USER: &str = "dev";

/// Everything needed to create one workspace container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name; creation is idempotent on `(host_id, name)`.
    pub name: String,
    pub image: String,
    pub cpu_limit: f64,
    pub memory_limit_mb: u64,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Must contain the podex ownership labels; [`ContainerSpec::validate`]
    /// rejects specs that lost them.
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default = "default_network")]
    pub network_mode: String,
}

fn default_network() -> String {
    "bridge".into()
}

/// Labels every workspace container must carry.
pub const REQUIRED_LABELS: [&str; 4] = [
    "podex.workspace_id",
    "podex.user_id",
    "podex.session_id",
    "podex.tier",
];

impl ContainerSpec {
    pub fn validate(&self) -> Result<()> {
        for label in REQUIRED_LABELS {
            if !self.labels.contains_key(label) {
                return Err(podex_core::Error::Validation(format!(
                    "container spec is missing required label {label}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// None = [`crate::DEFAULT_EXEC_TIMEOUT_SECS`].
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
            environment: HashMap::new(),
            timeout: None,
        }
    }
}

/// Exit code 0 = success; non-zero passes through from the process; −1 is
/// synthetic for orchestrator-level failures and `stderr` then carries a
/// human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_mb: u64,
    pub memory_limit_mb: u64,
}

/// Uniform container operations for one host.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Create a container, returning its id. Idempotent on the spec name:
    /// an existing container with matching labels is returned as-is; one
    /// with different labels is a conflict.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;
    async fn start_container(&self, container_id: &str) -> Result<()>;
    async fn stop_container(&self, container_id: &str) -> Result<()>;
    /// Force-remove; `remove_volumes = false` retains data volumes.
    async fn remove_container(&self, container_id: &str, remove_volumes: bool) -> Result<()>;
    /// Run a command inside the container as [`EXEC_USER`].
    async fn exec(&self, container_id: &str, req: &ExecRequest) -> Result<ExecResult>;
    async fn stats(&self, container_id: &str) -> Result<ContainerStats>;
    /// Live capacity snapshot of the whole host.
    async fn server_stats(&self) -> Result<HostCapacity>;
}

// ── Unit tests ────────────────────────────────────────────────────────────────
