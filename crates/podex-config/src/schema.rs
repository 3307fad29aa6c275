// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use podex_core::Arch;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    /// Directly-dialed Docker daemon hosts. Self-hosted pods register
    /// themselves over the reverse-RPC channel and are not listed here.
    #[serde(default)]
    pub docker_hosts: Vec<DockerHostConfig>,
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the model endpoint (Ollama wire format).
    pub base_url: String,
    pub model: String,
    /// Default operating mode for new agent workers.
    pub default_agent_mode: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".into(),
            model: "llama3.2".into(),
            default_agent_mode: "ask".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address, e.g. `0.0.0.0:8800`.
    pub bind: String,
    /// Mark auth cookies `Secure`. Disable only behind a dev proxy.
    pub secure_cookies: bool,
    /// Failed-auth attempts per minute before an IP is throttled.
    pub auth_failures_per_minute: u32,
    pub auth_failure_burst: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8800".into(),
            secure_cookies: true,
            auth_failures_per_minute: 5,
            auth_failure_burst: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
        }
    }
}

/// A cloud host whose Docker daemon the coordinator dials directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerHostConfig {
    pub id: String,
    pub hostname: String,
    /// Daemon endpoint, e.g. `tcp://10.0.0.5:2376`.
    pub endpoint: String,
    pub architecture: Arch,
    /// Admin-declared schedulable capacity for this host.
    pub total_cpu: f64,
    pub total_memory_mb: u64,
    pub total_disk_gb: u64,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub gpu_kind: Option<String>,
    #[serde(default)]
    pub gpu_count: u32,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementStrategyName {
    BinPack,
    Spread,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub default_strategy: PlacementStrategyName,
    /// A heartbeating host is unhealthy after this many missed intervals.
    pub heartbeat_stale_factor: u32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            default_strategy: PlacementStrategyName::BinPack,
            heartbeat_stale_factor: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Seconds a claimed task may stay in the active set before the sweeper
    /// requeues or fails it.
    pub visibility_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub orphan_gc_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: 300,
            sweep_interval_secs: 30,
            orphan_gc_interval_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub rpc_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Room-local state survives a disconnect for this long to absorb
    /// transient reconnects.
    pub disconnect_grace_secs: u64,
    pub terminal_input_max_bytes: usize,
    pub yjs_max_pending_updates: usize,
    pub yjs_max_session_bytes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_secs: 30,
            heartbeat_interval_secs: 30,
            disconnect_grace_secs: 5,
            terminal_input_max_bytes: 8 * 1024,
            yjs_max_pending_updates: 100,
            yjs_max_session_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Environment variable holding the JWT signing secret. Prefer the env
    /// indirection so secrets never land in version-controlled YAML.
    pub jwt_secret_env: String,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub device_code_ttl_secs: u64,
    pub device_poll_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret_env: "PODEX_JWT_SECRET".into(),
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 30 * 24 * 3600,
            device_code_ttl_secs: 900,
            device_poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Tool exec timeout; per-call override allowed.
    pub tool_timeout_secs: u64,
    pub hook_timeout_secs: u64,
    /// Unresolved approvals are failed by the sweeper after this long.
    pub approval_ttl_secs: u64,
    /// Extra tool names per category, merged over the built-in catalog.
    #[serde(default)]
    pub extra_read_tools: Vec<String>,
    #[serde(default)]
    pub extra_write_tools: Vec<String>,
    #[serde(default)]
    pub extra_command_tools: Vec<String>,
    #[serde(default)]
    pub extra_deploy_tools: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            hook_timeout_secs: 30,
            approval_ttl_secs: 600,
            extra_read_tools: vec![],
            extra_write_tools: vec![],
            extra_command_tools: vec![],
            extra_deploy_tools: vec![],
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
