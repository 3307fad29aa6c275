// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Fleet hosts: capacity snapshots consumed by the placement engine.
//!
//! A host record is created at registration and refreshed from heartbeats.
//! `draining` means no new placements but existing workloads are honored;
//! `offline` means unreachable and workloads on it are marked error.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Active,
    Draining,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    #[serde(rename = "x86_64", alias = "amd64")]
    X86_64,
    #[serde(rename = "arm64", alias = "aarch64")]
    Arm64,
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arch::X86_64 => f.write_str("x86_64"),
            Arch::Arm64 => f.write_str("arm64"),
        }
    }
}

/// Live capacity snapshot of one compute host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCapacity {
    pub host_id: String,
    pub hostname: String,

    pub total_cpu: f64,
    pub total_memory_mb: u64,
    pub total_disk_gb: u64,

    pub used_cpu: f64,
    pub used_memory_mb: u64,
    pub used_disk_gb: u64,

    pub active_workspaces: u32,

    /// Accelerator inventory: kind plus totals. `gpu_free` already accounts
    /// for workspaces currently bound to this host.
    #[serde(default)]
    pub gpu_kind: Option<String>,
    #[serde(default)]
    pub gpu_total: u32,
    #[serde(default)]
    pub gpu_free: u32,

    pub architecture: Arch,
    #[serde(default)]
    pub region: Option<String>,
    pub status: HostStatus,
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Last heartbeat received from this host, if it heartbeats at all
    /// (self-hosted pods do; directly-dialed daemons are considered fresh
    /// whenever their stats call succeeds).
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl HostCapacity {
    pub fn free_cpu(&self) -> f64 {
        (self.total_cpu - self.used_cpu).max(0.0)
    }

    pub fn free_memory_mb(&self) -> u64 {
        self.total_memory_mb.saturating_sub(self.used_memory_mb)
    }

    pub fn free_disk_gb(&self) -> u64 {
        self.total_disk_gb.saturating_sub(self.used_disk_gb)
    }

    /// Heartbeat freshness check. A host whose last heartbeat is older than
    /// `max_age_secs` is treated as unhealthy by placement even if its
    /// status field still says active. Hosts without heartbeats pass.
    pub fn heartbeat_fresh(&self, now: DateTime<Utc>, max_age_secs: i64) -> bool {
        match self.last_heartbeat {
            Some(at) => (now - at).num_seconds() <= max_age_secs,
            None => true,
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
