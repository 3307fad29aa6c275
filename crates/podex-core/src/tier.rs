// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Workspace tiers and the tier → hardware catalog.
//!
//! A tier is a closed enumeration; `Tier::requirements()` is a pure function
//! with no mutation anywhere. Unknown tier strings coming from external
//! callers are rejected with a validation error, never silently coerced.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::host::Arch;

/// Closed set of workspace tiers. Admins may extend the hardware catalog's
/// numbers but not rename or add variants at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Starter,
    Pro,
    Team,
    Enterprise,
    ProX86,
    TeamX86,
    ProArm,
    TeamArm,
    GpuT4,
    GpuA100,
}

/// Immutable resource request derived from a tier (plus optional GPU
/// escalation from the workspace config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu_cores: f64,
    pub memory_mb: u64,
    pub disk_gb: u64,
    /// CPU architecture the workspace image is built for; placement only
    /// considers hosts of the same architecture.
    #[serde(default = "default_arch")]
    pub arch: Arch,
    #[serde(default)]
    pub gpu_required: bool,
    #[serde(default)]
    pub gpu_kind: Option<String>,
    #[serde(default = "one")]
    pub gpu_count: u32,
    /// Host labels that must all match for admission.
    #[serde(default)]
    pub required_labels: HashMap<String, String>,
    /// The requesting tier; hosts may restrict which tiers they admit via
    /// their `podex.tiers` label.
    #[serde(default)]
    pub tier: Option<Tier>,
}

fn one() -> u32 {
    1
}

fn default_arch() -> Arch {
    Arch::X86_64
}

impl ResourceRequirements {
    pub fn new(cpu_cores: f64, memory_mb: u64, disk_gb: u64) -> Self {
        Self {
            cpu_cores,
            memory_mb,
            disk_gb,
            arch: default_arch(),
            gpu_required: false,
            gpu_kind: None,
            gpu_count: 1,
            required_labels: HashMap::new(),
            tier: None,
        }
    }

    pub fn on_arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }

    /// The same request with a GPU demand attached.
    pub fn with_gpu(mut self, kind: impl Into<String>, count: u32) -> Self {
        self.gpu_required = true;
        self.gpu_kind = Some(kind.into());
        self.gpu_count = count;
        self
    }

    /// The same request constrained to hosts carrying `key=value`.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.required_labels.insert(key.into(), value.into());
        self
    }
}

/// One row of the hardware catalog: what a tier buys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareSpec {
    pub arch: crate::host::Arch,
    pub vcpu: f64,
    pub memory_mb: u64,
    pub disk_gb_default: u64,
    pub disk_gb_max: u64,
    #[serde(default)]
    pub accelerator: Option<Accelerator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accelerator {
    pub kind: String,
    pub count: u32,
    pub memory_mb: u64,
}

impl Tier {
    /// Parse an externally-supplied tier string. Unknown values are a
    /// validation error — callers must never coerce.
    pub fn parse(s: &str) -> Result<Self, Error> {
        serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
            .map_err(|_| Error::Validation(format!("unknown tier: {s}")))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Starter => "starter",
            Tier::Pro => "pro",
            Tier::Team => "team",
            Tier::Enterprise => "enterprise",
            Tier::ProX86 => "pro_x86",
            Tier::TeamX86 => "team_x86",
            Tier::ProArm => "pro_arm",
            Tier::TeamArm => "team_arm",
            Tier::GpuT4 => "gpu_t4",
            Tier::GpuA100 => "gpu_a100",
        }
    }

    /// The full hardware catalog row for this tier.
    pub fn hardware(&self) -> HardwareSpec {
        match self {
            Tier::Free => spec(Arch::X86_64, 0.5, 512, 5, 10),
            Tier::Starter => spec(Arch::X86_64, 1.0, 1024, 10, 20),
            Tier::Pro => spec(Arch::X86_64, 2.0, 4096, 20, 50),
            Tier::Team => spec(Arch::X86_64, 4.0, 8192, 50, 100),
            Tier::Enterprise => spec(Arch::X86_64, 8.0, 16384, 100, 250),
            Tier::ProX86 => spec(Arch::X86_64, 2.0, 4096, 20, 50),
            Tier::TeamX86 => spec(Arch::X86_64, 4.0, 8192, 50, 100),
            Tier::ProArm => spec(Arch::Arm64, 2.0, 4096, 20, 50),
            Tier::TeamArm => spec(Arch::Arm64, 4.0, 8192, 50, 100),
            Tier::GpuT4 => HardwareSpec {
                accelerator: Some(Accelerator {
                    kind: "t4".into(),
                    count: 1,
                    memory_mb: 16384,
                }),
                ..spec(Arch::X86_64, 4.0, 16384, 50, 100)
            },
            Tier::GpuA100 => HardwareSpec {
                accelerator: Some(Accelerator {
                    kind: "a100_40gb".into(),
                    count: 1,
                    memory_mb: 40960,
                }),
                ..spec(Arch::X86_64, 8.0, 32768, 100, 250)
            },
        }
    }

    /// Pure tier → resource mapping used by placement. Carries the tier's
    /// architecture and identity so the filter pipeline can enforce both.
    pub fn requirements(&self) -> ResourceRequirements {
        let hw = self.hardware();
        let mut req =
            ResourceRequirements::new(hw.vcpu, hw.memory_mb, hw.disk_gb_default).on_arch(hw.arch);
        req.tier = Some(*self);
        if let Some(acc) = hw.accelerator {
            req = req.with_gpu(acc.kind, acc.count);
        }
        req
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn spec(arch: Arch, vcpu: f64, memory_mb: u64, disk: u64, disk_max: u64) -> HardwareSpec {
    HardwareSpec {
        arch,
        vcpu,
        memory_mb,
        disk_gb_default: disk,
        disk_gb_max: disk_max,
        accelerator: None,
    }
}

/// The admin-extendable hardware catalog: built-in rows per tier, with
/// per-tier overrides layered on top. Tiers can be re-specified but never
/// renamed or added — the enum is closed.
#[derive(Debug, Default, Clone)]
pub struct HardwareCatalog {
    overrides: std::collections::HashMap<Tier, HardwareSpec>,
}

impl HardwareCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hardware(&self, tier: Tier) -> HardwareSpec {
        self.overrides
            .get(&tier)
            .cloned()
            .unwrap_or_else(|| tier.hardware())
    }

    pub fn requirements(&self, tier: Tier) -> ResourceRequirements {
        let hw = self.hardware(tier);
        let mut req =
            ResourceRequirements::new(hw.vcpu, hw.memory_mb, hw.disk_gb_default).on_arch(hw.arch);
        req.tier = Some(tier);
        if let Some(acc) = hw.accelerator {
            req = req.with_gpu(acc.kind, acc.count);
        }
        req
    }

    /// Admin override. A max below the default is invalid.
    pub fn set(&mut self, tier: Tier, hw: HardwareSpec) -> Result<(), Error> {
        if hw.disk_gb_max < hw.disk_gb_default {
            return Err(Error::Validation(format!(
                "disk_gb_max {} below default {}",
                hw.disk_gb_max, hw.disk_gb_default
            )));
        }
        self.overrides.insert(tier, hw);
        Ok(())
    }

    /// Drop an override, reverting the tier to its built-in row. This is a
    /// hard delete; callers expecting a mark-unavailable soft delete get a
    /// warning instead. Workspaces already placed on the old numbers are
    /// untouched.
    pub fn remove(&mut self, tier: Tier) -> bool {
        let removed = self.overrides.remove(&tier).is_some();
        if removed {
            tracing::warn!(%tier, "hardware override hard-deleted; existing subscribers keep their placements");
        }
        removed
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
