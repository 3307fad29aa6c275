// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use podex_core::{HostCapacity, HostStatus, ResourceRequirements};

/// A host projected past this utilization on any axis is rejected.
const MAX_PROJECTED_UTILIZATION: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum PlacementStrategy {
    /// Most-loaded host that still fits.
    BinPack,
    /// Least-loaded host.
    Spread,
    /// Pin to a specific host if feasible, else fall back to the default.
    Affinity { host_id: String },
    /// Restrict to a region, then apply the default strategy.
    RegionLocality { region: String },
}

/// Immutable result of one placement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub success: bool,
    pub host_id: Option<String>,
    pub hostname: Option<String>,
    pub score: f64,
    pub reason: String,
}

impl PlacementDecision {
    fn placed(host: &HostCapacity, score: f64, reason: String) -> Self {
        Self {
            success: true,
            host_id: Some(host.host_id.clone()),
            hostname: Some(host.hostname.clone()),
            score,
            reason,
        }
    }

    fn failed(reason: String) -> Self {
        Self {
            success: false,
            host_id: None,
            hostname: None,
            score: 0.0,
            reason,
        }
    }
}

pub struct PlacementEngine {
    default_bin_pack: bool,
    /// Hosts whose last heartbeat is older than this are excluded like
    /// offline hosts.
    heartbeat_max_age_secs: i64,
}

impl PlacementEngine {
    pub fn new(default_bin_pack: bool, heartbeat_max_age_secs: i64) -> Self {
        Self {
            default_bin_pack,
            heartbeat_max_age_secs,
        }
    }

    /// Rank `hosts` for `req` and pick one.
    ///
    /// On failure the reason names the first filter axis on which every
    /// remaining candidate was eliminated, e.g.
    /// `"no host with >= 2 GPUs of kind a100_40gb in region us-east"`.
    pub fn find_placement(
        &self,
        hosts: &[HostCapacity],
        req: &ResourceRequirements,
        strategy: Option<&PlacementStrategy>,
        now: DateTime<Utc>,
    ) -> PlacementDecision {
        let (candidates, region_suffix, pinned) = match strategy {
            Some(PlacementStrategy::RegionLocality { region }) => {
                let in_region: Vec<&HostCapacity> = hosts
                    .iter()
                    .filter(|h| h.region.as_deref() == Some(region.as_str()))
                    .collect();
                if in_region.is_empty() {
                    return PlacementDecision::failed(format!("no host in region {region}"));
                }
                (in_region, format!(" in region {region}"), None)
            }
            Some(PlacementStrategy::Affinity { host_id }) => {
                (hosts.iter().collect(), String::new(), Some(host_id.as_str()))
            }
            _ => (hosts.iter().collect(), String::new(), None),
        };

        // Affinity: try the pinned host first; fall back to the default
        // strategy over the whole snapshot when it does not fit.
        if let Some(pin) = pinned {
            if let Some(host) = candidates.iter().copied().find(|h| h.host_id == pin) {
                if let Some(score) = self.admit(host, req, now, self.default_bin_pack) {
                    return PlacementDecision::placed(
                        host,
                        score,
                        format!("affinity placement on {}", host.hostname),
                    );
                }
            }
            debug!(%pin, "affinity host infeasible; falling back to default strategy");
        }

        let bin_pack = match strategy {
            Some(PlacementStrategy::BinPack) => true,
            Some(PlacementStrategy::Spread) => false,
            _ => self.default_bin_pack,
        };

        match self.rank(&candidates, req, now, bin_pack) {
            Ok((host, score)) => {
                let label = if bin_pack { "bin-pack" } else { "spread" };
                PlacementDecision::placed(
                    host,
                    score,
                    format!("{label} placement on {} (score {score:.3})", host.hostname),
                )
            }
            Err(axis) => PlacementDecision::failed(format!("{axis}{region_suffix}")),
        }
    }

    /// Apply the filter pipeline, then score survivors. `Err` carries the
    /// description of the first axis that eliminated every candidate.
    fn rank<'h>(
        &self,
        hosts: &[&'h HostCapacity],
        req: &ResourceRequirements,
        now: DateTime<Utc>,
        bin_pack: bool,
    ) -> Result<(&'h HostCapacity, f64), String> {
        // (1) status == active, with fresh heartbeats.
        let active: Vec<&HostCapacity> = hosts
            .iter()
            .copied()
            .filter(|h| {
                h.status == HostStatus::Active && h.heartbeat_fresh(now, self.heartbeat_max_age_secs)
            })
            .collect();
        if active.is_empty() {
            return Err("no active host".to_string());
        }

        // (2) architecture match.
        let arch_ok: Vec<&HostCapacity> = active
            .into_iter()
            .filter(|h| h.architecture == req.arch)
            .collect();
        if arch_ok.is_empty() {
            return Err(format!("no host of architecture {}", req.arch));
        }

        // (3) GPU inventory: matching accelerator kind with enough free
        // units.
        let gpu_ok: Vec<&HostCapacity> = if req.gpu_required {
            let survivors: Vec<&HostCapacity> = arch_ok
                .iter()
                .copied()
                .filter(|h| gpu_matches(h, req))
                .collect();
            if survivors.is_empty() {
                let kind = req.gpu_kind.as_deref().unwrap_or("any");
                return Err(format!(
                    "no host with >= {} GPUs of kind {kind}",
                    req.gpu_count
                ));
            }
            survivors
        } else {
            arch_ok
        };

        // (4) remaining cpu/mem/disk.
        let fits: Vec<&HostCapacity> = gpu_ok
            .into_iter()
            .filter(|h| fits_capacity(h, req))
            .collect();
        if fits.is_empty() {
            return Err(format!(
                "no host with {} free cpu cores, {} MB memory and {} GB disk",
                req.cpu_cores, req.memory_mb, req.disk_gb
            ));
        }

        // (5) tier-/label-based admission rules.
        let admitted: Vec<&HostCapacity> = fits
            .into_iter()
            .filter(|h| admission_ok(h, req))
            .collect();
        if admitted.is_empty() {
            return Err(admission_reason(req));
        }

        // Score survivors; the projection cap is part of scoring.
        let mut scored: Vec<(&HostCapacity, f64)> = Vec::new();
        for host in admitted {
            if let Some(score) = projected_score(host, req, bin_pack) {
                scored.push((host, score));
            }
        }
        if scored.is_empty() {
            return Err(format!(
                "no host below {:.0}% projected utilization",
                MAX_PROJECTED_UTILIZATION * 100.0
            ));
        }

        // Highest score wins; deterministic (hostname, host_id) tie-break.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.hostname.cmp(&b.0.hostname))
                .then_with(|| a.0.host_id.cmp(&b.0.host_id))
        });
        let (host, score) = scored[0];
        Ok((host, score))
    }

    /// Full admission for one host (used for affinity pins, which bypass
    /// the staged pipeline): every filter plus the projection cap, in the
    /// same order `rank` applies them.
    fn admit(
        &self,
        host: &HostCapacity,
        req: &ResourceRequirements,
        now: DateTime<Utc>,
        bin_pack: bool,
    ) -> Option<f64> {
        if host.status != HostStatus::Active
            || !host.heartbeat_fresh(now, self.heartbeat_max_age_secs)
        {
            return None;
        }
        if host.architecture != req.arch {
            return None;
        }
        if req.gpu_required && !gpu_matches(host, req) {
            return None;
        }
        if !fits_capacity(host, req) {
            return None;
        }
        if !admission_ok(host, req) {
            return None;
        }
        projected_score(host, req, bin_pack)
    }
}

fn projected(used: f64, total: f64) -> f64 {
    if total <= 0.0 {
        1.0
    } else {
        used / total
    }
}

/// Accelerator admission: a kind-specific request needs that exact kind; a
/// kind-agnostic request accepts any host with enough free units.
fn gpu_matches(host: &HostCapacity, req: &ResourceRequirements) -> bool {
    let kind_ok = match (&req.gpu_kind, &host.gpu_kind) {
        (Some(want), Some(have)) => want == have,
        (None, Some(_)) => true,
        _ => false,
    };
    kind_ok && host.gpu_free >= req.gpu_count
}

fn fits_capacity(host: &HostCapacity, req: &ResourceRequirements) -> bool {
    host.free_cpu() >= req.cpu_cores
        && host.free_memory_mb() >= req.memory_mb
        && host.free_disk_gb() >= req.disk_gb
}

/// Tier-/label-based admission: every request label must match the host,
/// and a host carrying a `podex.tiers` label admits only the tiers it
/// names. Hosts without the label admit every tier.
fn admission_ok(host: &HostCapacity, req: &ResourceRequirements) -> bool {
    for (key, value) in &req.required_labels {
        if host.labels.get(key) != Some(value) {
            return false;
        }
    }
    if let Some(tier) = req.tier {
        if let Some(allowed) = host.labels.get("podex.tiers") {
            return allowed
                .split(',')
                .map(str::trim)
                .any(|name| name == tier.as_str());
        }
    }
    true
}

fn admission_reason(req: &ResourceRequirements) -> String {
    if !req.required_labels.is_empty() {
        let mut labels: Vec<String> = req
            .required_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        labels.sort();
        format!("no host matching labels {}", labels.join(", "))
    } else if let Some(tier) = req.tier {
        format!("no host admitting tier {tier}")
    } else {
        "no host passing admission rules".to_string()
    }
}

/// Projected utilization after placement, rejecting hosts pushed past the
/// cap on any axis. Bin-pack scores high-utilization hosts up, spread
/// scores them down.
fn projected_score(host: &HostCapacity, req: &ResourceRequirements, bin_pack: bool) -> Option<f64> {
    let cpu = projected(host.used_cpu + req.cpu_cores, host.total_cpu);
    let mem = projected(
        (host.used_memory_mb + req.memory_mb) as f64,
        host.total_memory_mb as f64,
    );
    let disk = projected(
        (host.used_disk_gb + req.disk_gb) as f64,
        host.total_disk_gb as f64,
    );
    let max_axis = cpu.max(mem).max(disk);
    if max_axis > MAX_PROJECTED_UTILIZATION {
        return None;
    }
    Some(if bin_pack { max_axis } else { 1.0 - max_axis })
}

// ── Unit tests ────────────────────────────────────────────────────────────────
