// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Direct Docker-daemon backend for cloud hosts the coordinator can dial.
//!
//! Capacity accounting: the host's schedulable totals are admin-declared at
//! registration; usage is derived from the resource labels
//! (`podex.cpu` / `podex.memory_mb` / `podex.disk_gb`) this backend stamps
//! onto every container it creates. That keeps the placement snapshot
//! consistent with our own bookkeeping rather than with whatever else runs
//! on the daemon.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, warn};

use podex_core::{Arch, Error, HostCapacity, HostStatus, Result};

use crate::backend::{
    ContainerBackend, ContainerSpec, ContainerStats, ExecRequest, ExecResult, EXEC_USER,
};
use crate::DEFAULT_EXEC_TIMEOUT_SECS;

/// Static facts about a directly-dialed host; totals are admin-declared.
#[derive(Debug, Clone)]
pub struct DaemonHostFacts {
    pub host_id: String,
    pub hostname: String,
    pub architecture: Arch,
    pub region: Option<String>,
    pub total_cpu: f64,
    pub total_memory_mb: u64,
    pub total_disk_gb: u64,
    pub gpu_kind: Option<String>,
    pub gpu_count: u32,
    pub labels: HashMap<String, String>,
}

pub struct DaemonBackend {
    docker: Docker,
    facts: DaemonHostFacts,
}

impl DaemonBackend {
    /// Dial `endpoint` (e.g. `tcp://10.0.0.5:2376`).
    pub fn connect(endpoint: &str, facts: DaemonHostFacts) -> Result<Self> {
        let docker = Docker::connect_with_http(endpoint, 30, bollard::API_DEFAULT_VERSION)
            .map_err(|e| Error::Transport(format!("docker daemon {endpoint}: {e}")))?;
        Ok(Self { docker, facts })
    }

    /// List podex-labeled containers on this daemon.
    async fn list_podex_containers(&self) -> Result<Vec<bollard::models::ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec!["podex.workspace_id".to_string()]);
        self.docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(transport)
    }
}

fn transport(e: bollard::errors::Error) -> Error {
    Error::Transport(format!("docker: {e}"))
}

fn is_conflict(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            ..
        }
    )
}

fn label_number(labels: &HashMap<String, String>, key: &str) -> f64 {
    labels
        .get(key)
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0)
}

#[async_trait]
impl ContainerBackend for DaemonBackend {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        spec.validate()?;

        let env: Vec<String> = spec
            .environment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        // Resource labels used for capacity accounting on this host.
        let mut labels = spec.labels.clone();
        labels.insert("podex.cpu".into(), spec.cpu_limit.to_string());
        labels.insert("podex.memory_mb".into(), spec.memory_limit_mb.to_string());

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(labels),
            user: Some(EXEC_USER.to_string()),
            host_config: Some(HostConfig {
                memory: Some((spec.memory_limit_mb * 1024 * 1024) as i64),
                nano_cpus: Some((spec.cpu_limit * 1e9) as i64),
                network_mode: Some(spec.network_mode.clone()),
                binds: if spec.volumes.is_empty() {
                    None
                } else {
                    Some(spec.volumes.clone())
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await;

        match created {
            Ok(resp) => Ok(resp.id),
            Err(e) if is_conflict(&e) => {
                // Name already taken: idempotent iff the existing container
                // carries the same ownership labels.
                let existing = self
                    .docker
                    .inspect_container(&spec.name, None::<bollard::query_parameters::InspectContainerOptions>)
                    .await
                    .map_err(transport)?;
                let existing_labels = existing
                    .config
                    .as_ref()
                    .and_then(|c| c.labels.clone())
                    .unwrap_or_default();
                let matches = crate::backend::REQUIRED_LABELS
                    .iter()
                    .all(|l| existing_labels.get(*l) == spec.labels.get(*l));
                if matches {
                    debug!(name = %spec.name, "create_container replayed; returning existing");
                    existing
                        .id
                        .ok_or_else(|| Error::Transport("container without id".into()))
                } else {
                    Err(Error::Conflict(format!(
                        "container name {} exists with different ownership labels",
                        spec.name
                    )))
                }
            }
            Err(e) => Err(transport(e)),
        }
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(transport)
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .stop_container(container_id, Some(StopContainerOptions { t: 10 }))
            .await
            .map_err(transport)
    }

    async fn remove_container(&self, container_id: &str, remove_volumes: bool) -> Result<()> {
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: remove_volumes,
                    ..Default::default()
                }),
            )
            .await
            .map_err(transport)
    }

    async fn exec(&self, container_id: &str, req: &ExecRequest) -> Result<ExecResult> {
        let timeout = req
            .timeout
            .unwrap_or(std::time::Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS));

        let env: Vec<String> = req
            .environment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(vec![
                        "/bin/sh".to_string(),
                        "-lc".to_string(),
                        req.command.clone(),
                    ]),
                    user: Some(EXEC_USER.to_string()),
                    working_dir: req.working_dir.clone(),
                    env: if env.is_empty() { None } else { Some(env) },
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(transport)?;

        let run = async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            match self
                .docker
                .start_exec(&exec.id, None)
                .await
                .map_err(transport)?
            {
                StartExecResults::Attached { mut output, .. } => {
                    while let Some(chunk) = output.next().await {
                        match chunk.map_err(transport)? {
                            bollard::container::LogOutput::StdOut { message } => {
                                stdout.push_str(&String::from_utf8_lossy(&message));
                            }
                            bollard::container::LogOutput::StdErr { message } => {
                                stderr.push_str(&String::from_utf8_lossy(&message));
                            }
                            _ => {}
                        }
                    }
                }
                StartExecResults::Detached => {}
            }
            let inspect = self.docker.inspect_exec(&exec.id).await.map_err(transport)?;
            Ok::<ExecResult, Error>(ExecResult {
                exit_code: inspect.exit_code.unwrap_or(-1),
                stdout,
                stderr,
            })
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "exec exceeded {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn stats(&self, container_id: &str) -> Result<ContainerStats> {
        let mut stream = self.docker.stats(
            container_id,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );
        let Some(stats) = stream.next().await else {
            return Ok(ContainerStats::default());
        };
        let stats = stats.map_err(transport)?;
        let memory_stats = stats.memory_stats.unwrap_or_default();
        let memory_mb = memory_stats.usage.unwrap_or(0) / (1024 * 1024);
        let memory_limit_mb = memory_stats.limit.unwrap_or(0) / (1024 * 1024);
        // One-shot reads have no previous sample to diff against; report the
        // cumulative share instead of an instantaneous percentage.
        let cpu_percent = {
            let cpu_stats = stats.cpu_stats.unwrap_or_default();
            let total = cpu_stats.cpu_usage.unwrap_or_default().total_usage.unwrap_or(0) as f64;
            let system = cpu_stats.system_cpu_usage.unwrap_or(0) as f64;
            if system > 0.0 {
                (total / system) * 100.0
            } else {
                0.0
            }
        };
        Ok(ContainerStats {
            cpu_percent,
            memory_mb,
            memory_limit_mb,
        })
    }

    async fn server_stats(&self) -> Result<HostCapacity> {
        let containers = self.list_podex_containers().await?;
        let mut used_cpu = 0.0;
        let mut used_memory_mb = 0u64;
        let mut used_disk_gb = 0u64;
        for c in &containers {
            let labels = c.labels.clone().unwrap_or_default();
            used_cpu += label_number(&labels, "podex.cpu");
            used_memory_mb += label_number(&labels, "podex.memory_mb") as u64;
            used_disk_gb += label_number(&labels, "podex.disk_gb") as u64;
        }
        if used_cpu > self.facts.total_cpu {
            warn!(
                host = %self.facts.host_id,
                used_cpu, total = self.facts.total_cpu,
                "labeled usage exceeds declared capacity"
            );
        }
        Ok(HostCapacity {
            host_id: self.facts.host_id.clone(),
            hostname: self.facts.hostname.clone(),
            total_cpu: self.facts.total_cpu,
            total_memory_mb: self.facts.total_memory_mb,
            total_disk_gb: self.facts.total_disk_gb,
            used_cpu,
            used_memory_mb,
            used_disk_gb,
            active_workspaces: containers.len() as u32,
            gpu_kind: self.facts.gpu_kind.clone(),
            gpu_total: self.facts.gpu_count,
            // GPU attachment tracking is label-based as well.
            gpu_free: self.facts.gpu_count.saturating_sub(
                containers
                    .iter()
                    .filter(|c| {
                        c.labels
                            .as_ref()
                            .map(|l| l.contains_key("podex.gpu"))
                            .unwrap_or(false)
                    })
                    .count() as u32,
            ),
            architecture: self.facts.architecture,
            region: self.facts.region.clone(),
            status: HostStatus::Active,
            labels: self.facts.labels.clone(),
            last_heartbeat: None,
        })
    }
}
