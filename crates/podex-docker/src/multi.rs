// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Registry of container backends keyed by host id.
//!
//! Cloud daemons are registered at startup from config; pod backends come
//! and go with their hub connections. All container operations take the
//! host id first and resolve the backend behind it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use podex_core::{Error, HostCapacity, Result};

use crate::backend::{ContainerBackend, ContainerSpec, ContainerStats, ExecRequest, ExecResult};

#[derive(Default)]
pub struct MultiHostDocker {
    backends: RwLock<HashMap<String, Arc<dyn ContainerBackend>>>,
}

impl MultiHostDocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, host_id: impl Into<String>, backend: Arc<dyn ContainerBackend>) {
        let host_id = host_id.into();
        info!(%host_id, "container backend registered");
        self.backends.write().await.insert(host_id, backend);
    }

    pub async fn unregister(&self, host_id: &str) {
        if self.backends.write().await.remove(host_id).is_some() {
            info!(%host_id, "container backend unregistered");
        }
    }

    pub async fn host_ids(&self) -> Vec<String> {
        self.backends.read().await.keys().cloned().collect()
    }

    async fn backend(&self, host_id: &str) -> Result<Arc<dyn ContainerBackend>> {
        self.backends
            .read()
            .await
            .get(host_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("host {host_id}")))
    }

    pub async fn create_container(&self, host_id: &str, spec: &ContainerSpec) -> Result<String> {
        self.backend(host_id).await?.create_container(spec).await
    }

    pub async fn start_container(&self, host_id: &str, container_id: &str) -> Result<()> {
        self.backend(host_id).await?.start_container(container_id).await
    }

    pub async fn stop_container(&self, host_id: &str, container_id: &str) -> Result<()> {
        self.backend(host_id).await?.stop_container(container_id).await
    }

    pub async fn remove_container(
        &self,
        host_id: &str,
        container_id: &str,
        remove_volumes: bool,
    ) -> Result<()> {
        self.backend(host_id)
            .await?
            .remove_container(container_id, remove_volumes)
            .await
    }

    pub async fn exec(
        &self,
        host_id: &str,
        container_id: &str,
        req: &ExecRequest,
    ) -> Result<ExecResult> {
        self.backend(host_id).await?.exec(container_id, req).await
    }

    pub async fn stats(&self, host_id: &str, container_id: &str) -> Result<ContainerStats> {
        self.backend(host_id).await?.stats(container_id).await
    }

    pub async fn server_stats(&self, host_id: &str) -> Result<HostCapacity> {
        self.backend(host_id).await?.server_stats().await
    }

    /// Capacity snapshot across every registered host. Hosts whose stats
    /// call fails are skipped — placement treats them as absent rather than
    /// failing the whole snapshot.
    pub async fn all_server_stats(&self) -> Vec<HostCapacity> {
        let backends: Vec<(String, Arc<dyn ContainerBackend>)> = self
            .backends
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut capacities = Vec::with_capacity(backends.len());
        for (host_id, backend) in backends {
            match backend.server_stats().await {
                Ok(cap) => capacities.push(cap),
                Err(e) => {
                    tracing::warn!(%host_id, "server stats unavailable: {e}");
                }
            }
        }
        capacities
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use podex_core::{Arch, HostStatus};

    struct FixedBackend {
        host_id: String,
    }

    #[async_trait]
    impl ContainerBackend for FixedBackend {
        async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
            Ok(format!("{}-{}", self.host_id, spec.name))
        }
        async fn start_container(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn stop_container(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn remove_container(&self, _id: &str, _rv: bool) -> Result<()> {
            Ok(())
        }
        async fn exec(&self, _id: &str, _req: &ExecRequest) -> Result<ExecResult> {
            Ok(ExecResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
        async fn stats(&self, _id: &str) -> Result<ContainerStats> {
            Ok(ContainerStats::default())
        }
        async fn server_stats(&self) -> Result<HostCapacity> {
            Ok(HostCapacity {
                host_id: self.host_id.clone(),
                hostname: self.host_id.clone(),
                total_cpu: 8.0,
                total_memory_mb: 16384,
                total_disk_gb: 500,
                used_cpu: 0.0,
                used_memory_mb: 0,
                used_disk_gb: 0,
                active_workspaces: 0,
                gpu_kind: None,
                gpu_total: 0,
                gpu_free: 0,
                architecture: Arch::X86_64,
                region: None,
                status: HostStatus::Active,
                labels: Default::default(),
                last_heartbeat: None,
            })
        }
    }

    #[tokio::test]
    async fn operations_route_by_host_id() {
        let multi = MultiHostDocker::new();
        multi
            .register("h1", Arc::new(FixedBackend { host_id: "h1".into() }))
            .await;
        multi
            .register("h2", Arc::new(FixedBackend { host_id: "h2".into() }))
            .await;

        let mut labels = std::collections::HashMap::new();
        for l in crate::REQUIRED_LABELS {
            labels.insert(l.to_string(), "x".to_string());
        }
        let spec = ContainerSpec {
            name: "w".into(),
            image: "i".into(),
            cpu_limit: 1.0,
            memory_limit_mb: 512,
            environment: Default::default(),
            labels,
            volumes: vec![],
            network_mode: "bridge".into(),
        };
        assert_eq!(multi.create_container("h2", &spec).await.unwrap(), "h2-w");
    }

    #[tokio::test]
    async fn unknown_host_is_not_found() {
        let multi = MultiHostDocker::new();
        let err = multi.start_container("nope", "c").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn unregister_removes_the_backend() {
        let multi = MultiHostDocker::new();
        multi
            .register("h1", Arc::new(FixedBackend { host_id: "h1".into() }))
            .await;
        multi.unregister("h1").await;
        assert!(multi.host_ids().await.is_empty());
    }

    #[tokio::test]
    async fn all_server_stats_collects_every_host() {
        let multi = MultiHostDocker::new();
        multi
            .register("h1", Arc::new(FixedBackend { host_id: "h1".into() }))
            .await;
        multi
            .register("h2", Arc::new(FixedBackend { host_id: "h2".into() }))
            .await;
        let stats = multi.all_server_stats().await;
        assert_eq!(stats.len(), 2);
    }
}
