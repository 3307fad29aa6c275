// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use podex_core::{
    Error, HostCapacity, HostStatus, Result, Tier, Workspace, WorkspaceConfig, WorkspaceStatus,
};
use podex_docker::{ContainerSpec, ExecRequest, ExecResult, MultiHostDocker};
use podex_placement::{PlacementEngine, PlacementStrategy};
use podex_redis::{LockGuard, RedisApi, RedisLock};

use crate::store::WorkspaceStore;

/// Cross-instance workspace lock TTL. Generous enough for a slow container
/// operation; expired locks mean the holder crashed.
const WORKSPACE_LOCK_TTL_MS: u64 = 60_000;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity snapshot provider. Production combines daemon stats with pod
/// heartbeats; tests inject fixed fleets.
#[async_trait]
pub trait HostInventory: Send + Sync {
    async fn snapshot(&self) -> Vec<HostCapacity>;
}

#[async_trait]
impl HostInventory for MultiHostDocker {
    async fn snapshot(&self) -> Vec<HostCapacity> {
        self.all_server_stats().await
    }
}

/// Successful orchestration outcome; failures travel as [`Error`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub workspace_id: Uuid,
    pub host_id: Option<String>,
    pub container_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

/// Fleet-wide aggregate used by the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub hosts_total: usize,
    pub hosts_active: usize,
    pub hosts_healthy: usize,
    pub total_cpu: f64,
    pub used_cpu: f64,
    pub cpu_utilization_percent: f64,
    pub total_memory_mb: u64,
    pub used_memory_mb: u64,
    pub memory_utilization_percent: f64,
    pub workspaces_total: u32,
}

pub struct WorkspaceOrchestrator {
    docker: Arc<MultiHostDocker>,
    store: Arc<dyn WorkspaceStore>,
    inventory: Arc<dyn HostInventory>,
    placement: PlacementEngine,
    cross_instance_lock: RedisLock,
    local_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    default_image: String,
}

impl WorkspaceOrchestrator {
    pub fn new(
        docker: Arc<MultiHostDocker>,
        store: Arc<dyn WorkspaceStore>,
        inventory: Arc<dyn HostInventory>,
        placement: PlacementEngine,
        redis: Arc<dyn RedisApi>,
        default_image: impl Into<String>,
    ) -> Self {
        Self {
            docker,
            store,
            inventory,
            placement,
            cross_instance_lock: RedisLock::new(redis, WORKSPACE_LOCK_TTL_MS),
            local_locks: Mutex::new(HashMap::new()),
            default_image: default_image.into(),
        }
    }

    /// Serialize mutation of one workspace: a local mutex inside this
    /// coordinator plus the Redis lock across instances. Failure to take
    /// the Redis lock means another instance owns the workspace right now.
    async fn lock_workspace(
        &self,
        workspace_id: Uuid,
    ) -> Result<(tokio::sync::OwnedMutexGuard<()>, LockGuard)> {
        let local = {
            let mut locks = self.local_locks.lock().await;
            locks
                .entry(workspace_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let local_guard = local.lock_owned().await;

        let key = format!("podex:lock:workspace:{workspace_id}");
        match self.cross_instance_lock.try_acquire(&key).await? {
            Some(redis_guard) => Ok((local_guard, redis_guard)),
            None => Err(Error::Conflict(format!(
                "workspace {workspace_id} is being mutated by another coordinator instance"
            ))),
        }
    }

    // ── create ────────────────────────────────────────────────────────────────

    pub async fn create_workspace(
        &self,
        user_id: &str,
        session_id: &str,
        config: &WorkspaceConfig,
        strategy: Option<&PlacementStrategy>,
    ) -> Result<OrchestrationResult> {
        let workspace_id = Uuid::new_v4();
        let tier = config.tier.unwrap_or(Tier::Starter);
        info!(%workspace_id, %user_id, %tier, "creating workspace");

        let mut requirements = tier.requirements();
        if config.gpu_enabled && !requirements.gpu_required {
            requirements.gpu_required = true;
            requirements.gpu_kind = config.gpu_kind.clone();
        }

        let hosts = self.inventory.snapshot().await;
        if hosts.is_empty() {
            return Err(Error::Capacity(
                "no hosts registered for workspace creation".into(),
            ));
        }

        let decision = self
            .placement
            .find_placement(&hosts, &requirements, strategy, Utc::now());
        if !decision.success {
            return Err(Error::Capacity(decision.reason));
        }
        let host_id = decision
            .host_id
            .ok_or_else(|| Error::Fatal("successful placement without host id".into()))?;
        info!(
            %workspace_id,
            %host_id,
            score = decision.score,
            "placement decision made"
        );

        let spec = self.container_spec(workspace_id, user_id, session_id, tier, config, &requirements);

        // Container first, record second: on any container failure the
        // workspace is not persisted and no capacity is charged.
        let container_id = self.docker.create_container(&host_id, &spec).await?;
        if let Err(e) = self.docker.start_container(&host_id, &container_id).await {
            error!(%workspace_id, %host_id, "container failed to start: {e}");
            if let Err(cleanup) = self
                .docker
                .remove_container(&host_id, &container_id, true)
                .await
            {
                warn!(%workspace_id, "orphaned container cleanup failed: {cleanup}");
            }
            return Err(e);
        }

        let now = Utc::now();
        let workspace = Workspace {
            id: workspace_id,
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            status: WorkspaceStatus::Running,
            tier,
            image: spec.image.clone(),
            host_id: Some(host_id.clone()),
            container_id: Some(container_id.clone()),
            created_at: now,
            last_activity: now,
            environment: config.environment.clone(),
            repositories: config.repositories.clone(),
            preserve_data: config.preserve_data,
            error: None,
        };
        self.store.save(&workspace).await?;

        info!(%workspace_id, %host_id, container = %container_id, "workspace created");
        Ok(OrchestrationResult {
            workspace_id,
            host_id: Some(host_id),
            container_id: Some(container_id),
            message: "workspace created".into(),
            details: Some(serde_json::json!({
                "tier": tier,
                "cpu": requirements.cpu_cores,
                "memory_mb": requirements.memory_mb,
            })),
        })
    }

    fn container_spec(
        &self,
        workspace_id: Uuid,
        user_id: &str,
        session_id: &str,
        tier: Tier,
        config: &WorkspaceConfig,
        requirements: &podex_core::ResourceRequirements,
    ) -> ContainerSpec {
        let short_id = short(workspace_id);
        let mut environment = config.environment.clone();
        environment.insert("WORKSPACE_ID".into(), workspace_id.to_string());
        environment.insert("USER_ID".into(), user_id.to_string());
        environment.insert("SESSION_ID".into(), session_id.to_string());
        environment.insert("WORKSPACE_TIER".into(), tier.to_string());

        let mut labels = HashMap::new();
        labels.insert("podex.workspace_id".into(), workspace_id.to_string());
        labels.insert("podex.user_id".into(), user_id.to_string());
        labels.insert("podex.session_id".into(), session_id.to_string());
        labels.insert("podex.tier".into(), tier.to_string());
        labels.insert("podex.disk_gb".into(), requirements.disk_gb.to_string());
        if requirements.gpu_required {
            labels.insert("podex.gpu".into(), requirements.gpu_count.to_string());
        }

        let volumes = if config.preserve_data {
            vec![format!("podex-data-{short_id}:/home/dev")]
        } else {
            vec![]
        };

        ContainerSpec {
            name: format!("workspace-{short_id}"),
            image: config
                .image
                .clone()
                .unwrap_or_else(|| self.default_image.clone()),
            cpu_limit: requirements.cpu_cores,
            memory_limit_mb: requirements.memory_mb,
            environment,
            labels,
            volumes,
            network_mode: "bridge".into(),
        }
    }

    // ── stop / start ──────────────────────────────────────────────────────────

    pub async fn stop_workspace(&self, workspace_id: Uuid) -> Result<OrchestrationResult> {
        let (_local, redis_guard) = self.lock_workspace(workspace_id).await?;
        let result = self.stop_locked(workspace_id).await;
        redis_guard.release().await?;
        result
    }

    async fn stop_locked(&self, workspace_id: Uuid) -> Result<OrchestrationResult> {
        let mut workspace = self.require(workspace_id).await?;
        let (host_id, container_id) = bound(&workspace)?;

        if workspace.status != WorkspaceStatus::Running {
            return Err(Error::Conflict(format!(
                "workspace {workspace_id} is not running (status: {})",
                workspace.status
            )));
        }

        self.docker.stop_container(&host_id, &container_id).await?;
        workspace.transition(WorkspaceStatus::Stopped)?;
        workspace.touch();
        self.store.save(&workspace).await?;

        info!(%workspace_id, %host_id, "workspace stopped");
        Ok(OrchestrationResult {
            workspace_id,
            host_id: Some(host_id),
            container_id: Some(container_id),
            message: "workspace stopped".into(),
            details: None,
        })
    }

    pub async fn start_workspace(&self, workspace_id: Uuid) -> Result<OrchestrationResult> {
        let (_local, redis_guard) = self.lock_workspace(workspace_id).await?;
        let result = self.start_locked(workspace_id).await;
        redis_guard.release().await?;
        result
    }

    async fn start_locked(&self, workspace_id: Uuid) -> Result<OrchestrationResult> {
        let mut workspace = self.require(workspace_id).await?;
        let (host_id, container_id) = bound(&workspace)?;

        if workspace.status != WorkspaceStatus::Stopped {
            return Err(Error::Conflict(format!(
                "workspace {workspace_id} is not stopped (status: {})",
                workspace.status
            )));
        }

        self.docker.start_container(&host_id, &container_id).await?;
        workspace.transition(WorkspaceStatus::Running)?;
        workspace.touch();
        self.store.save(&workspace).await?;

        info!(%workspace_id, %host_id, "workspace started");
        Ok(OrchestrationResult {
            workspace_id,
            host_id: Some(host_id),
            container_id: Some(container_id),
            message: "workspace started".into(),
            details: None,
        })
    }

    // ── delete ────────────────────────────────────────────────────────────────

    /// Idempotent delete. Container-remove errors are logged but never
    /// block record removal — the record is the source of truth.
    pub async fn delete_workspace(
        &self,
        workspace_id: Uuid,
        preserve_data: bool,
    ) -> Result<OrchestrationResult> {
        let (_local, redis_guard) = self.lock_workspace(workspace_id).await?;
        let result = self.delete_locked(workspace_id, preserve_data).await;
        redis_guard.release().await?;
        result
    }

    async fn delete_locked(
        &self,
        workspace_id: Uuid,
        preserve_data: bool,
    ) -> Result<OrchestrationResult> {
        let Some(workspace) = self.store.get(workspace_id).await? else {
            // Already gone: idempotent success.
            return Ok(OrchestrationResult {
                workspace_id,
                host_id: None,
                container_id: None,
                message: "workspace already deleted".into(),
                details: None,
            });
        };

        if let (Some(host_id), Some(container_id)) =
            (workspace.host_id.clone(), workspace.container_id.clone())
        {
            if let Err(e) = self
                .docker
                .remove_container(&host_id, &container_id, !preserve_data)
                .await
            {
                warn!(%workspace_id, %host_id, "container removal failed, continuing cleanup: {e}");
            }
        }

        self.store.delete(workspace_id).await?;
        info!(%workspace_id, preserve_data, "workspace deleted");
        Ok(OrchestrationResult {
            workspace_id,
            host_id: workspace.host_id,
            container_id: workspace.container_id,
            message: "workspace deleted".into(),
            details: None,
        })
    }

    // ── exec / health ─────────────────────────────────────────────────────────

    /// Run a command inside the workspace. All failure shapes come back as
    /// a synthetic `exit_code: -1` with the reason in stderr; exit codes of
    /// the executed process pass through untouched.
    pub async fn exec(&self, workspace_id: Uuid, req: ExecRequest) -> ExecResult {
        let workspace = match self.store.get(workspace_id).await {
            Ok(Some(w)) => w,
            Ok(None) => return synthetic_failure("workspace not found"),
            Err(e) => return synthetic_failure(&format!("workspace lookup failed: {e}")),
        };

        let (Some(host_id), Some(container_id)) = (&workspace.host_id, &workspace.container_id)
        else {
            return synthetic_failure("workspace has no assigned host or container");
        };

        if workspace.status != WorkspaceStatus::Running {
            return synthetic_failure(&format!(
                "workspace is not running (status: {})",
                workspace.status
            ));
        }

        let result = match self.docker.exec(host_id, container_id, &req).await {
            Ok(result) => result,
            Err(e) => synthetic_failure(&e.to_string()),
        };

        // Any completed exec counts as activity.
        let mut workspace = workspace;
        workspace.touch();
        if let Err(e) = self.store.save(&workspace).await {
            warn!(%workspace_id, "failed to persist last_activity: {e}");
        }
        result
    }

    /// `echo healthy` probe: false on non-zero exit, missing marker, or
    /// timeout.
    pub async fn health_check(&self, workspace_id: Uuid) -> bool {
        let mut req = ExecRequest::new("echo healthy");
        req.timeout = Some(HEALTH_CHECK_TIMEOUT);
        let result = self.exec(workspace_id, req).await;
        result.exit_code == 0 && result.stdout.contains("healthy")
    }

    // ── cold migration ────────────────────────────────────────────────────────

    /// Cold migration: stop, mark migrating, recreate on the target host,
    /// rebind, start. Any failure past "mark migrating" leaves the
    /// workspace in `error` with a migration-failure reason.
    pub async fn migrate_workspace(
        &self,
        workspace_id: Uuid,
        target_host_id: &str,
    ) -> Result<OrchestrationResult> {
        let (_local, redis_guard) = self.lock_workspace(workspace_id).await?;
        let result = self.migrate_locked(workspace_id, target_host_id).await;
        redis_guard.release().await?;
        result
    }

    async fn migrate_locked(
        &self,
        workspace_id: Uuid,
        target_host_id: &str,
    ) -> Result<OrchestrationResult> {
        let mut workspace = self.require(workspace_id).await?;
        let (source_host, source_container) = bound(&workspace)?;

        if source_host == target_host_id {
            return Ok(OrchestrationResult {
                workspace_id,
                host_id: Some(source_host),
                container_id: Some(source_container),
                message: "workspace already on target host".into(),
                details: None,
            });
        }

        if workspace.status == WorkspaceStatus::Running {
            self.docker
                .stop_container(&source_host, &source_container)
                .await?;
            workspace.transition(WorkspaceStatus::Stopped)?;
            self.store.save(&workspace).await?;
        }

        workspace.transition(WorkspaceStatus::Migrating)?;
        self.store.save(&workspace).await?;
        info!(%workspace_id, from = %source_host, to = %target_host_id, "migration started");

        match self
            .migrate_steps(&workspace, &source_host, &source_container, target_host_id)
            .await
        {
            Ok(new_container) => {
                workspace.host_id = Some(target_host_id.to_string());
                workspace.container_id = Some(new_container.clone());
                workspace.transition(WorkspaceStatus::Running)?;
                workspace.touch();
                self.store.save(&workspace).await?;
                info!(%workspace_id, to = %target_host_id, "migration finished");
                Ok(OrchestrationResult {
                    workspace_id,
                    host_id: Some(target_host_id.to_string()),
                    container_id: Some(new_container),
                    message: "workspace migrated".into(),
                    details: None,
                })
            }
            Err(e) => {
                let reason = format!("migration to {target_host_id} failed: {e}");
                error!(%workspace_id, "{reason}");
                workspace.status = WorkspaceStatus::Error;
                workspace.error = Some(reason.clone());
                self.store.save(&workspace).await?;
                Err(Error::Transport(reason))
            }
        }
    }

    /// Commit + transfer is image-reference based: the target pulls the
    /// workspace image and data volumes follow by name. Returns the new
    /// container id.
    async fn migrate_steps(
        &self,
        workspace: &Workspace,
        source_host: &str,
        source_container: &str,
        target_host_id: &str,
    ) -> Result<String> {
        let config = WorkspaceConfig {
            tier: Some(workspace.tier),
            image: Some(workspace.image.clone()),
            environment: workspace.environment.clone(),
            repositories: workspace.repositories.clone(),
            gpu_enabled: false,
            gpu_kind: None,
            preserve_data: workspace.preserve_data,
        };
        let requirements = workspace.tier.requirements();
        let spec = self.container_spec(
            workspace.id,
            &workspace.user_id,
            &workspace.session_id,
            workspace.tier,
            &config,
            &requirements,
        );

        let new_container = self.docker.create_container(target_host_id, &spec).await?;
        self.docker
            .start_container(target_host_id, &new_container)
            .await?;

        // Source cleanup is best effort — the binding already moved.
        if let Err(e) = self
            .docker
            .remove_container(source_host, source_container, !workspace.preserve_data)
            .await
        {
            warn!(
                workspace_id = %workspace.id,
                %source_host,
                "source container cleanup failed after migration: {e}"
            );
        }
        Ok(new_container)
    }

    // ── queries ───────────────────────────────────────────────────────────────

    pub async fn get_workspace(&self, workspace_id: Uuid) -> Result<Option<Workspace>> {
        self.store.get(workspace_id).await
    }

    pub async fn workspace_for_session(&self, session_id: &str) -> Result<Option<Workspace>> {
        self.store.get_by_session(session_id).await
    }

    pub async fn cluster_status(&self) -> ClusterStatus {
        let hosts = self.inventory.snapshot().await;
        let total_cpu: f64 = hosts.iter().map(|h| h.total_cpu).sum();
        let used_cpu: f64 = hosts.iter().map(|h| h.used_cpu).sum();
        let total_memory_mb: u64 = hosts.iter().map(|h| h.total_memory_mb).sum();
        let used_memory_mb: u64 = hosts.iter().map(|h| h.used_memory_mb).sum();
        ClusterStatus {
            hosts_total: hosts.len(),
            hosts_active: hosts.iter().filter(|h| h.status == HostStatus::Active).count(),
            hosts_healthy: hosts
                .iter()
                .filter(|h| matches!(h.status, HostStatus::Active | HostStatus::Draining))
                .count(),
            total_cpu,
            used_cpu,
            cpu_utilization_percent: percent(used_cpu, total_cpu),
            total_memory_mb,
            used_memory_mb,
            memory_utilization_percent: percent(used_memory_mb as f64, total_memory_mb as f64),
            workspaces_total: hosts.iter().map(|h| h.active_workspaces).sum(),
        }
    }

    async fn require(&self, workspace_id: Uuid) -> Result<Workspace> {
        self.store
            .get(workspace_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("workspace {workspace_id}")))
    }
}

fn bound(workspace: &Workspace) -> Result<(String, String)> {
    match (&workspace.host_id, &workspace.container_id) {
        (Some(h), Some(c)) => Ok((h.clone(), c.clone())),
        _ => Err(Error::Conflict(format!(
            "workspace {} has no assigned host or container",
            workspace.id
        ))),
    }
}

fn synthetic_failure(reason: &str) -> ExecResult {
    ExecResult {
        exit_code: -1,
        stdout: String::new(),
        stderr: reason.to_string(),
    }
}

fn percent(used: f64, total: f64) -> f64 {
    if total <= 0.0 {
        0.0
    } else {
        (used / total * 1000.0).round() / 10.0
    }
}

fn short(id: Uuid) -> String {
    id.simple().to_string()[..12].to_string()
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryWorkspaceStore;
    use podex_core::Arch;
    use podex_docker::{ContainerBackend, ContainerStats};
    use podex_redis::MemoryRedis;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Scriptable backend standing in for one host's daemon.
    #[derive(Default)]
    struct TestBackend {
        fail_create: AtomicBool,
        fail_start: AtomicBool,
        fail_remove: AtomicBool,
    }

    #[async_trait]
    impl ContainerBackend for TestBackend {
        async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
            spec.validate()?;
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(Error::Transport("daemon refused create".into()));
            }
            Ok(format!("ctr-{}", spec.name))
        }
        async fn start_container(&self, _id: &str) -> Result<()> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(Error::Transport("daemon refused start".into()));
            }
            Ok(())
        }
        async fn stop_container(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn remove_container(&self, _id: &str, _rv: bool) -> Result<()> {
            if self.fail_remove.load(Ordering::SeqCst) {
                return Err(Error::Transport("daemon refused remove".into()));
            }
            Ok(())
        }
        async fn exec(&self, _id: &str, req: &ExecRequest) -> Result<ExecResult> {
            if req.command == "echo healthy" {
                return Ok(ExecResult {
                    exit_code: 0,
                    stdout: "healthy\n".into(),
                    stderr: String::new(),
                });
            }
            Ok(ExecResult {
                exit_code: 0,
                stdout: format!("ran: {}", req.command),
                stderr: String::new(),
            })
        }
        async fn stats(&self, _id: &str) -> Result<ContainerStats> {
            Ok(ContainerStats::default())
        }
        async fn server_stats(&self) -> Result<HostCapacity> {
            Ok(test_host("h1"))
        }
    }

    fn test_host(id: &str) -> HostCapacity {
        HostCapacity {
            host_id: id.into(),
            hostname: format!("node-{id}"),
            total_cpu: 16.0,
            total_memory_mb: 65536,
            total_disk_gb: 1000,
            used_cpu: 1.0,
            used_memory_mb: 2048,
            used_disk_gb: 50,
            active_workspaces: 1,
            gpu_kind: None,
            gpu_total: 0,
            gpu_free: 0,
            architecture: Arch::X86_64,
            region: None,
            status: HostStatus::Active,
            labels: Default::default(),
            last_heartbeat: None,
        }
    }

    struct Fleet;

    #[async_trait]
    impl HostInventory for Fleet {
        async fn snapshot(&self) -> Vec<HostCapacity> {
            vec![test_host("h1"), test_host("h2")]
        }
    }

    struct EmptyFleet;

    #[async_trait]
    impl HostInventory for EmptyFleet {
        async fn snapshot(&self) -> Vec<HostCapacity> {
            vec![]
        }
    }

    struct Harness {
        orchestrator: WorkspaceOrchestrator,
        store: Arc<MemoryWorkspaceStore>,
        backend: Arc<TestBackend>,
        redis: Arc<MemoryRedis>,
    }

    async fn harness_with(inventory: Arc<dyn HostInventory>) -> Harness {
        let docker = Arc::new(MultiHostDocker::new());
        let backend = Arc::new(TestBackend::default());
        docker.register("h1", backend.clone()).await;
        docker.register("h2", backend.clone()).await;
        let store = Arc::new(MemoryWorkspaceStore::new());
        let redis = Arc::new(MemoryRedis::new());
        let orchestrator = WorkspaceOrchestrator::new(
            docker,
            store.clone(),
            inventory,
            PlacementEngine::new(true, 90),
            redis.clone(),
            "podex/workspace:latest",
        );
        Harness {
            orchestrator,
            store,
            backend,
            redis,
        }
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(Fleet)).await
    }

    async fn created(h: &Harness) -> Uuid {
        h.orchestrator
            .create_workspace("u1", "s1", &WorkspaceConfig::default(), None)
            .await
            .unwrap()
            .workspace_id
    }

    #[tokio::test]
    async fn create_persists_a_running_workspace() {
        let h = harness().await;
        let result = h
            .orchestrator
            .create_workspace("u1", "s1", &WorkspaceConfig::default(), None)
            .await
            .unwrap();
        assert!(result.host_id.is_some());

        let ws = h
            .store
            .get(result.workspace_id)
            .await
            .unwrap()
            .expect("workspace persisted");
        assert_eq!(ws.status, WorkspaceStatus::Running);
        assert_eq!(ws.session_id, "s1");
        assert!(ws.container_id.is_some());
    }

    #[tokio::test]
    async fn create_with_empty_fleet_is_a_capacity_error() {
        let h = harness_with(Arc::new(EmptyFleet)).await;
        let err = h
            .orchestrator
            .create_workspace("u1", "s1", &WorkspaceConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));
    }

    #[tokio::test]
    async fn failed_container_creation_persists_nothing() {
        let h = harness().await;
        h.backend.fail_create.store(true, Ordering::SeqCst);
        let err = h
            .orchestrator
            .create_workspace("u1", "s1", &WorkspaceConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(h.store.get_by_session("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_start_rolls_back_and_persists_nothing() {
        let h = harness().await;
        h.backend.fail_start.store(true, Ordering::SeqCst);
        assert!(h
            .orchestrator
            .create_workspace("u1", "s1", &WorkspaceConfig::default(), None)
            .await
            .is_err());
        assert!(h.store.get_by_session("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stop_then_start_cycles_the_state_machine() {
        let h = harness().await;
        let id = created(&h).await;

        h.orchestrator.stop_workspace(id).await.unwrap();
        assert_eq!(
            h.store.get(id).await.unwrap().unwrap().status,
            WorkspaceStatus::Stopped
        );

        h.orchestrator.start_workspace(id).await.unwrap();
        assert_eq!(
            h.store.get(id).await.unwrap().unwrap().status,
            WorkspaceStatus::Running
        );
    }

    #[tokio::test]
    async fn stop_of_stopped_workspace_is_a_conflict() {
        let h = harness().await;
        let id = created(&h).await;
        h.orchestrator.stop_workspace(id).await.unwrap();
        let err = h.orchestrator.stop_workspace(id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_survives_container_errors() {
        let h = harness().await;
        let id = created(&h).await;

        h.backend.fail_remove.store(true, Ordering::SeqCst);
        h.orchestrator.delete_workspace(id, false).await.unwrap();
        assert!(h.store.get(id).await.unwrap().is_none(), "record removed");

        // Second delete: already gone, still success.
        let again = h.orchestrator.delete_workspace(id, false).await.unwrap();
        assert!(again.message.contains("already"));
    }

    #[tokio::test]
    async fn exec_on_stopped_workspace_returns_synthetic_failure() {
        let h = harness().await;
        let id = created(&h).await;
        h.orchestrator.stop_workspace(id).await.unwrap();

        let out = h.orchestrator.exec(id, ExecRequest::new("ls")).await;
        assert_eq!(out.exit_code, -1);
        assert!(out.stderr.contains("not running (status: stopped)"));
    }

    #[tokio::test]
    async fn exec_updates_last_activity() {
        let h = harness().await;
        let id = created(&h).await;
        let before = h.store.get(id).await.unwrap().unwrap().last_activity;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        h.orchestrator.exec(id, ExecRequest::new("ls")).await;
        let after = h.store.get(id).await.unwrap().unwrap().last_activity;
        assert!(after > before);
    }

    #[tokio::test]
    async fn health_check_passes_on_running_workspace() {
        let h = harness().await;
        let id = created(&h).await;
        assert!(h.orchestrator.health_check(id).await);
    }

    #[tokio::test]
    async fn health_check_fails_on_missing_workspace() {
        let h = harness().await;
        assert!(!h.orchestrator.health_check(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn migration_rebinds_host_and_container() {
        let h = harness().await;
        let id = created(&h).await;
        let source = h.store.get(id).await.unwrap().unwrap().host_id.unwrap();
        let target = if source == "h1" { "h2" } else { "h1" };

        h.orchestrator.migrate_workspace(id, target).await.unwrap();
        let ws = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(ws.host_id.as_deref(), Some(target));
        assert_eq!(ws.status, WorkspaceStatus::Running);
    }

    #[tokio::test]
    async fn failed_migration_leaves_workspace_in_error() {
        let h = harness().await;
        let id = created(&h).await;
        let source = h.store.get(id).await.unwrap().unwrap().host_id.unwrap();
        let target = if source == "h1" { "h2" } else { "h1" };

        h.backend.fail_create.store(true, Ordering::SeqCst);
        let err = h.orchestrator.migrate_workspace(id, target).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        let ws = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(ws.status, WorkspaceStatus::Error);
        assert!(ws.error.unwrap().contains("migration"));
        // Never silently resumed on source.
        assert_eq!(ws.host_id.as_deref(), Some(source.as_str()));
    }

    #[tokio::test]
    async fn foreign_redis_lock_blocks_mutation() {
        let h = harness().await;
        let id = created(&h).await;

        // Another coordinator instance holds the lock.
        h.redis
            .set_nx_px(&format!("podex:lock:workspace:{id}"), "other", 60_000)
            .await
            .unwrap();

        let err = h.orchestrator.stop_workspace(id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn cluster_status_aggregates_the_fleet() {
        let h = harness().await;
        let status = h.orchestrator.cluster_status().await;
        assert_eq!(status.hosts_total, 2);
        assert_eq!(status.hosts_active, 2);
        assert_eq!(status.total_cpu, 32.0);
        assert_eq!(status.workspaces_total, 2);
    }
}
