// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The composition root: every component is constructed here, explicitly,
//! and injected downward. No global singletons — tests assemble the same
//! pieces with in-memory doubles.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{info, warn};

use podex_agent::{AgentWorker, CommandExec, ExecBridge, ExecOutcome, WorkerConfig};
use podex_api::{ApiState, CoordinatorDirectory, MemoryPodStore, MemorySessionStore};
use podex_auth::{DeviceAuth, JwtIssuer, MemoryDeviceSessionStore};
use podex_config::{CoordinatorConfig, PlacementStrategyName};
use podex_core::{AgentMode, Error, HostCapacity};
use podex_docker::{
    DaemonBackend, DaemonHostFacts, ExecRequest, MultiHostDocker, PodBackend, PodRpc,
};
use podex_executor::{ApprovalBroker, AuditLog, ToolCatalog, ToolExecutor};
use podex_hub::{Hub, HubLimits, PodRegistry, RpcMethod, YjsState};
use podex_llm::OllamaProvider;
use podex_orchestrator::{HostInventory, MemoryWorkspaceStore, WorkspaceOrchestrator};
use podex_placement::PlacementEngine;
use podex_queue::{SessionSweeper, TaskQueue};
use podex_redis::{RedisApi, RedisClient};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_WORKSPACE_IMAGE: &str = "podex/workspace:latest";

/// Everything `serve` needs, fully wired.
pub struct Coordinator {
    pub state: Arc<ApiState>,
    pub hub: Arc<Hub>,
    pub docker: Arc<MultiHostDocker>,
    pub config: CoordinatorConfig,
}

/// Reverse-RPC adapter: the docker layer's [`PodRpc`] capability, served
/// by the hub's correlation table.
pub struct HubPodRpc(pub Arc<PodRegistry>);

#[async_trait]
impl PodRpc for HubPodRpc {
    async fn call(
        &self,
        pod_id: &str,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> podex_core::Result<serde_json::Value> {
        let method = RpcMethod::parse(method)
            .ok_or_else(|| podex_core::Error::Validation(format!("unknown rpc verb {method}")))?;
        self.0.call_pod(pod_id, method, params, timeout).await
    }
}

/// Capacity snapshots: daemon hosts from the docker registry, with pod
/// heartbeat freshness stamped onto pod-backed hosts so placement can
/// demote stale pods.
pub struct FleetInventory {
    pub docker: Arc<MultiHostDocker>,
    pub pods: Arc<PodRegistry>,
}

#[async_trait]
impl HostInventory for FleetInventory {
    async fn snapshot(&self) -> Vec<HostCapacity> {
        let mut hosts = self.docker.all_server_stats().await;
        for host in &mut hosts {
            if let Some(live) = self.pods.liveness(&host.host_id) {
                host.last_heartbeat = Some(live.last_heartbeat);
                host.active_workspaces = live.active_workspaces;
            }
        }
        hosts
    }
}

pub async fn build(config: CoordinatorConfig) -> anyhow::Result<Coordinator> {
    // ── Shared scratch space ──────────────────────────────────────────────────
    let redis: Arc<dyn RedisApi> = Arc::new(
        RedisClient::connect(&config.redis.url)
            .await
            .with_context(|| format!("connecting to redis at {}", config.redis.url))?,
    );

    // ── Auth ──────────────────────────────────────────────────────────────────
    let secret = std::env::var(&config.auth.jwt_secret_env)
        .with_context(|| format!("reading JWT secret from ${}", config.auth.jwt_secret_env))?;
    let jwt = Arc::new(JwtIssuer::new(
        secret.as_bytes(),
        redis.clone(),
        Duration::from_secs(config.auth.access_token_ttl_secs),
        Duration::from_secs(config.auth.refresh_token_ttl_secs),
    ));
    let device_auth = Arc::new(DeviceAuth::new(
        redis.clone(),
        jwt.clone(),
        "https://podex.dev/activate",
        config.auth.device_code_ttl_secs,
        config.auth.device_poll_interval_secs,
    ));

    // ── Stores (relational in a full deployment; memory in single-node) ──────
    let session_store = Arc::new(MemorySessionStore::new());
    let workspace_store = Arc::new(MemoryWorkspaceStore::new());
    let device_sessions = Arc::new(MemoryDeviceSessionStore::new());
    let pod_store = Arc::new(MemoryPodStore::new());

    // ── Hub ───────────────────────────────────────────────────────────────────
    let pods = Arc::new(PodRegistry::new());
    let directory = Arc::new(CoordinatorDirectory::new(
        jwt.clone(),
        session_store.clone(),
        workspace_store.clone(),
        pods.clone(),
    ));
    let hub = Arc::new(Hub::new(
        pods.clone(),
        directory,
        pod_store.clone(),
        Arc::new(YjsState::new(
            config.hub.yjs_max_pending_updates,
            config.hub.yjs_max_session_bytes,
        )),
        HubLimits {
            terminal_input_max_bytes: config.hub.terminal_input_max_bytes,
            disconnect_grace: Duration::from_secs(config.hub.disconnect_grace_secs),
            rpc_timeout: Duration::from_secs(config.hub.rpc_timeout_secs),
        },
    ));

    // ── Container backends ────────────────────────────────────────────────────
    let docker = Arc::new(MultiHostDocker::new());
    for host in &config.docker_hosts {
        let facts = DaemonHostFacts {
            host_id: host.id.clone(),
            hostname: host.hostname.clone(),
            architecture: host.architecture,
            region: host.region.clone(),
            total_cpu: host.total_cpu,
            total_memory_mb: host.total_memory_mb,
            total_disk_gb: host.total_disk_gb,
            gpu_kind: host.gpu_kind.clone(),
            gpu_count: host.gpu_count,
            labels: host.labels.clone(),
        };
        match DaemonBackend::connect(&host.endpoint, facts) {
            Ok(backend) => docker.register(&host.id, Arc::new(backend)).await,
            Err(e) => warn!(host = %host.id, "daemon host skipped: {e}"),
        }
    }

    // ── Orchestrator ──────────────────────────────────────────────────────────
    let inventory = Arc::new(FleetInventory {
        docker: docker.clone(),
        pods: pods.clone(),
    });
    let placement = PlacementEngine::new(
        config.placement.default_strategy == PlacementStrategyName::BinPack,
        (config.hub.heartbeat_interval_secs * u64::from(config.placement.heartbeat_stale_factor))
            as i64,
    );
    let orchestrator = Arc::new(WorkspaceOrchestrator::new(
        docker.clone(),
        workspace_store,
        inventory,
        placement,
        redis.clone(),
        DEFAULT_WORKSPACE_IMAGE,
    ));

    // ── Queue / approvals ─────────────────────────────────────────────────────
    let queue = Arc::new(TaskQueue::new(
        redis.clone(),
        config.queue.visibility_timeout_secs,
    ));
    let approvals = Arc::new(ApprovalBroker::new(Duration::from_secs(
        config.executor.approval_ttl_secs,
    )));

    let auth_limiter = podex_api::build_limiter(
        config.http.auth_failures_per_minute,
        config.http.auth_failure_burst,
    );

    let state = Arc::new(ApiState {
        sessions: session_store,
        orchestrator,
        queue,
        hub: hub.clone(),
        jwt,
        device_auth,
        device_sessions,
        approvals,
        auth_limiter,
        secure_cookies: config.http.secure_cookies,
    });

    info!("coordinator assembled");
    Ok(Coordinator {
        state,
        hub,
        docker,
        config,
    })
}

/// Background maintenance owned by the process (per-session sweepers are
/// spawned with their sessions):
/// - expire unanswered approvals,
/// - register/unregister pod container backends as pods come and go.
pub fn spawn_background(coordinator: &Coordinator) {
    let approvals = coordinator.state.approvals.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let expired = approvals.sweep_expired();
            if expired > 0 {
                warn!(expired, "unanswered approvals expired");
            }
        }
    });

    let docker = coordinator.docker.clone();
    let pods = coordinator.hub.pods.clone();
    let rpc_timeout = Duration::from_secs(coordinator.config.hub.rpc_timeout_secs);
    tokio::spawn(async move {
        // Hosts this loop registered. Daemon hosts from config never enter
        // this set, so they can never be unregistered by pod churn.
        let mut pod_hosts: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut tick = tokio::time::interval(Duration::from_secs(15));
        loop {
            tick.tick().await;
            let connected: std::collections::HashSet<String> = pods
                .connected_pods()
                .into_iter()
                .map(|p| p.pod_id)
                .collect();

            for pod_id in &connected {
                if !pod_hosts.contains(pod_id) {
                    let backend =
                        PodBackend::new(HubPodRpc(pods.clone()), pod_id.clone(), rpc_timeout);
                    docker.register(pod_id.clone(), Arc::new(backend)).await;
                    pod_hosts.insert(pod_id.clone());
                }
            }
            let stale: Vec<String> = pod_hosts.difference(&connected).cloned().collect();
            for pod_id in stale {
                docker.unregister(&pod_id).await;
                pod_hosts.remove(&pod_id);
            }
        }
    });

    spawn_agent_workers(coordinator);
}

/// Exec capability bound to one session's workspace.
struct SessionExec {
    orchestrator: Arc<WorkspaceOrchestrator>,
    session_id: String,
}

#[async_trait]
impl CommandExec for SessionExec {
    async fn exec(&self, command: &str, timeout: Duration) -> podex_core::Result<ExecOutcome> {
        let workspace = self
            .orchestrator
            .workspace_for_session(&self.session_id)
            .await?
            .ok_or_else(|| {
                Error::Conflict(format!("session {} has no workspace", self.session_id))
            })?;
        let mut request = ExecRequest::new(command);
        request.timeout = Some(timeout);
        let outcome = self.orchestrator.exec(workspace.id, request).await;
        Ok(ExecOutcome {
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        })
    }
}

/// Lazily start one agent worker (plus the session's queue sweeper) per
/// session, keyed off the first `task_created` event. Workers idle-poll
/// once their session drains; they die with the process.
fn spawn_agent_workers(coordinator: &Coordinator) {
    let state = coordinator.state.clone();
    let config = coordinator.config.clone();

    tokio::spawn(async move {
        let mut catalog = ToolCatalog::builtin();
        if let Err(e) = catalog.extend(
            &config.executor.extra_read_tools,
            &config.executor.extra_write_tools,
            &config.executor.extra_command_tools,
            &config.executor.extra_deploy_tools,
        ) {
            warn!("tool catalog extras rejected: {e}");
        }
        let catalog = Arc::new(catalog);
        let audit = Arc::new(AuditLog::new());
        let provider: Arc<dyn podex_llm::Provider> =
            Arc::new(OllamaProvider::new(&config.llm.base_url));
        let mode = AgentMode::parse(&config.llm.default_agent_mode);

        let mut events = state.queue.subscribe();
        let mut running: std::collections::HashSet<String> = std::collections::HashSet::new();
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "worker spawner lagged behind task events");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            if event.event != "task_created" || running.contains(&event.session_id) {
                continue;
            }
            running.insert(event.session_id.clone());
            let session_id = event.session_id.clone();
            info!(%session_id, role = %event.agent_role, "starting agent worker");

            let cancel = CancellationToken::new();
            SessionSweeper::new(
                state.queue.clone(),
                &session_id,
                Duration::from_secs(config.queue.sweep_interval_secs),
                Duration::from_secs(config.queue.orphan_gc_interval_secs),
            )
            .spawn(cancel.clone());

            let bridge = ExecBridge::new(
                SessionExec {
                    orchestrator: state.orchestrator.clone(),
                    session_id: session_id.clone(),
                },
                Duration::from_secs(config.executor.tool_timeout_secs),
            );
            let executor = Arc::new(ToolExecutor::new(
                &session_id,
                format!("agent-{}", event.agent_role),
                "/home/dev",
                mode,
                catalog.clone(),
                state.approvals.clone(),
                audit.clone(),
                Arc::new(bridge),
            ));

            let mut worker_config = WorkerConfig::new(&session_id, &event.agent_role);
            worker_config.model = config.llm.model.clone();
            let worker = AgentWorker::new(
                worker_config,
                state.queue.clone(),
                provider.clone(),
                executor,
                state.hub.clone(),
            );
            tokio::spawn(worker.run(cancel));
        }
    });
}
