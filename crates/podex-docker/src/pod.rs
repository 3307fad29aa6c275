// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Container backend for self-hosted pods.
//!
//! Pods cannot accept inbound connections, so every operation is proxied as
//! a reverse-RPC call over the pod's persistent hub connection. The hub
//! side is abstracted as [`PodRpc`] so this crate stays transport-agnostic
//! and tests can wire a scripted double.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use podex_core::{Error, HostCapacity, Result};

use crate::backend::{ContainerBackend, ContainerSpec, ContainerStats, ExecRequest, ExecResult};
use crate::DEFAULT_EXEC_TIMEOUT_SECS;

/// One reverse-RPC round trip to a connected pod.
#[async_trait]
pub trait PodRpc: Send + Sync {
    async fn call(
        &self,
        pod_id: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value>;
}

pub struct PodBackend<R: PodRpc> {
    rpc: R,
    pod_id: String,
    rpc_timeout: Duration,
}

impl<R: PodRpc> PodBackend<R> {
    pub fn new(rpc: R, pod_id: impl Into<String>, rpc_timeout: Duration) -> Self {
        Self {
            rpc,
            pod_id: pod_id.into(),
            rpc_timeout,
        }
    }

    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        self.rpc.call(&self.pod_id, method, params, timeout).await
    }
}

fn field_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl<R: PodRpc> ContainerBackend for PodBackend<R> {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        spec.validate()?;
        let reply = self
            .call(
                "create_workspace",
                serde_json::to_value(spec)
                    .map_err(|e| Error::Validation(format!("unserializable spec: {e}")))?,
                self.rpc_timeout,
            )
            .await?;
        field_str(&reply, "container_id")
            .ok_or_else(|| Error::Transport("pod create_workspace reply missing container_id".into()))
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.call(
            "update_workspace",
            json!({ "container_id": container_id, "action": "start" }),
            self.rpc_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        self.call(
            "stop_workspace",
            json!({ "container_id": container_id }),
            self.rpc_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn remove_container(&self, container_id: &str, remove_volumes: bool) -> Result<()> {
        self.call(
            "delete_workspace",
            json!({ "container_id": container_id, "remove_volumes": remove_volumes }),
            self.rpc_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn exec(&self, container_id: &str, req: &ExecRequest) -> Result<ExecResult> {
        let timeout = req
            .timeout
            .unwrap_or(Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS));
        let reply = self
            .call(
                "exec_command",
                json!({
                    "container_id": container_id,
                    "command": req.command,
                    "working_dir": req.working_dir,
                    "environment": req.environment,
                    "timeout_secs": timeout.as_secs(),
                }),
                // The RPC deadline wraps the in-container deadline so a hung
                // pod cannot stall the caller indefinitely.
                timeout + Duration::from_secs(5),
            )
            .await?;
        serde_json::from_value(reply)
            .map_err(|e| Error::Transport(format!("malformed exec reply from pod: {e}")))
    }

    async fn stats(&self, container_id: &str) -> Result<ContainerStats> {
        let reply = self
            .call(
                "list_workspaces",
                json!({ "container_id": container_id }),
                self.rpc_timeout,
            )
            .await?;
        Ok(serde_json::from_value(reply).unwrap_or_default())
    }

    async fn server_stats(&self) -> Result<HostCapacity> {
        let reply = self.call("health_check", json!({}), self.rpc_timeout).await?;
        serde_json::from_value(reply)
            .map_err(|e| Error::Transport(format!("malformed health_check reply from pod: {e}")))
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
