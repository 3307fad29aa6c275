// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Connected-pod registry and the reverse-RPC correlation table.
//!
//! At most one active connection per pod id: a reconnect forcibly
//! disconnects the previous socket and takes over the registration. Every
//! pending call is evicted on response, timeout, or pod disconnect — a
//! disconnect walks the table and fails all calls for that pod with a
//! connection-lost error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use podex_core::{Error, Result};

use crate::protocol::{PodCommand, RpcMethod};

/// Outbound queue depth per pod socket.
const POD_SEND_BUFFER: usize = 256;

/// A pod row as the directory knows it.
#[derive(Debug, Clone)]
pub struct PodRecord {
    pub pod_id: String,
    pub user_id: String,
    pub name: String,
}

/// Persistence-facing pod bookkeeping (token store + status columns).
#[async_trait]
pub trait PodDirectory: Send + Sync {
    /// Verify a raw `pdx_pod_…` token against the hashed store.
    async fn verify_token(&self, token: &str) -> Result<Option<PodRecord>>;
    async fn set_status(&self, pod_id: &str, online: bool, last_error: Option<&str>) -> Result<()>;
    async fn update_capabilities(&self, pod_id: &str, capabilities: Value) -> Result<()>;
    async fn update_heartbeat(&self, pod_id: &str, active_workspaces: u32) -> Result<()>;
}

struct ConnectedPod {
    tx: mpsc::Sender<PodCommand>,
    cancel: CancellationToken,
    generation: u64,
    connected_at: DateTime<Utc>,
    /// Millisecond timestamps; atomics so heartbeats never lock the map.
    last_heartbeat_ms: AtomicU64,
    active_workspaces: AtomicU64,
}

struct PendingCall {
    pod_id: String,
    tx: oneshot::Sender<Result<Value>>,
}

/// Live snapshot of one connected pod for capacity accounting.
#[derive(Debug, Clone)]
pub struct PodLiveness {
    pub pod_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub active_workspaces: u32,
}

#[derive(Default)]
pub struct PodRegistry {
    pods: DashMap<String, ConnectedPod>,
    pending: DashMap<Uuid, PendingCall>,
    generations: AtomicU64,
}

impl PodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pod connection, taking over from any previous socket.
    /// Returns the command receiver for the socket writer plus the token
    /// the reader must watch (it fires when a newer connection takes over)
    /// and the registration generation.
    pub fn register(
        &self,
        pod_id: &str,
    ) -> (mpsc::Receiver<PodCommand>, CancellationToken, u64) {
        let (tx, rx) = mpsc::channel(POD_SEND_BUFFER);
        let cancel = CancellationToken::new();
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;

        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        let new_pod = ConnectedPod {
            tx,
            cancel: cancel.clone(),
            generation,
            connected_at: Utc::now(),
            last_heartbeat_ms: AtomicU64::new(now_ms),
            active_workspaces: AtomicU64::new(0),
        };

        if let Some(previous) = self.pods.insert(pod_id.to_string(), new_pod) {
            info!(%pod_id, "pod reconnected; disconnecting previous socket");
            previous.cancel.cancel();
            self.fail_pending_for(pod_id, "superseded by a newer pod connection");
        }

        info!(%pod_id, generation, "pod registered");
        (rx, cancel, generation)
    }

    /// Tear down a registration. Only the matching generation wins: a stale
    /// reader racing a takeover must not evict the fresh connection.
    pub fn disconnect(&self, pod_id: &str, generation: u64) -> bool {
        let removed = self
            .pods
            .remove_if(pod_id, |_, pod| pod.generation == generation)
            .is_some();
        if removed {
            info!(%pod_id, "pod disconnected");
            self.fail_pending_for(pod_id, "pod disconnected");
        }
        removed
    }

    pub fn is_connected(&self, pod_id: &str) -> bool {
        self.pods.contains_key(pod_id)
    }

    pub fn heartbeat(&self, pod_id: &str, active_workspaces: u32) {
        if let Some(pod) = self.pods.get(pod_id) {
            let now_ms = Utc::now().timestamp_millis().max(0) as u64;
            pod.last_heartbeat_ms.store(now_ms, Ordering::Relaxed);
            pod.active_workspaces
                .store(u64::from(active_workspaces), Ordering::Relaxed);
        }
    }

    pub fn liveness(&self, pod_id: &str) -> Option<PodLiveness> {
        self.pods.get(pod_id).map(|pod| PodLiveness {
            pod_id: pod_id.to_string(),
            connected_at: pod.connected_at,
            last_heartbeat: ms_to_datetime(pod.last_heartbeat_ms.load(Ordering::Relaxed)),
            active_workspaces: pod.active_workspaces.load(Ordering::Relaxed) as u32,
        })
    }

    pub fn connected_pods(&self) -> Vec<PodLiveness> {
        self.pods
            .iter()
            .map(|entry| PodLiveness {
                pod_id: entry.key().clone(),
                connected_at: entry.connected_at,
                last_heartbeat: ms_to_datetime(entry.last_heartbeat_ms.load(Ordering::Relaxed)),
                active_workspaces: entry.active_workspaces.load(Ordering::Relaxed) as u32,
            })
            .collect()
    }

    // ── Reverse RPC ───────────────────────────────────────────────────────────

    /// Call a verb on a connected pod and await its response.
    ///
    /// The pending entry is always evicted — on response, on timeout, and
    /// on disconnect — so the correlation table cannot leak.
    pub async fn call_pod(
        &self,
        pod_id: &str,
        method: RpcMethod,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let call_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        let sender = {
            let Some(pod) = self.pods.get(pod_id) else {
                return Err(Error::Transport(format!("pod {pod_id} is not connected")));
            };
            pod.tx.clone()
        };

        self.pending.insert(
            call_id,
            PendingCall {
                pod_id: pod_id.to_string(),
                tx,
            },
        );

        let request = PodCommand::RpcRequest {
            call_id,
            method,
            params,
        };
        if sender.send(request).await.is_err() {
            self.pending.remove(&call_id);
            return Err(Error::Transport(format!(
                "pod {pod_id} connection closed before send"
            )));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                // Sender dropped without a verdict — the disconnect sweep
                // already evicted the entry.
                Err(Error::Transport(format!("pod {pod_id} connection lost")))
            }
            Err(_) => {
                self.pending.remove(&call_id);
                Err(Error::Timeout(format!(
                    "rpc {} to pod {pod_id} exceeded {}s",
                    method.as_str(),
                    timeout.as_secs()
                )))
            }
        }
    }

    /// Route an `rpc_response` frame back to its waiting future.
    pub fn handle_response(&self, call_id: Uuid, result: Option<Value>, error: Option<String>) {
        let Some((_, pending)) = self.pending.remove(&call_id) else {
            warn!(%call_id, "response for unknown rpc call");
            return;
        };
        let outcome = match error {
            Some(message) => Err(Error::Transport(format!(
                "pod {}: {message}",
                pending.pod_id
            ))),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let _ = pending.tx.send(outcome);
    }

    fn fail_pending_for(&self, pod_id: &str, reason: &str) {
        let stale: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|entry| entry.pod_id == pod_id)
            .map(|entry| *entry.key())
            .collect();
        for call_id in stale {
            if let Some((_, pending)) = self.pending.remove(&call_id) {
                let _ = pending
                    .tx
                    .send(Err(Error::Transport(format!("pod {pod_id}: {reason}"))));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn ms_to_datetime(ms: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms as i64).unwrap_or_else(Utc::now)
}

// ── In-memory directory (tests and single-node dev) ──────────────────────────

#[derive(Default)]
pub struct MemoryPodDirectory {
    /// token → record
    tokens: DashMap<String, PodRecord>,
    pub statuses: DashMap<String, bool>,
}

impl MemoryPodDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pod(&self, token: &str, record: PodRecord) {
        self.tokens.insert(token.to_string(), record);
    }
}

#[async_trait]
impl PodDirectory for MemoryPodDirectory {
    async fn verify_token(&self, token: &str) -> Result<Option<PodRecord>> {
        Ok(self.tokens.get(token).map(|r| r.clone()))
    }

    async fn set_status(&self, pod_id: &str, online: bool, _last_error: Option<&str>) -> Result<()> {
        self.statuses.insert(pod_id.to_string(), online);
        Ok(())
    }

    async fn update_capabilities(&self, _pod_id: &str, _capabilities: Value) -> Result<()> {
        Ok(())
    }

    async fn update_heartbeat(&self, _pod_id: &str, _active_workspaces: u32) -> Result<()> {
        Ok(())
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
