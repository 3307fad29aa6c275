// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Local-pod records: the persisted half of the reverse-RPC hub.
//!
//! A pod row holds the hashed shared-secret token, its reported
//! capabilities, and the online/offline status driven by the hub's
//! connect/disconnect events. Token verification walks the user's rows
//! and compares digests in constant time.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use async_trait::async_trait;
use podex_auth::PodTokenHash;
use podex_core::Result;
use podex_hub::{PodDirectory, PodRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub token_hash: PodTokenHash,
    pub online: bool,
    #[serde(default)]
    pub os_info: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub total_memory_mb: Option<u64>,
    #[serde(default)]
    pub cpu_cores: Option<f64>,
    #[serde(default)]
    pub current_workspaces: u32,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PodRow {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        name: impl Into<String>,
        token_hash: PodTokenHash,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            name: name.into(),
            token_hash,
            online: false,
            os_info: None,
            architecture: None,
            total_memory_mb: None,
            cpu_cores: None,
            current_workspaces: 0,
            last_heartbeat: None,
            last_error: None,
        }
    }
}

/// In-memory pod store; the relational version implements the same trait.
#[derive(Default)]
pub struct MemoryPodStore {
    pods: DashMap<String, PodRow>,
}

impl MemoryPodStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, pod: PodRow) {
        self.pods.insert(pod.id.clone(), pod);
    }

    pub fn get(&self, pod_id: &str) -> Option<PodRow> {
        self.pods.get(pod_id).map(|p| p.clone())
    }
}

#[async_trait]
impl PodDirectory for MemoryPodStore {
    async fn verify_token(&self, token: &str) -> Result<Option<PodRecord>> {
        for pod in self.pods.iter() {
            if pod.token_hash.verify(token) {
                return Ok(Some(PodRecord {
                    pod_id: pod.id.clone(),
                    user_id: pod.user_id.clone(),
                    name: pod.name.clone(),
                }));
            }
        }
        Ok(None)
    }

    async fn set_status(&self, pod_id: &str, online: bool, last_error: Option<&str>) -> Result<()> {
        if let Some(mut pod) = self.pods.get_mut(pod_id) {
            pod.online = online;
            if online {
                pod.last_heartbeat = Some(Utc::now());
                pod.last_error = None;
            } else if let Some(error) = last_error {
                pod.last_error = Some(error.to_string());
            }
        }
        Ok(())
    }

    async fn update_capabilities(&self, pod_id: &str, capabilities: Value) -> Result<()> {
        if let Some(mut pod) = self.pods.get_mut(pod_id) {
            pod.os_info = capabilities
                .get("os")
                .and_then(Value::as_str)
                .map(str::to_string);
            pod.architecture = capabilities
                .get("architecture")
                .and_then(Value::as_str)
                .map(str::to_string);
            pod.total_memory_mb = capabilities.get("total_memory_mb").and_then(Value::as_u64);
            pod.cpu_cores = capabilities.get("cpu_cores").and_then(Value::as_f64);
        }
        Ok(())
    }

    async fn update_heartbeat(&self, pod_id: &str, active_workspaces: u32) -> Result<()> {
        if let Some(mut pod) = self.pods.get_mut(pod_id) {
            pod.last_heartbeat = Some(Utc::now());
            pod.current_workspaces = active_workspaces;
        }
        Ok(())
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use podex_auth::RawPodToken;

    #[tokio::test]
    async fn token_verification_finds_the_right_pod() {
        let store = MemoryPodStore::new();
        let token_a = RawPodToken::generate();
        let raw_a = token_a.as_str().to_string();
        store.add(PodRow::new("pod-a", "u1", "laptop", token_a.into_hash()));
        store.add(PodRow::new(
            "pod-b",
            "u2",
            "desktop",
            RawPodToken::generate().into_hash(),
        ));

        let record = store.verify_token(&raw_a).await.unwrap().unwrap();
        assert_eq!(record.pod_id, "pod-a");
        assert_eq!(record.user_id, "u1");
        assert!(store.verify_token("pdx_pod_garbage").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_transitions_track_heartbeat_and_errors() {
        let store = MemoryPodStore::new();
        store.add(PodRow::new(
            "pod-a",
            "u1",
            "laptop",
            RawPodToken::generate().into_hash(),
        ));

        store.set_status("pod-a", true, None).await.unwrap();
        assert!(store.get("pod-a").unwrap().online);

        store
            .set_status("pod-a", false, Some("connection reset"))
            .await
            .unwrap();
        let pod = store.get("pod-a").unwrap();
        assert!(!pod.online);
        assert_eq!(pod.last_error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn heartbeat_updates_workspace_count() {
        let store = MemoryPodStore::new();
        store.add(PodRow::new(
            "pod-a",
            "u1",
            "laptop",
            RawPodToken::generate().into_hash(),
        ));
        store.update_heartbeat("pod-a", 5).await.unwrap();
        let pod = store.get("pod-a").unwrap();
        assert_eq!(pod.current_workspaces, 5);
        assert!(pod.last_heartbeat.is_some());
    }
}
