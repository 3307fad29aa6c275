// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The hub's view of sessions and workspaces, assembled from the API
//! layer's stores. Workspace→pod routing falls out of host binding: a
//! workspace whose host id names a connected pod is pod-hosted.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use podex_auth::{JwtIssuer, TokenKind};
use podex_core::Result;
use podex_hub::{PodRegistry, SessionDirectory};
use podex_orchestrator::WorkspaceStore;

use crate::sessions::SessionStore;

pub struct CoordinatorDirectory {
    jwt: Arc<JwtIssuer>,
    sessions: Arc<dyn SessionStore>,
    workspaces: Arc<dyn WorkspaceStore>,
    pods: Arc<PodRegistry>,
}

impl CoordinatorDirectory {
    pub fn new(
        jwt: Arc<JwtIssuer>,
        sessions: Arc<dyn SessionStore>,
        workspaces: Arc<dyn WorkspaceStore>,
        pods: Arc<PodRegistry>,
    ) -> Self {
        Self {
            jwt,
            sessions,
            workspaces,
            pods,
        }
    }

    async fn workspace_host(&self, workspace_id: &str) -> Result<Option<(String, String)>> {
        let Ok(id) = workspace_id.parse::<Uuid>() else {
            return Ok(None);
        };
        Ok(self
            .workspaces
            .get(id)
            .await?
            .and_then(|w| w.host_id.map(|h| (w.session_id, h))))
    }
}

#[async_trait]
impl SessionDirectory for CoordinatorDirectory {
    async fn verify_user(&self, token: &str) -> Result<Option<String>> {
        match self.jwt.verify(token, TokenKind::Access).await {
            Ok(claims) => Ok(Some(claims.sub)),
            Err(_) => Ok(None),
        }
    }

    async fn user_owns_session(&self, user_id: &str, session_id: &str) -> Result<bool> {
        Ok(self
            .sessions
            .get(session_id)
            .await?
            .map(|s| s.user_id == user_id)
            .unwrap_or(false))
    }

    async fn workspace_session(&self, workspace_id: &str) -> Result<Option<String>> {
        Ok(self
            .workspace_host(workspace_id)
            .await?
            .map(|(session_id, _)| session_id))
    }

    async fn workspace_pod(&self, workspace_id: &str) -> Result<Option<String>> {
        Ok(self
            .workspace_host(workspace_id)
            .await?
            .and_then(|(_, host_id)| self.pods.is_connected(&host_id).then_some(host_id)))
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
