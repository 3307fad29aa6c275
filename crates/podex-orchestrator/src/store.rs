// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Workspace persistence capability.
//!
//! The relational schema behind this trait is outside the coordinator; the
//! orchestrator only needs these four verbs. Tests (and single-node dev
//! mode) use [`MemoryWorkspaceStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use podex_core::{Result, Workspace};

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn get(&self, workspace_id: Uuid) -> Result<Option<Workspace>>;
    async fn get_by_session(&self, session_id: &str) -> Result<Option<Workspace>>;
    async fn save(&self, workspace: &Workspace) -> Result<()>;
    async fn delete(&self, workspace_id: Uuid) -> Result<()>;
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Workspace>>;
}

#[derive(Default)]
pub struct MemoryWorkspaceStore {
    workspaces: RwLock<HashMap<Uuid, Workspace>>,
}

impl MemoryWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkspaceStore for MemoryWorkspaceStore {
    async fn get(&self, workspace_id: Uuid) -> Result<Option<Workspace>> {
        Ok(self.workspaces.read().await.get(&workspace_id).cloned())
    }

    async fn get_by_session(&self, session_id: &str) -> Result<Option<Workspace>> {
        Ok(self
            .workspaces
            .read()
            .await
            .values()
            .find(|w| w.session_id == session_id)
            .cloned())
    }

    async fn save(&self, workspace: &Workspace) -> Result<()> {
        self.workspaces
            .write()
            .await
            .insert(workspace.id, workspace.clone());
        Ok(())
    }

    async fn delete(&self, workspace_id: Uuid) -> Result<()> {
        self.workspaces.write().await.remove(&workspace_id);
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Workspace>> {
        Ok(self
            .workspaces
            .read()
            .await
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}
