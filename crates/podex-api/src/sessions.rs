// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Session records and the session resource routes.
//!
//! A session is a user's interactive workspace context: it owns zero or
//! one workspace and any number of agents. Archive/unarchive are
//! state-machine operations — repeating one is a conflict, not a no-op.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use podex_core::{Error, Result, WorkspaceConfig};

use crate::error::ApiResult;
use crate::middleware::Principal;
use crate::state::ApiState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
}

impl SessionRecord {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            title: title.into(),
            archived: false,
            created_at: now,
            updated_at: now,
            workspace_id: None,
        }
    }
}

/// Relational in production; memory for tests and single-node dev.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &SessionRecord) -> Result<()>;
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>>;
    async fn save(&self, session: &SessionRecord) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<()>;
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<SessionRecord>>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<Vec<SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &SessionRecord) -> Result<()> {
        self.sessions.write().await.push(session.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .find(|s| s.id == session_id)
            .cloned())
    }

    async fn save(&self, session: &SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => sessions.push(session.clone()),
        }
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.retain(|s| s.id != session_id);
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        let mut sessions: Vec<SessionRecord> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

/// Load a session and enforce ownership. 404 for both "missing" and
/// "someone else's" — existence must not leak.
pub async fn owned_session(
    state: &ApiState,
    user_id: &str,
    session_id: &str,
) -> Result<SessionRecord> {
    match state.sessions.get(session_id).await? {
        Some(session) if session.user_id == user_id => Ok(session),
        _ => Err(Error::NotFound(format!("session {session_id}"))),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub title: String,
    /// Provision a workspace immediately when present.
    #[serde(default)]
    pub workspace: Option<WorkspaceConfig>,
}

pub async fn list_sessions(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<Vec<SessionRecord>>> {
    Ok(Json(state.sessions.list_by_user(&principal.user_id).await?))
}

pub async fn create_session(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult<Json<SessionRecord>> {
    if body.title.trim().is_empty() {
        return Err(Error::Validation("session title must not be empty".into()).into());
    }
    let mut session = SessionRecord::new(&principal.user_id, body.title.trim());

    if let Some(config) = &body.workspace {
        let result = state
            .orchestrator
            .create_workspace(&principal.user_id, &session.id, config, None)
            .await?;
        session.workspace_id = Some(result.workspace_id);
    }

    state.sessions.create(&session).await?;
    info!(session_id = %session.id, user_id = %principal.user_id, "session created");
    Ok(Json(session))
}

pub async fn get_session(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionRecord>> {
    Ok(Json(
        owned_session(&state, &principal.user_id, &session_id).await?,
    ))
}

pub async fn archive_session(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionRecord>> {
    let mut session = owned_session(&state, &principal.user_id, &session_id).await?;
    if session.archived {
        return Err(Error::Conflict(format!("session {session_id} is already archived")).into());
    }
    session.archived = true;
    session.updated_at = Utc::now();
    state.sessions.save(&session).await?;
    Ok(Json(session))
}

pub async fn unarchive_session(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionRecord>> {
    let mut session = owned_session(&state, &principal.user_id, &session_id).await?;
    if !session.archived {
        return Err(Error::Conflict(format!("session {session_id} is not archived")).into());
    }
    session.archived = false;
    session.updated_at = Utc::now();
    state.sessions.save(&session).await?;
    Ok(Json(session))
}

/// Delete a session: workspace (if any) first, then queued tasks, then the
/// record. Workspace deletion is already idempotent.
pub async fn delete_session(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = owned_session(&state, &principal.user_id, &session_id).await?;

    if let Some(workspace_id) = session.workspace_id {
        state
            .orchestrator
            .delete_workspace(workspace_id, false)
            .await?;
    }
    let cleared = state.queue.clear_session(&session_id).await?;
    // Anything still waiting on a user decision resolves as expired.
    state.approvals.cancel_session(&session_id);
    state.sessions.delete(&session_id).await?;

    info!(%session_id, cleared, "session deleted");
    Ok(Json(serde_json::json!({ "deleted": session_id, "tasks_cleared": cleared })))
}
