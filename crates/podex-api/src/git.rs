// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Git operations scoped to a session's workspace.
//!
//! Every handler resolves the session's workspace and runs one git
//! command inside it through the orchestrator's exec path. User-supplied
//! values (messages, branch names, refs) are shell-quoted and validated —
//! a branch name can never smuggle a second command.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use podex_core::Error;
use podex_docker::ExecRequest;

use crate::error::ApiResult;
use crate::middleware::Principal;
use crate::sessions::owned_session;
use crate::state::ApiState;

#[derive(Debug, Serialize)]
pub struct GitOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Run one git command in the session's workspace. Exit codes pass
/// through; −1 is the orchestrator's synthetic failure with the reason in
/// stderr.
async fn run_git(
    state: &ApiState,
    user_id: &str,
    session_id: &str,
    command: String,
) -> ApiResult<Json<GitOutput>> {
    let session = owned_session(state, user_id, session_id).await?;
    let workspace_id: Uuid = session
        .workspace_id
        .ok_or_else(|| Error::Conflict(format!("session {session_id} has no workspace")))?;

    let result = state
        .orchestrator
        .exec(workspace_id, ExecRequest::new(command))
        .await;
    Ok(Json(GitOutput {
        exit_code: result.exit_code,
        stdout: result.stdout,
        stderr: result.stderr,
    }))
}

/// Quote one user-supplied argument for the workspace shell. Rejects
/// values shell quoting cannot make safe (NULs).
fn quoted(value: &str) -> Result<String, Error> {
    shlex::try_quote(value)
        .map(|q| q.into_owned())
        .map_err(|_| Error::Validation("argument contains a NUL byte".into()))
}

/// Branch/ref names additionally get a character allowlist: quoting makes
/// them inert to the shell, this keeps them inert to git's option parser.
fn valid_ref(name: &str) -> Result<&str, Error> {
    let ok = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'));
    if ok {
        Ok(name)
    } else {
        Err(Error::Validation(format!("invalid ref name: {name}")))
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

pub async fn status(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<GitOutput>> {
    run_git(
        &state,
        &principal.user_id,
        &session_id,
        "git status --porcelain=v1 --branch".into(),
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct CommitBody {
    pub message: String,
    /// Stage everything first (`git add -A`).
    #[serde(default)]
    pub stage_all: bool,
}

pub async fn commit(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
    Json(body): Json<CommitBody>,
) -> ApiResult<Json<GitOutput>> {
    if body.message.trim().is_empty() {
        return Err(Error::Validation("commit message must not be empty".into()).into());
    }
    let message = quoted(&body.message)?;
    let command = if body.stage_all {
        format!("git add -A && git commit -m {message}")
    } else {
        format!("git commit -m {message}")
    };
    run_git(&state, &principal.user_id, &session_id, command).await
}

pub async fn push(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<GitOutput>> {
    run_git(&state, &principal.user_id, &session_id, "git push".into()).await
}

pub async fn pull(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<GitOutput>> {
    run_git(
        &state,
        &principal.user_id,
        &session_id,
        "git pull --ff-only".into(),
    )
    .await
}

pub async fn branches(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<GitOutput>> {
    run_git(
        &state,
        &principal.user_id,
        &session_id,
        "git branch --all --format='%(refname:short)'".into(),
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub branch: String,
    #[serde(default)]
    pub create: bool,
}

pub async fn checkout(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
    Json(body): Json<CheckoutBody>,
) -> ApiResult<Json<GitOutput>> {
    let branch = valid_ref(&body.branch)?;
    let command = if body.create {
        format!("git checkout -b {branch}")
    } else {
        format!("git checkout {branch}")
    };
    run_git(&state, &principal.user_id, &session_id, command).await
}

#[derive(Debug, Deserialize)]
pub struct CompareBody {
    pub base: String,
    pub head: String,
}

pub async fn compare(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
    Json(body): Json<CompareBody>,
) -> ApiResult<Json<GitOutput>> {
    let base = valid_ref(&body.base)?;
    let head = valid_ref(&body.head)?;
    run_git(
        &state,
        &principal.user_id,
        &session_id,
        format!("git diff --stat {base}...{head}"),
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct MergePreviewBody {
    pub branch: String,
}

/// Dry-run merge: report conflicts without touching the tree.
pub async fn merge_preview(
    State(state): State<Arc<ApiState>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
    Json(body): Json<MergePreviewBody>,
) -> ApiResult<Json<GitOutput>> {
    let branch = valid_ref(&body.branch)?;
    run_git(
        &state,
        &principal.user_id,
        &session_id,
        format!("git merge --no-commit --no-ff {branch}; git merge --abort"),
    )
    .await
}

// ── Unit tests ────────────────────────────────────────────────────────────────
