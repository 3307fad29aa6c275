// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The coordinator-wide error taxonomy.
//!
//! Errors are classified by *kind*, not by origin: every subsystem maps its
//! failures into one of these variants so the HTTP surface and the task
//! queue can make uniform retry/propagation decisions.
//!
//! Propagation policy:
//! - `Validation` and the auth variants are local and immediate — never
//!   retried.
//! - `Transport` and `Timeout` are recoverable at the task-queue retry
//!   boundary (bounded by a task's `max_retries`).
//! - `Capacity` is surfaced as 503; callers may back off, the orchestrator
//!   itself never auto-retries a placement.
//! - `Fatal` means a coordinator invariant is broken; the process logs and
//!   fails fast, a supervisor restarts it.
//! - Anything unclassified becomes `Internal` with a correlation id; the
//!   user sees the id and nothing else.

use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input, unknown enum value, path traversal, forbidden shell
    /// metacharacter. 400-class, never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing, invalid, or expired credentials. 401.
    #[error("authentication required")]
    Unauthorized,

    /// Authenticated principal lacks access to the resource. 403.
    /// Deliberately carries no detail — must not leak whether the target
    /// exists.
    #[error("access denied")]
    Forbidden,

    /// Unknown workspace/session/task/host. 404.
    #[error("{0} not found")]
    NotFound(String),

    /// State-machine violation (archive-already-archived and friends). 400
    /// with a specific message.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No host satisfies placement. 503; retry is the caller's decision.
    #[error("insufficient capacity: {0}")]
    Capacity(String),

    /// RPC timeout, pod disconnected, backend unreachable. Retried with
    /// bounded backoff at the task-queue level.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Operation exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Coordinator invariant broken (task in both pending and active, host
    /// record lost). Log, emit metrics, fail fast.
    #[error("invariant violated: {0}")]
    Fatal(String),

    /// Unclassified internal error. The correlation id is the only detail
    /// shown to users.
    #[error("internal error (correlation id {correlation_id})")]
    Internal { correlation_id: Uuid },
}

impl Error {
    /// Wrap an unclassified error, allocating a fresh correlation id.
    pub fn internal() -> Self {
        Error::Internal {
            correlation_id: Uuid::new_v4(),
        }
    }

    /// HTTP status code this error surfaces as.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::Conflict(_) => 400,
            Error::Unauthorized => 401,
            Error::Forbidden => 403,
            Error::NotFound(_) => 404,
            Error::Capacity(_) => 503,
            Error::Transport(_) => 502,
            Error::Timeout(_) => 504,
            Error::Fatal(_) | Error::Internal { .. } => 500,
        }
    }

    /// Whether the task-queue retry boundary should requeue on this error.
    ///
    /// Timeouts default to retryable for tool calls; user-initiated HTTP
    /// requests decide at the call site and never reach the queue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout(_))
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
