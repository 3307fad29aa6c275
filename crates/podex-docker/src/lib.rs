// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Uniform container operations over many heterogeneous hosts.
//!
//! Two backends plug in behind [`ContainerBackend`]:
//! - [`DaemonBackend`] — a bollard client for cloud hosts whose Docker
//!   daemon the coordinator dials directly;
//! - [`PodBackend`] — an RPC proxy for self-hosted pods whose control
//!   direction is reversed (the pod dialed out; we call back through the
//!   hub's correlation-id channel, abstracted here as [`PodRpc`]).
//!
//! Invariants enforced at this layer:
//! - every container carries the `podex.workspace_id` / `podex.user_id` /
//!   `podex.session_id` / `podex.tier` labels;
//! - `exec` always runs under a pinned non-root identity with a bounded
//!   timeout (default 30 s, per-call override);
//! - `create_container` is idempotent on `(host_id, name)` — a retried
//!   request returns the existing container when the labels match and is a
//!   conflict when they don't.

mod backend;
mod daemon;
mod multi;
mod pod;

pub use backend::{
    ContainerBackend, ContainerSpec, ContainerStats, ExecRequest, ExecResult, EXEC_USER,
    REQUIRED_LABELS,
};
pub use daemon::{DaemonBackend, DaemonHostFacts};
pub use multi::MultiHostDocker;
pub use pod::{PodBackend, PodRpc};

/// Default exec timeout, overridable per call.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;
