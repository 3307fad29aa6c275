// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Domain model shared by every podex coordinator crate.
//!
//! Pure data: no I/O, no async, no Redis. Each entity here is owned by
//! exactly one subsystem at runtime (the orchestrator writes workspaces,
//! the queue writes tasks, the hub writes pod records) — this crate only
//! defines the shapes and the invariant-checking helpers.

pub mod error;
pub mod host;
pub mod mode;
pub mod task;
pub mod tier;
pub mod workspace;

pub use error::{Error, Result};
pub use host::{Arch, HostCapacity, HostStatus};
pub use mode::{AgentMode, PermissionResult, ToolCategory};
pub use task::{Task, TaskPriority, TaskStatus};
pub use tier::{HardwareCatalog, HardwareSpec, ResourceRequirements, Tier};
pub use workspace::{Workspace, WorkspaceConfig, WorkspaceStatus};
