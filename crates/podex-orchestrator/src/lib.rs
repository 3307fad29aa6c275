// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Workspace orchestrator — the single writer of workspace state.
//!
//! Every lifecycle transition flows through [`WorkspaceOrchestrator`],
//! which serializes concurrent writers per workspace (a local async mutex
//! inside this coordinator, plus a Redis TTL lock across coordinator
//! instances) and drives the placement engine and the multi-host container
//! layer.

mod orchestrator;
mod store;

pub use orchestrator::{HostInventory, OrchestrationResult, WorkspaceOrchestrator};
pub use store::{MemoryWorkspaceStore, WorkspaceStore};
