// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The per-session agent worker.
//!
//! One worker task per (session, role): it dequeues tasks from the
//! priority queue, drives the model in a turn loop, routes every tool
//! call through the executor's permission engine (pausing on approvals
//! and surfacing them to the user over the hub), streams deltas back to
//! the session room, and reports completion or failure back to the queue
//! — failures with the queue's bounded retry semantics.
//!
//! ```text
//!  queue ──dequeue──► worker ──chat──► provider
//!                        │◄─ deltas / tool calls ─┘
//!                        ├─ executor.dispatch ──► workspace
//!                        │     └ pending approval ─► hub (agent_attention)
//!                        └─ hub.emit_to_session (stream, results)
//! ```

mod bridge;
mod worker;

pub use bridge::{CommandExec, ExecBridge, ExecOutcome};
pub use worker::{AgentWorker, WorkerConfig};
