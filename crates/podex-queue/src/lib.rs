// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-session persistent priority task queue over Redis.
//!
//! # Key layout
//!
//! ```text
//! podex:tasks:{session}:pending    sorted set, score = class + FIFO fraction
//! podex:tasks:{session}:active     set of claimed task ids
//! podex:tasks:{session}:completed  capped list of the 100 most recent ids
//! podex:task:{task_id}             JSON body, 24 h TTL (1 h once terminal)
//! podex:tasks:updates              pub/sub channel for task events
//! ```
//!
//! The status field in the task body is authoritative over set membership;
//! a task id lives in at most one of pending/active at any instant.
//!
//! Claims are atomic on `ZREM`: its return value names the race winner, so
//! two workers can never both run the same task.

mod events;
mod queue;
mod sweeper;

pub use events::TaskEvent;
pub use queue::{
    EnqueueParams, SessionStats, TaskQueue, COMPLETED_TTL_SECS, TASK_TTL_SECS, UPDATES_CHANNEL,
};
pub use sweeper::SessionSweeper;
