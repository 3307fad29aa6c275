// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tool executor & permission engine — the heart of the agent runtime.
//!
//! Every tool call an LLM emits flows through
//! [`PermissionEngine::check_permission`] and, when allowed (possibly after
//! a user approval round-trip through the [`ApprovalBroker`]), is
//! dispatched by the [`ToolExecutor`] into the session's workspace.
//!
//! # Mode × category matrix
//!
//! | mode      | READ  | WRITE            | COMMAND                       | DEPLOY           |
//! |-----------|-------|------------------|-------------------------------|------------------|
//! | plan      | allow | deny             | deny                          | deny             |
//! | ask       | allow | approval         | approval (+allowlist offer)   | approval         |
//! | auto      | allow | allow            | allowlist, else approval      | approval         |
//! | sovereign | allow | allow            | allow                         | allow            |
//!
//! Command strings are validated against a forbidden-metacharacter set
//! before any allowlist matching; hook commands share the same set and are
//! exec'd as argv arrays, never through a shell.

mod approval;
mod audit;
mod catalog;
mod command;
mod executor;
mod health;
mod hooks;
mod permission;
mod sanitize;

pub use approval::{ApprovalBroker, ApprovalDecision, PendingApproval};
pub use audit::{AuditEntry, AuditLog, AuditOutcome};
pub use catalog::ToolCatalog;
pub use command::{first_forbidden_pattern, is_command_allowed};
pub use executor::{ToolCall, ToolDispatch, ToolExecutor, ToolOutput, WorkspaceBridge};
pub use health::{HealthCheck, HealthReport, JsonTool};
pub use hooks::{
    HookCondition, HookContext, HookDefinition, HookEvent, HookExecutor, HookResult,
};
pub use permission::PermissionEngine;
pub use sanitize::{contain_path, sanitize_environment};
