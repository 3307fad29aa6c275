// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The mode × category permission matrix.
//!
//! Stateless: the engine borrows the catalog and the session allowlist and
//! computes a fresh [`PermissionResult`] per call — results are never
//! stored.

use serde_json::Value;

use podex_core::{AgentMode, PermissionResult, ToolCategory};

use crate::catalog::ToolCatalog;
use crate::command::is_command_allowed;

pub struct PermissionEngine<'a> {
    catalog: &'a ToolCatalog,
}

impl<'a> PermissionEngine<'a> {
    pub fn new(catalog: &'a ToolCatalog) -> Self {
        Self { catalog }
    }

    /// Decide whether `tool` may run in `mode`.
    ///
    /// `args` matters only for COMMAND tools, whose `command` argument is
    /// matched against the session allowlist in AUTO mode.
    pub fn check_permission(
        &self,
        mode: AgentMode,
        tool: &str,
        args: &Value,
        allowlist: &[String],
    ) -> PermissionResult {
        let Some(category) = self.catalog.category_of(tool) else {
            return PermissionResult::deny(format!("unknown tool: {tool}"));
        };

        match (mode, category) {
            // READ is allowed everywhere.
            (_, ToolCategory::Read) => PermissionResult::allow(),

            // PLAN: nothing but reads.
            (AgentMode::Plan, ToolCategory::Write) => {
                PermissionResult::deny(format!("{tool} is not allowed in Plan mode"))
            }
            (AgentMode::Plan, ToolCategory::Command) => {
                PermissionResult::deny("commands are not allowed in Plan mode")
            }
            (AgentMode::Plan, ToolCategory::Deploy) => {
                PermissionResult::deny("deploys are not allowed in Plan mode")
            }

            // SOVEREIGN: everything, no approvals.
            (AgentMode::Sovereign, _) => PermissionResult::allow(),

            // ASK: everything pauses for the user; commands may be added to
            // the allowlist from the approval dialog.
            (AgentMode::Ask, ToolCategory::Write) => PermissionResult::needs_approval(false),
            (AgentMode::Ask, ToolCategory::Command) => PermissionResult::needs_approval(true),
            (AgentMode::Ask, ToolCategory::Deploy) => PermissionResult::needs_approval(false),

            // AUTO: writes flow, commands consult the allowlist, deploys
            // always pause.
            (AgentMode::Auto, ToolCategory::Write) => PermissionResult::allow(),
            (AgentMode::Auto, ToolCategory::Command) => {
                let command = command_argument(args);
                if is_command_allowed(command, allowlist) {
                    PermissionResult::allow()
                } else {
                    PermissionResult::needs_approval(true)
                }
            }
            (AgentMode::Auto, ToolCategory::Deploy) => PermissionResult::needs_approval(false),
        }
    }
}

fn command_argument(args: &Value) -> &str {
    args.get("command").and_then(Value::as_str).unwrap_or("")
}

// ── Unit tests ────────────────────────────────────────────────────────────────
