// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Agent operating modes and permission results.
//!
//! The four modes form a total order of permissiveness:
//! `plan < ask < auto < sovereign`. The full tool × mode matrix lives in
//! the executor crate; this module only defines the vocabulary.

use serde::{Deserialize, Serialize};

/// Per-turn agent operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Read-only research and planning; all writes denied.
    Plan,
    /// Writes and commands allowed but every one pauses for user approval.
    Ask,
    /// Writes allowed; commands auto-run only when allow-listed.
    Auto,
    /// Everything allowed without approval.
    Sovereign,
}

impl AgentMode {
    /// Case-insensitive parse; unknown strings default to `Ask` (the safe
    /// interactive mode), never an error.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "plan" => AgentMode::Plan,
            "auto" => AgentMode::Auto,
            "sovereign" => AgentMode::Sovereign,
            _ => AgentMode::Ask,
        }
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentMode::Plan => "plan",
            AgentMode::Ask => "ask",
            AgentMode::Auto => "auto",
            AgentMode::Sovereign => "sovereign",
        };
        f.write_str(s)
    }
}

/// The permission class a tool belongs to. Every tool name maps to exactly
/// one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Read,
    Write,
    Command,
    Deploy,
}

/// Outcome of a permission check. Computed per tool call; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResult {
    pub allowed: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub can_add_to_allowlist: bool,
}

impl PermissionResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            error: None,
            requires_approval: false,
            can_add_to_allowlist: false,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            error: Some(reason.into()),
            requires_approval: false,
            can_add_to_allowlist: false,
        }
    }

    pub fn needs_approval(can_add_to_allowlist: bool) -> Self {
        Self {
            allowed: true,
            error: None,
            requires_approval: true,
            can_add_to_allowlist,
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_order_by_permissiveness() {
        assert!(AgentMode::Plan < AgentMode::Ask);
        assert!(AgentMode::Ask < AgentMode::Auto);
        assert!(AgentMode::Auto < AgentMode::Sovereign);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(AgentMode::parse("PLAN"), AgentMode::Plan);
        assert_eq!(AgentMode::parse("Auto"), AgentMode::Auto);
        assert_eq!(AgentMode::parse(" sovereign "), AgentMode::Sovereign);
    }

    #[test]
    fn unknown_mode_defaults_to_ask() {
        assert_eq!(AgentMode::parse("yolo"), AgentMode::Ask);
        assert_eq!(AgentMode::parse(""), AgentMode::Ask);
    }

    #[test]
    fn constructors_set_the_expected_flags() {
        assert!(PermissionResult::allow().allowed);
        let denied = PermissionResult::deny("not allowed in Plan mode");
        assert!(!denied.allowed);
        assert!(denied.error.unwrap().contains("Plan mode"));
        let pending = PermissionResult::needs_approval(true);
        assert!(pending.allowed && pending.requires_approval && pending.can_add_to_allowlist);
    }
}
