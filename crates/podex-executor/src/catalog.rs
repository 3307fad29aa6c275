// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tool → permission-category catalog.
//!
//! Categories are data, not code: the built-in sets cover the standard
//! agent tools and deployments may extend each category through config.
//! Every tool name belongs to exactly one category; registration into a
//! second category is rejected.

use std::collections::HashMap;

use podex_core::{Error, Result, ToolCategory};

const READ_TOOLS: [&str; 10] = [
    "read_file",
    "list_directory",
    "search_code",
    "grep",
    "glob_files",
    "fetch_url",
    "git_status",
    "git_diff",
    "git_log",
    "git_branch",
];

const WRITE_TOOLS: [&str; 7] = [
    "write_file",
    "create_file",
    "delete_file",
    "apply_patch",
    "git_commit",
    "git_push",
    "create_pr",
];

const COMMAND_TOOLS: [&str; 1] = ["run_command"];

const DEPLOY_TOOLS: [&str; 2] = ["deploy_preview", "run_e2e_tests"];

pub struct ToolCatalog {
    categories: HashMap<String, ToolCategory>,
}

impl ToolCatalog {
    /// The built-in tool sets.
    pub fn builtin() -> Self {
        let mut catalog = Self {
            categories: HashMap::new(),
        };
        for (names, category) in [
            (&READ_TOOLS[..], ToolCategory::Read),
            (&WRITE_TOOLS[..], ToolCategory::Write),
            (&COMMAND_TOOLS[..], ToolCategory::Command),
            (&DEPLOY_TOOLS[..], ToolCategory::Deploy),
        ] {
            for name in names {
                // Built-ins are disjoint by construction.
                catalog.categories.insert((*name).to_string(), category);
            }
        }
        catalog
    }

    /// Register an additional tool name into a category. A name already
    /// present in a *different* category is a conflict; re-registering into
    /// the same category is a no-op.
    pub fn register(&mut self, name: &str, category: ToolCategory) -> Result<()> {
        match self.categories.get(name) {
            Some(existing) if *existing != category => Err(Error::Conflict(format!(
                "tool {name} is already registered as {existing:?}"
            ))),
            _ => {
                self.categories.insert(name.to_string(), category);
                Ok(())
            }
        }
    }

    /// Merge config-provided extras into the catalog.
    pub fn extend(
        &mut self,
        read: &[String],
        write: &[String],
        command: &[String],
        deploy: &[String],
    ) -> Result<()> {
        for (names, category) in [
            (read, ToolCategory::Read),
            (write, ToolCategory::Write),
            (command, ToolCategory::Command),
            (deploy, ToolCategory::Deploy),
        ] {
            for name in names {
                self.register(name, category)?;
            }
        }
        Ok(())
    }

    /// The category of a tool, or `None` for unknown tools (which the
    /// permission engine denies outright).
    pub fn category_of(&self, tool: &str) -> Option<ToolCategory> {
        self.categories.get(tool).copied()
    }

    pub fn names_in(&self, category: ToolCategory) -> Vec<String> {
        let mut names: Vec<String> = self
            .categories
            .iter()
            .filter(|(_, c)| **c == category)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_sets_cover_the_standard_tools() {
        let catalog = ToolCatalog::builtin();
        for tool in ["read_file", "list_directory", "search_code", "git_status"] {
            assert_eq!(catalog.category_of(tool), Some(ToolCategory::Read), "{tool}");
        }
        for tool in ["write_file", "create_file", "delete_file", "git_commit"] {
            assert_eq!(catalog.category_of(tool), Some(ToolCategory::Write), "{tool}");
        }
        assert_eq!(
            catalog.category_of("run_command"),
            Some(ToolCategory::Command)
        );
        assert_eq!(
            catalog.category_of("deploy_preview"),
            Some(ToolCategory::Deploy)
        );
    }

    #[test]
    fn unknown_tool_has_no_category() {
        assert_eq!(ToolCatalog::builtin().category_of("transmute_gold"), None);
    }

    #[test]
    fn extras_extend_a_category() {
        let mut catalog = ToolCatalog::builtin();
        catalog
            .register("read_schema", ToolCategory::Read)
            .unwrap();
        assert_eq!(
            catalog.category_of("read_schema"),
            Some(ToolCategory::Read)
        );
    }

    #[test]
    fn cross_category_re_registration_is_a_conflict() {
        let mut catalog = ToolCatalog::builtin();
        let err = catalog
            .register("read_file", ToolCategory::Write)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn same_category_re_registration_is_a_no_op() {
        let mut catalog = ToolCatalog::builtin();
        catalog.register("read_file", ToolCategory::Read).unwrap();
    }

    #[test]
    fn names_in_returns_sorted_members() {
        let catalog = ToolCatalog::builtin();
        let commands = catalog.names_in(ToolCategory::Command);
        assert_eq!(commands, vec!["run_command"]);
        let deploys = catalog.names_in(ToolCategory::Deploy);
        assert_eq!(deploys, vec!["deploy_preview", "run_e2e_tests"]);
    }
}
