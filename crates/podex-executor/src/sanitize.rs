// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Environment-variable sanitization and workspace path containment.
//!
//! Used for preview-deploy config and hook context: a user-supplied
//! environment must never be able to change loader behavior
//! (`LD_PRELOAD`), interpreter startup (`PYTHONSTARTUP`), or binary
//! resolution (`PATH`) of whatever process receives it.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use podex_core::{Error, Result};

/// Keys stripped case-insensitively from user-supplied environments.
const DANGEROUS_KEYS: [&str; 11] = [
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "PATH",
    "HOME",
    "NODE_OPTIONS",
    "PYTHONPATH",
    "PYTHONSTARTUP",
    "PYTHONHOME",
    "JAVA_TOOL_OPTIONS",
    "_JAVA_OPTIONS",
    "CLASSPATH",
];

const MAX_ENV_VALUE_BYTES: usize = 4096;

fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Sanitize a user-supplied environment mapping:
/// - dangerous keys are dropped (case-insensitively);
/// - keys not matching `[A-Za-z_][A-Za-z0-9_]*` are dropped;
/// - values are truncated at 4096 bytes and NUL bytes are stripped.
pub fn sanitize_environment(env: &HashMap<String, String>) -> HashMap<String, String> {
    let mut clean = HashMap::new();
    for (key, value) in env {
        if DANGEROUS_KEYS
            .iter()
            .any(|d| d.eq_ignore_ascii_case(key.as_str()))
        {
            continue;
        }
        if !is_valid_env_key(key) {
            continue;
        }
        let mut value: String = value.chars().filter(|c| *c != '\0').collect();
        if value.len() > MAX_ENV_VALUE_BYTES {
            // Truncate on a char boundary at or below the cap.
            let mut cut = MAX_ENV_VALUE_BYTES;
            while !value.is_char_boundary(cut) {
                cut -= 1;
            }
            value.truncate(cut);
        }
        clean.insert(key.clone(), value);
    }
    clean
}

/// Resolve `requested` against `workspace_root` and ensure containment.
///
/// Rejects absolute paths, `..` traversal, and NUL bytes. Resolution is
/// purely lexical — the workspace filesystem lives inside a container, so
/// symlinks are the container runtime's concern, not ours.
pub fn contain_path(workspace_root: &Path, requested: &str) -> Result<PathBuf> {
    if requested.contains('\0') {
        return Err(Error::Validation("path contains NUL byte".into()));
    }
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(Error::Validation(format!(
            "absolute paths are not allowed: {requested}"
        )));
    }

    let mut resolved = workspace_root.to_path_buf();
    for component in requested_path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::Validation(format!(
                    "path escapes the workspace: {requested}"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Validation(format!(
                    "absolute paths are not allowed: {requested}"
                )));
            }
        }
    }
    Ok(resolved)
}

// ── Unit tests ────────────────────────────────────────────────────────────────
