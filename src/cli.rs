// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "podexd",
    about = "Podex coordinator — cloud development workspaces for AI agents"
)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the coordinator (HTTP/WS surface, hub, orchestrator, workers).
    Serve,
    /// Print the merged configuration and exit.
    ShowConfig,
    /// Mint a pod token: prints the raw token once plus the hash to store.
    PodToken {
        /// Owning user id.
        #[arg(long)]
        user_id: String,
        /// Human-readable pod name.
        #[arg(long, default_value = "self-hosted-pod")]
        name: String,
    },
}

// ── Unit tests ────────────────────────────────────────────────────────────────
