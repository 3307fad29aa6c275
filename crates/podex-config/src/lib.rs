// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Coordinator configuration: schema plus layered YAML loading.
//!
//! Files are merged lowest-to-highest priority (system, XDG/home,
//! working-directory, explicit `--config`); scalars from later layers win.

mod loader;
mod schema;

pub use loader::load;
pub use schema::{
    AuthConfig, CoordinatorConfig, DockerHostConfig, ExecutorConfig, HttpConfig, HubConfig,
    LlmConfig, PlacementConfig, PlacementStrategyName, QueueConfig, RedisConfig,
};
