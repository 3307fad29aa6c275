// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP/WebSocket surface — the thin adapter binding the coordinator's
//! components to the outside world.
//!
//! Routes are grouped by resource (sessions, git, device auth, approvals)
//! and layered with bearer/cookie JWT authentication, per-IP rate limiting
//! on failed auth, and a CSRF header pair on every mutating request.
//! Errors map uniformly from the core taxonomy to HTTP statuses; anything
//! unclassified surfaces only a correlation id.

mod device;
mod directory;
mod error;
mod git;
mod middleware;
mod pods;
mod router;
mod sessions;
mod state;

pub use directory::CoordinatorDirectory;
pub use error::ApiError;
pub use middleware::{build_limiter, Principal};
pub use pods::{MemoryPodStore, PodRow};
pub use router::build_router;
pub use sessions::{MemorySessionStore, SessionRecord, SessionStore};
pub use state::ApiState;
