// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Device authorization and session-management substrate.
//!
//! Three pieces:
//! - **Pod tokens** (`pdx_pod_…`): shown raw exactly once, stored as a
//!   SHA-256 digest, verified in constant time.
//! - **User JWTs**: HS256 with `sub`/`exp`/`jti`; revocation blacklists
//!   the JTI in Redis for the token's remaining lifetime.
//! - **OAuth 2.0 Device Grant (RFC 8628)**: device/user code pair with a
//!   15-minute TTL in Redis scratch space, single-use token exchange, and
//!   the standard polling error codes.

mod device;
mod jwt;
mod sessions;
mod token;

pub use device::{DeviceAuth, DeviceCodeGrant, DeviceTokenResponse};
pub use jwt::{Claims, JwtIssuer, TokenKind};
pub use sessions::{DeviceSession, DeviceSessionStore, MemoryDeviceSessionStore};
pub use token::{PodTokenHash, RawPodToken, POD_TOKEN_PREFIX};
