// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! TTL lock over Redis serializing workspace mutation across coordinator
//! instances.
//!
//! Acquisition failure means another coordinator owns the workspace and
//! this instance must not mutate it. The lock value is a random token so a
//! release can never delete a lock taken over by someone else after our
//! TTL expired. Release is explicit (no async Drop); the TTL is the safety
//! net for crashed holders.

use std::sync::Arc;

use rand::RngCore;
use tracing::warn;

use podex_core::Result;

use crate::RedisApi;

pub struct RedisLock {
    redis: Arc<dyn RedisApi>,
    ttl_ms: u64,
}

/// A held lock. Call [`LockGuard::release`] when done; an unreleased guard
/// expires after the TTL.
pub struct LockGuard {
    redis: Arc<dyn RedisApi>,
    key: String,
    token: String,
}

impl RedisLock {
    pub fn new(redis: Arc<dyn RedisApi>, ttl_ms: u64) -> Self {
        Self { redis, ttl_ms }
    }

    /// Try to take the lock once. `Ok(None)` means someone else holds it.
    pub async fn try_acquire(&self, key: &str) -> Result<Option<LockGuard>> {
        let token = random_token();
        if self.redis.set_nx_px(key, &token, self.ttl_ms).await? {
            Ok(Some(LockGuard {
                redis: self.redis.clone(),
                key: key.to_string(),
                token,
            }))
        } else {
            Ok(None)
        }
    }
}

impl LockGuard {
    /// Release the lock. Token-checked so we never delete a lock that
    /// expired and was re-acquired by another instance.
    pub async fn release(self) -> Result<()> {
        let deleted = self.redis.del_if_equals(&self.key, &self.token).await?;
        if !deleted {
            warn!(key = %self.key, "lock expired before release; another instance may have mutated");
        }
        Ok(())
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ── Unit tests ────────────────────────────────────────────────────────────────
