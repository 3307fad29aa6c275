// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Redis facade — the only cross-process shared writable state.
//!
//! The coordinator talks to Redis exclusively through the [`RedisApi`]
//! trait, which covers exactly the verbs the queue, auth substrate, and
//! workspace lock need. Production wires [`RedisClient`] (a
//! `redis::aio::ConnectionManager`); tests wire [`MemoryRedis`] — no global
//! mocking, the capability interface is injected at construction.

mod client;
mod lock;
mod memory;

pub use client::RedisClient;
pub use lock::{LockGuard, RedisLock};
pub use memory::MemoryRedis;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use podex_core::{Error, Result};

/// The Redis verbs the coordinator uses. Scores follow Redis semantics
/// (lower sorts first); ranges are inclusive with `-1` meaning "end".
#[async_trait]
pub trait RedisApi: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// SET with optional TTL in seconds.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()>;
    /// SET NX PX — returns true iff the key was newly set.
    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool>;
    /// DEL — returns true iff the key existed.
    async fn del(&self, key: &str) -> Result<bool>;
    /// DEL only if the current value equals `expected` (atomic; used for
    /// token-checked lock release).
    async fn del_if_equals(&self, key: &str, expected: &str) -> Result<bool>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    /// ZREM — returns the number of members removed (the atomic-claim
    /// primitive: non-zero means the caller won the race).
    async fn zrem(&self, key: &str, member: &str) -> Result<u64>;
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;
    async fn zcard(&self, key: &str) -> Result<u64>;

    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    async fn srem(&self, key: &str, member: &str) -> Result<u64>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
    async fn scard(&self, key: &str) -> Result<u64>;

    async fn lpush(&self, key: &str, value: &str) -> Result<()>;
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;
    async fn llen(&self, key: &str) -> Result<u64>;

    /// Full SCAN with a MATCH pattern, cursor handled internally.
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
    /// Subscribe to a channel; messages arrive on the returned receiver
    /// until it is dropped.
    async fn subscribe(&self, channel: &str) -> Result<tokio::sync::mpsc::Receiver<String>>;
}

/// GET + JSON decode. A present-but-unparsable value is a transport error:
/// it means another writer corrupted the key.
pub async fn get_json<T: DeserializeOwned>(redis: &dyn RedisApi, key: &str) -> Result<Option<T>> {
    match redis.get(key).await? {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| Error::Transport(format!("corrupt JSON at {key}: {e}"))),
    }
}

/// JSON encode + SET with optional TTL.
pub async fn set_json<T: Serialize>(
    redis: &dyn RedisApi,
    key: &str,
    value: &T,
    ttl_secs: Option<u64>,
) -> Result<()> {
    let raw = serde_json::to_string(value)
        .map_err(|e| Error::Validation(format!("unserializable value for {key}: {e}")))?;
    redis.set(key, &raw, ttl_secs).await
}
