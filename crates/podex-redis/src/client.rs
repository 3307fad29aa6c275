// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The production [`RedisApi`] implementation over a shared
//! `ConnectionManager` (auto-reconnecting multiplexed connection).
//! Subscriptions open their own pub/sub connection per call, since Redis
//! pub/sub cannot share a connection with regular commands.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use podex_core::{Error, Result};

use crate::RedisApi;

/// Token-checked delete used for lock release. KEYS[1] = lock key,
/// ARGV[1] = expected token.
const DEL_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
    client: redis::Client,
}

impl RedisClient {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(to_transport)?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(to_transport)?;
        debug!(%url, "redis connected");
        Ok(Self { manager, client })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn to_transport(e: redis::RedisError) -> Error {
    Error::Transport(format!("redis: {e}"))
}

#[async_trait]
impl RedisApi for RedisClient {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl_secs {
            cmd.arg("EX").arg(ttl);
        }
        let _: () = cmd
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)?;
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let n: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)?;
        Ok(n > 0)
    }

    async fn del_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let n: u64 = redis::Script::new(DEL_IF_EQUALS)
            .key(key)
            .arg(expected)
            .invoke_async(&mut self.conn())
            .await
            .map_err(to_transport)?;
        Ok(n > 0)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let _: () = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let _: () = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<u64> {
        redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        redis::cmd("ZRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let _: () = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<u64> {
        redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        redis::cmd("SCARD")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let _: () = redis::cmd("LPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)?;
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let _: () = redis::cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut self.conn())
                .await
                .map_err(to_transport)?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let _: () = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut self.conn())
            .await
            .map_err(to_transport)?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(to_transport)?;
        pubsub.subscribe(channel).await.map_err(to_transport)?;

        let (tx, rx) = mpsc::channel(256);
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(%channel, "unreadable pub/sub payload: {e}");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    // Receiver dropped: unsubscribe by ending the task.
                    break;
                }
            }
            debug!(%channel, "pub/sub forwarder stopped");
        });
        Ok(rx)
    }
}
