// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! In-memory [`RedisApi`] double for tests.
//!
//! Semantics match the subset of Redis the coordinator uses: TTLs are
//! honored lazily on access, ZRANGE orders by `(score, member)`, SCAN
//! returns a stable snapshot. Single-process only.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use podex_core::Result;

use crate::RedisApi;

#[derive(Default)]
struct Inner {
    strings: HashMap<String, (String, Option<Instant>)>,
    zsets: HashMap<String, HashMap<String, f64>>,
    sets: HashMap<String, HashSet<String>>,
    lists: HashMap<String, VecDeque<String>>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

impl Inner {
    fn live_string(&mut self, key: &str) -> Option<&String> {
        let expired = matches!(
            self.strings.get(key),
            Some((_, Some(deadline))) if Instant::now() >= *deadline
        );
        if expired {
            self.strings.remove(key);
            return None;
        }
        self.strings.get(key).map(|(v, _)| v)
    }
}

/// Single-process Redis stand-in. Cheap to construct per test.
#[derive(Default)]
pub struct MemoryRedis {
    inner: Mutex<Inner>,
}

impl MemoryRedis {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens if a test panicked mid-operation;
        // propagating the panic is the right behavior there.
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Test helper: force-expire a key immediately.
    pub fn expire_now(&self, key: &str) {
        self.lock().strings.remove(key);
    }
}

fn range_bounds(len: usize, start: isize, stop: isize) -> (usize, usize) {
    let resolve = |i: isize| -> isize {
        if i < 0 {
            len as isize + i
        } else {
            i
        }
    };
    let lo = resolve(start).max(0) as usize;
    let hi = resolve(stop).min(len as isize - 1);
    if hi < 0 || lo > hi as usize {
        (0, 0)
    } else {
        (lo, hi as usize + 1)
    }
}

/// Glob match supporting only `*` (the coordinator scans with prefix
/// patterns like `podex:task:*`).
fn glob_match(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == key;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 && !pattern.ends_with('*') {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl RedisApi for MemoryRedis {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().live_string(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let deadline = ttl_secs.map(|s| Instant::now() + Duration::from_secs(s));
        self.lock()
            .strings
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let mut inner = self.lock();
        if inner.live_string(key).is_some() {
            return Ok(false);
        }
        let deadline = Instant::now() + Duration::from_millis(ttl_ms);
        inner
            .strings
            .insert(key.to_string(), (value.to_string(), Some(deadline)));
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut inner = self.lock();
        let existed = inner.strings.remove(key).is_some()
            | inner.zsets.remove(key).is_some()
            | inner.sets.remove(key).is_some()
            | inner.lists.remove(key).is_some();
        Ok(existed)
    }

    async fn del_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let mut inner = self.lock();
        if inner.live_string(key).map(String::as_str) == Some(expected) {
            inner.strings.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let mut inner = self.lock();
        if let Some((_, deadline)) = inner.strings.get_mut(key) {
            *deadline = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.lock()
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<u64> {
        let removed = self
            .lock()
            .zsets
            .get_mut(key)
            .map(|z| z.remove(member).is_some())
            .unwrap_or(false);
        Ok(u64::from(removed))
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let inner = self.lock();
        let Some(zset) = inner.zsets.get(key) else {
            return Ok(vec![]);
        };
        let mut members: Vec<(&String, f64)> = zset.iter().map(|(m, s)| (m, *s)).collect();
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(b.0)));
        let (lo, hi) = range_bounds(members.len(), start, stop);
        Ok(members[lo..hi].iter().map(|(m, _)| (*m).clone()).collect())
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        Ok(self.lock().zsets.get(key).map(|z| z.len() as u64).unwrap_or(0))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.lock()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<u64> {
        let removed = self
            .lock()
            .sets
            .get_mut(key)
            .map(|s| s.remove(member))
            .unwrap_or(false);
        Ok(u64::from(removed))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        Ok(self.lock().sets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        self.lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let mut inner = self.lock();
        if let Some(list) = inner.lists.get_mut(key) {
            let (lo, hi) = range_bounds(list.len(), start, stop);
            let kept: VecDeque<String> = list.iter().skip(lo).take(hi - lo).cloned().collect();
            *list = kept;
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let inner = self.lock();
        let Some(list) = inner.lists.get(key) else {
            return Ok(vec![]);
        };
        let (lo, hi) = range_bounds(list.len(), start, stop);
        Ok(list.iter().skip(lo).take(hi - lo).cloned().collect())
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        Ok(self.lock().lists.get(key).map(|l| l.len() as u64).unwrap_or(0))
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .strings
            .iter()
            .filter(|(_, (_, d))| matches!(d, Some(dl) if Instant::now() >= *dl))
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            inner.strings.remove(&k);
        }
        Ok(inner
            .strings
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let inner = self.lock();
        if let Some(tx) = inner.channels.get(channel) {
            // No subscribers is fine.
            let _ = tx.send(payload.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let mut rx_broadcast = {
            let mut inner = self.lock();
            inner
                .channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(256).0)
                .subscribe()
        };
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            while let Ok(msg) = rx_broadcast.recv().await {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_del_round_trip() {
        let r = MemoryRedis::new();
        r.set("k", "v", None).await.unwrap();
        assert_eq!(r.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(r.del("k").await.unwrap());
        assert_eq!(r.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_keys_vanish() {
        let r = MemoryRedis::new();
        r.set("k", "v", Some(3600)).await.unwrap();
        r.expire_now("k");
        assert_eq!(r.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zrange_orders_by_score_then_member() {
        let r = MemoryRedis::new();
        r.zadd("z", "b", 2.0).await.unwrap();
        r.zadd("z", "a", 1.0).await.unwrap();
        r.zadd("z", "c", 1.0).await.unwrap();
        let members = r.zrange("z", 0, -1).await.unwrap();
        assert_eq!(members, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn zrem_reports_claim_winner() {
        let r = MemoryRedis::new();
        r.zadd("z", "t", 0.5).await.unwrap();
        assert_eq!(r.zrem("z", "t").await.unwrap(), 1);
        assert_eq!(r.zrem("z", "t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lpush_ltrim_caps_the_list() {
        let r = MemoryRedis::new();
        for i in 0..5 {
            r.lpush("l", &i.to_string()).await.unwrap();
        }
        r.ltrim("l", 0, 2).await.unwrap();
        assert_eq!(r.lrange("l", 0, -1).await.unwrap(), vec!["4", "3", "2"]);
    }

    #[tokio::test]
    async fn set_nx_px_is_first_writer_wins() {
        let r = MemoryRedis::new();
        assert!(r.set_nx_px("lock", "a", 60_000).await.unwrap());
        assert!(!r.set_nx_px("lock", "b", 60_000).await.unwrap());
    }

    #[tokio::test]
    async fn del_if_equals_checks_the_token() {
        let r = MemoryRedis::new();
        r.set("lock", "token-a", None).await.unwrap();
        assert!(!r.del_if_equals("lock", "token-b").await.unwrap());
        assert!(r.del_if_equals("lock", "token-a").await.unwrap());
    }

    #[tokio::test]
    async fn scan_match_filters_by_prefix() {
        let r = MemoryRedis::new();
        r.set("podex:task:1", "a", None).await.unwrap();
        r.set("podex:task:2", "b", None).await.unwrap();
        r.set("podex:other", "c", None).await.unwrap();
        let mut keys = r.scan_match("podex:task:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["podex:task:1", "podex:task:2"]);
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let r = MemoryRedis::new();
        let mut rx = r.subscribe("ch").await.unwrap();
        r.publish("ch", "hello").await.unwrap();
        let msg = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("no message")
            .unwrap();
        assert_eq!(msg, "hello");
    }
}
