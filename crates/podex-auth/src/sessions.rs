// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Device sessions — materialized refresh-token holders.
//!
//! One row per signed-in device. A session's lifetime is its refresh
//! token's lifetime; revocation cascades by blacklisting the token's JTI,
//! so a revoked device fails auth on the very next request even though the
//! JWT itself is unexpired.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use podex_core::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSession {
    pub id: Uuid,
    pub user_id: String,
    pub device_type: String,
    #[serde(default)]
    pub device_name: Option<String>,
    pub refresh_token_jti: Uuid,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub os_name: Option<String>,
    #[serde(default)]
    pub browser_name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub is_revoked: bool,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl DeviceSession {
    pub fn new(
        user_id: impl Into<String>,
        device_type: impl Into<String>,
        refresh_token_jti: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            device_type: device_type.into(),
            device_name: None,
            refresh_token_jti,
            ip_address: None,
            user_agent: None,
            os_name: None,
            browser_name: None,
            city: None,
            country: None,
            last_active_at: Utc::now(),
            expires_at,
            is_revoked: false,
            revoked_at: None,
        }
    }
}

/// Persistence for device sessions. Relational in production; the memory
/// impl backs tests and single-node dev.
#[async_trait]
pub trait DeviceSessionStore: Send + Sync {
    async fn create(&self, session: &DeviceSession) -> Result<()>;
    async fn get(&self, session_id: Uuid) -> Result<Option<DeviceSession>>;
    /// Active (unrevoked, unexpired) sessions for a user, most recent first.
    async fn list_active(&self, user_id: &str) -> Result<Vec<DeviceSession>>;
    async fn touch(&self, session_id: Uuid) -> Result<()>;
    /// Mark one session revoked; returns it so the caller can blacklist
    /// the refresh JTI.
    async fn revoke(&self, session_id: Uuid) -> Result<DeviceSession>;
    /// Revoke every session for a user except `keep`. Returns the revoked
    /// rows (for JTI blacklisting).
    async fn revoke_all(&self, user_id: &str, keep: Option<Uuid>) -> Result<Vec<DeviceSession>>;
}

#[derive(Default)]
pub struct MemoryDeviceSessionStore {
    sessions: RwLock<Vec<DeviceSession>>,
}

impl MemoryDeviceSessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceSessionStore for MemoryDeviceSessionStore {
    async fn create(&self, session: &DeviceSession) -> Result<()> {
        self.sessions.write().await.push(session.clone());
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<DeviceSession>> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .find(|s| s.id == session_id)
            .cloned())
    }

    async fn list_active(&self, user_id: &str) -> Result<Vec<DeviceSession>> {
        let now = Utc::now();
        let mut sessions: Vec<DeviceSession> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|s| s.user_id == user_id && !s.is_revoked && s.expires_at > now)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(sessions)
    }

    async fn touch(&self, session_id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.iter_mut().find(|s| s.id == session_id) {
            session.last_active_at = Utc::now();
        }
        Ok(())
    }

    async fn revoke(&self, session_id: Uuid) -> Result<DeviceSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| Error::NotFound(format!("device session {session_id}")))?;
        session.is_revoked = true;
        session.revoked_at = Some(Utc::now());
        Ok(session.clone())
    }

    async fn revoke_all(&self, user_id: &str, keep: Option<Uuid>) -> Result<Vec<DeviceSession>> {
        let mut sessions = self.sessions.write().await;
        let mut revoked = Vec::new();
        for session in sessions.iter_mut() {
            if session.user_id == user_id && !session.is_revoked && Some(session.id) != keep {
                session.is_revoked = true;
                session.revoked_at = Some(Utc::now());
                revoked.push(session.clone());
            }
        }
        Ok(revoked)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn session(user: &str) -> DeviceSession {
        DeviceSession::new(
            user,
            "cli",
            Uuid::new_v4(),
            Utc::now() + chrono::Duration::days(30),
        )
    }

    #[tokio::test]
    async fn list_active_excludes_revoked_and_expired() {
        let store = MemoryDeviceSessionStore::new();
        let live = session("u1");
        let mut expired = session("u1");
        expired.expires_at = Utc::now() - chrono::Duration::hours(1);
        let doomed = session("u1");

        store.create(&live).await.unwrap();
        store.create(&expired).await.unwrap();
        store.create(&doomed).await.unwrap();
        store.revoke(doomed.id).await.unwrap();

        let active = store.list_active("u1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live.id);
    }

    #[tokio::test]
    async fn revoke_returns_the_session_for_jti_blacklisting() {
        let store = MemoryDeviceSessionStore::new();
        let s = session("u1");
        store.create(&s).await.unwrap();
        let revoked = store.revoke(s.id).await.unwrap();
        assert!(revoked.is_revoked);
        assert_eq!(revoked.refresh_token_jti, s.refresh_token_jti);
        assert!(revoked.revoked_at.is_some());
    }

    #[tokio::test]
    async fn revoke_unknown_session_is_not_found() {
        let store = MemoryDeviceSessionStore::new();
        assert!(store.revoke(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn bulk_revoke_honors_keep_current() {
        let store = MemoryDeviceSessionStore::new();
        let current = session("u1");
        let other_a = session("u1");
        let other_b = session("u1");
        let foreign = session("u2");
        for s in [&current, &other_a, &other_b, &foreign] {
            store.create(s).await.unwrap();
        }

        let revoked = store.revoke_all("u1", Some(current.id)).await.unwrap();
        assert_eq!(revoked.len(), 2);
        assert!(revoked.iter().all(|s| s.id != current.id));

        let active = store.list_active("u1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, current.id);
        // The other user is untouched.
        assert_eq!(store.list_active("u2").await.unwrap().len(), 1);
    }
}
