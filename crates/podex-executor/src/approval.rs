// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Pending-approval futures.
//!
//! When a permission check comes back `requires_approval`, dispatch
//! allocates an approval id, surfaces it to the user, and blocks on the
//! oneshot registered here. A later HTTP request resolves it. Entries
//! carry a deadline; [`ApprovalBroker::sweep_expired`] fails approvals
//! nobody answered within the TTL so the agent loop never hangs forever.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use podex_core::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved { add_to_allowlist: bool },
    Denied,
    /// Nobody answered within the TTL.
    Expired,
}

/// The waiting half handed to the dispatching agent loop.
pub struct PendingApproval {
    pub approval_id: Uuid,
    rx: oneshot::Receiver<ApprovalDecision>,
}

impl PendingApproval {
    /// Block until the user decides (or the broker expires the entry).
    pub async fn decision(self) -> ApprovalDecision {
        self.rx.await.unwrap_or(ApprovalDecision::Expired)
    }
}

struct Entry {
    tx: oneshot::Sender<ApprovalDecision>,
    session_id: String,
    created_at: Instant,
}

pub struct ApprovalBroker {
    pending: Mutex<HashMap<Uuid, Entry>>,
    ttl: Duration,
}

impl ApprovalBroker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Entry>> {
        match self.pending.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Allocate a pending approval for `session_id`.
    pub fn request(&self, session_id: &str) -> PendingApproval {
        let approval_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.lock().insert(
            approval_id,
            Entry {
                tx,
                session_id: session_id.to_string(),
                created_at: Instant::now(),
            },
        );
        info!(%approval_id, %session_id, "approval requested");
        PendingApproval { approval_id, rx }
    }

    /// Resolve a pending approval. The second resolution of the same id is
    /// an error ("unknown approval") — entries are removed on first use.
    pub fn resolve(&self, approval_id: Uuid, approved: bool, add_to_allowlist: bool) -> Result<()> {
        let entry = self
            .lock()
            .remove(&approval_id)
            .ok_or_else(|| Error::NotFound(format!("approval {approval_id}")))?;

        let decision = if approved {
            ApprovalDecision::Approved { add_to_allowlist }
        } else {
            ApprovalDecision::Denied
        };
        info!(%approval_id, session_id = %entry.session_id, approved, "approval resolved");
        // A dropped receiver means the agent loop was cancelled meanwhile.
        let _ = entry.tx.send(decision);
        Ok(())
    }

    /// Fail every entry older than the TTL. Returns the number expired.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.lock();
        let expired: Vec<Uuid> = pending
            .iter()
            .filter(|(_, e)| now.duration_since(e.created_at) >= self.ttl)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(entry) = pending.remove(id) {
                warn!(approval_id = %id, session_id = %entry.session_id, "approval expired unanswered");
                let _ = entry.tx.send(ApprovalDecision::Expired);
            }
        }
        expired.len()
    }

    /// Cancel (expire) everything belonging to a session — used when the
    /// session itself is torn down.
    pub fn cancel_session(&self, session_id: &str) {
        let mut pending = self.lock();
        let ids: Vec<Uuid> = pending
            .iter()
            .filter(|(_, e)| e.session_id == session_id)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(entry) = pending.remove(&id) {
                let _ = entry.tx.send(ApprovalDecision::Expired);
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn approve_resolves_the_future() {
        let broker = ApprovalBroker::new(Duration::from_secs(600));
        let pending = broker.request("s1");
        let id = pending.approval_id;

        broker.resolve(id, true, true).unwrap();
        assert_eq!(
            pending.decision().await,
            ApprovalDecision::Approved {
                add_to_allowlist: true
            }
        );
    }

    #[tokio::test]
    async fn deny_resolves_with_denied() {
        let broker = ApprovalBroker::new(Duration::from_secs(600));
        let pending = broker.request("s1");
        broker.resolve(pending.approval_id, false, false).unwrap();
        assert_eq!(pending.decision().await, ApprovalDecision::Denied);
    }

    #[tokio::test]
    async fn second_resolution_is_unknown_approval() {
        let broker = ApprovalBroker::new(Duration::from_secs(600));
        let pending = broker.request("s1");
        let id = pending.approval_id;

        broker.resolve(id, true, false).unwrap();
        let err = broker.resolve(id, true, false).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn resolving_an_unknown_id_fails() {
        let broker = ApprovalBroker::new(Duration::from_secs(600));
        assert!(broker.resolve(Uuid::new_v4(), true, false).is_err());
    }

    #[tokio::test]
    async fn sweep_expires_stale_entries() {
        let broker = ApprovalBroker::new(Duration::from_millis(0));
        let pending = broker.request("s1");
        assert_eq!(broker.sweep_expired(), 1);
        assert_eq!(pending.decision().await, ApprovalDecision::Expired);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn fresh_entries_survive_the_sweep() {
        let broker = ApprovalBroker::new(Duration::from_secs(600));
        let _pending = broker.request("s1");
        assert_eq!(broker.sweep_expired(), 0);
        assert_eq!(broker.pending_count(), 1);
    }

    #[tokio::test]
    async fn cancel_session_expires_only_that_session() {
        let broker = ApprovalBroker::new(Duration::from_secs(600));
        let a = broker.request("s1");
        let b = broker.request("s2");

        broker.cancel_session("s1");
        assert_eq!(a.decision().await, ApprovalDecision::Expired);
        assert_eq!(broker.pending_count(), 1);
        broker.resolve(b.approval_id, true, false).unwrap();
    }
}
