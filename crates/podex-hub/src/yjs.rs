// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! In-memory Yjs replica state with hard size caps.
//!
//! Updates are relayed in arrival order; CRDT semantics absorb reordering
//! across senders. Nothing here is durable — clients re-seed replicas
//! after a coordinator restart. Two caps bound memory: per-doc unapplied
//! updates and total bytes per session. Excess is dropped and logged,
//! never queued.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

#[derive(Default)]
struct DocBuffer {
    updates: Vec<Vec<u8>>,
    bytes: usize,
}

#[derive(Default)]
struct SessionDocs {
    docs: HashMap<String, DocBuffer>,
    total_bytes: usize,
}

pub struct YjsState {
    sessions: Mutex<HashMap<String, SessionDocs>>,
    max_pending_updates: usize,
    max_session_bytes: usize,
}

impl YjsState {
    pub fn new(max_pending_updates: usize, max_session_bytes: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_pending_updates,
            max_session_bytes,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionDocs>> {
        match self.sessions.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Buffer one update. Returns false (and drops it) when either cap
    /// would be exceeded.
    pub fn push_update(&self, session_id: &str, doc: &str, update: Vec<u8>) -> bool {
        let mut sessions = self.lock();
        let session = sessions.entry(session_id.to_string()).or_default();

        if session.total_bytes + update.len() > self.max_session_bytes {
            warn!(%session_id, %doc, "yjs session byte cap exceeded; dropping update");
            return false;
        }
        let buffer = session.docs.entry(doc.to_string()).or_default();
        if buffer.updates.len() >= self.max_pending_updates {
            warn!(%session_id, %doc, "yjs per-doc update cap exceeded; dropping update");
            return false;
        }

        session.total_bytes += update.len();
        buffer.bytes += update.len();
        buffer.updates.push(update);
        true
    }

    /// Drain a doc's buffered updates (a late subscriber catches up with
    /// these, in arrival order).
    pub fn snapshot(&self, session_id: &str, doc: &str) -> Vec<Vec<u8>> {
        self.lock()
            .get(session_id)
            .and_then(|s| s.docs.get(doc))
            .map(|b| b.updates.clone())
            .unwrap_or_default()
    }

    pub fn free_doc(&self, session_id: &str, doc: &str) {
        let mut sessions = self.lock();
        if let Some(session) = sessions.get_mut(session_id) {
            if let Some(buffer) = session.docs.remove(doc) {
                session.total_bytes -= buffer.bytes;
            }
            if session.docs.is_empty() {
                sessions.remove(session_id);
            }
        }
    }

    pub fn free_session(&self, session_id: &str) {
        self.lock().remove(session_id);
    }

    pub fn session_bytes(&self, session_id: &str) -> usize {
        self.lock()
            .get(session_id)
            .map(|s| s.total_bytes)
            .unwrap_or(0)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_accumulate_in_arrival_order() {
        let yjs = YjsState::new(100, 1024);
        assert!(yjs.push_update("s1", "doc", vec![1]));
        assert!(yjs.push_update("s1", "doc", vec![2]));
        assert_eq!(yjs.snapshot("s1", "doc"), vec![vec![1], vec![2]]);
    }

    #[test]
    fn per_doc_update_cap_drops_excess() {
        let yjs = YjsState::new(2, 1024);
        assert!(yjs.push_update("s1", "doc", vec![1]));
        assert!(yjs.push_update("s1", "doc", vec![2]));
        assert!(!yjs.push_update("s1", "doc", vec![3]));
        assert_eq!(yjs.snapshot("s1", "doc").len(), 2);
    }

    #[test]
    fn session_byte_cap_spans_docs() {
        let yjs = YjsState::new(100, 10);
        assert!(yjs.push_update("s1", "a", vec![0; 6]));
        assert!(!yjs.push_update("s1", "b", vec![0; 6]));
        // Another session is unaffected.
        assert!(yjs.push_update("s2", "a", vec![0; 6]));
    }

    #[test]
    fn free_doc_returns_its_bytes_to_the_session() {
        let yjs = YjsState::new(100, 10);
        assert!(yjs.push_update("s1", "a", vec![0; 6]));
        yjs.free_doc("s1", "a");
        assert_eq!(yjs.session_bytes("s1"), 0);
        assert!(yjs.push_update("s1", "b", vec![0; 6]));
    }

    #[test]
    fn free_session_clears_everything() {
        let yjs = YjsState::new(100, 1024);
        yjs.push_update("s1", "a", vec![1]);
        yjs.push_update("s1", "b", vec![2]);
        yjs.free_session("s1");
        assert!(yjs.snapshot("s1", "a").is_empty());
        assert_eq!(yjs.session_bytes("s1"), 0);
    }
}
