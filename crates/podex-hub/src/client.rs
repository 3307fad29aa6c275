// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-connection client bookkeeping for the session namespaces.

use std::collections::HashSet;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// One connected browser/CLI client. Owned by its socket task; the hub
/// mutates the membership sets as the client joins and leaves rooms.
pub struct ClientConn {
    pub client_id: Uuid,
    pub user_id: String,
    pub tx: mpsc::Sender<ServerMessage>,
    /// Session ids this client has joined.
    pub sessions: HashSet<String>,
    /// Workspace ids with an attached terminal.
    pub terminals: HashSet<String>,
    /// `(session_id, doc)` pairs with a Yjs subscription.
    pub yjs_docs: HashSet<(String, String)>,
}

impl ClientConn {
    pub fn new(user_id: impl Into<String>, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            user_id: user_id.into(),
            tx,
            sessions: HashSet::new(),
            terminals: HashSet::new(),
            yjs_docs: HashSet::new(),
        }
    }

    /// Direct (non-room) reply to this client. Dropped when the queue is
    /// full, like every other slow-consumer path.
    pub fn send(&self, message: ServerMessage) {
        let _ = self.tx.try_send(message);
    }

    pub fn error(&self, code: u16, message: impl Into<String>) {
        self.send(ServerMessage::Error {
            code,
            message: message.into(),
        });
    }
}
