// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Room membership and fan-out.
//!
//! Room names: `session:{id}`, `terminal:{workspace_id}`,
//! `yjs:{session}:{doc}`, `agent:{agent_id}`. Emits are ordered per
//! (room, sender); nothing is ordered across rooms.
//!
//! Cleanup with grace: room-local teardown is scheduled, not immediate — a
//! rejoin within the grace window cancels the pending cleanup so transient
//! reconnects keep their state.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::ServerMessage;

pub fn session_room(session_id: &str) -> String {
    format!("session:{session_id}")
}
pub fn terminal_room(workspace_id: &str) -> String {
    format!("terminal:{workspace_id}")
}
pub fn yjs_room(session_id: &str, doc: &str) -> String {
    format!("yjs:{session_id}:{doc}")
}
pub fn agent_room(agent_id: &str) -> String {
    format!("agent:{agent_id}")
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, HashMap<Uuid, mpsc::Sender<ServerMessage>>>,
    cleanups: DashMap<String, tokio::task::JoinHandle<()>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: &str, client_id: Uuid, tx: mpsc::Sender<ServerMessage>) {
        self.cancel_cleanup(room);
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(client_id, tx);
        debug!(%room, %client_id, "joined room");
    }

    /// Remove a member. Returns true when the room is now empty.
    pub fn leave(&self, room: &str, client_id: Uuid) -> bool {
        let mut empty = false;
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&client_id);
            empty = members.is_empty();
        }
        if empty {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        empty
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Broadcast to every member; `exclude` skips the sender itself for
    /// echo-free events like cursor updates.
    pub fn emit(&self, room: &str, message: &ServerMessage, exclude: Option<Uuid>) {
        let Some(members) = self.rooms.get(room) else {
            return;
        };
        for (client_id, tx) in members.iter() {
            if Some(*client_id) == exclude {
                continue;
            }
            // A full client queue drops the frame rather than blocking the
            // emitter; slow consumers must not stall the room.
            if tx.try_send(message.clone()).is_err() {
                warn!(%room, %client_id, "client queue full; dropping frame");
            }
        }
    }

    /// Schedule `cleanup` to run after `grace` unless someone rejoins the
    /// room (or [`RoomRegistry::cancel_cleanup`] is called) first.
    pub fn schedule_cleanup<F>(&self, room: &str, grace: Duration, cleanup: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel_cleanup(room);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            cleanup.await;
        });
        self.cleanups.insert(room.to_string(), handle);
    }

    pub fn cancel_cleanup(&self, room: &str) {
        if let Some((_, handle)) = self.cleanups.remove(room) {
            handle.abort();
            debug!(%room, "pending cleanup cancelled");
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
