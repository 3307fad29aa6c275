// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Reverse-RPC & realtime hub.
//!
//! One persistent bidirectional transport serves two concerns:
//!
//! - **Self-hosted pods** cannot accept inbound connections, so they dial
//!   out, authenticate with a pod token, and then *receive* RPC requests
//!   from the coordinator over the same socket ([`PodRegistry::call_pod`]).
//! - **Browser/CLI clients** join per-session rooms for collaboration
//!   events (terminal streams, Yjs replication, voice, attention).
//!
//! # Session flow (pod side)
//!
//! ```text
//! Pod                                Coordinator
//!  │── connect + bearer pdx_pod_… ──►│  verify against hashed store
//!  │── capabilities {os, arch, …} ──►│  directory update
//!  │── heartbeat {active_ws} ───────►│  every 30 s; staleness demotes host
//!  │◄─ rpc_request {call_id, m, p} ──│  create/exec/terminal/… verbs
//!  │── rpc_response {call_id, r} ───►│  resolves the pending future
//!  │        (disconnect) ───────────►│  all pending calls fail fast
//! ```
//!
//! Room-local state is freed only after a 5 s grace period without a
//! rejoin, so transient reconnects keep their terminal attachments and Yjs
//! replicas.

mod client;
mod hub;
mod pods;
mod protocol;
mod rooms;
mod ws;
mod yjs;

pub use client::ClientConn;
pub use hub::{Hub, HubLimits, SessionDirectory, VoiceFrame, VoiceFrameKind};
pub use pods::{MemoryPodDirectory, PodDirectory, PodLiveness, PodRecord, PodRegistry};
pub use protocol::{ClientMessage, PodCommand, PodMessage, RpcMethod, ServerMessage};
pub use rooms::RoomRegistry;
pub use ws::{pod_ws_handler, session_ws_handler, WsState};
pub use yjs::YjsState;
