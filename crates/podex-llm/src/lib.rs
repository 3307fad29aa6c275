// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! LLM provider capability interface.
//!
//! The coordinator treats model providers as external collaborators behind
//! four verbs: `chat`, `stream`, `list_models`, `is_available`. Streaming
//! is a typed delta stream ending in a terminal [`StreamEvent::Done`];
//! cancellation is tied to the stream's lifetime — drop it and the
//! request is torn down.
//!
//! Production wires the [`OllamaProvider`] (or any other driver behind the
//! trait); tests wire [`MockProvider`], which replays scripted responses
//! without any network.

mod mock;
mod ollama;
mod provider;
mod types;

pub use mock::MockProvider;
pub use ollama::OllamaProvider;
pub use provider::{DeltaStream, Provider};
pub use types::{ChatMessage, ChatRequest, ChatResponse, Role, StreamEvent, ToolCallRequest, ToolSpec};
