// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Scriptable provider for tests — no network, deterministic replies.
//!
//! Responses are replayed in the order they were queued; once the script
//! is exhausted, the mock echoes the last user message.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use podex_core::Result;

use crate::provider::{DeltaStream, Provider};
use crate::types::{ChatRequest, ChatResponse, Role, StreamEvent};

#[derive(Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<ChatResponse>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next response.
    pub fn push(&self, response: ChatResponse) {
        self.lock().push_back(response);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ChatResponse>> {
        match self.script.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn next_response(&self, request: &ChatRequest) -> ChatResponse {
        if let Some(scripted) = self.lock().pop_front() {
            return scripted;
        }
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        ChatResponse {
            content: format!("echo: {last_user}"),
            tool_calls: vec![],
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        Ok(self.next_response(&request))
    }

    async fn stream(&self, request: ChatRequest) -> Result<DeltaStream> {
        let response = self.next_response(&request);
        let mut events: Vec<Result<StreamEvent>> = Vec::new();
        // Emit the content one word at a time, like a real stream would.
        for word in response.content.split_inclusive(' ') {
            events.push(Ok(StreamEvent::TextDelta(word.to_string())));
        }
        for call in &response.tool_calls {
            events.push(Ok(StreamEvent::ToolCall(call.clone())));
        }
        events.push(Ok(StreamEvent::Done(response)));
        Ok(Box::pin(stream::iter(events)))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["mock-small".into(), "mock-large".into()])
    }

    async fn is_available(&self) -> bool {
        true
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
