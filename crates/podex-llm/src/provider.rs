// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use podex_core::Result;

use crate::types::{ChatRequest, ChatResponse, StreamEvent};

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// The four verbs the coordinator needs from any model provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// One-shot completion.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Streaming completion: deltas, tool calls, then a terminal
    /// [`StreamEvent::Done`]. Dropping the stream cancels the request.
    async fn stream(&self, request: ChatRequest) -> Result<DeltaStream>;

    async fn list_models(&self) -> Result<Vec<String>>;

    /// Cheap liveness probe; used to skip unavailable providers without
    /// burning a full request.
    async fn is_available(&self) -> bool;
}
