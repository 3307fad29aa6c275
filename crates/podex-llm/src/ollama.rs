// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Ollama driver — the one concrete provider the coordinator ships.
//!
//! Speaks `/api/chat` (NDJSON streaming) and `/api/tags`. Anything else
//! lives behind the [`Provider`] trait in its own driver.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use podex_core::{Error, Result};

use crate::provider::{DeltaStream, Provider};
use crate::types::{ChatRequest, ChatResponse, Role, StreamEvent, ToolCallRequest};

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            name: "ollama".into(),
        }
    }

    fn chat_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                        Role::Tool => "tool",
                    },
                    "content": m.content,
                })
            })
            .collect();
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }
        if let Some(t) = request.temperature {
            body["options"] = json!({ "temperature": t });
        }
        body
    }
}

fn transport(e: reqwest::Error) -> Error {
    Error::Transport(format!("ollama: {e}"))
}

fn tool_call_from(index: usize, call: OllamaToolCall) -> ToolCallRequest {
    ToolCallRequest {
        id: format!("ollama-call-{index}"),
        name: call.function.name,
        args: call.function.arguments,
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let chunk: OllamaChunk = self
            .client
            .post(&url)
            .json(&self.chat_body(&request, false))
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;

        let message = chunk.message.unwrap_or(OllamaMessage {
            content: String::new(),
            tool_calls: vec![],
        });
        Ok(ChatResponse {
            content: message.content,
            tool_calls: message
                .tool_calls
                .into_iter()
                .enumerate()
                .map(|(i, c)| tool_call_from(i, c))
                .collect(),
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<DeltaStream> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&self.chat_body(&request, true))
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;

        let byte_stream = response.bytes_stream();
        Ok(Box::pin(ndjson_events(byte_stream)))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let tags: OllamaTags = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("ollama unavailable: {e}");
                false
            }
        }
    }
}

/// Turn the NDJSON byte stream into typed events, accumulating the full
/// response for the terminal `Done`.
fn ndjson_events<S, B>(bytes: S) -> impl futures::Stream<Item = Result<StreamEvent>> + Send
where
    S: futures::Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    struct State<S> {
        bytes: std::pin::Pin<Box<S>>,
        accum: StreamAccum,
    }

    futures::stream::unfold(
        State {
            bytes: Box::pin(bytes),
            accum: StreamAccum::default(),
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.accum.queued.pop() {
                    return Some((Ok(event), state));
                }
                if state.accum.finished {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state
                            .accum
                            .buffer
                            .push_str(&String::from_utf8_lossy(chunk.as_ref()));
                        state.accum.decode_lines();
                        // Loop around: either an event is now queued, or the
                        // chunk held no complete line and we read more.
                    }
                    Some(Err(e)) => {
                        state.accum.finished = true;
                        return Some((Err(transport(e)), state));
                    }
                    None => {
                        state.accum.finished = true;
                        let response = std::mem::take(&mut state.accum.assembled);
                        return Some((Ok(StreamEvent::Done(response)), state));
                    }
                }
            }
        },
    )
}

#[derive(Default)]
struct StreamAccum {
    buffer: String,
    queued: Vec<StreamEvent>,
    assembled: ChatResponse,
    finished: bool,
}

impl StreamAccum {
    fn decode_lines(&mut self) {
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(chunk) = serde_json::from_str::<OllamaChunk>(line) else {
                continue;
            };
            if let Some(message) = chunk.message {
                if !message.content.is_empty() {
                    self.assembled.content.push_str(&message.content);
                    self.queued.push(StreamEvent::TextDelta(message.content));
                }
                for (i, call) in message.tool_calls.into_iter().enumerate() {
                    let call = tool_call_from(self.assembled.tool_calls.len() + i, call);
                    self.assembled.tool_calls.push(call.clone());
                    self.queued.push(StreamEvent::ToolCall(call));
                }
            }
            let _ = chunk.done;
        }
        // Oldest first when draining with pop().
        self.queued.reverse();
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_includes_tools_only_when_present() {
        let provider = OllamaProvider::new("http://localhost:11434/");
        let request = ChatRequest {
            model: "llama3.2".into(),
            messages: vec![crate::types::ChatMessage::user("hi")],
            tools: vec![],
            temperature: Some(0.2),
            max_tokens: None,
        };
        let body = provider.chat_body(&request, true);
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream"], true);
        assert_eq!(body["options"]["temperature"], 0.2);
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let provider = OllamaProvider::new("http://localhost:11434/");
        assert_eq!(provider.base_url, "http://localhost:11434");
    }

    #[test]
    fn ndjson_lines_decode_into_deltas_and_tool_calls() {
        let mut accum = StreamAccum::default();
        accum.buffer.push_str(concat!(
            r#"{"message": {"content": "hel"}, "done": false}"#,
            "\n",
            r#"{"message": {"content": "lo", "tool_calls": [{"function": {"name": "read_file", "arguments": {"path": "a"}}}]}, "done": true}"#,
            "\n",
        ));
        accum.decode_lines();

        // Queued is reversed for pop(); drain and re-reverse.
        let mut events = Vec::new();
        while let Some(ev) = accum.queued.pop() {
            events.push(ev);
        }
        assert!(matches!(&events[0], StreamEvent::TextDelta(d) if d == "hel"));
        assert!(matches!(&events[1], StreamEvent::TextDelta(d) if d == "lo"));
        assert!(matches!(&events[2], StreamEvent::ToolCall(c) if c.name == "read_file"));
        assert_eq!(accum.assembled.content, "hello");
        assert_eq!(accum.assembled.tool_calls.len(), 1);
    }
}
