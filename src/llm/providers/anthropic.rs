// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Anthropic Claude API provider implementation
//!
//! Translates the `/v1/messages` wire format (including its SSE framing with
//! partial JSON tool-input deltas) into the normalized event stream.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{AegisError, ApiError, Result};
use crate::llm::message::{ContentBlock, Message, MessageContent, Role};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, EventStream, LlmProvider, StopReason, StreamEvent,
    ToolCall, ToolDefinition, Usage,
};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude provider
#[derive(Debug)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, ANTHROPIC_API_URL)
    }

    /// Create with a custom base URL
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Convert internal messages to Anthropic format
    fn convert_messages(&self, messages: &[Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };

                let content = match &m.content {
                    MessageContent::Text(text) => AnthropicContent::Text(text.clone()),
                    MessageContent::Blocks(blocks) => {
                        let converted = blocks
                            .iter()
                            .map(|b| match b {
                                ContentBlock::Text { text } => {
                                    AnthropicContentBlock::Text { text: text.clone() }
                                }
                                ContentBlock::ToolUse { id, name, input } => {
                                    AnthropicContentBlock::ToolUse {
                                        id: id.clone(),
                                        name: name.clone(),
                                        input: input.clone(),
                                    }
                                }
                                ContentBlock::ToolResult {
                                    tool_use_id,
                                    content,
                                    is_error,
                                } => AnthropicContentBlock::ToolResult {
                                    tool_use_id: tool_use_id.clone(),
                                    content: content.clone(),
                                    is_error: *is_error,
                                },
                            })
                            .collect();
                        AnthropicContent::Blocks(converted)
                    }
                };

                AnthropicMessage {
                    role: role.to_string(),
                    content,
                }
            })
            .collect()
    }

    /// Convert tools to Anthropic format
    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: serde_json::json!({
                    "type": t.input_schema.schema_type,
                    "properties": t.input_schema.properties,
                    "required": t.input_schema.required,
                }),
            })
            .collect()
    }

    /// Build the request body
    fn build_request(&self, request: &CompletionRequest) -> AnthropicRequest {
        AnthropicRequest {
            model: request.model.clone(),
            messages: self.convert_messages(&request.messages),
            system: request.system.clone(),
            max_tokens: request.max_tokens,
            temperature: Some(request.temperature),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(self.convert_tools(&request.tools))
            },
            stream: Some(false),
        }
    }

    /// Extract a numeric Retry-After header value
    fn extract_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
        headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
    }

    /// Parse an error response body
    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> AegisError {
        if let Ok(error_response) = serde_json::from_str::<AnthropicError>(body) {
            match error_response.error.error_type.as_str() {
                "authentication_error" => AegisError::Api(ApiError::AuthenticationFailed),
                "rate_limit_error" => {
                    let retry_secs = retry_after.unwrap_or(10) as u32;
                    AegisError::Api(ApiError::RateLimited(retry_secs))
                }
                "invalid_request_error" => {
                    AegisError::Api(ApiError::InvalidResponse(error_response.error.message))
                }
                _ => AegisError::Api(ApiError::ServerError {
                    status,
                    message: error_response.error.message,
                }),
            }
        } else {
            AegisError::Api(ApiError::ServerError {
                status,
                message: body.to_string(),
            })
        }
    }

    async fn send(&self, body: &AnthropicRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.base_url)
            .timeout(self.timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AegisError::Api(ApiError::Timeout)
                } else {
                    AegisError::Api(ApiError::Network(e.to_string()))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = Self::extract_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body, retry_after));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn supports_model(&self, model: &str) -> bool {
        model.starts_with("claude")
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.build_request(&request);
        let response = self.send(&body).await?;

        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| AegisError::Api(ApiError::InvalidResponse(e.to_string())))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in api_response.content {
            match block {
                AnthropicContentBlock::Text { text: t } => text.push_str(&t),
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall { id, name, input });
                }
                AnthropicContentBlock::ToolResult { .. } => {}
            }
        }

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            text,
            tool_calls,
            stop_reason: api_response.stop_reason.as_deref().map(parse_stop_reason),
            usage: Usage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
            },
        })
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let mut body = self.build_request(&request);
        body.stream = Some(true);

        let response = self.send(&body).await?;
        let byte_stream = response.bytes_stream();

        let event_stream = byte_stream
            .map(|result| {
                result.map_err(|e| AegisError::Api(ApiError::StreamError(e.to_string())))
            })
            .scan(SseFolder::default(), |folder, result| {
                let events = match result {
                    Ok(bytes) => folder.push_chunk(&String::from_utf8_lossy(&bytes)),
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Incremental SSE parser and event normalizer
///
/// Buffers byte chunks until a full `event\n\n` frame is available, then
/// folds the Anthropic block events into normalized events. Tool input
/// arrives as partial JSON deltas, so tool blocks are held until their
/// `content_block_stop` before a `ToolUse` is emitted.
#[derive(Default)]
struct SseFolder {
    buffer: String,
    pending_tools: HashMap<usize, PendingTool>,
    errored: bool,
}

struct PendingTool {
    id: String,
    name: String,
    partial_json: String,
}

impl SseFolder {
    fn push_chunk(&mut self, chunk: &str) -> Vec<Result<StreamEvent>> {
        if self.errored {
            return vec![];
        }
        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let frame = self.buffer[..pos].to_string();
            self.buffer = self.buffer[pos + 2..].to_string();

            if let Some(raw) = parse_sse_frame(&frame) {
                for event in self.fold(raw) {
                    let is_error = matches!(event, StreamEvent::Error { .. });
                    events.push(Ok(event));
                    if is_error {
                        self.errored = true;
                        return events;
                    }
                }
            }
        }
        events
    }

    fn fold(&mut self, raw: RawStreamEvent) -> Vec<StreamEvent> {
        match raw {
            RawStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                if let RawContentBlock::ToolUse { id, name, .. } = content_block {
                    self.pending_tools.insert(
                        index,
                        PendingTool {
                            id,
                            name,
                            partial_json: String::new(),
                        },
                    );
                }
                vec![]
            }
            RawStreamEvent::ContentBlockDelta { index, delta } => match delta {
                RawDelta::TextDelta { text } => vec![StreamEvent::ContentDelta { text }],
                RawDelta::InputJsonDelta { partial_json } => {
                    if let Some(pending) = self.pending_tools.get_mut(&index) {
                        pending.partial_json.push_str(&partial_json);
                    }
                    vec![]
                }
            },
            RawStreamEvent::ContentBlockStop { index } => {
                if let Some(pending) = self.pending_tools.remove(&index) {
                    let input = if pending.partial_json.is_empty() {
                        serde_json::json!({})
                    } else {
                        match serde_json::from_str(&pending.partial_json) {
                            Ok(value) => value,
                            Err(e) => {
                                return vec![StreamEvent::Error {
                                    error_type: "invalid_tool_input".to_string(),
                                    message: format!(
                                        "unparseable tool input for '{}': {}",
                                        pending.name, e
                                    ),
                                }];
                            }
                        }
                    };
                    vec![StreamEvent::ToolUse(ToolCall {
                        id: pending.id,
                        name: pending.name,
                        input,
                    })]
                } else {
                    vec![]
                }
            }
            RawStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason.as_deref() {
                    vec![StreamEvent::Stop {
                        reason: parse_stop_reason(reason),
                        usage: usage.map(|u| Usage {
                            input_tokens: u.input_tokens,
                            output_tokens: u.output_tokens,
                        }),
                    }]
                } else {
                    vec![]
                }
            }
            RawStreamEvent::Error { error } => vec![StreamEvent::Error {
                error_type: error.error_type,
                message: error.message,
            }],
            RawStreamEvent::MessageStart { .. }
            | RawStreamEvent::MessageStop
            | RawStreamEvent::Ping => vec![],
        }
    }
}

fn parse_stop_reason(reason: &str) -> StopReason {
    match reason {
        "max_tokens" => StopReason::MaxTokens,
        "tool_use" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

/// Parse one SSE frame into a raw Anthropic event
fn parse_sse_frame(frame: &str) -> Option<RawStreamEvent> {
    let mut data = None;
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("data: ") {
            data = Some(rest);
        }
    }
    serde_json::from_str(data?).ok()
}

// ===== Wire types =====

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawStreamEvent {
    MessageStart {
        #[serde(default)]
        message: serde_json::Value,
    },
    ContentBlockStart {
        index: usize,
        content_block: RawContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: RawDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: RawMessageDelta,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: AnthropicErrorDetail,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Deserialize)]
struct RawMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: &str) -> String {
        format!("event: x\ndata: {}\n\n", json)
    }

    #[test]
    fn test_supports_model() {
        let provider = AnthropicProvider::new("key");
        assert!(provider.supports_model("claude-3-5-sonnet-20241022"));
        assert!(provider.supports_model("claude-sonnet-4-20250514"));
        assert!(!provider.supports_model("gemini-2.0-flash"));
    }

    #[test]
    fn test_fold_text_deltas() {
        let mut folder = SseFolder::default();

        let events = folder.push_chunk(&frame(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        ));
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            StreamEvent::ContentDelta { text } => assert_eq!(text, "Hello"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_fold_tool_use_assembled_from_partial_json() {
        let mut folder = SseFolder::default();

        folder.push_chunk(&frame(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"search_documentation","input":{}}}"#,
        ));
        folder.push_chunk(&frame(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"query\":"}}"#,
        ));
        folder.push_chunk(&frame(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"layer\"}"}}"#,
        ));
        let events = folder.push_chunk(&frame(r#"{"type":"content_block_stop","index":1}"#));

        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            StreamEvent::ToolUse(call) => {
                assert_eq!(call.id, "toolu_1");
                assert_eq!(call.name, "search_documentation");
                assert_eq!(call.input["query"], "layer");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_fold_stop_with_reason() {
        let mut folder = SseFolder::default();
        let events = folder.push_chunk(&frame(
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":12}}"#,
        ));
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            StreamEvent::Stop { reason, usage } => {
                assert_eq!(*reason, StopReason::ToolUse);
                assert_eq!(usage.as_ref().unwrap().output_tokens, 12);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_fold_error_is_terminal() {
        let mut folder = SseFolder::default();
        let events = folder.push_chunk(&frame(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"busy"}}"#,
        ));
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Error { .. }
        ));

        // Nothing after an error
        let more = folder.push_chunk(&frame(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"x"}}"#,
        ));
        assert!(more.is_empty());
    }

    #[test]
    fn test_fold_frame_split_across_chunks() {
        let mut folder = SseFolder::default();
        let full = frame(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"split"}}"#,
        );
        let (a, b) = full.split_at(30);

        assert!(folder.push_chunk(a).is_empty());
        let events = folder.push_chunk(b);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_fold_ignores_ping_and_message_start() {
        let mut folder = SseFolder::default();
        assert!(folder.push_chunk(&frame(r#"{"type":"ping"}"#)).is_empty());
        assert!(folder
            .push_chunk(&frame(r#"{"type":"message_start","message":{}}"#))
            .is_empty());
        assert!(folder
            .push_chunk(&frame(r#"{"type":"message_stop"}"#))
            .is_empty());
    }

    #[test]
    fn test_invalid_tool_input_surfaces_error() {
        let mut folder = SseFolder::default();
        folder.push_chunk(&frame(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"search_documentation","input":{}}}"#,
        ));
        folder.push_chunk(&frame(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{broken"}}"#,
        ));
        let events = folder.push_chunk(&frame(r#"{"type":"content_block_stop","index":0}"#));
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Error { .. }
        ));
    }

    #[test]
    fn test_parse_error_authentication() {
        let provider = AnthropicProvider::new("bad-key");
        let err = provider.parse_error(
            401,
            r#"{"error":{"type":"authentication_error","message":"invalid x-api-key"}}"#,
            None,
        );
        assert!(matches!(
            err,
            AegisError::Api(ApiError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_parse_error_rate_limit_uses_retry_after() {
        let provider = AnthropicProvider::new("key");
        let err = provider.parse_error(
            429,
            r#"{"error":{"type":"rate_limit_error","message":"slow down"}}"#,
            Some(30),
        );
        assert!(matches!(err, AegisError::Api(ApiError::RateLimited(30))));
    }

    #[test]
    fn test_parse_error_unstructured_body() {
        let provider = AnthropicProvider::new("key");
        let err = provider.parse_error(502, "Bad Gateway", None);
        match err {
            AegisError::Api(ApiError::ServerError { status, message }) => {
                assert_eq!(status, 502);
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_build_request_includes_tools() {
        let provider = AnthropicProvider::new("key");
        let request = CompletionRequest::new("claude-3-5-sonnet-20241022", vec![Message::user("q")])
            .with_tools(vec![crate::llm::provider::ToolDefinition {
                name: "search_documentation".to_string(),
                description: "search".to_string(),
                input_schema: crate::llm::provider::ToolInputSchema {
                    schema_type: "object".to_string(),
                    properties: serde_json::json!({"query": {"type": "string"}}),
                    required: vec!["query".to_string()],
                },
            }]);

        let body = provider.build_request(&request);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["tools"][0]["name"], "search_documentation");
        assert_eq!(json["tools"][0]["input_schema"]["type"], "object");
    }
}
