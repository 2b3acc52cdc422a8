// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM provider trait and related types
//!
//! Defines the abstraction layer for different LLM backends. Each backend
//! adapter translates its own wire format into the normalized [`StreamEvent`]
//! variant; the turn engine only ever consumes the normalized form.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;
use crate::llm::message::Message;

/// A stream of normalized provider events
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Main trait for LLM providers
#[async_trait]
pub trait LlmProvider: std::fmt::Debug + Send + Sync {
    /// Get the provider name (e.g., "anthropic", "gemini")
    fn name(&self) -> &str;

    /// Check if a specific model is served by this provider
    fn supports_model(&self, model: &str) -> bool;

    /// Non-streaming completion
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Streaming completion yielding normalized events
    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream>;
}

/// Request for completion
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model to use
    pub model: String,

    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// System prompt
    pub system: Option<String>,

    /// Maximum tokens in response
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Tools available for the model to use
    pub tools: Vec<ToolDefinition>,
}

/// Response from a non-streaming completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Response ID
    pub id: String,

    /// Model used
    pub model: String,

    /// Text content of the response
    pub text: String,

    /// Tool calls requested by the model
    pub tool_calls: Vec<ToolCall>,

    /// Stop reason
    pub stop_reason: Option<StopReason>,

    /// Token usage
    pub usage: Usage,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Provider-assigned call ID
    pub id: String,

    /// Tool name
    pub name: String,

    /// Input parameters
    pub input: serde_json::Value,
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of message
    EndTurn,
    /// Hit max tokens
    MaxTokens,
    /// Wants to use a tool
    ToolUse,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens
    pub input_tokens: u32,
    /// Output tokens
    pub output_tokens: u32,
}

/// Normalized events from a streaming response
///
/// Adapters fold provider-specific framing (partial JSON deltas, block
/// start/stop markers) into these four categories. A stream yields at most
/// one `Error`, and nothing after it.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text content
    ContentDelta { text: String },

    /// A fully assembled tool invocation request
    ToolUse(ToolCall),

    /// The model finished, with a reason and final usage if reported
    Stop {
        reason: StopReason,
        usage: Option<Usage>,
    },

    /// Terminal provider error surfaced mid-stream
    Error { error_type: String, message: String },
}

/// Tool definition for the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,

    /// Tool description
    pub description: String,

    /// Input schema (JSON Schema)
    pub input_schema: ToolInputSchema,
}

/// Input schema for a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchema {
    /// Schema type (always "object")
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Property definitions
    pub properties: serde_json::Value,

    /// Required properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl CompletionRequest {
    /// Create a new completion request
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            system: None,
            max_tokens: 8192,
            temperature: 0.7,
            tools: vec![],
        }
    }

    /// Set the system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set tools
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

impl Usage {
    /// Get total tokens used
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::Message;

    #[test]
    fn test_completion_request_new() {
        let messages = vec![Message::user("Hello")];
        let request = CompletionRequest::new("claude-3-5-sonnet-20241022", messages);

        assert_eq!(request.model, "claude-3-5-sonnet-20241022");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.max_tokens, 8192);
        assert!(request.system.is_none());
        assert!(request.tools.is_empty());
    }

    #[test]
    fn test_completion_request_chained() {
        let messages = vec![Message::user("Hello")];
        let request = CompletionRequest::new("gemini-2.0-flash", messages)
            .with_system("System prompt")
            .with_max_tokens(2048)
            .with_temperature(0.2);

        assert_eq!(request.system, Some("System prompt".to_string()));
        assert_eq!(request.max_tokens, 2048);
        assert!((request.temperature - 0.2).abs() < 0.001);
    }

    #[test]
    fn test_completion_request_with_tools() {
        let tools = vec![ToolDefinition {
            name: "search_documentation".to_string(),
            description: "Search the After Effects scripting docs".to_string(),
            input_schema: ToolInputSchema {
                schema_type: "object".to_string(),
                properties: serde_json::json!({
                    "query": {"type": "string", "description": "Search query"}
                }),
                required: vec!["query".to_string()],
            },
        }];
        let request = CompletionRequest::new("m", vec![Message::user("q")]).with_tools(tools);

        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tools[0].name, "search_documentation");
    }

    #[test]
    fn test_usage_total_tokens() {
        let usage = Usage {
            input_tokens: 100,
            output_tokens: 50,
        };
        assert_eq!(usage.total_tokens(), 150);
    }

    #[test]
    fn test_stop_reason_serde() {
        let json = serde_json::to_string(&StopReason::ToolUse).unwrap();
        assert_eq!(json, "\"tool_use\"");
        let parsed: StopReason = serde_json::from_str("\"end_turn\"").unwrap();
        assert_eq!(parsed, StopReason::EndTurn);
    }

    #[test]
    fn test_tool_call_equality() {
        let a = ToolCall {
            id: "t1".to_string(),
            name: "search_documentation".to_string(),
            input: serde_json::json!({"query": "layer"}),
        };
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stream_event_variants() {
        let delta = StreamEvent::ContentDelta {
            text: "hello".to_string(),
        };
        assert!(matches!(delta, StreamEvent::ContentDelta { .. }));

        let stop = StreamEvent::Stop {
            reason: StopReason::EndTurn,
            usage: None,
        };
        assert!(matches!(
            stop,
            StreamEvent::Stop {
                reason: StopReason::EndTurn,
                ..
            }
        ));
    }
}
