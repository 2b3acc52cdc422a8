// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Google Gemini API provider implementation
//!
//! Uses the `generateContent` / `streamGenerateContent?alt=sse` endpoints.
//! Gemini delivers function calls whole rather than as partial JSON, and it
//! has no tool-use ids, so this adapter mints one per call.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AegisError, ApiError, Result};
use crate::llm::message::{ContentBlock, Message, MessageContent, Role};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, EventStream, LlmProvider, StopReason, StreamEvent,
    ToolCall, ToolDefinition, Usage,
};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini provider
#[derive(Debug)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiProvider {
    /// Create a new Gemini provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, GEMINI_API_URL)
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

    /// Convert internal messages to Gemini contents
    ///
    /// Tool results become `functionResponse` parts on a user turn. The
    /// original tool name is not carried on the result block, so the
    /// registered name is echoed from the id prefix when present.
    fn convert_messages(&self, messages: &[Message]) -> Vec<GeminiContent> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };

                let parts = match &m.content {
                    MessageContent::Text(text) => vec![GeminiPart::Text { text: text.clone() }],
                    MessageContent::Blocks(blocks) => blocks
                        .iter()
                        .map(|b| match b {
                            ContentBlock::Text { text } => {
                                GeminiPart::Text { text: text.clone() }
                            }
                            ContentBlock::ToolUse { name, input, .. } => {
                                GeminiPart::FunctionCall {
                                    function_call: GeminiFunctionCall {
                                        name: name.clone(),
                                        args: input.clone(),
                                    },
                                }
                            }
                            ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } => GeminiPart::FunctionResponse {
                                function_response: GeminiFunctionResponse {
                                    name: tool_name_from_id(tool_use_id),
                                    response: serde_json::json!({ "result": content }),
                                },
                            },
                        })
                        .collect(),
                };

                GeminiContent {
                    role: role.to_string(),
                    parts,
                }
            })
            .collect()
    }

    fn build_request(&self, request: &CompletionRequest) -> GeminiRequest {
        GeminiRequest {
            contents: self.convert_messages(&request.messages),
            system_instruction: request.system.as_ref().map(|s| GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart::Text { text: s.clone() }],
            }),
            generation_config: GeminiGenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            },
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(vec![GeminiTools {
                    function_declarations: request
                        .tools
                        .iter()
                        .map(|t| GeminiFunctionDeclaration {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: serde_json::json!({
                                "type": t.input_schema.schema_type,
                                "properties": t.input_schema.properties,
                                "required": t.input_schema.required,
                            }),
                        })
                        .collect(),
                }])
            },
        }
    }

    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> AegisError {
        if status == 429 {
            return AegisError::Api(ApiError::RateLimited(retry_after.unwrap_or(10) as u32));
        }
        if status == 401 || status == 403 {
            return AegisError::Api(ApiError::AuthenticationFailed);
        }
        if let Ok(error_response) = serde_json::from_str::<GeminiError>(body) {
            if status == 404 {
                return AegisError::Api(ApiError::ModelNotFound(error_response.error.message));
            }
            AegisError::Api(ApiError::ServerError {
                status,
                message: error_response.error.message,
            })
        } else {
            AegisError::Api(ApiError::ServerError {
                status,
                message: body.to_string(),
            })
        }
    }

    async fn send(&self, url: String, body: &GeminiRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header("x-goog-api-key", &self.api_key)
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
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body, retry_after));
        }

        Ok(response)
    }
}

/// Mint a tool-use id carrying the function name, so the name can be
/// recovered when the result is sent back as a `functionResponse`.
fn mint_tool_id(name: &str) -> String {
    format!("{}:{}", name, Uuid::new_v4().simple())
}

fn tool_name_from_id(id: &str) -> String {
    id.split(':').next().unwrap_or(id).to_string()
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn supports_model(&self, model: &str) -> bool {
        model.starts_with("gemini")
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let url = format!("{}/{}:generateContent", self.base_url, request.model);
        let body = self.build_request(&request);
        let response = self.send(url, &body).await?;

        let api_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| AegisError::Api(ApiError::InvalidResponse(e.to_string())))?;

        let candidate = api_response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AegisError::Api(ApiError::InvalidResponse("no candidates".into())))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.parts {
            match part {
                GeminiPart::Text { text: t } => text.push_str(&t),
                GeminiPart::FunctionCall { function_call } => tool_calls.push(ToolCall {
                    id: mint_tool_id(&function_call.name),
                    name: function_call.name,
                    input: function_call.args,
                }),
                GeminiPart::FunctionResponse { .. } => {}
            }
        }

        let stop_reason = if !tool_calls.is_empty() {
            Some(StopReason::ToolUse)
        } else {
            candidate.finish_reason.as_deref().map(parse_finish_reason)
        };

        let usage = api_response
            .usage_metadata
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            id: Uuid::new_v4().to_string(),
            model: request.model,
            text,
            tool_calls,
            stop_reason,
            usage,
        })
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let url = format!(
            "{}/{}:streamGenerateContent?alt=sse",
            self.base_url, request.model
        );
        let body = self.build_request(&request);
        let response = self.send(url, &body).await?;
        let byte_stream = response.bytes_stream();

        let event_stream = byte_stream
            .map(|result| {
                result.map_err(|e| AegisError::Api(ApiError::StreamError(e.to_string())))
            })
            .scan(GeminiFolder::default(), |folder, result| {
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

/// Folds Gemini SSE chunks into normalized events
///
/// Each frame is a complete `GenerateContentResponse`. Function calls are
/// emitted as they arrive; the final frame carries the finish reason and
/// usage metadata, which becomes the single `Stop` event.
#[derive(Default)]
struct GeminiFolder {
    buffer: String,
    saw_tool_use: bool,
    stopped: bool,
}

impl GeminiFolder {
    fn push_chunk(&mut self, chunk: &str) -> Vec<crate::error::Result<StreamEvent>> {
        if self.stopped {
            return vec![];
        }
        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let frame = self.buffer[..pos].to_string();
            self.buffer = self.buffer[pos + 2..].to_string();

            let Some(data) = frame
                .lines()
                .find_map(|l| l.strip_prefix("data: "))
                .map(str::trim)
            else {
                continue;
            };

            match serde_json::from_str::<GeminiResponse>(data) {
                Ok(response) => {
                    for event in self.fold(response) {
                        events.push(Ok(event));
                    }
                    if self.stopped {
                        return events;
                    }
                }
                Err(e) => {
                    self.stopped = true;
                    events.push(Ok(StreamEvent::Error {
                        error_type: "invalid_chunk".to_string(),
                        message: e.to_string(),
                    }));
                    return events;
                }
            }
        }
        events
    }

    fn fold(&mut self, response: GeminiResponse) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let usage = response.usage_metadata.map(|u| Usage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        });

        for candidate in response.candidates {
            for part in candidate.content.parts {
                match part {
                    GeminiPart::Text { text } => {
                        if !text.is_empty() {
                            events.push(StreamEvent::ContentDelta { text });
                        }
                    }
                    GeminiPart::FunctionCall { function_call } => {
                        self.saw_tool_use = true;
                        events.push(StreamEvent::ToolUse(ToolCall {
                            id: mint_tool_id(&function_call.name),
                            name: function_call.name,
                            input: function_call.args,
                        }));
                    }
                    GeminiPart::FunctionResponse { .. } => {}
                }
            }

            if let Some(reason) = candidate.finish_reason.as_deref() {
                let reason = if self.saw_tool_use {
                    StopReason::ToolUse
                } else {
                    parse_finish_reason(reason)
                };
                self.stopped = true;
                events.push(StreamEvent::Stop {
                    reason,
                    usage: usage.clone(),
                });
            }
        }
        events
    }
}

fn parse_finish_reason(reason: &str) -> StopReason {
    match reason {
        "MAX_TOKENS" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

// ===== Wire types =====

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTools>>,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
}

#[derive(Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct GeminiTools {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    #[serde(default = "empty_content")]
    content: GeminiContent,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

fn empty_content() -> GeminiContent {
    GeminiContent {
        role: String::new(),
        parts: Vec::new(),
    }
}

#[derive(Deserialize)]
struct GeminiUsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}

#[derive(Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Deserialize)]
struct GeminiErrorDetail {
    message: String,
}
