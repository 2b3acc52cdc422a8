// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The turn engine
//!
//! Drives one conversational turn to completion: stream a model response,
//! run any requested tools, feed the results back, and repeat until the
//! model stops on its own or the iteration cap trips. Tool batches run
//! with bounded concurrency while results are appended in request order.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chat::streaming::StreamAccumulator;
use crate::config::{LimitsConfig, RetrievalConfig, Settings};
use crate::error::{AegisError, ApiError, Result};
use crate::llm::message::{ContentBlock, Conversation, Message};
use crate::llm::provider::{
    CompletionRequest, LlmProvider, ToolCall, ToolDefinition, ToolInputSchema,
};
use crate::retrieval::{QueryCache, RetrievalClient};

/// Name of the single tool exposed to the model
pub const SEARCH_TOOL: &str = "search_documentation";

const DEFAULT_TOP_K: u32 = 3;

/// Progress events emitted while a turn runs
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// A text fragment arrived; `content` is the full text so far this turn
    ContentDelta { delta: String, content: String },
    /// A batch of tool calls is about to execute
    ToolCallStart { calls: Vec<ToolCall> },
    /// A tool call finished; `content` is the result text fed to the model
    ToolCallComplete {
        id: String,
        name: String,
        content: String,
        success: bool,
        from_cache: bool,
    },
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    /// The model finished on its own
    Complete,
    /// The engine stopped the turn, with the reason
    Aborted(String),
}

/// The finished turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub content: String,
    pub status: TurnStatus,
    pub tool_iterations: u32,
}

/// Sender half for turn progress; drop it to run a turn silently
pub type TurnEventSender = mpsc::UnboundedSender<TurnEvent>;

/// Runs turns against a provider with retrieval-backed tool execution
pub struct TurnEngine {
    provider: Arc<dyn LlmProvider>,
    retrieval: Arc<RetrievalClient>,
    limits: LimitsConfig,
    retrieval_config: RetrievalConfig,
}

impl TurnEngine {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        retrieval: Arc<RetrievalClient>,
        settings: &Settings,
    ) -> Self {
        Self {
            provider,
            retrieval,
            limits: settings.limits.clone(),
            retrieval_config: settings.retrieval.clone(),
        }
    }

    /// The tool definition advertised to the model
    pub fn tool_definitions() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: SEARCH_TOOL.to_string(),
            description: "Search the After Effects scripting and expressions documentation. \
                          Returns the most relevant documentation passages for a query."
                .to_string(),
            input_schema: ToolInputSchema {
                schema_type: "object".to_string(),
                properties: serde_json::json!({
                    "query": {
                        "type": "string",
                        "description": "What to search the documentation for"
                    },
                    "top_k": {
                        "type": "integer",
                        "description": "How many passages to return"
                    }
                }),
                required: vec!["query".to_string()],
            },
        }]
    }

    /// Run one turn to completion
    ///
    /// The conversation must already end with the user message for this
    /// turn. Assistant messages and tool results are appended as the loop
    /// progresses, so the caller's history stays authoritative. Provider
    /// errors (including a mid-stream error event) are terminal for the
    /// turn and surface as `Err`; retrieval failures do not.
    pub async fn run_turn(
        &self,
        model: &str,
        conversation: &mut Conversation,
        cache: &mut QueryCache,
        events: Option<&TurnEventSender>,
    ) -> Result<TurnOutcome> {
        self.run_turn_inner(model, conversation, cache, events, true)
            .await
    }

    /// Run a turn with no tools offered, for planning and evaluation calls
    pub async fn run_plain_turn(
        &self,
        model: &str,
        conversation: &mut Conversation,
    ) -> Result<TurnOutcome> {
        let mut cache = QueryCache::new();
        self.run_turn_inner(model, conversation, &mut cache, None, false)
            .await
    }

    async fn run_turn_inner(
        &self,
        model: &str,
        conversation: &mut Conversation,
        cache: &mut QueryCache,
        events: Option<&TurnEventSender>,
        with_tools: bool,
    ) -> Result<TurnOutcome> {
        let mut turn_content = String::new();

        for iteration in 0..self.limits.max_tool_iterations {
            let mut request =
                CompletionRequest::new(model, conversation.messages().to_vec())
                    .with_max_tokens(self.limits.max_response_tokens);
            if let Some(system) = &conversation.system_prompt {
                request = request.with_system(system.clone());
            }
            if with_tools {
                request = request.with_tools(Self::tool_definitions());
            }

            let accumulator = self.stream_response(request, &mut turn_content, events).await?;

            if let Some((error_type, message)) = accumulator.error() {
                return Err(AegisError::Api(ApiError::StreamError(format!(
                    "{}: {}",
                    error_type, message
                ))));
            }

            let run_tools = accumulator.wants_tools();
            let (text, tool_calls, _stop_reason) = accumulator.into_parts();

            let mut blocks = Vec::new();
            if !text.is_empty() {
                blocks.push(ContentBlock::Text { text });
            }
            for call in &tool_calls {
                blocks.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });
            }
            if !blocks.is_empty() {
                conversation.push(Message::assistant_blocks(blocks));
            }

            if !run_tools {
                debug!(iteration, "turn complete");
                return Ok(TurnOutcome {
                    content: turn_content,
                    status: TurnStatus::Complete,
                    tool_iterations: iteration,
                });
            }

            info!(iteration, count = tool_calls.len(), "executing tool batch");
            let results = self.execute_tools(&tool_calls, cache, events).await;
            conversation.push(Message::tool_results(results));
        }

        warn!(
            cap = self.limits.max_tool_iterations,
            "turn hit the tool iteration cap"
        );
        Ok(TurnOutcome {
            content: turn_content,
            status: TurnStatus::Aborted("max tool iterations reached".to_string()),
            tool_iterations: self.limits.max_tool_iterations,
        })
    }

    /// Stream one model response, retrying only on rate limits
    async fn stream_response(
        &self,
        request: CompletionRequest,
        turn_content: &mut String,
        events: Option<&TurnEventSender>,
    ) -> Result<StreamAccumulator> {
        let mut attempt = 0u32;
        let mut stream = loop {
            match self.provider.complete_stream(request.clone()).await {
                Ok(stream) => break stream,
                Err(AegisError::Api(ApiError::RateLimited(retry_secs)))
                    if attempt < self.limits.max_rate_limit_retries =>
                {
                    attempt += 1;
                    warn!(retry_secs, attempt, "rate limited, backing off");
                    tokio::time::sleep(Duration::from_secs(retry_secs as u64)).await;
                }
                Err(e) => return Err(e),
            }
        };

        let mut accumulator = StreamAccumulator::new();
        while let Some(event) = stream.next().await {
            let event = event?;
            if let Some(delta) = accumulator.push(event) {
                turn_content.push_str(&delta);
                if let Some(sender) = events {
                    let _ = sender.send(TurnEvent::ContentDelta {
                        delta,
                        content: turn_content.clone(),
                    });
                }
            }
            if accumulator.error().is_some() {
                break;
            }
        }
        Ok(accumulator)
    }

    /// Execute a batch of tool calls
    ///
    /// Calls run through a bounded concurrent stream, but `buffered` yields
    /// outputs in submission order, so the results land in the same order
    /// the model requested them regardless of which finishes first.
    async fn execute_tools(
        &self,
        calls: &[ToolCall],
        cache: &mut QueryCache,
        events: Option<&TurnEventSender>,
    ) -> Vec<ContentBlock> {
        if let Some(sender) = events {
            let _ = sender.send(TurnEvent::ToolCallStart {
                calls: calls.to_vec(),
            });
        }

        // Cache is consulted up front; only misses go out to the service.
        let prepared: Vec<(ToolCall, Option<String>)> = calls
            .iter()
            .map(|call| {
                let cached = parse_query(call)
                    .ok()
                    .and_then(|(query, _)| cache.get(&query));
                (call.clone(), cached)
            })
            .collect();

        let executions = futures::stream::iter(prepared.into_iter().map(|(call, cached)| {
            let retrieval = Arc::clone(&self.retrieval);
            let char_budget = self.retrieval_config.content_char_budget;
            async move {
                if let Some(text) = cached {
                    return ToolExecution {
                        call,
                        text,
                        success: true,
                        from_cache: true,
                        cacheable: false,
                    };
                }
                execute_one(call, retrieval, char_budget).await
            }
        }))
        .buffered(self.limits.tool_concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

        let mut blocks = Vec::with_capacity(executions.len());
        for execution in executions {
            if execution.cacheable && execution.success {
                if let Ok((query, _)) = parse_query(&execution.call) {
                    cache.insert(&query, execution.text.clone());
                }
            }
            if let Some(sender) = events {
                let _ = sender.send(TurnEvent::ToolCallComplete {
                    id: execution.call.id.clone(),
                    name: execution.call.name.clone(),
                    content: execution.text.clone(),
                    success: execution.success,
                    from_cache: execution.from_cache,
                });
            }
            blocks.push(ContentBlock::ToolResult {
                tool_use_id: execution.call.id,
                content: execution.text,
                is_error: if execution.success { None } else { Some(true) },
            });
        }
        blocks
    }
}

struct ToolExecution {
    call: ToolCall,
    text: String,
    success: bool,
    from_cache: bool,
    cacheable: bool,
}

fn parse_query(call: &ToolCall) -> std::result::Result<(String, u32), String> {
    if call.name != SEARCH_TOOL {
        return Err(format!("unknown tool '{}'", call.name));
    }
    let query = call
        .input
        .get("query")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| "missing required 'query' argument".to_string())?;
    let top_k = call
        .input
        .get("top_k")
        .and_then(|v| v.as_u64())
        .map(|k| k as u32)
        .unwrap_or(DEFAULT_TOP_K);
    Ok((query.to_string(), top_k))
}

async fn execute_one(
    call: ToolCall,
    retrieval: Arc<RetrievalClient>,
    char_budget: usize,
) -> ToolExecution {
    let (query, top_k) = match parse_query(&call) {
        Ok(parsed) => parsed,
        Err(message) => {
            return ToolExecution {
                call,
                text: message,
                success: false,
                from_cache: false,
                cacheable: false,
            };
        }
    };

    let outcome = retrieval.search(&query, top_k).await;
    let success = outcome.success;
    ToolExecution {
        call,
        text: outcome.to_tool_text(char_budget),
        success,
        from_cache: false,
        cacheable: success,
    }
}
