// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Scripted provider for development and testing
//!
//! Plays back a queue of prepared turns instead of calling a real API.
//! Each turn is a list of normalized events with an optional latency per
//! event, so tests can exercise streaming, tool loops, and ordering
//! without the network.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{AegisError, ApiError, Result};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, EventStream, LlmProvider, StopReason, StreamEvent,
    ToolCall, Usage,
};

/// One prepared model turn
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    pub events: Vec<StreamEvent>,
    pub event_latency: Duration,
}

impl ScriptedTurn {
    /// A plain text reply that ends the turn
    pub fn text(content: &str) -> Self {
        Self {
            events: vec![
                StreamEvent::ContentDelta {
                    text: content.to_string(),
                },
                StreamEvent::Stop {
                    reason: StopReason::EndTurn,
                    usage: Some(Usage {
                        input_tokens: 10,
                        output_tokens: content.len() as u32,
                    }),
                },
            ],
            event_latency: Duration::ZERO,
        }
    }

    /// A turn that requests the given tool calls
    pub fn tool_use(calls: Vec<ToolCall>) -> Self {
        let mut events: Vec<StreamEvent> = calls.into_iter().map(StreamEvent::ToolUse).collect();
        events.push(StreamEvent::Stop {
            reason: StopReason::ToolUse,
            usage: None,
        });
        Self {
            events,
            event_latency: Duration::ZERO,
        }
    }

    /// A turn that fails mid-stream with a provider error
    pub fn stream_error(error_type: &str, message: &str) -> Self {
        Self {
            events: vec![StreamEvent::Error {
                error_type: error_type.to_string(),
                message: message.to_string(),
            }],
            event_latency: Duration::ZERO,
        }
    }

    /// From raw events
    pub fn events(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            event_latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.event_latency = latency;
        self
    }
}

/// Plays scripted turns in order and records every request it receives
#[derive(Debug)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of completion calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received, in call order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn next_turn(&self, request: &CompletionRequest) -> Result<ScriptedTurn> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| {
                AegisError::Api(ApiError::InvalidResponse(
                    "scripted provider exhausted".to_string(),
                ))
            })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports_model(&self, _model: &str) -> bool {
        true
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let turn = self.next_turn(&request)?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut stop_reason = None;
        let mut usage = Usage::default();
        for event in turn.events {
            match event {
                StreamEvent::ContentDelta { text: t } => text.push_str(&t),
                StreamEvent::ToolUse(call) => tool_calls.push(call),
                StreamEvent::Stop { reason, usage: u } => {
                    stop_reason = Some(reason);
                    if let Some(u) = u {
                        usage = u;
                    }
                }
                StreamEvent::Error { error_type, message } => {
                    return Err(AegisError::Api(ApiError::StreamError(format!(
                        "{}: {}",
                        error_type, message
                    ))));
                }
            }
        }

        Ok(CompletionResponse {
            id: format!("scripted-{}", self.call_count()),
            model: request.model,
            text,
            tool_calls,
            stop_reason,
            usage,
        })
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let turn = self.next_turn(&request)?;

        let stream = async_stream::stream! {
            for event in turn.events {
                if !turn.event_latency.is_zero() {
                    tokio::time::sleep(turn.event_latency).await;
                }
                yield Ok(event);
            }
        };

        Ok(Box::pin(stream))
    }
}
