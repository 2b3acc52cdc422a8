// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Stream accumulation
//!
//! Folds a normalized event stream into the complete text, tool calls,
//! and stop reason of one model response.

use crate::llm::provider::{StopReason, StreamEvent, ToolCall, Usage};

/// Accumulates events from one streaming response
#[derive(Default)]
pub struct StreamAccumulator {
    text: String,
    tool_calls: Vec<ToolCall>,
    stop_reason: Option<StopReason>,
    usage: Option<Usage>,
    error: Option<(String, String)>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event in. Returns the text delta if the event carried one.
    pub fn push(&mut self, event: StreamEvent) -> Option<String> {
        match event {
            StreamEvent::ContentDelta { text } => {
                self.text.push_str(&text);
                Some(text)
            }
            StreamEvent::ToolUse(call) => {
                self.tool_calls.push(call);
                None
            }
            StreamEvent::Stop { reason, usage } => {
                self.stop_reason = Some(reason);
                if usage.is_some() {
                    self.usage = usage;
                }
                None
            }
            StreamEvent::Error {
                error_type,
                message,
            } => {
                self.error = Some((error_type, message));
                None
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    /// The terminal stream error, if one arrived
    pub fn error(&self) -> Option<(&str, &str)> {
        self.error
            .as_ref()
            .map(|(t, m)| (t.as_str(), m.as_str()))
    }

    /// Whether the response asked for tools to run
    ///
    /// Both conditions must hold: a tool-use stop reason with no calls
    /// attached is a finished turn, not an empty batch.
    pub fn wants_tools(&self) -> bool {
        self.stop_reason == Some(StopReason::ToolUse) && !self.tool_calls.is_empty()
    }

    pub fn into_parts(self) -> (String, Vec<ToolCall>, Option<StopReason>) {
        (self.text, self.tool_calls, self.stop_reason)
    }
}
