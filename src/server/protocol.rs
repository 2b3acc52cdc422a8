// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! WebSocket message protocol
//!
//! Inbound commands and outbound events, both JSON with a `type` tag.
//! Command payloads ride in a `data` envelope; wire field names that
//! clients see are camelCase. Every outbound message carries an ISO-8601
//! timestamp, and null-valued fields are stripped before serialization so
//! clients never see them.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{Plan, TaskReport};
use crate::error::{AegisError, Result};
use crate::llm::message::WireMessage;

/// Commands a client can send
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Start a chat turn
    ChatStart { data: ChatStartData },
    /// Start an autonomous agent task
    AgentAutonomousTask { data: AgentTaskData },
    /// Application-level keepalive
    Ping,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatStartData {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Full history to replace the session's conversation, if sent
    #[serde(default)]
    pub conversation: Option<Vec<WireMessage>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentTaskData {
    pub task: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, rename = "maxIterations")]
    pub max_iterations: Option<u32>,
}

/// Outcome of parsing one inbound text frame
pub enum ParsedCommand {
    Command(ClientCommand),
    /// The frame was not valid JSON
    InvalidJson,
    /// Valid JSON, but an unrecognized or malformed command
    Unknown(String),
}

/// Parse an inbound frame, distinguishing bad JSON from a bad command
pub fn parse_command(text: &str) -> ParsedCommand {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return ParsedCommand::InvalidJson,
    };
    let message_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("(missing)")
        .to_string();
    match serde_json::from_value::<ClientCommand>(value) {
        Ok(command) => ParsedCommand::Command(command),
        Err(_) => ParsedCommand::Unknown(message_type),
    }
}

/// Events the server sends
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    ConnectionEstablished {
        session_id: String,
    },
    ChatStarted {
        data: ChatStartedData,
    },
    ContentDelta {
        delta: String,
        content: String,
    },
    /// A batch of tool calls is about to execute
    ToolCallStart {
        #[serde(rename = "toolCalls")]
        tool_calls: Vec<ToolCallInfo>,
    },
    /// One tool call from the batch finished
    ToolCallComplete {
        #[serde(rename = "toolCall")]
        tool_call: ToolCallInfo,
        result: ToolCallOutcome,
    },
    ChatComplete {
        result: ChatResult,
    },
    AgentPlanCreated {
        plan: Plan,
    },
    AgentStepStarted {
        step: AgentStepInfo,
    },
    AgentStepCompleted {
        step: AgentStepInfo,
        result: AgentStepOutcome,
    },
    AgentEvaluationComplete {
        evaluation: EvaluationInfo,
    },
    AgentTaskComplete {
        result: TaskReport,
    },
    Error {
        error: String,
    },
    Pong,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatStartedData {
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallInfo {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallOutcome {
    pub success: bool,
    pub content: String,
    #[serde(rename = "fromCache")]
    pub from_cache: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStepInfo {
    pub index: usize,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStepOutcome {
    pub success: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationInfo {
    pub decision: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResult {
    pub content: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ServerEvent {
    /// Serialize with the timestamp injected and nulls stripped
    pub fn to_message(&self) -> Result<String> {
        let mut value = serde_json::to_value(self)?;
        strip_nulls(&mut value);
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "timestamp".to_string(),
                serde_json::Value::String(
                    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                ),
            );
        } else {
            return Err(AegisError::Protocol(
                "server event did not serialize to an object".to_string(),
            ));
        }
        Ok(serde_json::to_string(&value)?)
    }
}

/// Remove null-valued fields recursively
fn strip_nulls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                strip_nulls(v);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                strip_nulls(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_start_data_envelope() {
        let parsed = parse_command(
            r#"{"type":"chat_start","data":{"message":"how do masks work?","model":"claude-3-5-sonnet-20241022","conversation":[]}}"#,
        );
        match parsed {
            ParsedCommand::Command(ClientCommand::ChatStart { data }) => {
                assert_eq!(data.message, "how do masks work?");
                assert_eq!(data.model.as_deref(), Some("claude-3-5-sonnet-20241022"));
                assert_eq!(data.conversation.map(|c| c.len()), Some(0));
            }
            _ => panic!("expected chat_start"),
        }
    }

    #[test]
    fn test_parse_chat_start_without_optional_fields() {
        let parsed =
            parse_command(r#"{"type":"chat_start","data":{"message":"what is a layer?"}}"#);
        match parsed {
            ParsedCommand::Command(ClientCommand::ChatStart { data }) => {
                assert_eq!(data.message, "what is a layer?");
                assert!(data.model.is_none());
                assert!(data.conversation.is_none());
            }
            _ => panic!("expected chat_start"),
        }
    }

    #[test]
    fn test_parse_agent_task_camel_case_iterations() {
        let parsed = parse_command(
            r#"{"type":"agent_autonomous_task","data":{"task":"summarize expressions","maxIterations":5}}"#,
        );
        match parsed {
            ParsedCommand::Command(ClientCommand::AgentAutonomousTask { data }) => {
                assert_eq!(data.task, "summarize expressions");
                assert_eq!(data.max_iterations, Some(5));
            }
            _ => panic!("expected agent_autonomous_task"),
        }
    }

    #[test]
    fn test_parse_chat_start_without_envelope_is_rejected() {
        match parse_command(r#"{"type":"chat_start","message":"bare fields"}"#) {
            ParsedCommand::Unknown(t) => assert_eq!(t, "chat_start"),
            _ => panic!("expected unknown"),
        }
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(matches!(
            parse_command("not json at all"),
            ParsedCommand::InvalidJson
        ));
    }

    #[test]
    fn test_parse_unknown_type() {
        match parse_command(r#"{"type":"make_coffee"}"#) {
            ParsedCommand::Unknown(t) => assert_eq!(t, "make_coffee"),
            _ => panic!("expected unknown"),
        }
    }

    #[test]
    fn test_event_carries_timestamp() {
        let message = ServerEvent::Pong.to_message().unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["type"], "pong");
        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(timestamp.contains('T'));
        assert!(timestamp.ends_with('Z'));
    }

    #[test]
    fn test_event_strips_nulls() {
        let message = ServerEvent::ChatComplete {
            result: ChatResult {
                content: "done".to_string(),
                status: "complete".to_string(),
                reason: None,
            },
        }
        .to_message()
        .unwrap();
        assert!(!message.contains("null"));
        assert!(!message.contains("reason"));
    }

    #[test]
    fn test_tool_call_start_batches_calls() {
        let message = ServerEvent::ToolCallStart {
            tool_calls: vec![
                ToolCallInfo {
                    id: "t1".to_string(),
                    name: "search_documentation".to_string(),
                    input: Some(serde_json::json!({"query": "wiggle"})),
                },
                ToolCallInfo {
                    id: "t2".to_string(),
                    name: "search_documentation".to_string(),
                    input: Some(serde_json::json!({"query": "loopOut"})),
                },
            ],
        }
        .to_message()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["type"], "tool_call_start");
        assert_eq!(value["toolCalls"].as_array().map(|a| a.len()), Some(2));
        assert_eq!(value["toolCalls"][0]["id"], "t1");
        assert_eq!(value["toolCalls"][1]["input"]["query"], "loopOut");
    }

    #[test]
    fn test_tool_call_complete_carries_result() {
        let message = ServerEvent::ToolCallComplete {
            tool_call: ToolCallInfo {
                id: "t1".to_string(),
                name: "search_documentation".to_string(),
                input: None,
            },
            result: ToolCallOutcome {
                success: false,
                content: "Documentation search failed: search service timed out".to_string(),
                from_cache: false,
            },
        }
        .to_message()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["type"], "tool_call_complete");
        assert_eq!(value["toolCall"]["id"], "t1");
        assert_eq!(value["result"]["success"], false);
        assert_eq!(value["result"]["fromCache"], false);
        assert!(value["result"]["content"]
            .as_str()
            .is_some_and(|c| c.contains("timed out")));
    }

    #[test]
    fn test_error_event_field_name() {
        let message = ServerEvent::Error {
            error: "Invalid JSON format".to_string(),
        }
        .to_message()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], "Invalid JSON format");
    }

    #[test]
    fn test_content_delta_shape() {
        let message = ServerEvent::ContentDelta {
            delta: "mo".to_string(),
            content: "a demo".to_string(),
        }
        .to_message()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["type"], "content_delta");
        assert_eq!(value["delta"], "mo");
        assert_eq!(value["content"], "a demo");
    }
}
