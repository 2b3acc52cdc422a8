// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM provider abstraction
//!
//! A single `LlmProvider` trait with per-API adapters behind it. Adapters
//! translate each provider's wire format into one normalized event stream
//! so the rest of the engine never sees provider-specific shapes.

pub mod factory;
pub mod message;
pub mod provider;
pub mod providers;
pub mod scripted;

pub use factory::ProviderFactory;
pub use message::{ContentBlock, Conversation, Message, MessageContent, Role, WireMessage};
pub use provider::{
    CompletionRequest, CompletionResponse, EventStream, LlmProvider, StopReason, StreamEvent,
    ToolCall, ToolDefinition, ToolInputSchema, Usage,
};
pub use scripted::{ScriptedProvider, ScriptedTurn};
