// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Per-connection session state

use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::llm::message::{Conversation, WireMessage};
use crate::retrieval::QueryCache;

const CHAT_SYSTEM_PROMPT: &str = "You are an expert assistant for Adobe After Effects scripting \
     and expressions. When a question needs factual documentation details, search the \
     documentation before answering, and cite which files your answer came from.";

/// State tied to one WebSocket connection
///
/// The conversation and the query cache live for the lifetime of the
/// connection. The cache carries across chat turns and agent tasks, so a
/// query repeated anywhere in the session hits the same entry.
pub struct Session {
    pub id: Uuid,
    pub conversation: Conversation,
    pub cache: QueryCache,
    pub default_model: String,
}

impl Session {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation: Conversation::with_system(CHAT_SYSTEM_PROMPT),
            cache: QueryCache::new(),
            default_model: default_model.into(),
        }
    }

    /// Replace the conversation with client-provided history
    pub fn replace_history(&mut self, history: &[WireMessage]) {
        let mut conversation = Conversation::from_wire(history);
        conversation.set_system(CHAT_SYSTEM_PROMPT);
        self.conversation = conversation;
    }

    /// Pick the model for a command, falling back to the session default
    pub fn resolve_model(&self, requested: Option<String>) -> String {
        requested
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.default_model.clone())
    }
}

/// Tracks live sessions across all connections
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session; returns the number now active
    pub fn register(&self, id: Uuid, peer: impl Into<String>) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(id, peer.into());
        sessions.len()
    }

    /// Remove a session; returns the number still active
    pub fn unregister(&self, id: &Uuid) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(id);
        sessions.len()
    }

    pub fn count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_prefers_request() {
        let session = Session::new("claude-3-5-sonnet-20241022");
        assert_eq!(
            session.resolve_model(Some("gemini-2.0-flash".to_string())),
            "gemini-2.0-flash"
        );
        assert_eq!(
            session.resolve_model(Some("  ".to_string())),
            "claude-3-5-sonnet-20241022"
        );
        assert_eq!(session.resolve_model(None), "claude-3-5-sonnet-20241022");
    }

    #[test]
    fn test_replace_history_keeps_system_prompt() {
        let mut session = Session::new("claude-3-5-sonnet-20241022");
        session.replace_history(&[WireMessage {
            role: crate::llm::message::Role::User,
            content: "earlier question".to_string(),
        }]);
        assert_eq!(session.conversation.len(), 1);
        assert!(session.conversation.system_prompt.is_some());
    }

    #[test]
    fn test_registry_tracks_active_sessions() {
        let registry = SessionRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(registry.register(a, "127.0.0.1:50000"), 1);
        assert_eq!(registry.register(b, "127.0.0.1:50001"), 2);
        assert_eq!(registry.unregister(&a), 1);
        assert_eq!(registry.count(), 1);
    }
}
