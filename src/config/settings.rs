// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for aegis
//!
//! Handles loading and saving settings from ~/.aegis/settings.json

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AegisError, Result};

/// Main settings structure, stored in ~/.aegis/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// LLM provider configurations
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Documentation retrieval service configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Orchestration limits (iteration caps, concurrency, budgets)
    #[serde(default)]
    pub limits: LimitsConfig,

    /// WebSocket server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Configuration for LLM providers
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Anthropic Claude configuration
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    /// Google Gemini configuration
    #[serde(default)]
    pub gemini: GeminiConfig,
}

/// Anthropic-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_anthropic_api_key_env")]
    pub api_key_env: String,

    /// Default model to use
    #[serde(default = "default_anthropic_model")]
    pub default_model: String,

    /// Base URL for API (for custom endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Gemini-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_gemini_api_key_env")]
    pub api_key_env: String,

    /// Default model to use
    #[serde(default = "default_gemini_model")]
    pub default_model: String,

    /// Base URL for API (for custom endpoints)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Documentation retrieval service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Base URL of the search service
    #[serde(default = "default_retrieval_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum results a single search may request
    #[serde(default = "default_max_top_k")]
    pub max_top_k: u32,

    /// Character budget for result content handed to the model
    #[serde(default = "default_content_char_budget")]
    pub content_char_budget: usize,
}

/// Orchestration limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum model/tool round-trips within one turn
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// Maximum tool calls executing concurrently within one turn
    #[serde(default = "default_tool_concurrency")]
    pub tool_concurrency: usize,

    /// Default iteration cap for autonomous tasks
    #[serde(default = "default_max_agent_iterations")]
    pub max_agent_iterations: u32,

    /// Provider request timeout in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Maximum retries for rate-limited provider requests
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Maximum tokens for a model response
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,
}

/// WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Keepalive ping interval in seconds
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// How long to wait for a pong before closing the connection
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
}

fn default_anthropic_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_gemini_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_retrieval_url() -> String {
    "http://127.0.0.1:5002".to_string()
}

fn default_retrieval_timeout_secs() -> u64 {
    10
}

fn default_max_top_k() -> u32 {
    10
}

fn default_content_char_budget() -> usize {
    8_000
}

fn default_max_tool_iterations() -> u32 {
    8
}

fn default_tool_concurrency() -> usize {
    4
}

fn default_max_agent_iterations() -> u32 {
    10
}

fn default_provider_timeout_secs() -> u64 {
    120
}

fn default_max_rate_limit_retries() -> u32 {
    2
}

fn default_max_response_tokens() -> u32 {
    8192
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_ping_timeout_secs() -> u64 {
    10
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_anthropic_api_key_env(),
            default_model: default_anthropic_model(),
            base_url: None,
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_gemini_api_key_env(),
            default_model: default_gemini_model(),
            base_url: None,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: default_retrieval_url(),
            timeout_secs: default_retrieval_timeout_secs(),
            max_top_k: default_max_top_k(),
            content_char_budget: default_content_char_budget(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            tool_concurrency: default_tool_concurrency(),
            max_agent_iterations: default_max_agent_iterations(),
            provider_timeout_secs: default_provider_timeout_secs(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            max_response_tokens: default_max_response_tokens(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
        }
    }
}

impl Settings {
    /// Path to the settings file (~/.aegis/settings.json)
    pub fn settings_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".aegis")
            .join("settings.json")
    }

    /// Load settings from the default path, falling back to defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::settings_path())
    }

    /// Load settings from a specific path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&contents)
            .map_err(|e| AegisError::Config(format!("invalid settings file: {}", e)))?;
        Ok(settings)
    }

    /// Save settings to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path())
    }

    /// Save settings to a specific path, creating parent directories
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Resolve the Anthropic API key (direct value, then env var)
    pub fn anthropic_api_key(&self) -> Option<String> {
        self.providers
            .anthropic
            .api_key
            .clone()
            .or_else(|| std::env::var(&self.providers.anthropic.api_key_env).ok())
            .filter(|k| !k.is_empty())
    }

    /// Resolve the Gemini API key (direct value, then env var)
    pub fn gemini_api_key(&self) -> Option<String> {
        self.providers
            .gemini
            .api_key
            .clone()
            .or_else(|| std::env::var(&self.providers.gemini.api_key_env).ok())
            .filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 3001);
        assert_eq!(settings.limits.tool_concurrency, 4);
        assert_eq!(settings.retrieval.base_url, "http://127.0.0.1:5002");
        assert!(settings.providers.anthropic.default_model.contains("claude"));
        assert!(settings.providers.gemini.default_model.contains("gemini"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nope.json");
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.server.port, 3001);
    }

    #[test]
    fn test_load_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 4001}}"#).unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.server.port, 4001);
        // Everything else falls back to defaults
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.limits.max_tool_iterations, 8);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = Settings::load_from(&path);
        assert!(result.is_err());
    }

    #[test]
    fn test_api_key_from_direct_value() {
        let mut settings = Settings::default();
        settings.providers.anthropic.api_key = Some("sk-test".to_string());
        assert_eq!(settings.anthropic_api_key(), Some("sk-test".to_string()));
    }

    #[test]
    fn test_api_key_missing() {
        let mut settings = Settings::default();
        settings.providers.gemini.api_key = None;
        settings.providers.gemini.api_key_env = "AEGIS_NONEXISTENT_VAR_98765".to_string();
        assert!(settings.gemini_api_key().is_none());
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.server.port = 4010;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.server.port, 4010);
        assert_eq!(loaded.server.ping_timeout_secs, 10);
    }

    #[test]
    fn test_roundtrip_serialization() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.server.port, settings.server.port);
        assert_eq!(
            parsed.retrieval.content_char_budget,
            settings.retrieval.content_char_budget
        );
    }
}
