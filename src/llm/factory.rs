// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider factory
//!
//! Routes a model identifier to the provider that serves it and fails fast
//! with an actionable message when the credential for that provider is not
//! configured.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::error::{AegisError, Result};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::{AnthropicProvider, GeminiProvider};

/// Creates providers from configuration based on the requested model
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create the provider that serves `model`
    ///
    /// Model routing is prefix based: `claude*` goes to Anthropic and
    /// `gemini*` goes to Gemini. Anything else is rejected up front so a
    /// typo never reaches the network.
    pub fn create(model: &str, settings: &Settings) -> Result<Arc<dyn LlmProvider>> {
        let timeout = Duration::from_secs(settings.limits.provider_timeout_secs);

        if model.starts_with("claude") {
            let api_key = settings.anthropic_api_key().ok_or_else(|| {
                AegisError::Config(
                    "Anthropic API key not configured. Set the ANTHROPIC_API_KEY environment \
                     variable or add providers.anthropic.api_key to settings.json"
                        .to_string(),
                )
            })?;
            let provider = match &settings.providers.anthropic.base_url {
                Some(url) => AnthropicProvider::with_base_url(api_key, url),
                None => AnthropicProvider::new(api_key),
            };
            return Ok(Arc::new(provider.with_timeout(timeout)));
        }

        if model.starts_with("gemini") {
            let api_key = settings.gemini_api_key().ok_or_else(|| {
                AegisError::Config(
                    "Gemini API key not configured. Set the GEMINI_API_KEY environment \
                     variable or add providers.gemini.api_key to settings.json"
                        .to_string(),
                )
            })?;
            let provider = match &settings.providers.gemini.base_url {
                Some(url) => GeminiProvider::with_base_url(api_key, url),
                None => GeminiProvider::new(api_key),
            };
            return Ok(Arc::new(provider.with_timeout(timeout)));
        }

        Err(AegisError::Config(format!(
            "unsupported model '{}': expected a claude-* or gemini-* model",
            model
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::Settings;

    fn settings_with_keys() -> Settings {
        let mut settings = Settings::default();
        settings.providers.anthropic.api_key = Some("sk-ant-test".to_string());
        settings.providers.gemini.api_key = Some("g-test".to_string());
        settings
    }

    #[test]
    fn test_routes_claude_to_anthropic() {
        let provider =
            ProviderFactory::create("claude-3-5-sonnet-20241022", &settings_with_keys()).unwrap();
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn test_routes_gemini_to_gemini() {
        let provider = ProviderFactory::create("gemini-2.0-flash", &settings_with_keys()).unwrap();
        assert_eq!(provider.name(), "gemini");
    }

    #[test]
    fn test_unknown_model_rejected() {
        let err = ProviderFactory::create("gpt-4o", &settings_with_keys()).unwrap_err();
        assert!(err.to_string().contains("unsupported model"));
    }

    #[test]
    fn test_missing_key_fails_fast() {
        let settings = Settings::default();
        if settings.anthropic_api_key().is_some() {
            // Ambient credentials in the environment, nothing to assert.
            return;
        }
        let err = ProviderFactory::create("claude-3-5-sonnet-20241022", &settings).unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }
}
