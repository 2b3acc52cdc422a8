// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider implementations for supported LLM APIs

pub mod anthropic;
pub mod gemini;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
