// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Aegis is a WebSocket backend for documentation-grounded AI chat about
//! Adobe After Effects scripting and expressions. It streams model output
//! to clients, runs documentation searches the model asks for with bounded
//! concurrency, and can drive multi-step autonomous research tasks.

pub mod agent;
pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod retrieval;
pub mod server;

pub use error::{AegisError, ApiError, Result};
