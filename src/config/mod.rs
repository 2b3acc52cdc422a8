// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Configuration management

pub mod settings;

pub use settings::{LimitsConfig, RetrievalConfig, ServerConfig, Settings};
