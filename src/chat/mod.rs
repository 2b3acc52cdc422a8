// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Turn execution

pub mod engine;
pub mod streaming;

pub use engine::{TurnEngine, TurnEvent, TurnEventSender, TurnOutcome, TurnStatus, SEARCH_TOOL};
pub use streaming::StreamAccumulator;
