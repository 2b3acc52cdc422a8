// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Autonomous agent mode

pub mod planner;
pub mod runner;
pub mod types;

pub use runner::{AgentEventSender, AgentRunner};
pub use types::{
    AgentEvent, EvaluationDecision, Plan, PlanStep, StepStatus, TaskReport, TaskStatus,
};
