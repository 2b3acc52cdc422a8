// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Agent task types

use serde::{Deserialize, Serialize};

/// A plan for an autonomous task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub task: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(task: impl Into<String>, descriptions: Vec<String>) -> Self {
        Self {
            task: task.into(),
            steps: descriptions
                .into_iter()
                .enumerate()
                .map(|(i, description)| PlanStep {
                    index: i + 1,
                    description,
                    status: StepStatus::Pending,
                    result: None,
                })
                .collect(),
        }
    }

    pub fn next_pending(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.status == StepStatus::Pending)
    }

    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Complete)
            .count()
    }

    pub fn all_done(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Complete | StepStatus::Failed))
    }
}

/// One step of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: usize,
    pub description: String,
    pub status: StepStatus,
    /// Condensed result once the step has run
    pub result: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Active,
    Complete,
    Failed,
}

/// The evaluator's verdict after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationDecision {
    Continue,
    Replan,
    Stop,
}

/// Terminal status of an autonomous task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Every planned step ran, or the evaluator declared the task done
    Done,
    /// The iteration budget ran out with work remaining
    Partial,
    /// A step failed terminally
    Failed,
}

/// Final report for an autonomous task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub status: TaskStatus,
    pub summary: String,
    pub plan: Plan,
    pub iterations_used: u32,
    /// Why the task ended early, for `Partial` and `Failed`
    pub reason: Option<String>,
}

/// Progress events emitted while an autonomous task runs
#[derive(Debug, Clone)]
pub enum AgentEvent {
    PlanCreated {
        plan: Plan,
    },
    StepStarted {
        index: usize,
        description: String,
    },
    StepCompleted {
        index: usize,
        description: String,
        success: bool,
        summary: String,
    },
    EvaluationComplete {
        decision: EvaluationDecision,
        reasoning: String,
    },
    TaskComplete {
        report: TaskReport,
    },
}
