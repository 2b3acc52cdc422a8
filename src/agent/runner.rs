// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Autonomous task runner
//!
//! Plan, execute, evaluate. The runner asks the model for a plan, walks the
//! steps through the turn engine, and after each step asks the model
//! whether to continue, replan, or stop. Executed steps and replans both
//! consume the iteration budget; running out of budget ends the task as
//! partial rather than looping forever.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::agent::planner;
use crate::agent::types::{
    AgentEvent, EvaluationDecision, Plan, PlanStep, StepStatus, TaskReport, TaskStatus,
};
use crate::chat::{TurnEngine, TurnEventSender, TurnStatus};
use crate::config::Settings;
use crate::error::Result;
use crate::llm::message::{ContentBlock, Conversation, Message, MessageContent};
use crate::retrieval::QueryCache;

const AGENT_SYSTEM_PROMPT: &str = "You are an autonomous research agent for Adobe After Effects \
     scripting and expressions. Use the documentation search tool when a step needs facts, \
     and keep your answers grounded in what the documentation says.";

const STEP_RESULT_LIMIT: usize = 600;

pub type AgentEventSender = mpsc::UnboundedSender<AgentEvent>;

/// Runs autonomous tasks against a turn engine
pub struct AgentRunner {
    engine: Arc<TurnEngine>,
    default_max_iterations: u32,
}

impl AgentRunner {
    pub fn new(engine: Arc<TurnEngine>, settings: &Settings) -> Self {
        Self {
            engine,
            default_max_iterations: settings.limits.max_agent_iterations,
        }
    }

    /// Run a task to completion
    ///
    /// Always resolves to a report; provider failures during a step become
    /// a `Failed` report instead of an error, so the caller can deliver a
    /// terminal event either way.
    pub async fn run(
        &self,
        task: &str,
        model: &str,
        max_iterations: Option<u32>,
        cache: &mut QueryCache,
        agent_events: Option<&AgentEventSender>,
        turn_events: Option<&TurnEventSender>,
    ) -> Result<TaskReport> {
        let budget = max_iterations.unwrap_or(self.default_max_iterations).max(1);
        let mut iterations = 0u32;
        let mut prior_queries: Vec<String> = Vec::new();

        let mut plan = match self.make_plan(task, model, &[]).await {
            Ok(plan) => plan,
            Err(e) => {
                let report = TaskReport {
                    status: TaskStatus::Failed,
                    summary: String::new(),
                    plan: Plan::new(task, vec![]),
                    iterations_used: 0,
                    reason: Some(format!("planning failed: {}", e)),
                };
                emit(agent_events, AgentEvent::TaskComplete {
                    report: report.clone(),
                });
                return Ok(report);
            }
        };
        info!(task, steps = plan.steps.len(), "plan created");
        emit(agent_events, AgentEvent::PlanCreated { plan: plan.clone() });

        loop {
            let Some(idx) = plan.next_pending() else {
                return Ok(self.finish(plan, iterations, TaskStatus::Done, None, agent_events));
            };
            if iterations >= budget {
                return Ok(self.finish(
                    plan,
                    iterations,
                    TaskStatus::Partial,
                    Some("max iterations reached".to_string()),
                    agent_events,
                ));
            }
            iterations += 1;

            plan.steps[idx].status = StepStatus::Active;
            emit(agent_events, AgentEvent::StepStarted {
                index: plan.steps[idx].index,
                description: plan.steps[idx].description.clone(),
            });

            let mut conversation = Conversation::with_system(AGENT_SYSTEM_PROMPT);
            conversation.push(Message::user(planner::step_prompt(
                &plan,
                &plan.steps[idx],
                &prior_queries,
            )));

            let outcome = match self
                .engine
                .run_turn(model, &mut conversation, cache, turn_events)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    plan.steps[idx].status = StepStatus::Failed;
                    return Ok(self.finish(
                        plan,
                        iterations,
                        TaskStatus::Failed,
                        Some(format!("step failed: {}", e)),
                        agent_events,
                    ));
                }
            };

            collect_queries(&conversation, &mut prior_queries);

            let success = outcome.status == TurnStatus::Complete;
            let summary = condense(&outcome.content);
            plan.steps[idx].status = if success {
                StepStatus::Complete
            } else {
                StepStatus::Failed
            };
            plan.steps[idx].result = Some(summary.clone());
            emit(agent_events, AgentEvent::StepCompleted {
                index: plan.steps[idx].index,
                description: plan.steps[idx].description.clone(),
                success,
                summary,
            });

            if plan.next_pending().is_none() {
                continue;
            }

            let last_step = plan.steps[idx].clone();
            let decision = self.evaluate(model, &plan, &last_step, agent_events).await;
            match decision {
                EvaluationDecision::Continue => {}
                EvaluationDecision::Stop => {
                    return Ok(self.finish(plan, iterations, TaskStatus::Done, None, agent_events));
                }
                EvaluationDecision::Replan => {
                    if iterations >= budget {
                        return Ok(self.finish(
                            plan,
                            iterations,
                            TaskStatus::Partial,
                            Some("max iterations reached".to_string()),
                            agent_events,
                        ));
                    }
                    iterations += 1;
                    match self.make_plan(task, model, &plan.steps).await {
                        Ok(new_plan) => {
                            plan = merge_replan(plan, new_plan);
                            info!(steps = plan.steps.len(), "replanned");
                            emit(agent_events, AgentEvent::PlanCreated { plan: plan.clone() });
                        }
                        Err(e) => {
                            warn!(error = %e, "replan failed, keeping current plan");
                        }
                    }
                }
            }
        }
    }

    async fn make_plan(&self, task: &str, model: &str, done: &[PlanStep]) -> Result<Plan> {
        let mut prompt = planner::plan_prompt(task);
        if !done.is_empty() {
            prompt.push_str("\n\nAlready completed:\n");
            for step in done.iter().filter(|s| s.status == StepStatus::Complete) {
                prompt.push_str(&format!("- {}\n", step.description));
            }
            prompt.push_str("Plan only the remaining work.");
        }

        let mut conversation = Conversation::new();
        conversation.push(Message::user(prompt));
        let outcome = self.engine.run_plain_turn(model, &mut conversation).await?;
        Ok(planner::parse_plan(task, &outcome.content))
    }

    /// Ask the evaluator for a verdict; a failed evaluation call defaults
    /// to continuing so one flaky call cannot end the task.
    async fn evaluate(
        &self,
        model: &str,
        plan: &Plan,
        last_step: &PlanStep,
        agent_events: Option<&AgentEventSender>,
    ) -> EvaluationDecision {
        let mut conversation = Conversation::new();
        conversation.push(Message::user(planner::evaluation_prompt(plan, last_step)));

        let (decision, reasoning) =
            match self.engine.run_plain_turn(model, &mut conversation).await {
                Ok(outcome) => (planner::parse_decision(&outcome.content), outcome.content),
                Err(e) => {
                    warn!(error = %e, "evaluation call failed, continuing");
                    (
                        EvaluationDecision::Continue,
                        format!("evaluation unavailable: {}", e),
                    )
                }
            };

        emit(agent_events, AgentEvent::EvaluationComplete {
            decision,
            reasoning,
        });
        decision
    }

    fn finish(
        &self,
        plan: Plan,
        iterations: u32,
        status: TaskStatus,
        reason: Option<String>,
        agent_events: Option<&AgentEventSender>,
    ) -> TaskReport {
        let summary = plan
            .steps
            .iter()
            .rev()
            .find_map(|s| s.result.clone())
            .unwrap_or_default();
        let report = TaskReport {
            status,
            summary,
            plan,
            iterations_used: iterations,
            reason,
        };
        info!(?status, iterations, "task finished");
        emit(agent_events, AgentEvent::TaskComplete {
            report: report.clone(),
        });
        report
    }
}

fn emit(sender: Option<&AgentEventSender>, event: AgentEvent) {
    if let Some(sender) = sender {
        let _ = sender.send(event);
    }
}

/// Keep a step result short enough to sit in later prompts
fn condense(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= STEP_RESULT_LIMIT {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(STEP_RESULT_LIMIT).collect();
    format!("{}…", cut)
}

/// Pull search queries out of a step's conversation for anti-repetition
fn collect_queries(conversation: &Conversation, prior_queries: &mut Vec<String>) {
    for message in conversation.messages() {
        if let MessageContent::Blocks(blocks) = &message.content {
            for block in blocks {
                if let ContentBlock::ToolUse { input, .. } = block {
                    if let Some(query) = input.get("query").and_then(|v| v.as_str()) {
                        let query = query.trim().to_string();
                        if !query.is_empty() && !prior_queries.contains(&query) {
                            prior_queries.push(query);
                        }
                    }
                }
            }
        }
    }
}

/// Carry finished steps over and append the new pending ones, reindexed
fn merge_replan(old: Plan, new: Plan) -> Plan {
    let mut steps: Vec<PlanStep> = old
        .steps
        .into_iter()
        .filter(|s| matches!(s.status, StepStatus::Complete | StepStatus::Failed))
        .collect();
    steps.extend(new.steps);
    for (i, step) in steps.iter_mut().enumerate() {
        step.index = i + 1;
    }
    Plan {
        task: new.task,
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condense_truncates_long_results() {
        let condensed = condense(&"x".repeat(2000));
        assert!(condensed.chars().count() <= STEP_RESULT_LIMIT + 1);
        assert!(condensed.ends_with('…'));
    }

    #[test]
    fn test_condense_keeps_short_results() {
        assert_eq!(condense("  short  "), "short");
    }

    #[test]
    fn test_merge_replan_keeps_finished_steps() {
        let mut old = Plan::new("t", vec!["a".to_string(), "b".to_string()]);
        old.steps[0].status = StepStatus::Complete;
        old.steps[0].result = Some("done a".to_string());

        let new = Plan::new("t", vec!["c".to_string()]);
        let merged = merge_replan(old, new);

        assert_eq!(merged.steps.len(), 2);
        assert_eq!(merged.steps[0].description, "a");
        assert_eq!(merged.steps[0].status, StepStatus::Complete);
        assert_eq!(merged.steps[1].description, "c");
        assert_eq!(merged.steps[1].index, 2);
        assert_eq!(merged.next_pending(), Some(1));
    }

    #[test]
    fn test_collect_queries_dedupes() {
        let mut conversation = Conversation::new();
        conversation.push(Message::assistant_blocks(vec![
            ContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "search_documentation".to_string(),
                input: serde_json::json!({"query": "wiggle"}),
            },
            ContentBlock::ToolUse {
                id: "t2".to_string(),
                name: "search_documentation".to_string(),
                input: serde_json::json!({"query": "wiggle"}),
            },
        ]));

        let mut queries = Vec::new();
        collect_queries(&conversation, &mut queries);
        assert_eq!(queries, vec!["wiggle".to_string()]);
    }
}
