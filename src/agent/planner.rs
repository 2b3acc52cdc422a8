// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Planning and evaluation prompts
//!
//! The planner and evaluator are ordinary model calls without tools. Their
//! replies are parsed leniently: a plan is whatever numbered or bulleted
//! lines the model produced, and a verdict is the first decision keyword
//! that appears in the reply.

use crate::agent::types::{EvaluationDecision, Plan, PlanStep, StepStatus};

const MAX_PLAN_STEPS: usize = 8;

/// Build the prompt asking the model to plan a task
pub fn plan_prompt(task: &str) -> String {
    format!(
        "Break the following task into a short sequence of concrete steps. \
         Reply with a numbered list only, one step per line, at most {} steps. \
         Each step should be something achievable with documentation research \
         and reasoning.\n\nTask: {}",
        MAX_PLAN_STEPS, task
    )
}

/// Parse a plan out of a model reply
///
/// Accepts `1.`, `1)`, `-`, and `*` prefixes. Anything that is not a list
/// line is ignored. An empty parse falls back to a single step that is the
/// task itself, so a rambling planner cannot stall the run.
pub fn parse_plan(task: &str, reply: &str) -> Plan {
    let mut descriptions: Vec<String> = reply
        .lines()
        .filter_map(parse_step_line)
        .take(MAX_PLAN_STEPS)
        .collect();

    if descriptions.is_empty() {
        descriptions.push(task.to_string());
    }
    Plan::new(task, descriptions)
}

fn parse_step_line(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let rest = if let Some(rest) = trimmed.strip_prefix('-').or_else(|| trimmed.strip_prefix('*'))
    {
        rest
    } else {
        let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }
        let after = &trimmed[digits..];
        after.strip_prefix('.').or_else(|| after.strip_prefix(')'))?
    };

    let step = rest.trim();
    if step.is_empty() {
        None
    } else {
        Some(step.to_string())
    }
}

/// Build the prompt for executing one step
pub fn step_prompt(plan: &Plan, step: &PlanStep, prior_queries: &[String]) -> String {
    let mut prompt = format!(
        "You are working through a task step by step.\n\nTask: {}\n\nPlan:\n",
        plan.task
    );
    for s in &plan.steps {
        let marker = match s.status {
            StepStatus::Complete => "[done]",
            StepStatus::Failed => "[failed]",
            StepStatus::Active => "[now]",
            StepStatus::Pending => "[ ]",
        };
        prompt.push_str(&format!("{} {}. {}\n", marker, s.index, s.description));
    }

    for s in &plan.steps {
        if let Some(result) = &s.result {
            prompt.push_str(&format!("\nResult of step {}: {}\n", s.index, result));
        }
    }

    if !prior_queries.is_empty() {
        prompt.push_str(
            "\nDocumentation already searched for (do not repeat these queries):\n",
        );
        for query in prior_queries {
            prompt.push_str(&format!("- {}\n", query));
        }
    }

    prompt.push_str(&format!(
        "\nNow carry out step {}: {}",
        step.index, step.description
    ));
    prompt
}

/// Build the prompt asking whether to continue, replan, or stop
pub fn evaluation_prompt(plan: &Plan, last_step: &PlanStep) -> String {
    format!(
        "Task: {}\n\nStep just finished ({} of {}): {}\nIts result: {}\n\n\
         Completed steps so far: {}.\n\
         Decide what to do next. Reply with exactly one word on the first \
         line: CONTINUE to run the next planned step, REPLAN if the plan no \
         longer fits what was learned, or STOP if the task is already \
         satisfied. You may add a short justification after it.",
        plan.task,
        last_step.index,
        plan.steps.len(),
        last_step.description,
        last_step.result.as_deref().unwrap_or("(no output)"),
        plan.completed_count(),
    )
}

/// Parse the evaluator's reply
///
/// Picks whichever decision keyword appears first. A reply with no keyword
/// means the evaluator waffled, and the run keeps going.
pub fn parse_decision(reply: &str) -> EvaluationDecision {
    let lower = reply.to_lowercase();
    let candidates = [
        (lower.find("continue"), EvaluationDecision::Continue),
        (lower.find("replan"), EvaluationDecision::Replan),
        (lower.find("stop"), EvaluationDecision::Stop),
    ];
    candidates
        .into_iter()
        .filter_map(|(pos, decision)| pos.map(|p| (p, decision)))
        .min_by_key(|(p, _)| *p)
        .map(|(_, decision)| decision)
        .unwrap_or(EvaluationDecision::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_numbered() {
        let plan = parse_plan(
            "learn expressions",
            "Here is my plan:\n1. Search for expression basics\n2) Study the wiggle function\n\nDone.",
        );
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].description, "Search for expression basics");
        assert_eq!(plan.steps[1].description, "Study the wiggle function");
    }

    #[test]
    fn test_parse_plan_bulleted() {
        let plan = parse_plan("t", "- first\n* second");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].description, "second");
    }

    #[test]
    fn test_parse_plan_empty_falls_back_to_task() {
        let plan = parse_plan("summarize the masking docs", "I cannot make a plan.");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].description, "summarize the masking docs");
    }

    #[test]
    fn test_parse_plan_caps_step_count() {
        let reply = (1..=20)
            .map(|i| format!("{}. step {}", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(parse_plan("t", &reply).steps.len(), MAX_PLAN_STEPS);
    }

    #[test]
    fn test_parse_decision_keywords() {
        assert_eq!(parse_decision("CONTINUE"), EvaluationDecision::Continue);
        assert_eq!(
            parse_decision("Replan: the docs changed my mind"),
            EvaluationDecision::Replan
        );
        assert_eq!(
            parse_decision("stop, the answer is complete"),
            EvaluationDecision::Stop
        );
    }

    #[test]
    fn test_parse_decision_first_keyword_wins() {
        assert_eq!(
            parse_decision("Continue; do not stop yet"),
            EvaluationDecision::Continue
        );
    }

    #[test]
    fn test_parse_decision_defaults_to_continue() {
        assert_eq!(
            parse_decision("the step went fine"),
            EvaluationDecision::Continue
        );
    }

    #[test]
    fn test_step_prompt_carries_prior_queries() {
        let plan = Plan::new("t", vec!["research".to_string()]);
        let prompt = step_prompt(
            &plan,
            &plan.steps[0],
            &["wiggle expression".to_string()],
        );
        assert!(prompt.contains("do not repeat"));
        assert!(prompt.contains("- wiggle expression"));
    }
}
