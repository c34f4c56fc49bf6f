//! Role prompts and structured-output schemas.
//!
//! Prompts are data; policy (thresholds, budgets, retries) lives in the
//! task engine's configuration.

use serde_json::{json, Value};

use crate::domain::models::plan::PlanStep;
use crate::domain::models::task::AgentRole;
use crate::domain::models::Task;

pub const PLANNER_SYSTEM: &str = "\
You are the planning agent of an autonomous engineering orchestrator. \
Decompose the user's request into the smallest reasonable sequence of steps. \
Assign each step to one role: coder_be, coder_fe, coder_infra, or docs. \
Steps that create new files must go to a coder role; docs steps may only \
edit files that already exist. Declare every file each step will touch, \
express ordering with depends_on (indices of earlier steps only), and be \
honest in your confidence estimate.";

pub const CODER_SYSTEM: &str = "\
You are a coding agent. Implement exactly the step you are given using the \
available tools. Read before you write. Touch every file the step declares, \
and nothing outside the repository. When you are done, reply with a JSON \
object: {\"title\", \"subtitle\", \"reasoning\", \"confidence\"}.";

pub const QA_SYSTEM: &str = "\
You are a QA agent. Discover how this repository runs its tests, run them \
with run_command, and report the outcome. Distinguish carefully between \
passing tests, failing tests, and a run that collected no tests at all. \
When you are done, reply with a JSON object: {\"title\", \"subtitle\", \
\"reasoning\", \"confidence\"}.";

pub const DOCS_SYSTEM: &str = "\
You are a documentation agent. Update existing documentation to reflect the \
change that was just made. You may only edit files that already exist. When \
you are done, reply with a JSON object: {\"title\", \"subtitle\", \
\"reasoning\", \"confidence\"}.";

pub fn system_for(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Planner => PLANNER_SYSTEM,
        AgentRole::CoderBe | AgentRole::CoderFe | AgentRole::CoderInfra => CODER_SYSTEM,
        AgentRole::Qa => QA_SYSTEM,
        AgentRole::Docs => DOCS_SYSTEM,
    }
}

/// Schema for the planner's structured output: a plan plus confidence.
pub fn plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "index": { "type": "integer", "minimum": 0 },
                        "description": { "type": "string" },
                        "role": {
                            "type": "string",
                            "enum": ["coder_be", "coder_fe", "coder_infra", "docs"]
                        },
                        "files": { "type": "array", "items": { "type": "string" } },
                        "depends_on": { "type": "array", "items": { "type": "integer" } }
                    },
                    "required": ["index", "description", "role", "files"]
                }
            },
            "estimated_complexity": { "type": "integer", "minimum": 1, "maximum": 10 },
            "affected_files": { "type": "array", "items": { "type": "string" } },
            "risks": { "type": "array", "items": { "type": "string" } },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
        },
        "required": ["summary", "steps", "estimated_complexity", "confidence"]
    })
}

pub fn plan_prompt(task: &Task, file_listing: &str) -> String {
    format!(
        "Request:\n{}\n\nRepository files:\n{}\n\nProduce the plan.",
        task.user_request, file_listing
    )
}

pub fn step_prompt(task: &Task, step: &PlanStep) -> String {
    let summary = task
        .plan
        .as_ref()
        .map_or("", |p| p.summary.as_str());
    format!(
        "Overall request:\n{}\n\nPlan summary: {}\n\nYour step (#{}): {}\n\nDeclared files:\n{}",
        task.user_request,
        summary,
        step.index,
        step.description,
        step.files.join("\n")
    )
}

pub fn residual_prompt(step: &PlanStep, missing: &[String]) -> String {
    format!(
        "Your step (#{}) declared files that have not been touched yet:\n{}\n\n\
         Finish the step by producing verified writes to each of them.",
        step.index,
        missing.join("\n")
    )
}

pub fn qa_prompt(task: &Task) -> String {
    format!(
        "The following request was just implemented:\n{}\n\n\
         Run the repository's test suite and report the result.",
        task.user_request
    )
}

pub fn docs_prompt(task: &Task) -> String {
    format!(
        "The following request was just implemented and tested:\n{}\n\n\
         Update any existing documentation that the change makes stale. If \
         nothing applies, say so and finish.",
        task.user_request
    )
}

/// Request text for a fix child spawned on test failure.
pub fn fix_request(task: &Task, failure_summary: &str) -> String {
    format!(
        "Tests are failing after implementing:\n{}\n\nFailure output:\n{}\n\n\
         Fix the code so the tests pass.",
        task.user_request, failure_summary
    )
}

/// Request text for a write-tests child spawned when no tests were collected.
pub fn write_tests_request(task: &Task) -> String {
    format!(
        "The test run collected no tests for this change:\n{}\n\n\
         Write tests that cover the change, using the repository's existing \
         test conventions.",
        task.user_request
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_system_prompt_per_role() {
        assert!(system_for(AgentRole::Planner).contains("planning"));
        assert_eq!(system_for(AgentRole::CoderBe), system_for(AgentRole::CoderFe));
        assert!(system_for(AgentRole::Qa).contains("QA"));
        assert!(system_for(AgentRole::Docs).contains("documentation"));
    }

    #[test]
    fn test_plan_schema_is_object() {
        let schema = plan_schema();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["steps"].is_object());
    }

    #[test]
    fn test_fix_request_embeds_failure() {
        let task = Task::new(Uuid::new_v4(), "Add endpoint", Utc::now());
        let request = fix_request(&task, "assert failed: left != right");
        assert!(request.contains("Add endpoint"));
        assert!(request.contains("left != right"));
    }
}
