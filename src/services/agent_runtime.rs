//! Agent runtime: drives one role-specialized agent invocation.
//!
//! The loop asks the generative client for either a final result or a batch
//! of tool invocations, executes requested tools through the reality
//! verifier, feeds results back, and terminates on a final reply, iteration
//! exhaustion, or cancellation.

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::ErrorKind;
use crate::domain::models::config::{AgentConfig, ThresholdConfig, TimeoutConfig};
use crate::domain::models::plan::{Plan, PlanStep};
use crate::domain::models::task::AgentRole;
use crate::domain::models::{Task, ToolInvocation, ToolOutcome};
use crate::domain::ports::generative::{
    AgentReply, GenerativeClient, GenerativeError, StructuredRequest, ToolCallRequest, ToolChoice,
    ToolExchange,
};
use crate::services::prompts;
use crate::services::verifier::{RealityVerifier, VerifyContext};

/// Terminal status of an agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStatus {
    Completed,
    Failed { kind: ErrorKind, detail: String },
}

/// Structured outcome of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub status: AgentStatus,
    pub title: String,
    pub subtitle: String,
    pub reasoning: String,
    pub invocations: Vec<ToolInvocation>,
    pub confidence: f64,
    pub review_required: bool,
}

impl AgentOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == AgentStatus::Completed
    }

    pub fn failure(&self) -> Option<(ErrorKind, &str)> {
        match &self.status {
            AgentStatus::Completed => None,
            AgentStatus::Failed { kind, detail } => Some((*kind, detail.as_str())),
        }
    }
}

/// Semantic interpretation of a QA run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QaVerdict {
    Passed,
    Failed { summary: String },
    NoTestsExecuted,
}

/// Markers that mean "the runner found nothing to run" even with exit 0.
const NO_TESTS_MARKERS: &[&str] = &[
    "collected 0 items",
    "collected 0 tests",
    "no tests collected",
    "no tests ran",
    "running 0 tests",
    "no test files",
];

/// Interpret a test command's exit code and output.
pub fn parse_test_output(exit_code: i32, output: &str) -> QaVerdict {
    let lowered = output.to_lowercase();
    if exit_code == 0 {
        if NO_TESTS_MARKERS.iter().any(|m| lowered.contains(m)) {
            return QaVerdict::NoTestsExecuted;
        }
        return QaVerdict::Passed;
    }
    // Some runners also exit non-zero when nothing was collected.
    if NO_TESTS_MARKERS.iter().any(|m| lowered.contains(m)) {
        return QaVerdict::NoTestsExecuted;
    }
    QaVerdict::Failed {
        summary: tail(output, 2000),
    }
}

fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let start = text.len() - max;
    // Snap to a char boundary
    let start = (start..text.len())
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(start);
    text[start..].to_string()
}

pub struct AgentRuntime {
    client: Arc<dyn GenerativeClient>,
    verifier: Arc<RealityVerifier>,
    agent: AgentConfig,
    timeouts: TimeoutConfig,
    thresholds: ThresholdConfig,
}

impl AgentRuntime {
    pub fn new(
        client: Arc<dyn GenerativeClient>,
        verifier: Arc<RealityVerifier>,
        agent: AgentConfig,
        timeouts: TimeoutConfig,
        thresholds: ThresholdConfig,
    ) -> Self {
        Self {
            client,
            verifier,
            agent,
            timeouts,
            thresholds,
        }
    }

    /// Run the planner. Returns the outcome and, on success, a validated
    /// plan together with the planner's confidence.
    pub async fn plan(
        &self,
        task: &Task,
        repo_root: &Path,
        cancel: &CancellationToken,
    ) -> (AgentOutcome, Option<Plan>) {
        let mut listing = Vec::new();
        crate::services::repo_scan::collect_files(repo_root, repo_root, &mut listing);
        listing.sort();

        let request = StructuredRequest {
            system: prompts::system_for(AgentRole::Planner).to_string(),
            prompt: prompts::plan_prompt(task, &listing.join("\n")),
            schema: prompts::plan_schema(),
            temperature: self.agent.temperature,
            max_tokens: self.agent.max_tokens,
        };

        let limit = Duration::from_secs(self.timeouts.agent_iteration_secs);
        let value = match timeout(limit, self.client.structured(&request, cancel)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return (self.generative_failure(AgentRole::Planner, &e), None),
            Err(_) => {
                return (
                    self.failed_outcome(AgentRole::Planner, ErrorKind::Timeout, "planner timed out"),
                    None,
                )
            }
        };

        let confidence = value
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        let mut plan: Plan = match serde_json::from_value(value.clone()) {
            Ok(plan) => plan,
            Err(e) => {
                return (
                    self.failed_outcome(
                        AgentRole::Planner,
                        ErrorKind::InvalidOutput,
                        format!("plan did not deserialize: {e}"),
                    ),
                    None,
                )
            }
        };

        normalize_roles(&mut plan, repo_root);

        if let Err(e) = plan.validate() {
            return (
                self.failed_outcome(AgentRole::Planner, e.kind(), e.to_string()),
                None,
            );
        }

        let outcome = AgentOutcome {
            status: AgentStatus::Completed,
            title: format!("Planned {} step(s)", plan.steps.len()),
            subtitle: plan.summary.clone(),
            reasoning: value.to_string(),
            invocations: Vec::new(),
            confidence,
            review_required: confidence < self.thresholds.review,
        };

        (outcome, Some(plan))
    }

    /// Execute one coder step, enforcing the declared-files policy.
    pub async fn execute_step(
        &self,
        task: &Task,
        step: &PlanStep,
        repo_root: &Path,
        cancel: &CancellationToken,
    ) -> AgentOutcome {
        let ctx = VerifyContext {
            task_id: task.id,
            step_index: step.index,
            repo_root: repo_root.to_path_buf(),
        };

        let mut outcome = self
            .tool_loop(step.role, prompts::step_prompt(task, step), &ctx, cancel)
            .await;

        if !step.role.is_coder() || !outcome.succeeded() {
            return outcome;
        }

        // Coder policy: every declared file must see a verified write.
        // Re-prompt with the unmet residual a bounded number of times.
        let mut reprompts = 0;
        loop {
            let touched = touched_paths(&outcome.invocations);
            let missing: Vec<String> = step
                .files
                .iter()
                .filter(|f| !touched.contains(*f))
                .cloned()
                .collect();

            if missing.is_empty() {
                if outcome.invocations.iter().any(ToolInvocation::success) {
                    return outcome;
                }
                return self.failed_outcome(
                    step.role,
                    ErrorKind::AgentFailed,
                    "coder step produced no verified writes",
                );
            }

            if reprompts >= self.agent.max_residual_reprompts {
                return self.failed_outcome(
                    step.role,
                    ErrorKind::AgentFailed,
                    format!("declared files never touched: {}", missing.join(", ")),
                );
            }
            reprompts += 1;
            debug!(task_id = %task.id, step = step.index, ?missing, "re-prompting coder residual");

            let mut retry = self
                .tool_loop(step.role, prompts::residual_prompt(step, &missing), &ctx, cancel)
                .await;
            // The run's invocation list records the whole step, re-prompts
            // included.
            let mut all = outcome.invocations;
            all.extend(retry.invocations);
            retry.invocations = all;
            if !retry.succeeded() {
                return retry;
            }
            outcome = retry;
        }
    }

    /// Run QA and interpret its command output semantically.
    pub async fn run_tests(
        &self,
        task: &Task,
        repo_root: &Path,
        cancel: &CancellationToken,
    ) -> (AgentOutcome, Option<QaVerdict>) {
        let ctx = VerifyContext {
            task_id: task.id,
            step_index: task.current_step,
            repo_root: repo_root.to_path_buf(),
        };

        let outcome = self
            .tool_loop(AgentRole::Qa, prompts::qa_prompt(task), &ctx, cancel)
            .await;

        if !outcome.succeeded() {
            return (outcome, None);
        }

        // The verdict comes from what actually ran, not from what the agent
        // claims: take the last successful test command.
        let verdict = outcome
            .invocations
            .iter()
            .rev()
            .find(|inv| inv.tool == "run_command" && inv.success())
            .map_or(QaVerdict::NoTestsExecuted, |inv| match &inv.outcome {
                ToolOutcome::Ok { result } => {
                    let exit = crate::services::tools::parse_exit_code(result).unwrap_or(-1);
                    parse_test_output(exit, result)
                }
                ToolOutcome::Err { .. } => QaVerdict::NoTestsExecuted,
            });

        (outcome, Some(verdict))
    }

    /// Run the docs agent.
    pub async fn document(
        &self,
        task: &Task,
        repo_root: &Path,
        cancel: &CancellationToken,
    ) -> AgentOutcome {
        let ctx = VerifyContext {
            task_id: task.id,
            step_index: task.current_step,
            repo_root: repo_root.to_path_buf(),
        };
        self.tool_loop(AgentRole::Docs, prompts::docs_prompt(task), &ctx, cancel)
            .await
    }

    /// The shared agent loop.
    async fn tool_loop(
        &self,
        role: AgentRole,
        prompt: String,
        ctx: &VerifyContext,
        cancel: &CancellationToken,
    ) -> AgentOutcome {
        let registry = self.verifier.registry();
        let tools = registry.descriptors_for(role);
        let mut exchanges: Vec<ToolExchange> = Vec::new();
        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let limit = Duration::from_secs(self.timeouts.agent_iteration_secs);

        for iteration in 0..self.agent.max_iterations {
            // Cancellation checkpoint before each agent iteration.
            if cancel.is_cancelled() {
                return self.failed_with(role, ErrorKind::Cancelled, "cancelled", invocations);
            }

            let request = ToolCallRequest {
                system: prompts::system_for(role).to_string(),
                prompt: prompt.clone(),
                exchanges: exchanges.clone(),
                tools: tools.clone(),
                tool_choice: ToolChoice::Auto,
                temperature: self.agent.temperature,
                max_tokens: self.agent.max_tokens,
            };

            let reply = match timeout(limit, self.client.tool_call(&request, cancel)).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    let mut outcome = self.generative_failure(role, &e);
                    outcome.invocations = invocations;
                    return outcome;
                }
                Err(_) => {
                    return self.failed_with(
                        role,
                        ErrorKind::Timeout,
                        "agent iteration timed out",
                        invocations,
                    )
                }
            };

            match reply {
                AgentReply::Final(text) => {
                    return self.final_outcome(role, &text, invocations);
                }
                AgentReply::ToolRequests(requests) => {
                    debug!(
                        role = %role,
                        iteration,
                        count = requests.len(),
                        "agent requested tools"
                    );
                    for request in requests {
                        // Cancellation checkpoint before each tool invocation.
                        if cancel.is_cancelled() {
                            return self.failed_with(
                                role,
                                ErrorKind::Cancelled,
                                "cancelled",
                                invocations,
                            );
                        }

                        let invocation = if registry.allowed(role, &request.name) {
                            self.verifier
                                .execute(ctx, &request.name, request.args.clone(), cancel)
                                .await
                        } else {
                            ToolInvocation {
                                id: uuid::Uuid::new_v4(),
                                tool: request.name.clone(),
                                args: request.args.clone(),
                                outcome: ToolOutcome::err(
                                    ErrorKind::ToolFailed,
                                    format!("tool {} not permitted for role {role}", request.name),
                                ),
                                duration_ms: 0,
                            }
                        };

                        // Checkpoint after the invocation, before committing
                        // anything further on its result.
                        if cancel.is_cancelled() {
                            invocations.push(invocation);
                            return self.failed_with(
                                role,
                                ErrorKind::Cancelled,
                                "cancelled",
                                invocations,
                            );
                        }

                        exchanges.push(ToolExchange {
                            request,
                            output: invocation.outcome.feedback(),
                            is_error: !invocation.success(),
                        });
                        invocations.push(invocation);
                    }
                }
            }
        }

        warn!(role = %role, "agent exceeded iteration budget");
        self.failed_with(
            role,
            ErrorKind::ExceededIterations,
            format!("exceeded {} iterations", self.agent.max_iterations),
            invocations,
        )
    }

    /// Parse the agent's final JSON report, tolerating plain text.
    fn final_outcome(
        &self,
        role: AgentRole,
        text: &str,
        invocations: Vec<ToolInvocation>,
    ) -> AgentOutcome {
        let parsed: Option<Value> = serde_json::from_str(text.trim()).ok();
        let field = |name: &str| -> Option<String> {
            parsed
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(Value::as_str)
                .map(ToString::to_string)
        };

        let confidence = parsed
            .as_ref()
            .and_then(|v| v.get("confidence"))
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        let title = field("title").unwrap_or_else(|| {
            text.lines()
                .next()
                .unwrap_or("Agent finished")
                .chars()
                .take(80)
                .collect()
        });

        AgentOutcome {
            status: AgentStatus::Completed,
            title,
            subtitle: field("subtitle").unwrap_or_default(),
            reasoning: field("reasoning").unwrap_or_else(|| text.to_string()),
            invocations,
            confidence,
            review_required: confidence < self.thresholds.review,
        }
    }

    fn generative_failure(&self, role: AgentRole, error: &GenerativeError) -> AgentOutcome {
        let kind = match error {
            GenerativeError::RateLimit => ErrorKind::RateLimit,
            GenerativeError::InvalidOutput(_) => ErrorKind::InvalidOutput,
            GenerativeError::Network(_) => ErrorKind::Network,
            GenerativeError::Timeout => ErrorKind::Timeout,
            GenerativeError::Cancelled => ErrorKind::Cancelled,
        };
        self.failed_outcome(role, kind, error.to_string())
    }

    fn failed_outcome(
        &self,
        role: AgentRole,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> AgentOutcome {
        self.failed_with(role, kind, detail, Vec::new())
    }

    fn failed_with(
        &self,
        role: AgentRole,
        kind: ErrorKind,
        detail: impl Into<String>,
        invocations: Vec<ToolInvocation>,
    ) -> AgentOutcome {
        let detail = detail.into();
        AgentOutcome {
            status: AgentStatus::Failed {
                kind,
                detail: detail.clone(),
            },
            title: format!("{role} failed"),
            subtitle: detail,
            reasoning: String::new(),
            invocations,
            confidence: 0.0,
            review_required: true,
        }
    }
}

/// Repo-relative paths with a successful file-op invocation.
fn touched_paths(invocations: &[ToolInvocation]) -> Vec<String> {
    invocations
        .iter()
        .filter(|inv| {
            inv.success()
                && matches!(inv.tool.as_str(), "write_file" | "edit_file" | "delete_file")
        })
        .filter_map(|inv| inv.args.get("path").and_then(Value::as_str))
        .map(ToString::to_string)
        .collect()
}

/// Planner-policy normalization: steps that create new files must belong to
/// a coder role, so docs steps declaring files absent from disk are
/// reassigned.
fn normalize_roles(plan: &mut Plan, repo_root: &Path) {
    for step in &mut plan.steps {
        if step.role == AgentRole::Docs
            && step
                .files
                .iter()
                .any(|f| !repo_root.join(f).exists())
        {
            step.role = AgentRole::CoderBe;
        }
        if step.role == AgentRole::Planner || step.role == AgentRole::Qa {
            step.role = AgentRole::CoderBe;
        }
    }
}
