//! Core value types for the agent runner.
//!
//! This module contains the fundamental types used throughout the crate:
//!
//! - [`TaskId`]: Unique identifier for an agent task run
//! - [`AgentGoal`]: The goal a run tries to achieve, with success criteria
//! - [`RunnerConfig`]: Configuration for the runner loop
//! - [`RetryPolicy`]: Retry parameters for durable activities
//! - [`ToolResult`]: Result returned from tool execution
//! - [`ExecutionResult`]: Outcome of a completed run
//! - [`RunnerError`]: Error value for runner-level failures

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

use crate::transcript::Message;

/// Unique identifier for an agent task run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The goal handed to the runner. Immutable once the run starts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentGoal {
    /// Natural-language description of what to accomplish.
    pub description: String,
    /// Success criteria the evaluator judges against.
    pub success_criteria: Vec<String>,
    /// Maximum reasoning iterations before giving up. Always at least 1.
    pub max_iterations: u32,
    /// Optional monetary ceiling for the run.
    pub budget: Option<f64>,
}

impl AgentGoal {
    #[must_use]
    pub fn new(description: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            description: description.into(),
            success_criteria: Vec::new(),
            max_iterations: max_iterations.max(1),
            budget: None,
        }
    }

    #[must_use]
    pub fn with_criteria(mut self, criteria: Vec<String>) -> Self {
        self.success_criteria = criteria;
        self
    }

    #[must_use]
    pub const fn with_budget(mut self, budget: f64) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// Retry parameters for durable activities: bounded attempts with
/// exponential backoff and a ceiling interval.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub initial_interval_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_coefficient: f64,
    /// Ceiling for the backoff delay, in milliseconds.
    pub max_interval_ms: u64,
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1000,
            backoff_coefficient: 2.0,
            max_interval_ms: 60_000,
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries (for testing).
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            initial_interval_ms: 0,
            backoff_coefficient: 1.0,
            max_interval_ms: 0,
            max_attempts: 1,
        }
    }

    /// A policy with fast retries (for testing).
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            initial_interval_ms: 10,
            backoff_coefficient: 2.0,
            max_interval_ms: 100,
            max_attempts: 4,
        }
    }

    /// Backoff delay before the retry that follows `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = self.backoff_coefficient.max(1.0).powi(exponent as i32);
        let millis = (self.initial_interval_ms as f64 * factor)
            .min(self.max_interval_ms as f64)
            .max(0.0);
        Duration::from_millis(millis as u64)
    }
}

/// Configuration for the runner loop and its activity boundaries.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Operator-owned ceiling on iterations. The effective limit for a run
    /// is the smaller of this and the goal's `max_iterations`.
    pub max_iterations: u32,
    /// System prompt prepended to every run's transcript.
    pub system_prompt: String,
    /// Retry policy for model-call activities.
    pub model_retry: RetryPolicy,
    /// Retry policy for tool-call activities. Handler failures are results,
    /// not retries; only timeouts and infrastructure errors consume attempts.
    pub tool_retry: RetryPolicy,
    /// Per-attempt timeout for model calls.
    pub model_timeout: Duration,
    /// Per-attempt timeout for tool calls.
    pub tool_timeout: Duration,
    /// Liveness heartbeat interval for long-running tool calls.
    pub heartbeat_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            system_prompt: String::from(
                "You are an autonomous agent working toward a stated goal. \
                 Use the available tools to make progress. When the success \
                 criteria are met, call the task_complete tool with a summary, \
                 your reasoning, and the final result.",
            ),
            model_retry: RetryPolicy::default(),
            tool_retry: RetryPolicy::default(),
            model_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

/// Result of a single tool execution.
///
/// A failing tool never raises past the executor boundary; every failure
/// mode becomes a `ToolResult` with `success == false`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// The tool call this result answers.
    pub tool_call_id: String,
    /// Whether the tool execution succeeded.
    pub success: bool,
    /// Structured output payload.
    pub payload: Map<String, Value>,
    /// Error description when `success` is false.
    pub error: Option<String>,
    /// Duration of the tool execution in milliseconds.
    pub duration_ms: Option<u64>,
}

impl ToolResult {
    #[must_use]
    pub fn success(tool_call_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: true,
            payload,
            error: None,
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn failure(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: false,
            payload: Map::new(),
            error: Some(error.into()),
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Render the result as transcript content: the payload as JSON on
    /// success, the error text on failure.
    #[must_use]
    pub fn render_content(&self) -> String {
        if self.success {
            serde_json::to_string(&self.payload).unwrap_or_default()
        } else {
            self.error
                .clone()
                .unwrap_or_else(|| String::from("tool failed"))
        }
    }
}

/// The enumerated, user-visible explanation for why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    GoalAchieved,
    IterationLimitReached,
    Cancelled,
    Failed,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::GoalAchieved => "goal_achieved",
            Self::IterationLimitReached => "iteration_limit_reached",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a completed run. Produced exactly once, at termination.
///
/// `final_response` is set if and only if the reason is
/// [`TerminationReason::GoalAchieved`], and `success` mirrors the same
/// condition. The constructors below are the only way these fields are
/// populated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub termination_reason: TerminationReason,
    pub iterations_used: u32,
    pub total_cost: f64,
    pub final_response: Option<String>,
    /// Human-readable explanation of the outcome.
    pub rationale: String,
    pub transcript: Vec<Message>,
}

impl ExecutionResult {
    #[must_use]
    pub fn goal_achieved(
        final_response: impl Into<String>,
        rationale: impl Into<String>,
        iterations_used: u32,
        total_cost: f64,
        transcript: Vec<Message>,
    ) -> Self {
        Self {
            success: true,
            termination_reason: TerminationReason::GoalAchieved,
            iterations_used,
            total_cost,
            final_response: Some(final_response.into()),
            rationale: rationale.into(),
            transcript,
        }
    }

    #[must_use]
    pub fn iteration_limit(
        rationale: impl Into<String>,
        iterations_used: u32,
        total_cost: f64,
        transcript: Vec<Message>,
    ) -> Self {
        Self {
            success: false,
            termination_reason: TerminationReason::IterationLimitReached,
            iterations_used,
            total_cost,
            final_response: None,
            rationale: rationale.into(),
            transcript,
        }
    }

    #[must_use]
    pub fn cancelled(
        rationale: impl Into<String>,
        iterations_used: u32,
        total_cost: f64,
        transcript: Vec<Message>,
    ) -> Self {
        Self {
            success: false,
            termination_reason: TerminationReason::Cancelled,
            iterations_used,
            total_cost,
            final_response: None,
            rationale: rationale.into(),
            transcript,
        }
    }

    #[must_use]
    pub fn failed(
        rationale: impl Into<String>,
        iterations_used: u32,
        total_cost: f64,
        transcript: Vec<Message>,
    ) -> Self {
        Self {
            success: false,
            termination_reason: TerminationReason::Failed,
            iterations_used,
            total_cost,
            final_response: None,
            rationale: rationale.into(),
            transcript,
        }
    }
}

/// Error from the runner itself.
#[derive(Debug, Clone)]
pub struct RunnerError {
    /// Error message
    pub message: String,
    /// Whether the error is potentially recoverable
    pub recoverable: bool,
}

impl RunnerError {
    #[must_use]
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RunnerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            initial_interval_ms: 100,
            backoff_coefficient: 2.0,
            max_interval_ms: 500,
            max_attempts: 5,
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        // Capped at the ceiling from here on
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
    }

    #[test]
    fn no_retry_policy_is_single_attempt() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_for(1), Duration::ZERO);
    }

    #[test]
    fn goal_clamps_zero_iterations_to_one() {
        let goal = AgentGoal::new("do nothing", 0);
        assert_eq!(goal.max_iterations, 1);
    }

    #[test]
    fn final_response_only_on_goal_achieved() {
        let achieved = ExecutionResult::goal_achieved("42", "done", 1, 0.0, vec![]);
        assert!(achieved.success);
        assert_eq!(achieved.final_response.as_deref(), Some("42"));

        let limit = ExecutionResult::iteration_limit("ran out", 5, 0.0, vec![]);
        assert!(!limit.success);
        assert!(limit.final_response.is_none());

        let failed = ExecutionResult::failed("boom", 2, 0.0, vec![]);
        assert!(!failed.success);
        assert!(failed.final_response.is_none());

        let cancelled = ExecutionResult::cancelled("stop", 1, 0.0, vec![]);
        assert!(!cancelled.success);
        assert!(cancelled.final_response.is_none());
    }

    #[test]
    fn tool_result_render_content() {
        let mut payload = Map::new();
        payload.insert("answer".to_string(), Value::from(7));
        let ok = ToolResult::success("call_1", payload);
        assert_eq!(ok.render_content(), r#"{"answer":7}"#);

        let err = ToolResult::failure("call_2", "it broke");
        assert_eq!(err.render_content(), "it broke");
    }
}
