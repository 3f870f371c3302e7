//! Explicit run state for the agent loop.
//!
//! The loop is a plain state machine: [`RunState`] holds everything the run
//! knows, [`Phase`] names where it is, and `step()` advances it one
//! transition at a time. The whole state is serializable, so it can be
//! checkpointed and inspected.

use serde::{Deserialize, Serialize};

use crate::events::TaskStatus;
use crate::transcript::{Message, ToolCall};
use crate::types::{AgentGoal, ExecutionResult, TaskId, ToolResult};

/// A tool call paired with its result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchedCall {
    pub call: ToolCall,
    pub result: ToolResult,
}

/// Where the run currently is.
///
/// Transitions: `Idle -> Reasoning`, `Reasoning -> Dispatching | Reasoning |
/// Terminal`, `Dispatching -> Evaluating`, `Evaluating -> Reasoning |
/// Terminal`. `Terminal` is absorbing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    /// Not started; the transcript has not been seeded.
    Idle,
    /// About to call the model (after passing the boundary checks).
    Reasoning,
    /// Tool calls issued by the model are being executed.
    Dispatching {
        /// Iteration the calls were issued in, for activity keys.
        iteration: u32,
        calls: Vec<ToolCall>,
    },
    /// Tool results are in; deciding whether the goal is met.
    Evaluating { results: Vec<DispatchedCall> },
    /// The run is over.
    Terminal(ExecutionResult),
}

/// Complete state of one run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunState {
    pub task_id: TaskId,
    pub goal: AgentGoal,
    /// Completed model calls so far.
    pub iteration: u32,
    pub transcript: Vec<Message>,
    /// Accumulated cost. Monotonically non-decreasing.
    pub total_cost: f64,
    pub phase: Phase,
}

impl RunState {
    #[must_use]
    pub fn new(task_id: TaskId, goal: AgentGoal) -> Self {
        Self {
            task_id,
            goal,
            iteration: 0,
            transcript: Vec::new(),
            total_cost: 0.0,
            phase: Phase::Idle,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Terminal(_))
    }

    /// Point-in-time view for the watch channel.
    #[must_use]
    pub fn snapshot(&self, status: TaskStatus) -> RunSnapshot {
        RunSnapshot {
            task_id: self.task_id.clone(),
            status,
            iteration: self.iteration,
            total_cost: self.total_cost,
            transcript: self.transcript.clone(),
        }
    }

    /// Take the terminal result out of the state, if the run is over.
    #[must_use]
    pub fn into_result(self) -> Option<ExecutionResult> {
        match self.phase {
            Phase::Terminal(result) => Some(result),
            _ => None,
        }
    }
}

/// Live view of a run, published through a watch channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub iteration: u32,
    pub total_cost: f64,
    pub transcript: Vec<Message>,
}
