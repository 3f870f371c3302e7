//! The completion tool: the model's structured signal that the goal is met.
//!
//! The runner registers [`TaskCompleteTool`] in every registry it is handed.
//! When the model calls it with a summary, its reasoning, and the final
//! result, the run terminates with `GoalAchieved` and the `result` argument
//! becomes the run's final response.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::tools::{Tool, ToolContext, ToolName};
use crate::transcript::ToolCall;

/// Registered name of the completion tool.
pub const COMPLETION_TOOL_NAME: &str = "task_complete";

/// Typed name of the completion tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionToolName {
    TaskComplete,
}

impl ToolName for CompletionToolName {}

/// Structured goal-completion signal.
pub struct TaskCompleteTool;

impl<Ctx: Send + Sync + 'static> Tool<Ctx> for TaskCompleteTool {
    type Name = CompletionToolName;

    fn name(&self) -> CompletionToolName {
        CompletionToolName::TaskComplete
    }

    fn description(&self) -> &'static str {
        "Signal that the goal has been achieved. Call this exactly once, when \
         every success criterion is met, with a summary of what was done, the \
         reasoning for why the goal is satisfied, and the final result."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Short summary of the work performed"
                },
                "reasoning": {
                    "type": "string",
                    "description": "Why the success criteria are satisfied"
                },
                "result": {
                    "type": "string",
                    "description": "The final answer or deliverable"
                }
            },
            "required": ["summary", "reasoning", "result"]
        })
    }

    async fn execute(
        &self,
        _ctx: &ToolContext<Ctx>,
        arguments: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let mut payload = arguments;
        payload.insert("completed".to_string(), Value::Bool(true));
        Ok(payload)
    }
}

/// Whether a call targets the completion tool.
#[must_use]
pub fn is_completion_call(call: &ToolCall) -> bool {
    call.function_name == COMPLETION_TOOL_NAME
}

/// Extract a string argument from a completion call, if present.
#[must_use]
pub fn completion_argument<'a>(call: &'a ToolCall, key: &str) -> Option<&'a str> {
    call.arguments.get(key).and_then(Value::as_str)
}
