//! Agent Runner - a goal-driven task execution engine for LLM agents.
//!
//! This crate drives an iterative reason/act/observe loop against a language
//! model until a goal is achieved, a limit is hit, the run is cancelled, or
//! an unrecoverable error occurs:
//! - Typed tool registry with JSON Schema argument validation
//! - Concurrent, order-preserving tool dispatch
//! - Recovery of tool calls embedded in malformed model text
//! - Durable activity boundaries: replay, timeout, retry, heartbeats
//! - Streaming event envelopes and lifecycle status publishing
//!
//! # Example
//!
//! ```ignore
//! use agent_runner::{AgentGoal, RunnerConfig, ToolContext, ToolRegistry};
//!
//! let mut tools = ToolRegistry::new();
//! tools.register(MyTool);
//!
//! let runner = agent_runner::builder()
//!     .provider(my_provider)
//!     .tools(tools)
//!     .config(RunnerConfig::default())
//!     .build();
//!
//! let goal = AgentGoal::new("produce the weekly report", 10)
//!     .with_criteria(vec!["the report covers all regions".into()]);
//! let mut handle = runner.run(goal, ToolContext::new(my_ctx));
//!
//! while let Some(event) = handle.events.recv().await {
//!     println!("{event:?}");
//! }
//! let result = handle.wait().await;
//! ```

#![forbid(unsafe_code)]

mod activity;
mod completion;
mod evaluator;
mod events;
mod provider;
mod recovery;
mod runner;
mod stores;
mod tools;
mod transcript;
mod types;

pub use activity::{ActivityError, ActivityKey, ActivityKind, ActivityOptions, run_activity};
pub use completion::{COMPLETION_TOOL_NAME, CompletionToolName, TaskCompleteTool};
pub use evaluator::{GoalEvaluator, GoalVerdict, ModelGoalEvaluator, NullEvaluator};
pub use events::{
    EventPublisher, EventSink, NullPublisher, RunEvent, RunEventEnvelope, SequenceCounter,
    StatusUpdate, TaskStatus,
};
pub use provider::{ModelProvider, ModelReply, ProviderError, ProviderErrorKind, ProviderErrorStats};
pub use recovery::recover_tool_calls;
pub use runner::{
    AgentRunner, AgentRunnerBuilder, DispatchedCall, Phase, RunHandle, RunSnapshot, RunState,
    builder,
};
pub use stores::{
    ActivityStore, InMemoryActivityStore, InMemoryResultSink, ResultSink, ScopedActivityStore,
};
pub use tools::{
    DynamicToolName, ErasedTool, Tool, ToolContext, ToolName, ToolRegistry, ToolSchema,
    tool_name_from_str, tool_name_to_string,
};
pub use transcript::{Message, Role, ToolCall};
pub use types::{
    AgentGoal, ExecutionResult, RetryPolicy, RunnerConfig, RunnerError, TaskId, TerminationReason,
    ToolResult,
};
