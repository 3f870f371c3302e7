//! The agent runner: a goal-driven reason/act/observe loop.
//!
//! [`AgentRunner`] owns the collaborators (provider, tools, evaluator,
//! publisher, stores) and spawns one state-machine task per run. Each run
//! yields a [`RunHandle`] carrying the event stream, a live snapshot
//! channel, a cancellation trigger, and the terminal result.
//!
//! # Example
//!
//! ```ignore
//! let runner = agent_runner::builder()
//!     .provider(my_provider)
//!     .tools(my_tools)
//!     .config(RunnerConfig::default())
//!     .build();
//!
//! let goal = AgentGoal::new("summarize the quarterly report", 10);
//! let mut handle = runner.run(goal, ToolContext::new(my_ctx));
//! while let Some(event) = handle.events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

mod dispatch;
mod helpers;
mod state;
mod step;
#[cfg(test)]
pub(crate) mod test_utils;

pub use state::{DispatchedCall, Phase, RunSnapshot, RunState};

use log::{info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::completion::TaskCompleteTool;
use crate::evaluator::{GoalEvaluator, NullEvaluator};
use crate::events::{
    EventPublisher, EventSink, NullPublisher, RunEvent, RunEventEnvelope, SequenceCounter,
    StatusUpdate, TaskStatus,
};
use crate::provider::{ModelProvider, ProviderErrorStats};
use crate::stores::{ActivityStore, ResultSink, ScopedActivityStore};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{AgentGoal, ExecutionResult, RunnerConfig, TaskId};

use helpers::status_for;
use step::StepContext;

/// Builder for constructing an [`AgentRunner`].
pub struct AgentRunnerBuilder<Ctx, P, E> {
    provider: Option<P>,
    evaluator: Option<E>,
    tools: Option<ToolRegistry<Ctx>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    result_sink: Option<Arc<dyn ResultSink>>,
    activity_store: Option<Arc<dyn ActivityStore>>,
    config: Option<RunnerConfig>,
}

impl<Ctx> AgentRunnerBuilder<Ctx, (), ()> {
    /// Create a new builder with no components set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            provider: None,
            evaluator: None,
            tools: None,
            publisher: None,
            result_sink: None,
            activity_store: None,
            config: None,
        }
    }
}

impl<Ctx> Default for AgentRunnerBuilder<Ctx, (), ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx, P, E> AgentRunnerBuilder<Ctx, P, E> {
    /// Set the model provider.
    #[must_use]
    pub fn provider<P2: ModelProvider>(self, provider: P2) -> AgentRunnerBuilder<Ctx, P2, E> {
        AgentRunnerBuilder {
            provider: Some(provider),
            evaluator: self.evaluator,
            tools: self.tools,
            publisher: self.publisher,
            result_sink: self.result_sink,
            activity_store: self.activity_store,
            config: self.config,
        }
    }

    /// Set the goal evaluator.
    #[must_use]
    pub fn evaluator<E2: GoalEvaluator>(self, evaluator: E2) -> AgentRunnerBuilder<Ctx, P, E2> {
        AgentRunnerBuilder {
            provider: self.provider,
            evaluator: Some(evaluator),
            tools: self.tools,
            publisher: self.publisher,
            result_sink: self.result_sink,
            activity_store: self.activity_store,
            config: self.config,
        }
    }

    /// Set the tool registry.
    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry<Ctx>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set the status publisher.
    #[must_use]
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Set the terminal-result sink.
    #[must_use]
    pub fn result_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.result_sink = Some(sink);
        self
    }

    /// Set the durable activity store. Runs scope their activity keys by
    /// task id, so one store can back many runs.
    #[must_use]
    pub fn activity_store(mut self, store: Arc<dyn ActivityStore>) -> Self {
        self.activity_store = Some(store);
        self
    }

    /// Set the runner configuration.
    #[must_use]
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = Some(config);
        self
    }
}

impl<Ctx, P> AgentRunnerBuilder<Ctx, P, ()>
where
    Ctx: Send + Sync + 'static,
    P: ModelProvider + 'static,
{
    /// Build the runner with the default [`NullEvaluator`]: termination is
    /// driven by the completion tool and the iteration limit alone.
    ///
    /// # Panics
    ///
    /// Panics if a provider has not been set.
    #[must_use]
    pub fn build(self) -> AgentRunner<Ctx, P, NullEvaluator> {
        let provider = self.provider.expect("provider is required");
        AgentRunner::assemble(
            provider,
            NullEvaluator,
            self.tools,
            self.publisher,
            self.result_sink,
            self.activity_store,
            self.config,
        )
    }
}

impl<Ctx, P, E> AgentRunnerBuilder<Ctx, P, E>
where
    Ctx: Send + Sync + 'static,
    P: ModelProvider + 'static,
    E: GoalEvaluator + 'static,
{
    /// Build the runner with a custom evaluator.
    ///
    /// # Panics
    ///
    /// Panics if a provider or evaluator has not been set.
    #[must_use]
    pub fn build_with_evaluator(self) -> AgentRunner<Ctx, P, E> {
        let provider = self.provider.expect("provider is required");
        let evaluator = self
            .evaluator
            .expect("evaluator is required when using build_with_evaluator");
        AgentRunner::assemble(
            provider,
            evaluator,
            self.tools,
            self.publisher,
            self.result_sink,
            self.activity_store,
            self.config,
        )
    }
}

/// Orchestrates goal-driven agent runs.
pub struct AgentRunner<Ctx, P, E>
where
    P: ModelProvider,
    E: GoalEvaluator,
{
    provider: Arc<P>,
    tools: Arc<ToolRegistry<Ctx>>,
    evaluator: Arc<E>,
    publisher: Arc<dyn EventPublisher>,
    result_sink: Option<Arc<dyn ResultSink>>,
    activity_store: Option<Arc<dyn ActivityStore>>,
    config: RunnerConfig,
}

/// Create a new builder for constructing an [`AgentRunner`].
#[must_use]
pub const fn builder<Ctx>() -> AgentRunnerBuilder<Ctx, (), ()> {
    AgentRunnerBuilder::new()
}

/// Handle to a spawned run.
pub struct RunHandle {
    pub task_id: TaskId,
    /// Live event stream for this run.
    pub events: mpsc::Receiver<RunEventEnvelope>,
    snapshot: watch::Receiver<RunSnapshot>,
    cancel: CancellationToken,
    outcome: JoinHandle<ExecutionResult>,
}

impl RunHandle {
    /// Request cooperative cancellation. In-flight work drains; the run
    /// terminates with `Cancelled` at the next iteration boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current snapshot of the run: status, iteration, partial transcript.
    #[must_use]
    pub fn snapshot(&self) -> RunSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait for the run to finish and return its result.
    pub async fn wait(self) -> ExecutionResult {
        match self.outcome.await {
            Ok(result) => result,
            Err(error) => {
                ExecutionResult::failed(format!("run task aborted: {error}"), 0, 0.0, vec![])
            }
        }
    }
}

impl<Ctx, P, E> AgentRunner<Ctx, P, E>
where
    Ctx: Send + Sync + 'static,
    P: ModelProvider + 'static,
    E: GoalEvaluator + 'static,
{
    fn assemble(
        provider: P,
        evaluator: E,
        tools: Option<ToolRegistry<Ctx>>,
        publisher: Option<Arc<dyn EventPublisher>>,
        result_sink: Option<Arc<dyn ResultSink>>,
        activity_store: Option<Arc<dyn ActivityStore>>,
        config: Option<RunnerConfig>,
    ) -> Self {
        let mut tools = tools.unwrap_or_default();
        // Every run needs the completion signal available.
        tools.register(TaskCompleteTool);

        Self {
            provider: Arc::new(provider),
            tools: Arc::new(tools),
            evaluator: Arc::new(evaluator),
            publisher: publisher.unwrap_or_else(|| Arc::new(NullPublisher)),
            result_sink,
            activity_store,
            config: config.unwrap_or_default(),
        }
    }

    /// Start a run with a fresh task id.
    #[must_use]
    pub fn run(&self, goal: AgentGoal, tool_context: ToolContext<Ctx>) -> RunHandle {
        self.run_with_task_id(TaskId::new(), goal, tool_context)
    }

    /// Start a run under a caller-chosen task id.
    ///
    /// Reusing a task id together with the same activity store replays the
    /// recorded activities of an interrupted run instead of re-executing
    /// them.
    #[must_use]
    pub fn run_with_task_id(
        &self,
        task_id: TaskId,
        goal: AgentGoal,
        tool_context: ToolContext<Ctx>,
    ) -> RunHandle {
        let (tx, rx) = mpsc::channel(256);
        let events = EventSink::new(tx, SequenceCounter::new());
        let cancel = CancellationToken::new();
        let tool_context = tool_context.with_cancellation(cancel.clone());

        let state = RunState::new(task_id.clone(), goal);
        let (watch_tx, watch_rx) = watch::channel(state.snapshot(TaskStatus::Pending));

        let activity_store = self.activity_store.as_ref().map(|store| {
            Arc::new(ScopedActivityStore::new(Arc::clone(store), task_id.to_string()))
                as Arc<dyn ActivityStore>
        });

        let provider = Arc::clone(&self.provider);
        let tools = Arc::clone(&self.tools);
        let evaluator = Arc::clone(&self.evaluator);
        let publisher = Arc::clone(&self.publisher);
        let result_sink = self.result_sink.clone();
        let config = self.config.clone();
        let loop_cancel = cancel.clone();

        let outcome = tokio::spawn(async move {
            run_loop(
                state,
                config,
                provider,
                tools,
                evaluator,
                publisher,
                result_sink,
                activity_store,
                tool_context,
                events,
                watch_tx,
                loop_cancel,
            )
            .await
        });

        RunHandle {
            task_id,
            events: rx,
            snapshot: watch_rx,
            cancel,
            outcome,
        }
    }
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
async fn run_loop<Ctx, P, E>(
    mut state: RunState,
    config: RunnerConfig,
    provider: Arc<P>,
    tools: Arc<ToolRegistry<Ctx>>,
    evaluator: Arc<E>,
    publisher: Arc<dyn EventPublisher>,
    result_sink: Option<Arc<dyn ResultSink>>,
    activity_store: Option<Arc<dyn ActivityStore>>,
    tool_context: ToolContext<Ctx>,
    events: EventSink,
    watch_tx: watch::Sender<RunSnapshot>,
    cancel: CancellationToken,
) -> ExecutionResult
where
    Ctx: Send + Sync + 'static,
    P: ModelProvider,
    E: GoalEvaluator,
{
    let task_id = state.task_id.clone();
    info!(
        "run started task_id={task_id} model={} provider={} max_iterations={}",
        provider.model(),
        provider.provider(),
        state.goal.max_iterations
    );

    publish_status(
        &publisher,
        &events,
        &task_id,
        Some(TaskStatus::Pending),
        TaskStatus::Running,
        None,
    )
    .await;

    let error_stats = ProviderErrorStats::new();
    let step_ctx = StepContext {
        config: &config,
        provider: &provider,
        tools: &tools,
        evaluator: &evaluator,
        tool_context: &tool_context,
        events: &events,
        activity_store: activity_store.as_ref(),
        error_stats: &error_stats,
        cancel: &cancel,
    };

    while !state.is_terminal() {
        step::step(&mut state, &step_ctx).await;
        let _ = watch_tx.send(state.snapshot(TaskStatus::Running));
    }

    let iteration = state.iteration;
    let final_snapshot = state.snapshot(TaskStatus::Running);
    let result = state.into_result().unwrap_or_else(|| {
        ExecutionResult::failed("run loop ended in a non-terminal phase", iteration, 0.0, vec![])
    });

    if let Some(sink) = &result_sink {
        if let Err(error) = sink.persist(&task_id.0, &result).await {
            warn!("failed to persist run result task_id={task_id} error={error:#}");
        }
    }

    let final_status = status_for(result.termination_reason);
    publish_status(
        &publisher,
        &events,
        &task_id,
        Some(TaskStatus::Running),
        final_status,
        Some(result.rationale.clone()),
    )
    .await;

    events
        .emit(RunEvent::Done {
            task_id: task_id.clone(),
            termination_reason: result.termination_reason,
            iterations_used: result.iterations_used,
            total_cost: result.total_cost,
        })
        .await;

    let _ = watch_tx.send(RunSnapshot {
        status: final_status,
        ..final_snapshot
    });

    info!(
        "run finished task_id={task_id} reason={} iterations={} cost={:.4}",
        result.termination_reason, result.iterations_used, result.total_cost
    );
    result
}

/// Push a lifecycle transition to the publisher, the event stream, or both.
/// Publisher failures are logged and ignored.
async fn publish_status(
    publisher: &Arc<dyn EventPublisher>,
    events: &EventSink,
    task_id: &TaskId,
    old_status: Option<TaskStatus>,
    new_status: TaskStatus,
    message: Option<String>,
) {
    events
        .emit(RunEvent::status_changed(task_id.clone(), old_status, new_status))
        .await;

    let update = StatusUpdate {
        task_id: task_id.clone(),
        old_status,
        new_status,
        message,
    };
    if let Err(error) = publisher.publish(update).await {
        warn!("status publish failed task_id={task_id} status={new_status} error={error:#}");
    }
}
