//! One transition of the run state machine.
//!
//! `step()` advances a [`RunState`] by exactly one phase transition. The
//! loop in `runner.rs` calls it until the state is terminal, checkpointing
//! the snapshot between steps.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::activity::{ActivityError, ActivityKey, ActivityOptions, run_activity};
use crate::completion::{COMPLETION_TOOL_NAME, completion_argument, is_completion_call};
use crate::evaluator::GoalEvaluator;
use crate::events::{EventSink, RunEvent};
use crate::provider::{ModelProvider, ProviderErrorStats};
use crate::recovery::recover_tool_calls;
use crate::stores::ActivityStore;
use crate::tools::{ToolContext, ToolRegistry};
use crate::transcript::{Message, ToolCall};
use crate::types::{ExecutionResult, RunnerError};

use super::dispatch::dispatch_tool_calls;
use super::helpers::{effective_max_iterations, seed_transcript};
use super::state::{DispatchedCall, Phase, RunState};

/// Everything a step needs besides the state itself.
pub(super) struct StepContext<'a, Ctx, P, E> {
    pub config: &'a crate::types::RunnerConfig,
    pub provider: &'a Arc<P>,
    pub tools: &'a Arc<ToolRegistry<Ctx>>,
    pub evaluator: &'a Arc<E>,
    pub tool_context: &'a ToolContext<Ctx>,
    pub events: &'a EventSink,
    pub activity_store: Option<&'a Arc<dyn ActivityStore>>,
    pub error_stats: &'a ProviderErrorStats,
    pub cancel: &'a CancellationToken,
}

pub(super) async fn step<Ctx, P, E>(state: &mut RunState, ctx: &StepContext<'_, Ctx, P, E>)
where
    Ctx: Send + Sync + 'static,
    P: ModelProvider,
    E: GoalEvaluator,
{
    let phase = std::mem::replace(&mut state.phase, Phase::Idle);
    state.phase = match phase {
        Phase::Idle => {
            state.transcript = seed_transcript(ctx.config, &state.goal);
            Phase::Reasoning
        }
        Phase::Reasoning => reason(state, ctx).await,
        Phase::Dispatching { iteration, calls } => {
            let results = dispatch_tool_calls(
                iteration,
                calls,
                ctx.tools,
                ctx.tool_context,
                ctx.events,
                ctx.activity_store,
                ctx.config,
            )
            .await;
            for dispatched in &results {
                state.transcript.push(Message::tool_result(
                    &dispatched.result.tool_call_id,
                    &dispatched.call.function_name,
                    dispatched.result.render_content(),
                ));
            }
            Phase::Evaluating { results }
        }
        Phase::Evaluating { results } => evaluate(state, ctx, results).await,
        terminal @ Phase::Terminal(_) => terminal,
    };
}

/// The reasoning boundary: cancellation, limits, budget, then one model
/// call.
async fn reason<Ctx, P, E>(state: &mut RunState, ctx: &StepContext<'_, Ctx, P, E>) -> Phase
where
    Ctx: Send + Sync + 'static,
    P: ModelProvider,
    E: GoalEvaluator,
{
    if ctx.cancel.is_cancelled() {
        info!("run cancelled task_id={} iteration={}", state.task_id, state.iteration);
        return terminal(ExecutionResult::cancelled(
            "cancellation requested",
            state.iteration,
            state.total_cost,
            state.transcript.clone(),
        ));
    }

    let limit = effective_max_iterations(&state.goal, ctx.config);
    if state.iteration >= limit {
        info!("iteration limit reached task_id={} limit={limit}", state.task_id);
        return terminal(ExecutionResult::iteration_limit(
            format!("iteration limit of {limit} reached without achieving the goal"),
            state.iteration,
            state.total_cost,
            state.transcript.clone(),
        ));
    }

    if let Some(budget) = state.goal.budget {
        if state.total_cost >= budget {
            info!(
                "budget exhausted task_id={} cost={:.4} budget={budget:.4}",
                state.task_id, state.total_cost
            );
            return terminal(ExecutionResult::iteration_limit(
                format!(
                    "budget exhausted: spent {:.4} of {budget:.4} before iteration {}",
                    state.total_cost, state.iteration
                ),
                state.iteration,
                state.total_cost,
                state.transcript.clone(),
            ));
        }
    }

    ctx.events
        .emit(RunEvent::iteration_started(
            state.task_id.clone(),
            state.iteration,
        ))
        .await;

    let key = ActivityKey::model_call(state.iteration);
    let options = ActivityOptions {
        timeout: ctx.config.model_timeout,
        retry: ctx.config.model_retry.clone(),
        heartbeat_interval: None,
    };
    let transcript = &state.transcript;
    let schemas = ctx.tools.schemas();
    let outcome = run_activity(ctx.events, ctx.activity_store, &key, &options, || {
        let schemas = &schemas;
        async move {
            ctx.provider.complete(transcript, schemas).await.map_err(|error| {
                ctx.error_stats.record(error.kind);
                if error.kind.is_retryable() {
                    ActivityError::Transient(error.to_string())
                } else {
                    ActivityError::Fatal(error.to_string())
                }
            })
        }
    })
    .await;

    let reply = match outcome {
        Ok(reply) => reply,
        Err(error) => {
            let mut rationale = format!("model call failed: {}", error.message());
            if let Some(summary) = ctx.error_stats.summary() {
                rationale.push_str(&format!(" (provider errors: {summary})"));
            }
            warn!("run failed task_id={} error={rationale}", state.task_id);
            let failure = RunnerError::new(rationale, false);
            ctx.events.emit(RunEvent::runner_error(&failure)).await;
            return terminal(ExecutionResult::failed(
                failure.message,
                state.iteration,
                state.total_cost,
                state.transcript.clone(),
            ));
        }
    };

    state.total_cost += reply.cost.max(0.0);

    let mut message = reply.message;
    let mut calls: Vec<ToolCall> = message.calls().to_vec();
    if calls.is_empty() && !message.content.is_empty() {
        let (recovered, cleaned) = recover_tool_calls(&message.content);
        if !recovered.is_empty() {
            debug!(
                "recovered {} tool call(s) from assistant text iteration={}",
                recovered.len(),
                state.iteration
            );
            message = Message::assistant_with_calls(cleaned.trim(), recovered.clone());
            calls = recovered;
        }
    }

    if !message.content.is_empty() {
        ctx.events
            .emit(RunEvent::assistant_message(
                format!("msg_{}", Uuid::new_v4()),
                &message.content,
            ))
            .await;
    }
    state.transcript.push(message);

    let issued_in = state.iteration;
    state.iteration += 1;

    if calls.is_empty() {
        // Conversational turn: no action requested, go around again. The
        // limit check at the top of the next reasoning step bounds this.
        Phase::Reasoning
    } else {
        Phase::Dispatching {
            iteration: issued_in,
            calls,
        }
    }
}

/// Decide whether the run is over: completion tool first, then the
/// evaluator.
async fn evaluate<Ctx, P, E>(
    state: &mut RunState,
    ctx: &StepContext<'_, Ctx, P, E>,
    results: Vec<DispatchedCall>,
) -> Phase
where
    Ctx: Send + Sync + 'static,
    P: ModelProvider,
    E: GoalEvaluator,
{
    // A successful completion call wins over everything else in the batch.
    if let Some(done) = results
        .iter()
        .find(|d| is_completion_call(&d.call) && d.result.success)
    {
        let final_response = completion_argument(&done.call, "result").unwrap_or_default();
        let rationale = completion_argument(&done.call, "reasoning")
            .or_else(|| completion_argument(&done.call, "summary"))
            .unwrap_or("completion tool called");
        info!("goal achieved via {COMPLETION_TOOL_NAME} task_id={}", state.task_id);
        return terminal(ExecutionResult::goal_achieved(
            final_response,
            rationale,
            state.iteration,
            state.total_cost,
            state.transcript.clone(),
        ));
    }

    match ctx.evaluator.evaluate(&state.goal, &state.transcript).await {
        Ok(verdict) => {
            ctx.events
                .emit(RunEvent::verdict(verdict.met, &verdict.rationale))
                .await;
            if verdict.met {
                info!("goal achieved via evaluator task_id={}", state.task_id);
                return terminal(ExecutionResult::goal_achieved(
                    verdict.rationale.clone(),
                    verdict.rationale,
                    state.iteration,
                    state.total_cost,
                    state.transcript.clone(),
                ));
            }
        }
        Err(error) => {
            // Advisory only: an evaluator failure must not kill the run.
            warn!("goal evaluation failed task_id={} error={error:#}", state.task_id);
        }
    }

    Phase::Reasoning
}

fn terminal(result: ExecutionResult) -> Phase {
    Phase::Terminal(result)
}
