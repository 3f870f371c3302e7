//! Concurrent, order-preserving tool dispatch.
//!
//! All calls in a batch run concurrently; results are reassembled in the
//! batch's input order regardless of completion order. Exclusive tools are
//! serialized against each other through a shared lock while non-exclusive
//! tools proceed in parallel. Each call runs inside its own durable
//! activity, so timeouts, retries, heartbeats, and replay apply per call.

use futures::future::join_all;
use log::debug;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::activity::{ActivityError, ActivityKey, ActivityOptions, run_activity};
use crate::events::{EventSink, RunEvent};
use crate::stores::ActivityStore;
use crate::tools::{ToolContext, ToolRegistry};
use crate::transcript::ToolCall;
use crate::types::{RunnerConfig, ToolResult};

use super::state::DispatchedCall;

pub(super) async fn dispatch_tool_calls<Ctx>(
    iteration: u32,
    calls: Vec<ToolCall>,
    registry: &ToolRegistry<Ctx>,
    tool_context: &ToolContext<Ctx>,
    events: &EventSink,
    store: Option<&Arc<dyn ActivityStore>>,
    config: &RunnerConfig,
) -> Vec<DispatchedCall>
where
    Ctx: Send + Sync + 'static,
{
    debug!("dispatching tool batch iteration={iteration} calls={}", calls.len());

    for call in &calls {
        events
            .emit(RunEvent::tool_call_start(
                &call.id,
                &call.function_name,
                serde_json::Value::Object(call.arguments.clone()),
            ))
            .await;
    }

    let options = ActivityOptions {
        timeout: config.tool_timeout,
        retry: config.tool_retry.clone(),
        heartbeat_interval: Some(config.heartbeat_interval),
    };
    let exclusivity = Arc::new(Mutex::new(()));

    let futures = calls.iter().enumerate().map(|(index, call)| {
        let exclusivity = Arc::clone(&exclusivity);
        let options = &options;
        async move {
            let _guard = if registry.is_exclusive(&call.function_name) {
                Some(exclusivity.lock().await)
            } else {
                None
            };
            run_one(iteration, index as u32, call, registry, tool_context, events, store, options)
                .await
        }
    });

    // join_all preserves input order, whatever order the futures finish in.
    let results = join_all(futures).await;

    let mut dispatched = Vec::with_capacity(calls.len());
    for (call, result) in calls.into_iter().zip(results) {
        events
            .emit(RunEvent::tool_call_end(
                &call.id,
                &call.function_name,
                result.clone(),
            ))
            .await;
        dispatched.push(DispatchedCall { call, result });
    }
    dispatched
}

#[allow(clippy::too_many_arguments)]
async fn run_one<Ctx>(
    iteration: u32,
    index: u32,
    call: &ToolCall,
    registry: &ToolRegistry<Ctx>,
    tool_context: &ToolContext<Ctx>,
    events: &EventSink,
    store: Option<&Arc<dyn ActivityStore>>,
    options: &ActivityOptions,
) -> ToolResult
where
    Ctx: Send + Sync + 'static,
{
    let key = ActivityKey::tool_call(iteration, index);
    let outcome = run_activity(events, store, &key, options, || async {
        // Handler failures come back as failed results; only the activity
        // machinery (timeout, infrastructure) produces Err here.
        Ok::<ToolResult, ActivityError>(registry.execute(tool_context, call).await)
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(error) => ToolResult::failure(
            &call.id,
            format!("tool {} did not complete: {error}", call.function_name),
        ),
    }
}
