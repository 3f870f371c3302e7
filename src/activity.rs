//! Durable activity boundary.
//!
//! Every side-effecting step of a run (a model call, a tool call) executes
//! through [`run_activity`], which layers four behaviors over the raw
//! future:
//!
//! - **Replay**: if the activity's key is already in the [`ActivityStore`],
//!   the recorded result is returned without re-executing. Keys are derived
//!   from the activity's position in the run, so a restarted run replays
//!   completed work deterministically.
//! - **Timeout**: each attempt is bounded by the configured timeout; an
//!   elapsed timeout counts as a transient failure.
//! - **Retry**: transient failures are retried with exponential backoff up
//!   to the policy's attempt budget. Fatal failures return immediately.
//! - **Heartbeat**: while an attempt is pending, liveness events are
//!   emitted at the configured interval.
//!
//! Results are recorded to the store before being released to the caller,
//! so a crash after completion re-delivers rather than re-executes.

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::events::{EventSink, RunEvent};
use crate::stores::ActivityStore;
use crate::types::RetryPolicy;

/// What kind of work an activity performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ModelCall,
    ToolCall,
}

impl ActivityKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ModelCall => "model",
            Self::ToolCall => "tool",
        }
    }
}

/// Position-derived identity of an activity within a run.
///
/// Two executions of the same run produce the same keys in the same order,
/// which is what makes store-based replay safe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActivityKey {
    /// Iteration the activity belongs to.
    pub iteration: u32,
    pub kind: ActivityKind,
    /// Index within the iteration (always 0 for model calls, the batch
    /// position for tool calls).
    pub index: u32,
}

impl ActivityKey {
    #[must_use]
    pub const fn model_call(iteration: u32) -> Self {
        Self {
            iteration,
            kind: ActivityKind::ModelCall,
            index: 0,
        }
    }

    #[must_use]
    pub const fn tool_call(iteration: u32, index: u32) -> Self {
        Self {
            iteration,
            kind: ActivityKind::ToolCall,
            index,
        }
    }
}

impl std::fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "iter{}:{}:{}", self.iteration, self.kind.as_str(), self.index)
    }
}

/// Per-activity execution options.
#[derive(Clone, Debug)]
pub struct ActivityOptions {
    /// Bound on each individual attempt.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Liveness heartbeat interval; `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
}

/// Failure of an activity attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActivityError {
    /// Worth retrying: timeouts, transport blips.
    Transient(String),
    /// Permanent: retrying cannot help.
    Fatal(String),
}

impl ActivityError {
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Fatal(m) => m,
        }
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(m) => write!(f, "transient: {m}"),
            Self::Fatal(m) => write!(f, "fatal: {m}"),
        }
    }
}

impl std::error::Error for ActivityError {}

/// Execute one activity with replay, timeout, retry, and heartbeats.
///
/// `make_attempt` is invoked once per attempt; each invocation must produce
/// a fresh future for the same logical operation.
///
/// # Errors
/// Returns the last [`ActivityError`] when the attempt budget is exhausted,
/// or immediately on a fatal failure.
pub async fn run_activity<T, F, Fut>(
    events: &EventSink,
    store: Option<&Arc<dyn ActivityStore>>,
    key: &ActivityKey,
    options: &ActivityOptions,
    mut make_attempt: F,
) -> Result<T, ActivityError>
where
    T: Serialize + DeserializeOwned,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ActivityError>> + Send,
{
    if let Some(store) = store {
        match store.get(&key.to_string()).await {
            Ok(Some(recorded)) => match serde_json::from_value(recorded) {
                Ok(value) => {
                    debug!("activity replayed from store key={key}");
                    return Ok(value);
                }
                Err(error) => {
                    warn!("recorded activity result is unreadable key={key} error={error}");
                }
            },
            Ok(None) => {}
            Err(error) => {
                warn!("activity store lookup failed key={key} error={error:#}");
            }
        }
    }

    let max_attempts = options.retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match attempt_once(events, key, options, attempt, make_attempt()).await {
            Ok(value) => {
                if let Some(store) = store {
                    match serde_json::to_value(&value) {
                        Ok(serialized) => {
                            if let Err(error) = store.record(&key.to_string(), serialized).await {
                                warn!("failed to record activity result key={key} error={error:#}");
                            }
                        }
                        Err(error) => {
                            warn!("activity result not serializable key={key} error={error}");
                        }
                    }
                }
                return Ok(value);
            }
            Err(ActivityError::Fatal(message)) => {
                debug!("activity failed permanently key={key} error={message}");
                return Err(ActivityError::Fatal(message));
            }
            Err(ActivityError::Transient(message)) => {
                if attempt >= max_attempts {
                    return Err(ActivityError::Transient(format!(
                        "{message} (after {attempt} attempts)"
                    )));
                }
                let delay = options.retry.delay_for(attempt);
                warn!(
                    "activity attempt failed key={key} attempt={attempt}/{max_attempts} \
                     retry_in={delay:?} error={message}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Run one attempt under the timeout, emitting heartbeats while pending.
async fn attempt_once<T, Fut>(
    events: &EventSink,
    key: &ActivityKey,
    options: &ActivityOptions,
    attempt: u32,
    fut: Fut,
) -> Result<T, ActivityError>
where
    Fut: Future<Output = Result<T, ActivityError>> + Send,
{
    let timed = tokio::time::timeout(options.timeout, fut);
    tokio::pin!(timed);

    let Some(interval) = options.heartbeat_interval else {
        return flatten(timed.await, options.timeout);
    };

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; consume it so heartbeats start one
    // interval in.
    ticker.tick().await;

    loop {
        tokio::select! {
            outcome = &mut timed => return flatten(outcome, options.timeout),
            _ = ticker.tick() => {
                events.emit(RunEvent::heartbeat(key.to_string(), attempt)).await;
            }
        }
    }
}

fn flatten<T>(
    outcome: Result<Result<T, ActivityError>, tokio::time::error::Elapsed>,
    timeout: Duration,
) -> Result<T, ActivityError> {
    match outcome {
        Ok(inner) => inner,
        Err(_) => Err(ActivityError::Transient(format!(
            "timed out after {timeout:?}"
        ))),
    }
}
