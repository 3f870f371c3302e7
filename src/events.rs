//! Run events for real-time streaming and status notifications.
//!
//! The [`RunEvent`] enum represents everything observable during a run.
//! Events are streamed through an async channel for live consumers, wrapped
//! in a [`RunEventEnvelope`] carrying ordering and idempotency metadata.
//!
//! A typical event sequence looks like:
//! 1. `StatusChanged` - run moves from pending to running
//! 2. `IterationStarted` / `AssistantMessage` / `ToolCallStart` /
//!    `ToolCallEnd` - loop progress
//! 3. `EvaluatorVerdict` - goal judgment after a tool batch
//! 4. `Done` - terminal outcome, or `Error` before an abnormal stop
//!
//! Separately from the stream, coarse lifecycle transitions are pushed to an
//! [`EventPublisher`] for external notification systems.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::types::{TaskId, TerminationReason, ToolResult};

/// Coarse lifecycle status of a task run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A lifecycle transition pushed to external subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub task_id: TaskId,
    pub old_status: Option<TaskStatus>,
    pub new_status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Destination for lifecycle transitions (webhooks, queues, dashboards).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Deliver one status update.
    ///
    /// # Errors
    /// Returns an error if delivery fails. Failures are logged by the
    /// runner and never affect the run itself.
    async fn publish(&self, update: StatusUpdate) -> anyhow::Result<()>;
}

/// Publisher that drops every update. The default when none is configured.
pub struct NullPublisher;

#[async_trait]
impl EventPublisher for NullPublisher {
    async fn publish(&self, _update: StatusUpdate) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Events emitted by the runner during execution.
/// These are streamed to the client for real-time UI updates.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A reasoning iteration is about to call the model
    IterationStarted { task_id: TaskId, iteration: u32 },

    /// Complete assistant text for this iteration
    AssistantMessage { message_id: String, text: String },

    /// The runner is about to execute a tool
    ToolCallStart {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolCallEnd {
        id: String,
        name: String,
        result: ToolResult,
    },

    /// Liveness signal from a long-running activity
    ActivityHeartbeat { key: String, attempt: u32 },

    /// The goal evaluator rendered a verdict
    EvaluatorVerdict { met: bool, rationale: String },

    /// Coarse lifecycle transition
    StatusChanged {
        task_id: TaskId,
        old_status: Option<TaskStatus>,
        new_status: TaskStatus,
    },

    /// The run reached a terminal state
    Done {
        task_id: TaskId,
        termination_reason: TerminationReason,
        iterations_used: u32,
        total_cost: f64,
    },

    /// An error occurred during execution
    Error { message: String, recoverable: bool },
}

impl RunEvent {
    #[must_use]
    pub const fn iteration_started(task_id: TaskId, iteration: u32) -> Self {
        Self::IterationStarted { task_id, iteration }
    }

    #[must_use]
    pub fn assistant_message(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::AssistantMessage {
            message_id: message_id.into(),
            text: text.into(),
        }
    }

    #[must_use]
    pub fn tool_call_start(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self::ToolCallStart {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    #[must_use]
    pub fn tool_call_end(id: impl Into<String>, name: impl Into<String>, result: ToolResult) -> Self {
        Self::ToolCallEnd {
            id: id.into(),
            name: name.into(),
            result,
        }
    }

    #[must_use]
    pub fn heartbeat(key: impl Into<String>, attempt: u32) -> Self {
        Self::ActivityHeartbeat {
            key: key.into(),
            attempt,
        }
    }

    #[must_use]
    pub fn verdict(met: bool, rationale: impl Into<String>) -> Self {
        Self::EvaluatorVerdict {
            met,
            rationale: rationale.into(),
        }
    }

    #[must_use]
    pub const fn status_changed(
        task_id: TaskId,
        old_status: Option<TaskStatus>,
        new_status: TaskStatus,
    ) -> Self {
        Self::StatusChanged {
            task_id,
            old_status,
            new_status,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>, recoverable: bool) -> Self {
        Self::Error {
            message: message.into(),
            recoverable,
        }
    }

    #[must_use]
    pub fn runner_error(error: &crate::types::RunnerError) -> Self {
        Self::Error {
            message: error.message.clone(),
            recoverable: error.recoverable,
        }
    }
}

/// Monotonically increasing per-run counter for event ordering.
///
/// Each run creates a fresh counter starting at 0. The counter is
/// `Arc`-wrapped so it can be shared across tasks.
///
/// `Ordering::Relaxed` is sufficient because the mpsc channel provides the
/// happens-before ordering guarantee between sender and receiver.
#[derive(Clone, Debug)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    /// Create a new counter starting at 0.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    /// Get the next sequence number, incrementing the counter.
    #[must_use]
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Envelope wrapping every [`RunEvent`] with idempotency metadata.
///
/// Consumers can use `event_id` for deduplication on retry, `sequence` for
/// ordering after persistence, and `timestamp` for display.
///
/// The `event` field is flattened in JSON so that `event_id`, `sequence`,
/// `timestamp`, and the event's `type` discriminant all appear at the same
/// level.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunEventEnvelope {
    /// Unique identifier (UUID v4) for this event emission.
    pub event_id: uuid::Uuid,
    /// Monotonically increasing sequence number within a single run.
    pub sequence: u64,
    /// UTC timestamp of when the event was emitted.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// The actual event payload.
    #[serde(flatten)]
    pub event: RunEvent,
}

impl RunEventEnvelope {
    /// Wrap a [`RunEvent`] in an envelope, assigning it a unique ID, the
    /// next sequence number, and the current UTC timestamp.
    #[must_use]
    pub fn wrap(event: RunEvent, seq: &SequenceCounter) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4(),
            sequence: seq.next(),
            timestamp: OffsetDateTime::now_utc(),
            event,
        }
    }
}

/// Shared handle for emitting envelope-wrapped events to the run's channel.
///
/// Sending is resilient to slow or disconnected consumers:
///
/// 1. First attempts a non-blocking send via `try_send`
/// 2. If the channel is full, waits up to 30 seconds for space
/// 3. If the channel is closed, logs and continues without blocking
/// 4. On timeout, logs an error and continues
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<RunEventEnvelope>,
    seq: SequenceCounter,
}

impl EventSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<RunEventEnvelope>, seq: SequenceCounter) -> Self {
        Self { tx, seq }
    }

    pub async fn emit(&self, event: RunEvent) {
        let envelope = RunEventEnvelope::wrap(event, &self.seq);

        // Try non-blocking send first to detect backpressure
        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                log::debug!("Event channel full, waiting for consumer...");
                match tokio::time::timeout(
                    std::time::Duration::from_secs(30),
                    self.tx.send(envelope),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        log::warn!("Event channel closed while sending - consumer disconnected");
                    }
                    Err(_) => {
                        log::error!("Timeout waiting to send event - consumer may be deadlocked");
                    }
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Event channel closed - consumer disconnected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample_event() -> RunEvent {
        RunEvent::assistant_message("msg_1", "hello")
    }

    #[test]
    fn sequence_counter_starts_at_zero_and_increments() {
        let seq = SequenceCounter::new();
        assert_eq!(seq.next(), 0);
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
    }

    #[test]
    fn clones_share_the_same_counter() {
        let seq = SequenceCounter::new();
        let clone = seq.clone();
        assert_eq!(seq.next(), 0);
        assert_eq!(clone.next(), 1);
        assert_eq!(seq.next(), 2);
    }

    #[test]
    fn wrap_assigns_unique_event_ids() {
        let seq = SequenceCounter::new();
        let ids: HashSet<_> = (0..50)
            .map(|_| RunEventEnvelope::wrap(sample_event(), &seq).event_id)
            .collect();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn envelope_flattens_event_fields() {
        let seq = SequenceCounter::new();
        let envelope = RunEventEnvelope::wrap(sample_event(), &seq);
        let json = serde_json::to_value(&envelope).expect("serialize");

        assert_eq!(json["type"], "assistant_message");
        assert_eq!(json["text"], "hello");
        assert_eq!(json["sequence"], 0);
        assert!(json["event_id"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn sink_delivers_in_sequence_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = EventSink::new(tx, SequenceCounter::new());

        sink.emit(RunEvent::heartbeat("iter0:model:0", 1)).await;
        sink.emit(RunEvent::verdict(false, "not yet")).await;

        let first = rx.recv().await.expect("first event");
        let second = rx.recv().await.expect("second event");
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert!(matches!(first.event, RunEvent::ActivityHeartbeat { .. }));
        assert!(matches!(second.event, RunEvent::EvaluatorVerdict { .. }));
    }

    #[test]
    fn status_update_serializes_without_empty_message() {
        let update = StatusUpdate {
            task_id: TaskId::from_string("t1"),
            old_status: Some(TaskStatus::Pending),
            new_status: TaskStatus::Running,
            message: None,
        };
        let json = serde_json::to_value(&update).expect("serialize");
        assert!(json.get("message").is_none());
        assert_eq!(json["new_status"], "running");
    }
}
