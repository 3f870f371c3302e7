//! Model provider abstraction.
//!
//! The runner talks to a language model through the [`ModelProvider`] trait.
//! Provider failures carry a [`ProviderErrorKind`] so the activity layer can
//! tell retryable transport blips from permanent conditions like bad
//! credentials, and [`ProviderErrorStats`] aggregates the kinds seen over a
//! single run for the terminal rationale.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::tools::ToolSchema;
use crate::transcript::Message;

/// One model completion: the assistant message plus what it cost.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelReply {
    pub message: Message,
    /// Monetary cost of the call. Never negative.
    pub cost: f64,
}

impl ModelReply {
    #[must_use]
    pub fn new(message: Message, cost: f64) -> Self {
        Self {
            message,
            cost: cost.max(0.0),
        }
    }
}

/// Classified provider failure kinds.
///
/// Only [`ProviderErrorKind::Transient`] is retryable: auth failures, quota
/// exhaustion, and unknown models will not heal on their own, and rate
/// limits are handled by backing off at the activity layer only when the
/// provider reports them as transient.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    AuthFailure,
    RateLimited,
    QuotaExceeded,
    ModelNotFound,
    Transient,
}

impl ProviderErrorKind {
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthFailure => "auth_failure",
            Self::RateLimited => "rate_limited",
            Self::QuotaExceeded => "quota_exceeded",
            Self::ModelNotFound => "model_not_found",
            Self::Transient => "transient",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned from a model provider.
#[derive(Clone, Debug)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    #[must_use]
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transient, message)
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ProviderError {}

/// A language model the runner can drive.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Request a completion for the transcript with the given tools
    /// advertised.
    ///
    /// # Errors
    /// Returns a classified [`ProviderError`] on failure.
    async fn complete(
        &self,
        transcript: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ModelReply, ProviderError>;

    /// Model identifier, for logging.
    fn model(&self) -> &str;

    /// Provider name, for logging.
    fn provider(&self) -> &'static str;
}

#[async_trait]
impl<T: ModelProvider + ?Sized> ModelProvider for Arc<T> {
    async fn complete(
        &self,
        transcript: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ModelReply, ProviderError> {
        (**self).complete(transcript, tools).await
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    fn provider(&self) -> &'static str {
        (**self).provider()
    }
}

/// Per-run aggregation of provider error kinds.
///
/// Scoped to a single run and injected where needed; the counts feed the
/// terminal rationale when a run fails on provider errors.
#[derive(Debug, Default)]
pub struct ProviderErrorStats {
    counts: Mutex<HashMap<ProviderErrorKind, u32>>,
}

impl ProviderErrorStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: ProviderErrorKind) {
        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(kind).or_insert(0) += 1;
        }
    }

    #[must_use]
    pub fn count(&self, kind: ProviderErrorKind) -> u32 {
        self.counts
            .lock()
            .ok()
            .and_then(|counts| counts.get(&kind).copied())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.counts
            .lock()
            .map(|counts| counts.values().sum())
            .unwrap_or(0)
    }

    /// Human-readable summary like `auth_failure=1, transient=3`, or `None`
    /// when no errors were recorded.
    #[must_use]
    pub fn summary(&self) -> Option<String> {
        let counts = self.counts.lock().ok()?;
        if counts.is_empty() {
            return None;
        }
        let mut entries: Vec<_> = counts.iter().collect();
        entries.sort_by_key(|(kind, _)| kind.as_str());
        Some(
            entries
                .into_iter()
                .map(|(kind, n)| format!("{kind}={n}"))
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}
