use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::completion::COMPLETION_TOOL_NAME;
use crate::evaluator::{GoalEvaluator, GoalVerdict};
use crate::provider::{ModelProvider, ModelReply, ProviderError, ProviderErrorKind};
use crate::tools::{DynamicToolName, Tool, ToolContext, ToolSchema};
use crate::transcript::{Message, ToolCall};
use crate::types::AgentGoal;

// ===================
// Mock Model Provider
// ===================

pub(crate) struct MockProvider {
    replies: RwLock<Vec<Result<ModelReply, ProviderError>>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub(crate) fn new(replies: Vec<Result<ModelReply, ProviderError>>) -> Self {
        Self {
            replies: RwLock::new(replies),
            call_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// A plain-text assistant reply.
    pub(crate) fn text(content: &str) -> Result<ModelReply, ProviderError> {
        Ok(ModelReply::new(Message::assistant(content), 0.01))
    }

    /// A text reply with an explicit cost.
    pub(crate) fn text_with_cost(content: &str, cost: f64) -> Result<ModelReply, ProviderError> {
        Ok(ModelReply::new(Message::assistant(content), cost))
    }

    /// An assistant reply carrying structured tool calls.
    pub(crate) fn tool_calls(calls: Vec<(&str, &str, Value)>) -> Result<ModelReply, ProviderError> {
        Self::text_and_tool_calls("", calls)
    }

    /// An assistant reply with both text content and structured tool calls.
    pub(crate) fn text_and_tool_calls(
        content: &str,
        calls: Vec<(&str, &str, Value)>,
    ) -> Result<ModelReply, ProviderError> {
        let calls = calls
            .into_iter()
            .map(|(id, name, arguments)| {
                let Value::Object(map) = arguments else {
                    panic!("tool arguments must be an object")
                };
                ToolCall::new(name, map).with_id(id)
            })
            .collect();
        Ok(ModelReply::new(
            Message::assistant_with_calls(content, calls),
            0.01,
        ))
    }

    /// A structured call to the completion tool.
    pub(crate) fn complete(result: &str) -> Result<ModelReply, ProviderError> {
        Self::tool_calls(vec![(
            "call_done",
            COMPLETION_TOOL_NAME,
            json!({
                "summary": "work finished",
                "reasoning": "all criteria satisfied",
                "result": result,
            }),
        )])
    }

    pub(crate) fn error(kind: ProviderErrorKind, message: &str) -> Result<ModelReply, ProviderError> {
        Err(ProviderError::new(kind, message))
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn complete(
        &self,
        _transcript: &[Message],
        _tools: &[ToolSchema],
    ) -> Result<ModelReply, ProviderError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        let replies = self.replies.read().expect("lock poisoned");
        if idx < replies.len() {
            replies[idx].clone()
        } else {
            // Default: keep talking without tools
            Ok(ModelReply::new(Message::assistant("Done"), 0.01))
        }
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}

// ===================
// Test context and tools
// ===================

/// App context shared by test tools: a completion-order log.
#[derive(Clone, Default)]
pub(crate) struct TestCtx {
    pub(crate) log: Arc<Mutex<Vec<String>>>,
}

impl TestCtx {
    pub(crate) fn entries(&self) -> Vec<String> {
        self.log.lock().expect("lock poisoned").clone()
    }
}

/// Sleeps for its configured duration, then records its name.
pub(crate) struct SleepTool {
    pub(crate) name: &'static str,
    pub(crate) delay: Duration,
}

impl Tool<TestCtx> for SleepTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new(self.name)
    }

    fn description(&self) -> &'static str {
        "Sleeps, then reports its own name"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(
        &self,
        ctx: &ToolContext<TestCtx>,
        _arguments: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        tokio::time::sleep(self.delay).await;
        ctx.app.log.lock().expect("lock poisoned").push(self.name.to_string());
        let mut payload = Map::new();
        payload.insert("tool".to_string(), Value::from(self.name));
        Ok(payload)
    }
}

/// Like [`SleepTool`], but exclusive; logs entry and exit so tests can
/// detect overlapping execution.
pub(crate) struct ExclusiveSleepTool {
    pub(crate) name: &'static str,
    pub(crate) delay: Duration,
}

impl Tool<TestCtx> for ExclusiveSleepTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new(self.name)
    }

    fn description(&self) -> &'static str {
        "Sleeps while holding the exclusivity lock"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn exclusive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        ctx: &ToolContext<TestCtx>,
        _arguments: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        ctx.app
            .log
            .lock()
            .expect("lock poisoned")
            .push(format!("{} start", self.name));
        tokio::time::sleep(self.delay).await;
        ctx.app
            .log
            .lock()
            .expect("lock poisoned")
            .push(format!("{} end", self.name));
        let mut payload = Map::new();
        payload.insert("tool".to_string(), Value::from(self.name));
        Ok(payload)
    }
}

/// Always fails with a handler error.
pub(crate) struct BoomTool;

impl Tool<TestCtx> for BoomTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("boom")
    }

    fn description(&self) -> &'static str {
        "Always fails"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(
        &self,
        _ctx: &ToolContext<TestCtx>,
        _arguments: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        anyhow::bail!("boom tool exploded")
    }
}

// ===================
// Scripted evaluator
// ===================

/// Returns "not met" until the configured call number, then "met".
pub(crate) struct ScriptedEvaluator {
    met_on_call: usize,
    calls: AtomicUsize,
}

impl ScriptedEvaluator {
    pub(crate) fn met_on_call(n: usize) -> Self {
        Self {
            met_on_call: n,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GoalEvaluator for ScriptedEvaluator {
    async fn evaluate(&self, _goal: &AgentGoal, _transcript: &[Message]) -> Result<GoalVerdict> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.met_on_call {
            Ok(GoalVerdict {
                met: true,
                rationale: "criteria satisfied".to_string(),
            })
        } else {
            Ok(GoalVerdict {
                met: false,
                rationale: "not there yet".to_string(),
            })
        }
    }
}
