//! Goal progress evaluation.
//!
//! After each tool batch (when the model did not signal completion itself),
//! the runner asks a [`GoalEvaluator`] whether the transcript shows the goal
//! has been met. The evaluator is advisory: a failure to evaluate is treated
//! as "not met" and the run continues.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::sync::Arc;

use crate::provider::ModelProvider;
use crate::recovery::balanced_object_len;
use crate::transcript::{Message, Role};
use crate::types::AgentGoal;

/// Judgment on whether the goal has been achieved.
#[derive(Clone, Debug, Deserialize)]
pub struct GoalVerdict {
    pub met: bool,
    pub rationale: String,
}

/// Judges goal completion from the transcript.
#[async_trait]
pub trait GoalEvaluator: Send + Sync {
    /// Render a verdict for the goal given the transcript so far.
    ///
    /// # Errors
    /// Returns an error if the verdict cannot be produced. The runner treats
    /// evaluation errors as "not met".
    async fn evaluate(&self, goal: &AgentGoal, transcript: &[Message]) -> Result<GoalVerdict>;
}

/// Evaluator that never judges the goal met. The default when none is
/// configured: termination is then driven entirely by the completion tool
/// and the iteration limit.
pub struct NullEvaluator;

#[async_trait]
impl GoalEvaluator for NullEvaluator {
    async fn evaluate(&self, _goal: &AgentGoal, _transcript: &[Message]) -> Result<GoalVerdict> {
        Ok(GoalVerdict {
            met: false,
            rationale: "no evaluator configured".to_string(),
        })
    }
}

/// Evaluator that asks a model to judge the transcript against the goal's
/// success criteria.
pub struct ModelGoalEvaluator<P> {
    provider: Arc<P>,
    /// Only the most recent messages are shown to the judge.
    max_transcript_messages: usize,
}

impl<P: ModelProvider> ModelGoalEvaluator<P> {
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            max_transcript_messages: 40,
        }
    }

    #[must_use]
    pub const fn with_max_transcript_messages(mut self, max: usize) -> Self {
        self.max_transcript_messages = max;
        self
    }

    fn build_prompt(&self, goal: &AgentGoal, transcript: &[Message]) -> Vec<Message> {
        let mut prompt = String::new();
        prompt.push_str("Goal:\n");
        prompt.push_str(&goal.description);
        prompt.push_str("\n\nSuccess criteria:\n");
        if goal.success_criteria.is_empty() {
            prompt.push_str("(none stated; judge against the goal description)\n");
        } else {
            for (i, criterion) in goal.success_criteria.iter().enumerate() {
                prompt.push_str(&format!("{}. {criterion}\n", i + 1));
            }
        }
        prompt.push_str("\nTranscript:\n");

        let tail_start = transcript.len().saturating_sub(self.max_transcript_messages);
        for message in &transcript[tail_start..] {
            let speaker = match message.role {
                Role::System => continue,
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            match message.name.as_deref() {
                Some(name) => prompt.push_str(&format!("[{speaker} {name}] {}\n", message.content)),
                None => prompt.push_str(&format!("[{speaker}] {}\n", message.content)),
            }
            for call in message.calls() {
                prompt.push_str(&format!("[assistant calls {}]\n", call.function_name));
            }
        }

        vec![
            Message::system(
                "You judge whether an agent has achieved its goal. Respond with a \
                 single JSON object: {\"met\": true|false, \"rationale\": \"...\"}. \
                 Judge strictly: every success criterion must be satisfied by \
                 evidence in the transcript.",
            ),
            Message::user(prompt),
        ]
    }
}

#[async_trait]
impl<P: ModelProvider> GoalEvaluator for ModelGoalEvaluator<P> {
    async fn evaluate(&self, goal: &AgentGoal, transcript: &[Message]) -> Result<GoalVerdict> {
        let prompt = self.build_prompt(goal, transcript);
        let reply = self
            .provider
            .complete(&prompt, &[])
            .await
            .context("evaluator model call failed")?;

        let verdict = parse_verdict(&reply.message.content)
            .context("evaluator reply did not contain a verdict")?;
        debug!("goal verdict met={} rationale={}", verdict.met, verdict.rationale);
        Ok(verdict)
    }
}

/// Parse a verdict from model text: either the whole reply is the JSON
/// object, or the first balanced object embedded in it is.
fn parse_verdict(content: &str) -> Option<GoalVerdict> {
    let trimmed = content.trim();
    if let Ok(verdict) = serde_json::from_str::<GoalVerdict>(trimmed) {
        return Some(verdict);
    }

    let mut i = 0;
    while i < trimmed.len() {
        if trimmed[i..].starts_with('{') {
            if let Some(len) = balanced_object_len(&trimmed[i..]) {
                if let Ok(verdict) = serde_json::from_str::<GoalVerdict>(&trimmed[i..i + len]) {
                    return Some(verdict);
                }
            }
        }
        i += trimmed[i..].chars().next().map_or(1, char::len_utf8);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ModelReply, ProviderError};
    use crate::tools::ToolSchema;

    #[test]
    fn parses_bare_verdict_json() {
        let verdict = parse_verdict(r#"{"met": true, "rationale": "all done"}"#).unwrap();
        assert!(verdict.met);
        assert_eq!(verdict.rationale, "all done");
    }

    #[test]
    fn parses_verdict_embedded_in_prose() {
        let content = r#"Looking at the transcript, {"met": false, "rationale": "no data yet"} is my judgment."#;
        let verdict = parse_verdict(content).unwrap();
        assert!(!verdict.met);
        assert_eq!(verdict.rationale, "no data yet");
    }

    #[test]
    fn rejects_text_without_verdict() {
        assert!(parse_verdict("I think it went well.").is_none());
        assert!(parse_verdict(r#"{"score": 5}"#).is_none());
    }

    struct ScriptedJudge(&'static str);

    #[async_trait]
    impl ModelProvider for ScriptedJudge {
        async fn complete(
            &self,
            _transcript: &[Message],
            _tools: &[ToolSchema],
        ) -> Result<ModelReply, ProviderError> {
            Ok(ModelReply::new(Message::assistant(self.0), 0.001))
        }

        fn model(&self) -> &str {
            "scripted"
        }

        fn provider(&self) -> &'static str {
            "test"
        }
    }

    #[tokio::test]
    async fn model_evaluator_returns_parsed_verdict() {
        let judge = ModelGoalEvaluator::new(Arc::new(ScriptedJudge(
            r#"{"met": true, "rationale": "forecast delivered"}"#,
        )));
        let goal = AgentGoal::new("get the forecast", 5)
            .with_criteria(vec!["a forecast is present".to_string()]);
        let transcript = vec![
            Message::system("sys"),
            Message::assistant("Sunny, 21C"),
        ];

        let verdict = judge.evaluate(&goal, &transcript).await.unwrap();
        assert!(verdict.met);
        assert_eq!(verdict.rationale, "forecast delivered");
    }

    #[tokio::test]
    async fn unparseable_reply_is_an_error() {
        let judge = ModelGoalEvaluator::new(Arc::new(ScriptedJudge("looks good to me")));
        let goal = AgentGoal::new("g", 5);

        let result = judge.evaluate(&goal, &[]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn null_evaluator_never_terminates() {
        let verdict = NullEvaluator
            .evaluate(&AgentGoal::new("g", 5), &[])
            .await
            .unwrap();
        assert!(!verdict.met);
    }
}
