//! Conversation model: roles, messages, and tool calls.
//!
//! The transcript is an ordered `Vec<Message>` that grows monotonically over
//! a run. Tool calls ride on assistant messages; each call is answered by
//! exactly one tool message before the next model call.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Speaker role for a transcript message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A structured request to invoke a tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique id correlating this call with its result.
    pub id: String,
    /// Registered name of the tool to invoke.
    pub function_name: String,
    /// Arguments object passed to the tool.
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Create a call with a fresh unique id.
    #[must_use]
    pub fn new(function_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4()),
            function_name: function_name.into(),
            arguments,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// One entry in the conversation transcript.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Text content. May be empty for assistant messages that only carry
    /// tool calls.
    pub content: String,
    /// Tool calls requested by an assistant message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool name, set on tool-result messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Id of the tool call this message answers, set on tool-result messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: None,
            name: None,
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
            name: None,
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: None,
            name: None,
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: if calls.is_empty() { None } else { Some(calls) },
            name: None,
            tool_call_id: None,
        }
    }

    /// A tool-result message answering `tool_call_id`.
    #[must_use]
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            name: Some(name.into()),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Tool calls carried by this message, empty when none.
    #[must_use]
    pub fn calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_round_trips_through_serde() {
        let mut arguments = Map::new();
        arguments.insert("city".to_string(), Value::from("Lisbon"));
        arguments.insert("units".to_string(), Value::from("metric"));
        let call = ToolCall::new("get_weather", arguments);

        let json = serde_json::to_string(&call).expect("serialize");
        let back: ToolCall = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(back, call);
        assert_eq!(back.function_name, "get_weather");
        assert_eq!(back.arguments["city"], Value::from("Lisbon"));
    }

    #[test]
    fn tool_call_round_trips_nested_and_empty_arguments() {
        let value = serde_json::json!({
            "filters": { "region": "EU", "limits": { "max": 10 } },
            "tags": ["a", "b"],
        });
        let serde_json::Value::Object(arguments) = value else {
            unreachable!()
        };
        let nested = ToolCall::new("search", arguments);
        let json = serde_json::to_string(&nested).expect("serialize");
        let back: ToolCall = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, nested);
        assert_eq!(back.arguments["filters"]["limits"]["max"], Value::from(10));

        let empty = ToolCall::new("noop", Map::new());
        let json = serde_json::to_string(&empty).expect("serialize");
        let back: ToolCall = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, empty);
        assert!(back.arguments.is_empty());
    }

    #[test]
    fn fresh_tool_calls_get_unique_ids() {
        let a = ToolCall::new("t", Map::new());
        let b = ToolCall::new("t", Map::new());
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("call_"));
    }

    #[test]
    fn assistant_with_empty_calls_carries_none() {
        let msg = Message::assistant_with_calls("hello", vec![]);
        assert!(msg.tool_calls.is_none());
        assert!(msg.calls().is_empty());
    }

    #[test]
    fn tool_result_message_links_back_to_call() {
        let msg = Message::tool_result("call_1", "get_weather", r#"{"temp":21}"#);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("get_weather"));
    }
}
