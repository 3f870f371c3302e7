//! Recovery of tool calls from malformed model output.
//!
//! Some models emit tool invocations as JSON blobs inside the assistant text
//! instead of using the structured tool-call channel. This module scans the
//! text for balanced JSON objects matching the known invocation shapes,
//! extracts them as [`ToolCall`]s, and returns the text with the matched
//! spans removed.
//!
//! Recognized shapes:
//!
//! - nested: `{"action": {"name": "..."}, "arguments": {...}}`
//! - flat: `{"name": "...", "arguments": {...}}`, optionally followed by a
//!   stray `undefined` token
//!
//! Extraction is idempotent: running the scan over the cleaned text yields
//! nothing, because every matching span has already been removed.

use log::debug;
use serde_json::{Map, Value};

use crate::transcript::ToolCall;

/// Scan `content` for embedded tool invocations.
///
/// Returns the extracted calls in the order they appear, each with a fresh
/// unique id, and the content with the matched spans (including any stray
/// trailing `undefined`) removed. Prose outside the matched spans is
/// preserved verbatim. Content with no embedded invocations comes back
/// unchanged with an empty call list.
#[must_use]
pub fn recover_tool_calls(content: &str) -> (Vec<ToolCall>, String) {
    let mut calls = Vec::new();
    let mut cleaned = String::with_capacity(content.len());
    let mut i = 0;

    while i < content.len() {
        if content[i..].starts_with('{') {
            if let Some(len) = balanced_object_len(&content[i..]) {
                let candidate = &content[i..i + len];
                if let Some(call) = parse_invocation(candidate) {
                    debug!("recovered embedded tool call name={}", call.function_name);
                    calls.push(call);
                    i += len;
                    i = skip_stray_undefined(content, i);
                    continue;
                }
            }
        }
        // Not the start of a matching object: keep the char and move on.
        // Advancing a single char (not the whole candidate) lets nested
        // objects inside non-matching ones still be found.
        let ch = content[i..].chars().next().unwrap_or('\u{0}');
        cleaned.push(ch);
        i += ch.len_utf8().max(1);
    }

    (calls, cleaned)
}

/// Byte length of the balanced JSON object starting at the beginning of `s`,
/// or `None` if the braces never balance. String literals and escapes are
/// respected so braces inside strings do not count.
pub(crate) fn balanced_object_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(offset + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a candidate span as one of the known invocation shapes.
fn parse_invocation(candidate: &str) -> Option<ToolCall> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let obj = value.as_object()?;
    let arguments = obj.get("arguments")?.as_object()?.clone();

    // Nested shape takes precedence; a flat `name` next to an `action`
    // object would be ambiguous otherwise.
    let name = match obj.get("action") {
        Some(action) => action.as_object()?.get("name")?.as_str()?,
        None => obj.get("name")?.as_str()?,
    };
    if name.is_empty() {
        return None;
    }

    Some(ToolCall::new(name, arguments))
}

/// Skip a stray `undefined` token (with any leading whitespace) directly
/// after a matched span, as emitted by some broken templating paths. Only a
/// whole token counts; `undefinedly` is left alone.
fn skip_stray_undefined(content: &str, from: usize) -> usize {
    let rest = &content[from..];
    let trimmed = rest.trim_start();
    if let Some(after) = trimmed.strip_prefix("undefined") {
        let at_boundary = after
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric() && c != '_');
        if at_boundary {
            return content.len() - after.len();
        }
    }
    from
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn extracts_nested_shape_with_trailing_undefined() {
        let content = r#"{"action":{"name":"task_complete"},"arguments":{}}undefined"#;
        let (calls, cleaned) = recover_tool_calls(content);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_name, "task_complete");
        assert!(calls[0].arguments.is_empty());
        assert_eq!(cleaned.trim(), "");
    }

    #[test]
    fn extracts_flat_shape_with_arguments() {
        let content = r#"Let me check. {"name":"get_weather","arguments":{"city":"Lisbon"}}"#;
        let (calls, cleaned) = recover_tool_calls(content);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_name, "get_weather");
        assert_eq!(calls[0].arguments, args(&[("city", Value::from("Lisbon"))]));
        assert_eq!(cleaned.trim(), "Let me check.");
    }

    #[test]
    fn extracts_multiple_invocations_in_order() {
        let content = concat!(
            "first ",
            r#"{"name":"alpha","arguments":{"n":1}}"#,
            " then ",
            r#"{"action":{"name":"beta"},"arguments":{"n":2}}"#,
            " done"
        );
        let (calls, cleaned) = recover_tool_calls(content);

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function_name, "alpha");
        assert_eq!(calls[1].function_name, "beta");
        assert_eq!(cleaned, "first  then  done");
    }

    #[test]
    fn extraction_is_idempotent() {
        let content = r#"intro {"name":"alpha","arguments":{}} outro {"x": 1}"#;
        let (calls, cleaned) = recover_tool_calls(content);
        assert_eq!(calls.len(), 1);

        let (again, cleaned_again) = recover_tool_calls(&cleaned);
        assert!(again.is_empty());
        assert_eq!(cleaned_again, cleaned);
    }

    #[test]
    fn plain_prose_passes_through_unchanged() {
        let content = "The weather in Lisbon is sunny, 21 degrees.";
        let (calls, cleaned) = recover_tool_calls(content);
        assert!(calls.is_empty());
        assert_eq!(cleaned, content);
    }

    #[test]
    fn json_without_invocation_shape_is_preserved() {
        let content = r#"Result: {"temperature": 21, "city": "Lisbon"}"#;
        let (calls, cleaned) = recover_tool_calls(content);
        assert!(calls.is_empty());
        assert_eq!(cleaned, content);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scan() {
        let content = r#"{"name":"echo","arguments":{"text":"a } b { c"}}"#;
        let (calls, cleaned) = recover_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["text"], Value::from("a } b { c"));
        assert_eq!(cleaned, "");
    }

    #[test]
    fn unbalanced_braces_are_left_alone() {
        let content = r#"broken {"name":"alpha","arguments":{"#;
        let (calls, cleaned) = recover_tool_calls(content);
        assert!(calls.is_empty());
        assert_eq!(cleaned, content);
    }

    #[test]
    fn recovered_calls_get_fresh_ids() {
        let content = r#"{"name":"alpha","arguments":{}} {"name":"alpha","arguments":{}}"#;
        let (calls, _) = recover_tool_calls(content);
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn flat_shape_trailing_undefined_is_stripped() {
        let content = r#"On it. {"name":"get_weather","arguments":{"city":"Porto"}} undefined"#;
        let (calls, cleaned) = recover_tool_calls(content);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_name, "get_weather");
        assert_eq!(cleaned.trim(), "On it.");
    }

    #[test]
    fn undefined_prefix_of_a_longer_word_is_kept() {
        let content = r#"{"name":"alpha","arguments":{}}undefinedly vague"#;
        let (calls, cleaned) = recover_tool_calls(content);

        assert_eq!(calls.len(), 1);
        assert_eq!(cleaned, "undefinedly vague");
    }

    #[test]
    fn undefined_not_following_a_match_is_kept() {
        let content = "the value is undefined here";
        let (calls, cleaned) = recover_tool_calls(content);
        assert!(calls.is_empty());
        assert_eq!(cleaned, content);
    }

    #[test]
    fn empty_name_is_not_an_invocation() {
        let content = r#"{"name":"","arguments":{}}"#;
        let (calls, cleaned) = recover_tool_calls(content);
        assert!(calls.is_empty());
        assert_eq!(cleaned, content);
    }
}
