//! Tool-call extraction from raw model output.
//!
//! Models wrap their JSON tool call in free-form reasoning, so the parser first tries
//! the span between the first `{` and the last `}`, and if that is not a tool object,
//! scans for every `{"tool": "..."` start and keeps the longest object that parses.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::tools::{ToolInvocation, ToolKind};

static TOOL_OBJECT_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{\s*"tool"\s*:\s*""#).expect("tool pattern is valid"));

/// A tool object was found but cannot be turned into an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    #[error("tool call must be a JSON object with a string \"tool\" field")]
    NotAnObject,

    #[error("Unknown tool: \"{name}\". Available tools: {}", ToolKind::names().join(", "))]
    UnknownTool { name: String },

    #[error("Invalid parameters for {tool}: {message}")]
    InvalidParameters { tool: String, message: String },
}

impl InvocationError {
    /// Tool name to attribute the failure to in progress events.
    pub fn tool_name(&self) -> &str {
        match self {
            InvocationError::NotAnObject => "invalid_tool_call",
            InvocationError::UnknownTool { name } => name,
            InvocationError::InvalidParameters { tool, .. } => tool,
        }
    }
}

/// Parse model output.
///
/// `Ok(None)` means the text carries no tool call and is a final answer candidate.
pub fn parse_tool_call(text: &str) -> Result<Option<ToolInvocation>, InvocationError> {
    match extract_tool_object(text) {
        Some(value) => to_invocation(value).map(Some),
        None => Ok(None),
    }
}

/// Find the JSON object carrying a `tool` field, if any.
pub fn extract_tool_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let first = trimmed.find('{')?;
    let last = trimmed.rfind('}')?;
    if last <= first {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(&trimmed[first..=last]) {
        if has_tool_field(&value) {
            return Some(value);
        }
    }

    longest_embedded_tool_object(trimmed)
}

fn has_tool_field(value: &Value) -> bool {
    value.as_object().is_some_and(|o| o.contains_key("tool"))
}

/// Scan every `{"tool": "` start and keep the longest object that parses.
fn longest_embedded_tool_object(text: &str) -> Option<Value> {
    let mut best: Option<(usize, Value)> = None;
    for start in TOOL_OBJECT_START.find_iter(text).map(|m| m.start()) {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        let Some(Ok(value)) = stream.next() else {
            continue;
        };
        let len = stream.byte_offset();
        if has_tool_field(&value) && best.as_ref().map_or(true, |(l, _)| len > *l) {
            best = Some((len, value));
        }
    }
    best.map(|(_, value)| value)
}

fn to_invocation(value: Value) -> Result<ToolInvocation, InvocationError> {
    let name = value
        .get("tool")
        .and_then(Value::as_str)
        .ok_or(InvocationError::NotAnObject)?
        .to_string();

    if ToolKind::from_name(&name).is_none() {
        return Err(InvocationError::UnknownTool { name });
    }

    serde_json::from_value(value).map_err(|e| InvocationError::InvalidParameters {
        tool: name,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_call_surrounded_by_prose() {
        let parsed =
            parse_tool_call(r#"I will fix this. {"tool":"read_file","path":"a.ts"} done."#).unwrap();
        assert_eq!(
            parsed,
            Some(ToolInvocation::ReadFile {
                path: "a.ts".to_string(),
                start_line: None,
                end_line: None,
            })
        );
    }

    #[test]
    fn plain_text_is_not_a_call() {
        assert_eq!(parse_tool_call("All done, the bug is fixed.").unwrap(), None);
        assert_eq!(parse_tool_call("").unwrap(), None);
        assert_eq!(parse_tool_call("} backwards {").unwrap(), None);
    }

    #[test]
    fn object_without_tool_field_is_not_a_call() {
        assert_eq!(parse_tool_call(r#"Result: {"status": "ok"}"#).unwrap(), None);
    }

    #[test]
    fn wrapper_object_without_tool_field_yields_the_nested_call() {
        let text = r#"{"plan": "inspect first", "next": {"tool":"read_file","path":"a.ts"}}"#;
        assert_eq!(
            parse_tool_call(text).unwrap(),
            Some(ToolInvocation::ReadFile {
                path: "a.ts".to_string(),
                start_line: None,
                end_line: None,
            })
        );
    }

    #[test]
    fn falls_back_to_longest_embedded_object() {
        let text = r#"<THOUGHT>Use {braces} carefully</THOUGHT>
{"tool":"list_directory"}
Actually: {"tool":"search_files","pattern":"useState","include":"*.tsx"}"#;
        let parsed = parse_tool_call(text).unwrap();
        assert_eq!(
            parsed,
            Some(ToolInvocation::SearchFiles {
                pattern: "useState".to_string(),
                include: Some("*.tsx".to_string()),
            })
        );
    }

    #[test]
    fn nested_braces_inside_strings_survive_fallback() {
        let text = r#"Plan: edit {x}. {"tool":"write_file","path":"a.ts","content":"function f() { return {}; }"} ok {"#;
        match parse_tool_call(text).unwrap() {
            Some(ToolInvocation::WriteFile { content, .. }) => {
                assert_eq!(content, "function f() { return {}; }")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_tool_lists_valid_tools() {
        let err = parse_tool_call(r#"{"tool":"launch_rockets"}"#).unwrap_err();
        assert_eq!(
            err,
            InvocationError::UnknownTool {
                name: "launch_rockets".to_string()
            }
        );
        let message = err.to_string();
        assert!(message.contains("read_file"));
        assert!(message.contains("semantic_search"));
    }

    #[test]
    fn missing_parameter_is_invalid() {
        let err = parse_tool_call(r#"{"tool":"write_file","path":"a.ts"}"#).unwrap_err();
        assert!(matches!(err, InvocationError::InvalidParameters { ref tool, .. } if tool == "write_file"));
    }

    #[test]
    fn non_string_tool_field_is_rejected() {
        assert_eq!(
            parse_tool_call(r#"{"tool": 7}"#).unwrap_err(),
            InvocationError::NotAnObject
        );
    }

    #[test]
    fn camel_case_line_bounds_are_accepted() {
        let parsed = parse_tool_call(
            r#"{"tool":"replace_lines","path":"a.ts","startLine":2,"endLine":3,"content":"x"}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            Some(ToolInvocation::ReplaceLines {
                path: "a.ts".to_string(),
                start_line: 2,
                end_line: 3,
                content: "x".to_string(),
            })
        );
    }
}
