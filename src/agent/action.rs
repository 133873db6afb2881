//! Turning a model response into tool calls.
//!
//! Native tool calls are used as-is. Models without native tool calling may
//! instead write a JSON blob such as
//! `{"name": "search", "arguments": {"query": "rust"}}` (or the
//! `{"action": ..., "action_input": ...}` form) somewhere in their text.

use crate::error::{AgentError, Result};
use crate::llm::{ModelResponse, ToolCall};
use crate::tools::FINAL_ANSWER_TOOL;
use serde_json::{Deserializer, Map, Value};

const NAME_KEYS: [&str; 3] = ["name", "action", "tool"];

/// Extract the tool calls a model response asks for
pub fn parse_action(response: &ModelResponse) -> Result<Vec<ToolCall>> {
    if !response.tool_calls.is_empty() {
        return Ok(response.tool_calls.clone());
    }

    let text = response
        .content
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AgentError::ParseError("model returned neither text nor tool calls".into()))?;

    let value = find_action_object(text)?;
    Ok(vec![call_from_value(&value)?])
}

/// First JSON object in `text` that names a tool.
///
/// Every `{` is tried as the start of a JSON value, so braces in the
/// surrounding prose and trailing text after the object are ignored.
fn find_action_object(text: &str) -> Result<Value> {
    let mut first_error = None;
    let mut unnamed = None;

    for (start, _) in text.match_indices('{') {
        let mut values = Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(value @ Value::Object(_))) => {
                if NAME_KEYS.iter().any(|key| value.get(key).is_some()) {
                    return Ok(value);
                }
                unnamed.get_or_insert(value);
            }
            Some(Err(e)) => {
                first_error.get_or_insert(e);
            }
            _ => {}
        }
    }

    if let Some(value) = unnamed {
        return Ok(value);
    }
    Err(match first_error {
        Some(e) => AgentError::ParseError(format!("invalid JSON tool call: {}", e)),
        None => AgentError::ParseError(format!(
            "no tool call found in model output. Call a tool, or {} to finish.",
            FINAL_ANSWER_TOOL
        )),
    })
}

fn call_from_value(value: &Value) -> Result<ToolCall> {
    let name = NAME_KEYS
        .iter()
        .find_map(|key| value.get(key))
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::ParseError("tool call is missing a 'name'".into()))?;

    let raw_arguments = value
        .get("arguments")
        .or_else(|| value.get("action_input"))
        .cloned()
        .unwrap_or(Value::Object(Map::new()));

    Ok(ToolCall::new(name, normalize_arguments(name, raw_arguments)))
}

/// Models often pass a bare value where an argument object is expected
fn normalize_arguments(name: &str, arguments: Value) -> Map<String, Value> {
    match arguments {
        Value::Object(map) => map,
        Value::String(s) if s.trim_start().starts_with('{') => {
            match serde_json::from_str::<Value>(&s) {
                Ok(Value::Object(map)) => map,
                _ => wrap_argument(name, Value::String(s)),
            }
        }
        Value::Null => Map::new(),
        other => wrap_argument(name, other),
    }
}

fn wrap_argument(name: &str, value: Value) -> Map<String, Value> {
    let key = if name == FINAL_ANSWER_TOOL { "answer" } else { "input" };
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_tool_calls_take_precedence() {
        let call = ToolCall::new("search", Map::new());
        let mut response = ModelResponse::tool_calls(vec![call.clone()]);
        response.content = Some(r#"{"name": "other"}"#.to_string());

        assert_eq!(parse_action(&response).unwrap(), vec![call]);
    }

    #[test]
    fn test_json_blob_in_text() {
        let response = ModelResponse::text(
            "Thought: I should search.\nAction:\n{\"name\": \"search\", \"arguments\": {\"query\": \"rust\"}}\n",
        );

        let calls = parse_action(&response).unwrap();

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments["query"], "rust");
    }

    #[test]
    fn test_braces_in_surrounding_prose() {
        let response = ModelResponse::text(
            "Thought: in set notation {1,2}.\n{\"name\": \"add\", \"arguments\": {\"a\": 1}}\nDone }",
        );

        let calls = parse_action(&response).unwrap();

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "add");
        assert_eq!(calls[0].arguments["a"], 1);
    }

    #[test]
    fn test_skips_objects_without_tool_name() {
        let response = ModelResponse::text(
            r#"Given {"a": 1} I will call {"tool": "search", "arguments": {"query": "rust"}}"#,
        );

        let calls = parse_action(&response).unwrap();

        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments["query"], "rust");
    }

    #[test]
    fn test_action_input_form_with_bare_answer() {
        let response = ModelResponse::text(r#"{"action": "final_answer", "action_input": "42"}"#);

        let calls = parse_action(&response).unwrap();

        assert_eq!(calls[0].name, FINAL_ANSWER_TOOL);
        assert_eq!(calls[0].arguments["answer"], "42");
    }

    #[test]
    fn test_stringified_arguments() {
        let response =
            ModelResponse::text(r#"{"name": "search", "arguments": "{\"query\": \"tokio\"}"}"#);

        let calls = parse_action(&response).unwrap();

        assert_eq!(calls[0].arguments["query"], "tokio");
    }

    #[test]
    fn test_missing_name_is_a_parse_error() {
        let response = ModelResponse::text(r#"{"arguments": {"query": "rust"}}"#);
        assert!(matches!(parse_action(&response), Err(AgentError::ParseError(_))));
    }

    #[test]
    fn test_plain_text_is_a_parse_error() {
        let response = ModelResponse::text("The answer is 4.");
        assert!(matches!(parse_action(&response), Err(AgentError::ParseError(_))));
    }

    #[test]
    fn test_empty_response_is_a_parse_error() {
        assert!(matches!(
            parse_action(&ModelResponse::default()),
            Err(AgentError::ParseError(_))
        ));
    }

    #[test]
    fn test_invalid_json_is_a_parse_error() {
        let response = ModelResponse::text("{name: search}");
        assert!(matches!(parse_action(&response), Err(AgentError::ParseError(_))));
    }
}
