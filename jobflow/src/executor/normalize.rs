//! Turning free-form model text into structured output.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

static CODE_FENCE: OnceLock<Option<Regex>> = OnceLock::new();

fn code_fence() -> Option<&'static Regex> {
    CODE_FENCE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)```").ok())
        .as_ref()
}

fn parse_container(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Value>(candidate.trim())
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

/// Extracts the first JSON object or array from model output.
///
/// Tries, in order: the whole text, the contents of each fenced code block,
/// then the span from the first `{`/`[` to the last `}`/`]`.
#[must_use]
pub fn parse_structured(text: &str) -> Option<Value> {
    if let Some(value) = parse_container(text) {
        return Some(value);
    }

    if let Some(fence) = code_fence() {
        for cap in fence.captures_iter(text) {
            if let Some(value) = cap.get(1).and_then(|m| parse_container(m.as_str())) {
                return Some(value);
            }
        }
    }

    let start = text.find(|c| c == '{' || c == '[')?;
    let end = text.rfind(|c| c == '}' || c == ']')?;
    if end <= start {
        return None;
    }
    parse_container(&text[start..=end])
}

/// Like [`parse_structured`], with a placeholder for unparseable text.
#[must_use]
pub fn normalize_output(text: &str) -> Value {
    parse_structured(text).unwrap_or_else(|| {
        json!({
            "error": "unparseable_output",
            "raw": text,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_json() {
        assert_eq!(parse_structured(r#"{"a": 1}"#), Some(json!({"a": 1})));
        assert_eq!(parse_structured("  [1, 2]  "), Some(json!([1, 2])));
    }

    #[test]
    fn test_code_fence() {
        let text = "Here you go:\n```json\n{\"total\": 42}\n```\nAnything else?";
        assert_eq!(parse_structured(text), Some(json!({"total": 42})));

        let text = "```\n[{\"x\": true}]\n```";
        assert_eq!(parse_structured(text), Some(json!([{"x": true}])));
    }

    #[test]
    fn test_surrounding_prose() {
        let text = "Sure! The result is {\"items\": [1, 2, 3]} as requested.";
        assert_eq!(parse_structured(text), Some(json!({"items": [1, 2, 3]})));
    }

    #[test]
    fn test_scalars_rejected() {
        assert_eq!(parse_structured("42"), None);
        assert_eq!(parse_structured("\"just a string\""), None);
        assert_eq!(parse_structured("no json here"), None);
        assert_eq!(parse_structured("} backwards {"), None);
    }

    #[test]
    fn test_placeholder() {
        let value = normalize_output("I could not read the document.");
        assert_eq!(value["error"], "unparseable_output");
        assert_eq!(value["raw"], "I could not read the document.");
    }
}
