//! JSON extraction.
//!
//! The text body is the first non-empty string field among a fixed list of
//! well-known keys; when none is present the JSON-serialized form of the
//! whole value stands in. A top-level object is also exposed as structured
//! data for rule matching.

use serde_json::Value;

use super::ExtractedText;
use crate::error::AppError;

/// Keys probed, in order, for the text representation of a JSON document.
const TEXT_FIELDS: [&str; 8] =
    ["content", "body", "text", "snippet", "subject", "description", "summary", "transcript"];

pub fn extract(input: &str) -> Result<ExtractedText, AppError> {
    let value: Value = serde_json::from_str(input)
        .map_err(|e| AppError::Extract(format!("parse json: {e}")))?;

    let text = pick_text(&value)
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string());

    let data = match &value {
        Value::Object(map) => Some(map.clone()),
        _ => None,
    };

    Ok(ExtractedText { text, frontmatter: None, data })
}

fn pick_text(value: &Value) -> Option<&str> {
    let map = value.as_object()?;
    TEXT_FIELDS
        .iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn picks_first_nonempty_text_field() {
        let out = extract(r#"{"content": "", "body": "the body", "text": "ignored"}"#)
            .expect("extract");
        assert_eq!(out.text, "the body");
    }

    #[test]
    fn field_order_is_fixed() {
        let out = extract(r#"{"snippet": "s", "content": "c"}"#).expect("extract");
        assert_eq!(out.text, "c");
    }

    #[test]
    fn falls_back_to_serialized_value() {
        let out = extract(r#"{"answer": 42}"#).expect("extract");
        assert_eq!(out.text, json!({"answer": 42}).to_string());
    }

    #[test]
    fn top_level_object_becomes_data() {
        let out = extract(r#"{"subject": "hi", "kind": "memo"}"#).expect("extract");
        let data = out.data.expect("data");
        assert_eq!(data.get("kind"), Some(&json!("memo")));
    }

    #[test]
    fn top_level_array_has_no_data() {
        let out = extract(r#"[1, 2, 3]"#).expect("extract");
        assert!(out.data.is_none());
        assert_eq!(out.text, "[1,2,3]");
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(extract("{nope").is_err());
    }

    #[test]
    fn non_string_text_field_is_skipped() {
        let out = extract(r#"{"content": 7, "body": "b"}"#).expect("extract");
        assert_eq!(out.text, "b");
    }
}
