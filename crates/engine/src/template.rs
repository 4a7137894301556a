//! Textual `{{key}}` substitution applied to a transform body before evaluation.
//!
//! Substitution is deliberately dumb: for every key in the context, each literal `{{key}}`
//! is replaced by the value's text, whether or not the template declared it. Values are
//! spliced raw, so a string containing quotes can change the meaning of the code that
//! follows. Callers that need inert data should read it through `context` instead.

use serde_json::{Map, Value};
use tracing::debug;

/// Replaces every `{{key}}` in `transform` with the text of `context[key]`, key by key in
/// context order.
pub fn substitute_placeholders(transform: &str, context: &Map<String, Value>) -> String {
    let mut code = transform.to_string();
    for (key, value) in context {
        let placeholder = format!("{{{{{key}}}}}");
        if code.contains(&placeholder) {
            code = code.replace(&placeholder, &placeholder_text(value));
            debug!(key = %key, "placeholder substituted");
        }
    }
    code
}

/// Text spliced in for a value: strings raw, scalars in display form, containers as compact JSON.
pub fn placeholder_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn replaces_every_occurrence_of_every_key() {
        let code = substitute_placeholders(
            "return '{{text}}' + '{{text}}' + {{count}};",
            &context(json!({"text": "hi", "count": 2, "unused": true})),
        );
        assert_eq!(code, "return 'hi' + 'hi' + 2;");
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let code = substitute_placeholders("return '{{missing}}';", &context(json!({"text": "hi"})));
        assert_eq!(code, "return '{{missing}}';");
    }

    #[test]
    fn value_text_forms() {
        assert_eq!(placeholder_text(&json!(null)), "null");
        assert_eq!(placeholder_text(&json!(false)), "false");
        assert_eq!(placeholder_text(&json!(1.5)), "1.5");
        assert_eq!(placeholder_text(&json!({"a": [1, "b"]})), r#"{"a":[1,"b"]}"#);
        assert_eq!(placeholder_text(&json!("raw \"quoted\"")), "raw \"quoted\"");
    }
}
