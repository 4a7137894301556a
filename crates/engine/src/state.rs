//! The per-session system state: definition registries, durable variables, the active
//! navigation context, and the append-only audit logs.

use indexmap::IndexMap;
use readmes_types::{DecisionRecord, FunctionDef, HeaderEntry, HistoryEntry, OptimizationRecord, TemplateDef, WarmholeDef};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::document::ParsedDocument;

/// Variable that keeps the raw text of the last parsed document.
pub const DOCUMENT_VARIABLE: &str = "readme_content";

/// Snapshot keys, in serialization order.
pub const SNAPSHOT_KEYS: [&str; 10] = [
    "functions",
    "templates",
    "warmholes",
    "variables",
    "currentContext",
    "previousOutput",
    "metadata",
    "history",
    "decisions",
    "optimizations",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    #[serde(default)]
    pub functions: IndexMap<String, FunctionDef>,
    #[serde(default)]
    pub templates: IndexMap<String, TemplateDef>,
    #[serde(default)]
    pub warmholes: IndexMap<String, WarmholeDef>,
    /// Durable cross-execution memory.
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Working record of the active transition; empty before the first navigation.
    #[serde(default, rename = "currentContext")]
    pub current_context: Map<String, Value>,
    /// The outgoing context's `output` field as of the last transition.
    #[serde(default, rename = "previousOutput")]
    pub previous_output: Value,
    /// Header index of the last parsed document.
    #[serde(default)]
    pub metadata: IndexMap<String, HeaderEntry>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub decisions: Vec<DecisionRecord>,
    #[serde(default)]
    pub optimizations: Vec<OptimizationRecord>,
}

impl SystemState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a fresh parse. Definitions and the header index are replaced wholesale;
    /// variables and the current context carry over.
    pub fn apply_parsed(&mut self, parsed: ParsedDocument, document: &str) {
        self.functions = parsed.functions;
        self.templates = parsed.templates;
        self.warmholes = parsed.warmholes;
        self.metadata = parsed.headers;
        self.variables.insert(DOCUMENT_VARIABLE.to_string(), Value::String(document.to_string()));
    }

    /// Name of the warmhole the current context points at, if any.
    pub fn active_warmhole(&self) -> Option<&str> {
        self.current_context.get("warmhole").and_then(Value::as_str)
    }

    pub fn to_snapshot(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!("state serialized to a non-object: {other}"))),
        }
    }

    /// Shallow merge: every recognized key in `snapshot` replaces the in-memory field.
    ///
    /// Unknown keys are ignored. A key whose value does not decode is logged and skipped so
    /// one damaged field does not discard the rest of the snapshot.
    pub fn merge_snapshot(&mut self, snapshot: Map<String, Value>) {
        for (key, value) in snapshot {
            match key.as_str() {
                "functions" => merge_field(&key, value, &mut self.functions),
                "templates" => merge_field(&key, value, &mut self.templates),
                "warmholes" => merge_field(&key, value, &mut self.warmholes),
                "variables" => merge_field(&key, value, &mut self.variables),
                "currentContext" => merge_field(&key, value, &mut self.current_context),
                "previousOutput" => self.previous_output = value,
                "metadata" => merge_field(&key, value, &mut self.metadata),
                "history" => merge_field(&key, value, &mut self.history),
                "decisions" => merge_field(&key, value, &mut self.decisions),
                "optimizations" => merge_field(&key, value, &mut self.optimizations),
                _ => debug!(key = %key, "ignoring unknown snapshot key"),
            }
        }
    }
}

fn merge_field<T: DeserializeOwned>(key: &str, value: Value, slot: &mut T) {
    // A `null` currentContext comes from snapshots taken before the first navigation.
    if value.is_null() {
        debug!(key, "snapshot field is null; keeping in-memory value");
        return;
    }
    match serde_json::from_value(value) {
        Ok(decoded) => *slot = decoded,
        Err(error) => warn!(key, error = %error, "ignoring malformed snapshot field"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_document;
    use serde_json::json;

    const DOC: &str = "# Warmhole: start\n- description: \"Start\"\n- state_transfer: [\"text\"]\n- condition: \"true\"\n- next_warmhole: \"process\"\n";

    #[test]
    fn snapshot_uses_exact_keys() {
        let snapshot = SystemState::new().to_snapshot().unwrap();
        let keys: Vec<_> = snapshot.keys().map(String::as_str).collect();
        let mut expected = SNAPSHOT_KEYS.to_vec();
        let mut actual = keys.clone();
        expected.sort_unstable();
        actual.sort_unstable();
        assert_eq!(actual, expected);
    }

    #[test]
    fn reparse_keeps_variables_and_context() {
        let mut state = SystemState::new();
        state.variables.insert("text".into(), json!("hi"));
        state.current_context.insert("warmhole".into(), json!("start"));
        state.apply_parsed(parse_document(DOC), DOC);
        state.apply_parsed(parse_document(""), "");

        assert!(state.warmholes.is_empty());
        assert_eq!(state.variables["text"], json!("hi"));
        assert_eq!(state.variables[DOCUMENT_VARIABLE], json!(""));
        assert_eq!(state.active_warmhole(), Some("start"));
    }

    #[test]
    fn snapshot_round_trips() {
        let mut state = SystemState::new();
        state.apply_parsed(parse_document(DOC), DOC);
        state.variables.insert("count".into(), json!(3));
        state.previous_output = json!({"done": true});

        let mut restored = SystemState::new();
        restored.merge_snapshot(state.to_snapshot().unwrap());
        assert_eq!(restored, state);
    }

    #[test]
    fn merge_is_shallow_and_skips_bad_fields() {
        let mut state = SystemState::new();
        state.variables.insert("kept".into(), json!(1));
        state.current_context.insert("text".into(), json!("hi"));

        let snapshot = json!({
            "variables": {"loaded": 2},
            "warmholes": "not a map",
            "currentContext": null,
            "extra": true
        });
        state.merge_snapshot(snapshot.as_object().cloned().unwrap());

        assert_eq!(state.variables, json!({"loaded": 2}).as_object().cloned().unwrap());
        assert!(state.warmholes.is_empty());
        assert_eq!(state.current_context["text"], json!("hi"));
    }
}
