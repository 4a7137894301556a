//! Request/response records exchanged with the external decision service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Discriminator carried by every decision request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Turn a natural-language intent into a plan.
    AnalyzeIntent,
    /// Judge whether a warmhole's condition allows the transition.
    EvaluateCondition,
    /// Offer another warmhole after a denial.
    SuggestAlternative,
    /// Pre-check caller input for a function or template.
    ValidateInput,
    /// Propose in-place changes to a warmhole definition.
    OptimizeWarmhole,
    /// Free-form review of the current state.
    AnalyzeState,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnalyzeIntent => "analyze_intent",
            Self::EvaluateCondition => "evaluate_condition",
            Self::SuggestAlternative => "suggest_alternative",
            Self::ValidateInput => "validate_input",
            Self::OptimizeWarmhole => "optimize_warmhole",
            Self::AnalyzeState => "analyze_state",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single request to the decision service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRequest {
    #[serde(rename = "type")]
    pub kind: DecisionKind,
    pub payload: Value,
}

impl DecisionRequest {
    pub fn new(kind: DecisionKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}

/// A decision reply resolved once at the adapter boundary.
///
/// The service is not guaranteed to answer with well-formed records; anything that is not
/// a JSON object arrives as [`DecisionReply::Opaque`] and each call site decides how the
/// bare text maps onto its expected shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DecisionReply {
    Structured(Map<String, Value>),
    Opaque(String),
}

impl DecisionReply {
    pub fn as_record(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Structured(record) => Some(record),
            Self::Opaque(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Structured(_) => None,
            Self::Opaque(text) => Some(text),
        }
    }

    /// First string value found under any of `keys` in a structured reply.
    pub fn str_field(&self, keys: &[&str]) -> Option<&str> {
        let record = self.as_record()?;
        keys.iter().find_map(|key| record.get(*key).and_then(Value::as_str))
    }

    /// Converts the reply into a record, wrapping opaque text as `{ key: text }`.
    pub fn into_record_or_wrap(self, key: &str) -> Map<String, Value> {
        match self {
            Self::Structured(record) => record,
            Self::Opaque(text) => {
                let mut record = Map::new();
                record.insert(key.to_string(), Value::String(text));
                record
            }
        }
    }

    /// JSON view used when the reply is recorded in the decision log.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Structured(record) => Value::Object(record.clone()),
            Self::Opaque(text) => Value::String(text.clone()),
        }
    }
}
