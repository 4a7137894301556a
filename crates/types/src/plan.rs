//! Plan records produced by the decision service from a natural-language intent.
//!
//! Steps stay as raw JSON inside [`Plan`] and are converted one at a time with
//! [`PlanStep::from_value`] while the plan runs, so a step with an unrecognized type
//! aborts the plan at the point it is reached.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Ordered plan as returned by `analyze_intent`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Plan {
    #[serde(default)]
    pub steps: Vec<Value>,
    /// Message the decision service wants surfaced to the user.
    #[serde(default, rename = "userMessage", alias = "user_message", alias = "message")]
    pub user_message: Option<String>,
}

impl Plan {
    /// Builds a plan from a structured decision reply.
    ///
    /// A missing or non-array `steps` key yields an empty plan rather than an error.
    pub fn from_record(record: &Map<String, Value>) -> Self {
        let steps = record.get("steps").and_then(Value::as_array).cloned().unwrap_or_default();
        let user_message = ["userMessage", "user_message", "message"]
            .iter()
            .find_map(|key| record.get(*key).and_then(Value::as_str))
            .map(str::to_string);
        Self { steps, user_message }
    }
}

/// A single typed plan step.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    Navigate {
        warmhole: String,
        /// Replaces `currentContext` before navigating when present.
        context: Option<Map<String, Value>>,
    },
    Execute {
        function: String,
        /// Caller context for the execution.
        context: Map<String, Value>,
    },
    Optimize {
        warmhole: String,
    },
}

/// Conversion failure for a raw plan step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanStepError {
    #[error("unknown plan step type '{0}'")]
    UnknownType(String),
    #[error("malformed plan step: {0}")]
    Malformed(String),
}

impl PlanStep {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Execute { .. } => "execute",
            Self::Optimize { .. } => "optimize",
        }
    }

    /// Converts a raw step record into a typed step.
    pub fn from_value(value: &Value) -> Result<Self, PlanStepError> {
        let record = value
            .as_object()
            .ok_or_else(|| PlanStepError::Malformed(format!("expected an object, found {value}")))?;
        let step_type = record
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| PlanStepError::Malformed("step is missing a 'type' string".to_string()))?;

        match step_type {
            "navigate" => Ok(Self::Navigate {
                warmhole: required_name(record, step_type, &["warmhole", "target"])?,
                context: record.get("context").and_then(Value::as_object).cloned(),
            }),
            "execute" => Ok(Self::Execute {
                function: required_name(record, step_type, &["function", "name"])?,
                context: execution_context(record.get("input")),
            }),
            "optimize" => Ok(Self::Optimize {
                warmhole: required_name(record, step_type, &["warmhole", "target"])?,
            }),
            other => Err(PlanStepError::UnknownType(other.to_string())),
        }
    }
}

fn required_name(record: &Map<String, Value>, step_type: &str, keys: &[&str]) -> Result<String, PlanStepError> {
    keys.iter()
        .find_map(|key| record.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| PlanStepError::Malformed(format!("'{step_type}' step requires '{}'", keys[0])))
}

fn execution_context(input: Option<&Value>) -> Map<String, Value> {
    match input {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            let mut map = Map::new();
            map.insert("input".to_string(), other.clone());
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_step_types() {
        let navigate = PlanStep::from_value(&json!({"type": "navigate", "warmhole": "start", "context": {"text": "hi"}})).unwrap();
        assert_eq!(
            navigate,
            PlanStep::Navigate {
                warmhole: "start".into(),
                context: json!({"text": "hi"}).as_object().cloned(),
            }
        );

        let execute = PlanStep::from_value(&json!({"type": "execute", "function": "shout", "input": {"text": "hi"}})).unwrap();
        assert_eq!(execute.kind(), "execute");

        let optimize = PlanStep::from_value(&json!({"type": "optimize", "warmhole": "start"})).unwrap();
        assert_eq!(optimize, PlanStep::Optimize { warmhole: "start".into() });
    }

    #[test]
    fn scalar_execute_input_is_wrapped() {
        let step = PlanStep::from_value(&json!({"type": "execute", "function": "shout", "input": "hello"})).unwrap();
        let PlanStep::Execute { context, .. } = step else {
            panic!("expected execute step");
        };
        assert_eq!(context.get("input"), Some(&json!("hello")));
    }

    #[test]
    fn unknown_type_names_the_type() {
        let error = PlanStep::from_value(&json!({"type": "teleport"})).unwrap_err();
        assert_eq!(error, PlanStepError::UnknownType("teleport".into()));
        assert!(error.to_string().contains("teleport"));
    }

    #[test]
    fn plan_from_record_accepts_message_aliases() {
        let record = json!({"steps": [{"type": "navigate", "warmhole": "a"}], "user_message": "ok"});
        let plan = Plan::from_record(record.as_object().unwrap());
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.user_message.as_deref(), Some("ok"));
    }
}
