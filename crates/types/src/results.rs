//! Result records returned by the execution API.
//!
//! Every record serializes to the flat JSON shape collaborators (CLI, editor) consume,
//! e.g. `{"status": "success", "result": "HELLO", "format": "string"}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Format tag reported for recovered evaluation faults.
pub const ERROR_FORMAT: &str = "error";

/// Outcome of executing a function or template.
///
/// Evaluation faults inside a template body are values, not errors: they arrive as
/// [`ExecutionResult::Error`]. Lookup failures never produce this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success { result: Value, format: String },
    Error { error: String, format: String },
}

impl ExecutionResult {
    pub fn success(result: Value, format: impl Into<String>) -> Self {
        Self::Success {
            result,
            format: format.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
            format: ERROR_FORMAT.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Successful result value, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Success { result, .. } => Some(result),
            Self::Error { .. } => None,
        }
    }

    pub fn format(&self) -> &str {
        match self {
            Self::Success { format, .. } | Self::Error { format, .. } => format,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InitStatus {
    #[default]
    Initialized,
}

/// Counts reported after a document has been parsed into the state store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InitSummary {
    pub status: InitStatus,
    /// Number of level-2 headings in the document.
    pub sections: usize,
    pub functions: usize,
    pub templates: usize,
    pub warmholes: usize,
    /// Number of header index entries.
    pub headers: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NavigationStatus {
    #[default]
    Navigated,
}

/// Outcome of a warmhole transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NavigationResult {
    pub status: NavigationStatus,
    /// Warmhole the transition was requested from (the last alternative when one was taken).
    pub from: String,
    /// Target of the transition; empty when the node is terminal.
    pub to: String,
    /// Declared `state_transfer` list of the node that was left.
    pub state_transferred: Vec<String>,
    /// Alternatives the decision service redirected through, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    /// At least one recognized field was overwritten.
    Applied,
    /// The proposal carried no recognized change.
    Unchanged,
}

impl OptimizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Outcome of applying an optimization proposal to a warmhole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationOutcome {
    pub status: OptimizationStatus,
    /// Field name to new value for every field that was overwritten.
    pub changes: Map<String, Value>,
}

/// Result of one plan step, tagged with the step type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepOutcome {
    Navigate {
        warmhole: String,
        #[serde(flatten)]
        navigation: NavigationResult,
    },
    Execute {
        function: String,
        #[serde(flatten)]
        execution: ExecutionResult,
    },
    Optimize {
        warmhole: String,
        #[serde(flatten)]
        optimization: OptimizationOutcome,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Complete,
}

/// Outcome of interpreting a full plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanResult {
    pub status: PlanStatus,
    pub message: String,
    pub results: Vec<StepOutcome>,
    /// Warmhole recorded in `currentContext` after the last step.
    #[serde(rename = "activeWarmhole")]
    pub active_warmhole: Option<String>,
}
