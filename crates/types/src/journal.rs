//! Append-only audit records kept inside the system state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::decision::DecisionKind;

/// Which operation produced a history entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Init,
    Execute,
    Navigate,
    Plan,
    Optimize,
}

/// One operation recorded in `history`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub kind: HistoryKind,
    /// Name the operation acted on (definition, warmhole, or the intent text).
    pub target: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl HistoryEntry {
    pub fn now(kind: HistoryKind, target: impl Into<String>, status: impl Into<String>, detail: Value) -> Self {
        Self {
            at: Utc::now(),
            kind,
            target: target.into(),
            status: status.into(),
            detail,
        }
    }
}

/// One decision-service exchange recorded in `decisions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    pub at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: DecisionKind,
    pub payload: Value,
    pub reply: Value,
}

/// One applied warmhole optimization recorded in `optimizations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationRecord {
    pub at: DateTime<Utc>,
    pub warmhole: String,
    /// New field values.
    pub changes: Map<String, Value>,
    /// Field values before the change, for rollback by hand.
    pub previous: Map<String, Value>,
}
