//! Applies decision-service optimization proposals to warmhole definitions in place.

use chrono::Utc;
use readmes_types::{DecisionReply, OptimizationOutcome, OptimizationRecord, OptimizationStatus, WarmholeDef};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::state::SystemState;

/// Fields a proposal may overwrite.
pub const OPTIMIZABLE_FIELDS: [&str; 4] = ["description", "condition", "next_warmhole", "state_transfer"];

/// Overwrites the recognized fields of `warmhole` found in `reply`.
///
/// Proposals may be flat or nested under `changes`. Unknown keys and values of the wrong
/// shape are ignored; an opaque reply changes nothing. Applied changes are appended to
/// `state.optimizations` together with the values they replaced.
pub fn apply_optimization(state: &mut SystemState, warmhole: &str, reply: &DecisionReply) -> Result<OptimizationOutcome> {
    let definition = state
        .warmholes
        .get_mut(warmhole)
        .ok_or_else(|| EngineError::WarmholeNotFound(warmhole.to_string()))?;

    let proposal = match reply.as_record() {
        Some(record) => record.get("changes").and_then(Value::as_object).unwrap_or(record),
        None => {
            debug!(warmhole, "opaque optimization reply; nothing applied");
            return Ok(unchanged());
        }
    };

    let mut changes = Map::new();
    let mut previous = Map::new();
    for field in OPTIMIZABLE_FIELDS {
        let Some(value) = proposal.get(field) else {
            continue;
        };
        if let Some((old, applied)) = overwrite_field(definition, field, value) {
            previous.insert(field.to_string(), old);
            changes.insert(field.to_string(), applied);
        }
    }

    if changes.is_empty() {
        return Ok(unchanged());
    }

    info!(warmhole, fields = ?changes.keys().collect::<Vec<_>>(), "warmhole optimized");
    state.optimizations.push(OptimizationRecord {
        at: Utc::now(),
        warmhole: warmhole.to_string(),
        changes: changes.clone(),
        previous,
    });
    Ok(OptimizationOutcome {
        status: OptimizationStatus::Applied,
        changes,
    })
}

fn unchanged() -> OptimizationOutcome {
    OptimizationOutcome {
        status: OptimizationStatus::Unchanged,
        changes: Map::new(),
    }
}

/// Sets one field and returns `(old, applied)` values, or `None` when `value` has the wrong shape.
fn overwrite_field(definition: &mut WarmholeDef, field: &str, value: &Value) -> Option<(Value, Value)> {
    let replace_text = |slot: &mut String, text: String| {
        let old = std::mem::replace(slot, text.clone());
        (Value::String(old), Value::String(text))
    };
    match field {
        "description" => Some(replace_text(&mut definition.description, value.as_str()?.to_string())),
        "condition" => Some(replace_text(&mut definition.condition, value.as_str()?.to_string())),
        "next_warmhole" => Some(replace_text(&mut definition.next_warmhole, value.as_str()?.trim().to_string())),
        "state_transfer" => {
            let names = transfer_names(value)?;
            let applied = Value::Array(names.iter().cloned().map(Value::String).collect());
            let old = std::mem::replace(&mut definition.state_transfer, names);
            Some((Value::Array(old.into_iter().map(Value::String).collect()), applied))
        }
        _ => None,
    }
}

fn transfer_names(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(|name| name.trim().to_string()))
            .filter(|name| name.as_deref() != Some(""))
            .collect(),
        Value::String(list) => Some(
            list.split(',')
                .map(|name| name.trim().trim_matches('"').to_string())
                .filter(|name| !name.is_empty())
                .collect(),
        ),
        _ => None,
    }
}
