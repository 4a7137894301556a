//! Decision service adapter: the only path to the external language model.
//!
//! Replies are resolved once, here, into [`DecisionReply`]. A JSON object becomes
//! `Structured`; any other JSON value is wrapped as `{"result": value}`; a JSON string or
//! unparseable text becomes `Opaque`. Each typed call then maps the reply onto what its
//! caller needs, falling back to the opaque text instead of failing.

mod prompt;
mod transport;

use std::sync::Arc;

use once_cell::sync::Lazy;
use readmes_types::{DecisionKind, DecisionRecord, DecisionReply, DecisionRequest, Plan, WarmholeDef};
use readmes_util::text_processing::preview;
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::state::{DOCUMENT_VARIABLE, SystemState};

pub use prompt::build_prompt;
pub use transport::{CommandTransport, DecisionTransport, HttpTransport, ScriptedTransport, transport_from_config};

static BARE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").expect("bare name pattern"));

const DENY_WORDS: [&str; 4] = ["deny", "denied", "not allowed", "false"];
const ALLOW_WORDS: [&str; 4] = ["allow", "allowed", "true", "yes"];

/// How the decision service judged a warmhole's condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionVerdict {
    /// The move may proceed; `next` overrides the declared target when present
    /// (an empty string means terminal).
    Allowed { next: Option<String> },
    Denied { reason: String },
}

#[derive(Clone)]
pub struct DecisionAdapter {
    transport: Arc<dyn DecisionTransport>,
}

impl std::fmt::Debug for DecisionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionAdapter").field("transport", &self.transport.label()).finish()
    }
}

impl DecisionAdapter {
    pub fn new(transport: Arc<dyn DecisionTransport>) -> Self {
        Self { transport }
    }

    /// Sends one request, resolves the reply, and appends the exchange to `state.decisions`.
    ///
    /// Transport failures propagate and leave no record behind.
    pub async fn request(&self, state: &mut SystemState, kind: DecisionKind, payload: Value) -> Result<DecisionReply> {
        let request = DecisionRequest::new(kind, payload);
        let raw = self
            .transport
            .send(&request)
            .await
            .map_err(|error| EngineError::decision(kind, error))?;
        let reply = resolve_reply(&raw);
        if let DecisionReply::Opaque(text) = &reply {
            warn!(kind = %kind, reply = %preview(text, 120), "decision reply was not a JSON object; using plain text");
        }
        info!(kind = %kind, transport = self.transport.label(), "decision round trip complete");

        state.decisions.push(DecisionRecord {
            at: chrono::Utc::now(),
            kind,
            payload: request.payload,
            reply: reply.to_value(),
        });
        Ok(reply)
    }

    /// Asks for a plan for a natural-language intent.
    ///
    /// An opaque reply yields an empty plan whose message is the reply text.
    pub async fn analyze_intent(&self, state: &mut SystemState, intent: &str) -> Result<Plan> {
        let payload = json!({
            "intent": intent,
            "activeWarmhole": state.active_warmhole(),
            "functions": state.functions,
            "warmholes": state.warmholes,
        });
        Ok(match self.request(state, DecisionKind::AnalyzeIntent, payload).await? {
            DecisionReply::Structured(record) => Plan::from_record(&record),
            DecisionReply::Opaque(text) => Plan {
                steps: Vec::new(),
                user_message: Some(text),
            },
        })
    }

    pub async fn evaluate_condition(&self, state: &mut SystemState, warmhole: &WarmholeDef) -> Result<ConditionVerdict> {
        let payload = json!({
            "warmhole": warmhole.name,
            "condition": warmhole.condition,
            "next_warmhole": warmhole.next_warmhole,
            "context": state.current_context,
        });
        let reply = self.request(state, DecisionKind::EvaluateCondition, payload).await?;
        let verdict = condition_verdict(&reply);
        debug!(warmhole = %warmhole.name, verdict = ?verdict, "condition evaluated");
        Ok(verdict)
    }

    /// Asks for another warmhole after a denial; `None` when the service offers nothing usable.
    pub async fn suggest_alternative(&self, state: &mut SystemState, warmhole: &WarmholeDef, reason: &str) -> Result<Option<String>> {
        let payload = json!({
            "warmhole": warmhole.name,
            "condition": warmhole.condition,
            "context": state.current_context,
            "reason": reason,
        });
        let reply = self.request(state, DecisionKind::SuggestAlternative, payload).await?;
        Ok(alternative_name(&reply))
    }

    /// Pre-execution check of caller input. Opaque replies arrive as `{input: {message: text}}`.
    pub async fn validate_input(&self, state: &mut SystemState, name: &str, context: &Map<String, Value>) -> Result<Map<String, Value>> {
        let definition = state
            .functions
            .get(name)
            .map(|function| json!({"kind": "function", "definition": function}))
            .or_else(|| state.templates.get(name).map(|template| json!({"kind": "template", "definition": template})))
            .ok_or_else(|| EngineError::UnknownName(name.to_string()))?;
        let payload = json!({"name": name, "target": definition, "context": context});
        Ok(match self.request(state, DecisionKind::ValidateInput, payload).await? {
            DecisionReply::Structured(record) => record,
            DecisionReply::Opaque(text) => {
                let mut record = Map::new();
                record.insert("input".to_string(), json!({"message": text}));
                record
            }
        })
    }

    pub async fn optimize_warmhole(&self, state: &mut SystemState, warmhole: &WarmholeDef) -> Result<DecisionReply> {
        let payload = json!({"warmhole": warmhole, "context": state.current_context});
        self.request(state, DecisionKind::OptimizeWarmhole, payload).await
    }

    /// Free-form review of a compact state summary. Opaque replies arrive as `{result: text}`.
    pub async fn analyze_state(&self, state: &mut SystemState) -> Result<Map<String, Value>> {
        let payload = state_summary(state);
        let reply = self.request(state, DecisionKind::AnalyzeState, payload).await?;
        Ok(reply.into_record_or_wrap("result"))
    }
}

/// Resolves raw reply text into a [`DecisionReply`].
pub fn resolve_reply(raw: &str) -> DecisionReply {
    let text = extract_json(raw);
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(record)) => DecisionReply::Structured(record),
        Ok(Value::String(text)) => DecisionReply::Opaque(text),
        Ok(other) => {
            let mut record = Map::new();
            record.insert("result".to_string(), other);
            DecisionReply::Structured(record)
        }
        Err(_) => DecisionReply::Opaque(raw.trim().to_string()),
    }
}

/// Strips markdown code fences around a JSON payload, if present.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let start = start + 7;
        if let Some(end) = text[start..].find("```") {
            return text[start..start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let start = start + 3;
        let start = text[start..].find('\n').map(|i| start + i + 1).unwrap_or(start);
        if let Some(end) = text[start..].find("```") {
            return text[start..start + end].trim();
        }
    }

    text
}

pub fn condition_verdict(reply: &DecisionReply) -> ConditionVerdict {
    match reply {
        DecisionReply::Structured(record) => {
            let denied = match record.get("allowed") {
                Some(Value::Bool(allowed)) => !allowed,
                Some(Value::String(allowed)) => allowed.trim().eq_ignore_ascii_case("false"),
                _ => false,
            };
            if denied {
                let reason = reply.str_field(&["reason", "message"]).unwrap_or("condition not met").to_string();
                return ConditionVerdict::Denied { reason };
            }
            ConditionVerdict::Allowed {
                next: reply.str_field(&["next_warmhole", "next"]).map(|next| next.trim().to_string()),
            }
        }
        DecisionReply::Opaque(text) => {
            let word = trim_reply_text(text);
            let lowered = word.to_lowercase();
            if DENY_WORDS.contains(&lowered.as_str()) {
                ConditionVerdict::Denied { reason: word.to_string() }
            } else if word.is_empty() || ALLOW_WORDS.contains(&lowered.as_str()) {
                ConditionVerdict::Allowed { next: None }
            } else if BARE_NAME.is_match(word) {
                ConditionVerdict::Allowed {
                    next: Some(word.to_string()),
                }
            } else {
                warn!(reply = %preview(word, 120), "condition reply is not a warmhole name; keeping the declared target");
                ConditionVerdict::Allowed { next: None }
            }
        }
    }
}

pub fn alternative_name(reply: &DecisionReply) -> Option<String> {
    let name = match reply {
        DecisionReply::Structured(_) => reply.str_field(&["alternative", "next_warmhole", "warmhole"])?.trim(),
        DecisionReply::Opaque(text) => trim_reply_text(text),
    };
    BARE_NAME.is_match(name).then(|| name.to_string())
}

fn trim_reply_text(text: &str) -> &str {
    text.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`').trim()
}

/// Compact view of the state sent with `analyze_state`: names instead of full definitions and
/// no raw document.
fn state_summary(state: &SystemState) -> Value {
    let variables: Map<String, Value> = state
        .variables
        .iter()
        .filter(|(key, _)| key.as_str() != DOCUMENT_VARIABLE)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    json!({
        "functions": state.functions.keys().collect::<Vec<_>>(),
        "templates": state.templates.keys().collect::<Vec<_>>(),
        "warmholes": state.warmholes.keys().collect::<Vec<_>>(),
        "variables": variables,
        "currentContext": state.current_context,
        "previousOutput": state.previous_output,
        "historyLength": state.history.len(),
        "optimizations": state.optimizations.len(),
    })
}
