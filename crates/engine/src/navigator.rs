//! Warmhole navigation: the state machine moving the session between warmhole nodes.
//!
//! A transition promotes the departing node's `state_transfer` variables from the current
//! context into durable variables, picks the next node, and rebuilds the current context as
//! `{warmhole: next, ...variables}`. In guided mode the decision service judges the node's
//! condition and may redirect through alternatives; the chain of alternatives is bounded in
//! length and may not revisit a node.

use readmes_types::{DecisionKind, NavigationResult, NavigationStatus, WarmholeDef};
use readmes_util::config::{DEFAULT_MAX_ALTERNATIVE_DEPTH, NavigationPreference};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::decision::{ConditionVerdict, DecisionAdapter};
use crate::error::{EngineError, Result};
use crate::state::SystemState;

/// How the next node is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavigationMode {
    /// Follow the declared `next_warmhole`.
    #[default]
    Static,
    /// Ask the decision service to judge the condition and possibly pick the target.
    Guided,
}

impl From<NavigationPreference> for NavigationMode {
    fn from(preference: NavigationPreference) -> Self {
        match preference {
            NavigationPreference::Static => Self::Static,
            NavigationPreference::Guided => Self::Guided,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Navigator<'a> {
    decisions: Option<&'a DecisionAdapter>,
    max_alternative_depth: usize,
}

impl<'a> Navigator<'a> {
    pub fn new(decisions: Option<&'a DecisionAdapter>, max_alternative_depth: usize) -> Self {
        Self {
            decisions,
            max_alternative_depth,
        }
    }

    /// Navigator with no decision service; only [`NavigationMode::Static`] succeeds.
    pub fn offline() -> Self {
        Self::new(None, DEFAULT_MAX_ALTERNATIVE_DEPTH)
    }

    pub async fn navigate(&self, state: &mut SystemState, id: &str, mode: NavigationMode) -> Result<NavigationResult> {
        let mut chain = vec![id.to_string()];
        let mut current = id.to_string();

        let (warmhole, next) = loop {
            let warmhole = state
                .warmholes
                .get(&current)
                .cloned()
                .ok_or_else(|| EngineError::WarmholeNotFound(current.clone()))?;

            // Promotion lands before any decision round trip and survives its failure.
            promote_transfers(state, &warmhole);

            let reason = match mode {
                NavigationMode::Static => {
                    let next = warmhole.next_warmhole.clone();
                    break (warmhole, next);
                }
                NavigationMode::Guided => {
                    let decisions = self.adapter()?;
                    match decisions.evaluate_condition(state, &warmhole).await? {
                        ConditionVerdict::Allowed { next } => {
                            let next = next.unwrap_or_else(|| warmhole.next_warmhole.clone());
                            break (warmhole, next);
                        }
                        ConditionVerdict::Denied { reason } => reason,
                    }
                }
            };

            warn!(warmhole = %current, reason = %reason, "navigation denied; asking for an alternative");
            let decisions = self.adapter()?;
            let Some(alternative) = decisions.suggest_alternative(state, &warmhole, &reason).await? else {
                return Err(EngineError::NavigationDenied(current));
            };
            if chain.contains(&alternative) {
                chain.push(alternative.clone());
                return Err(EngineError::AlternativeCycle {
                    warmhole: alternative,
                    chain: chain.join(" -> "),
                });
            }
            chain.push(alternative.clone());
            if chain.len() - 1 > self.max_alternative_depth {
                return Err(EngineError::AlternativeLimit {
                    limit: self.max_alternative_depth,
                    chain: chain.join(" -> "),
                });
            }
            debug!(from = %current, alternative = %alternative, "following alternative");
            current = alternative;
        };

        state.previous_output = state.current_context.get("output").cloned().unwrap_or(Value::Null);
        let mut context = Map::new();
        context.insert("warmhole".to_string(), Value::String(next.clone()));
        context.extend(state.variables.iter().map(|(key, value)| (key.clone(), value.clone())));
        state.current_context = context;

        info!(warmhole = %warmhole.name, to = %next, alternatives = chain.len() - 1, "warmhole navigated");
        Ok(NavigationResult {
            status: NavigationStatus::Navigated,
            from: warmhole.name.clone(),
            to: next,
            state_transferred: warmhole.state_transfer.clone(),
            alternatives: chain.into_iter().skip(1).collect(),
        })
    }

    fn adapter(&self) -> Result<&'a DecisionAdapter> {
        self.decisions.ok_or(EngineError::DecisionUnavailable(DecisionKind::EvaluateCondition))
    }
}

/// Copies each transferred name present in the current context into `variables`.
fn promote_transfers(state: &mut SystemState, warmhole: &WarmholeDef) {
    for name in &warmhole.state_transfer {
        match state.current_context.get(name) {
            Some(value) => {
                state.variables.insert(name.clone(), value.clone());
            }
            None => debug!(warmhole = %warmhole.name, variable = %name, "transfer variable absent from context"),
        }
    }
}
