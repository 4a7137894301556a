//! The session facade: one system state, its snapshot store, and the components acting on it.
//!
//! Every mutating operation takes `&mut self`, which is the mutual-exclusion boundary for a
//! session, and persists a snapshot before returning.

use std::sync::Arc;

use readmes_types::{DecisionKind, ExecutionResult, HistoryEntry, HistoryKind, InitStatus, InitSummary, NavigationResult, Plan, PlanResult};
use readmes_util::config::{RuntimeConfig, RuntimeLimits};
use readmes_util::state_store::{InMemoryStateStore, StateStore};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::decision::{DecisionAdapter, DecisionTransport, transport_from_config};
use crate::document::parse_document;
use crate::error::{EngineError, Result};
use crate::executor::ExecutionEngine;
use crate::navigator::{NavigationMode, Navigator};
use crate::plan::PlanInterpreter;
use crate::sandbox::{Evaluator, ScriptEvaluator};
use crate::state::SystemState;

/// Hover-style description of a declared name.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Description {
    pub kind: &'static str,
    pub name: String,
    pub description: String,
}

pub struct Session {
    state: SystemState,
    store: Arc<dyn StateStore>,
    executor: ExecutionEngine,
    decisions: Option<DecisionAdapter>,
    navigation: NavigationMode,
    limits: RuntimeLimits,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("navigation", &self.navigation)
            .field("limits", &self.limits)
            .field("decisions", &self.decisions)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Empty session persisting to `store`, with default limits and no decision service.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        let limits = RuntimeLimits::default();
        Self {
            state: SystemState::new(),
            store,
            executor: executor_for(&limits),
            decisions: None,
            navigation: NavigationMode::default(),
            limits,
        }
    }

    /// Session backed by an in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStateStore::new()))
    }

    /// Session wired from runtime configuration. The snapshot is not loaded; call [`Session::load`].
    pub fn from_config(config: &RuntimeConfig, store: Arc<dyn StateStore>) -> Result<Self> {
        let transport = transport_from_config(&config.decision).map_err(|error| EngineError::Configuration(format!("{error:#}")))?;
        let mut session = Self::new(store).with_limits(config.limits).with_navigation_mode(config.navigation.into());
        if let Some(transport) = transport {
            session = session.with_decision_transport(transport);
        }
        Ok(session)
    }

    pub fn with_decision_transport(mut self, transport: Arc<dyn DecisionTransport>) -> Self {
        self.decisions = Some(DecisionAdapter::new(transport));
        self
    }

    pub fn with_navigation_mode(mut self, mode: NavigationMode) -> Self {
        self.navigation = mode;
        self
    }

    pub fn with_limits(mut self, limits: RuntimeLimits) -> Self {
        self.executor = executor_for(&limits);
        self.limits = limits;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.executor = ExecutionEngine::new(evaluator, self.limits.max_call_depth);
        self
    }

    pub fn state(&self) -> &SystemState {
        &self.state
    }

    pub fn navigation_mode(&self) -> NavigationMode {
        self.navigation
    }

    pub fn has_decision_service(&self) -> bool {
        self.decisions.is_some()
    }

    /// Merges the stored snapshot into memory. Returns whether a snapshot was found.
    pub fn load(&mut self) -> Result<bool> {
        match self.store.load_snapshot()? {
            Some(snapshot) => {
                self.state.merge_snapshot(snapshot);
                info!(
                    functions = self.state.functions.len(),
                    warmholes = self.state.warmholes.len(),
                    "state restored"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn save(&self) -> Result<()> {
        self.store.save_snapshot(&self.state.to_snapshot()?)?;
        Ok(())
    }

    /// Parses `document` into the registries and reports what was found.
    pub fn init(&mut self, document: &str) -> Result<InitSummary> {
        let parsed = parse_document(document);
        let summary = InitSummary {
            status: InitStatus::Initialized,
            sections: parsed.sections,
            functions: parsed.functions.len(),
            templates: parsed.templates.len(),
            warmholes: parsed.warmholes.len(),
            headers: parsed.headers.len(),
        };
        self.state.apply_parsed(parsed, document);
        self.state.history.push(HistoryEntry::now(
            HistoryKind::Init,
            "document",
            "initialized",
            serde_json::to_value(&summary)?,
        ));
        info!(
            functions = summary.functions,
            templates = summary.templates,
            warmholes = summary.warmholes,
            sections = summary.sections,
            "document initialized"
        );
        self.save()?;
        Ok(summary)
    }

    pub fn execute(&mut self, name: &str, context: &Map<String, Value>) -> Result<ExecutionResult> {
        let result = self.executor.execute(&self.state, name, context)?;
        info!(name, status = result.status_label(), "executed");
        self.state
            .history
            .push(HistoryEntry::now(HistoryKind::Execute, name, result.status_label(), Value::Null));
        self.save()?;
        Ok(result)
    }

    /// Navigates with the session's default mode.
    pub async fn navigate(&mut self, id: &str) -> Result<NavigationResult> {
        self.navigate_with(id, self.navigation).await
    }

    pub async fn navigate_with(&mut self, id: &str, mode: NavigationMode) -> Result<NavigationResult> {
        let navigator = Navigator::new(self.decisions.as_ref(), self.limits.max_alternative_depth);
        let outcome = navigator.navigate(&mut self.state, id, mode).await;
        if let Ok(navigation) = &outcome {
            self.state.history.push(HistoryEntry::now(
                HistoryKind::Navigate,
                id,
                "navigated",
                json!({"to": navigation.to, "alternatives": navigation.alternatives}),
            ));
        }
        // A failed navigation may still have promoted variables.
        self.persist_after(outcome)
    }

    /// Replaces the current context.
    pub fn set_context(&mut self, context: Map<String, Value>) -> Result<()> {
        self.state.current_context = context;
        self.save()
    }

    /// Asks the decision service for a plan for `intent` and runs it.
    pub async fn run_plan(&mut self, intent: &str) -> Result<PlanResult> {
        let decisions = self.decisions.as_ref().ok_or(EngineError::DecisionUnavailable(DecisionKind::AnalyzeIntent))?;
        let plan = decisions.analyze_intent(&mut self.state, intent).await;
        let plan = self.persist_after(plan)?;
        info!(intent, steps = plan.steps.len(), "plan received");
        self.run(intent, &plan).await
    }

    /// Runs an already-built plan.
    pub async fn execute_plan(&mut self, plan: &Plan) -> Result<PlanResult> {
        self.run("plan", plan).await
    }

    async fn run(&mut self, target: &str, plan: &Plan) -> Result<PlanResult> {
        let navigator = Navigator::new(self.decisions.as_ref(), self.limits.max_alternative_depth);
        let interpreter =
            PlanInterpreter::new(&self.executor, navigator, self.decisions.as_ref(), self.navigation).with_checkpoint(self.store.as_ref());
        let outcome = interpreter.execute_plan(&mut self.state, plan).await;
        let status = if outcome.is_ok() { "complete" } else { "aborted" };
        self.state.history.push(HistoryEntry::now(
            HistoryKind::Plan,
            target,
            status,
            json!({"steps": plan.steps.len()}),
        ));
        self.persist_after(outcome)
    }

    /// Function or warmhole description for `word`, functions first.
    pub fn describe(&self, word: &str) -> Option<Description> {
        if let Some(function) = self.state.functions.get(word) {
            return Some(Description {
                kind: "function",
                name: function.name.clone(),
                description: function.description.clone(),
            });
        }
        self.state.warmholes.get(word).map(|warmhole| Description {
            kind: "warmhole",
            name: warmhole.name.clone(),
            description: warmhole.description.clone(),
        })
    }

    /// Asks the decision service to check `context` before executing `name`.
    pub async fn validate_input(&mut self, name: &str, context: &Map<String, Value>) -> Result<Map<String, Value>> {
        let decisions = self.decisions.as_ref().ok_or(EngineError::DecisionUnavailable(DecisionKind::ValidateInput))?;
        let outcome = decisions.validate_input(&mut self.state, name, context).await;
        self.persist_after(outcome)
    }

    pub async fn analyze_state(&mut self) -> Result<Map<String, Value>> {
        let decisions = self.decisions.as_ref().ok_or(EngineError::DecisionUnavailable(DecisionKind::AnalyzeState))?;
        let outcome = decisions.analyze_state(&mut self.state).await;
        self.persist_after(outcome)
    }

    /// Saves whatever state `outcome` left behind. A save failure after a failed operation is
    /// logged so the operation's own error reaches the caller.
    fn persist_after<T>(&self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.save()?;
                Ok(value)
            }
            Err(error) => {
                if let Err(save_error) = self.save() {
                    warn!(error = %save_error, "failed to save state after a failed operation");
                }
                Err(error)
            }
        }
    }
}

fn executor_for(limits: &RuntimeLimits) -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(ScriptEvaluator::new(limits.max_eval_steps)), limits.max_call_depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::ScriptedTransport;
    use readmes_util::state_store::JsonStateStore;

    const DOC: &str = r#"## Functions
# Function: process_text
- description: "Processes input text"
- input: text: string
- output: result: string
- template: text_processor

# Template: text_processor
- input_placeholder: "{{text}}"
- transform: |
    return context.text.toUpperCase();
- output_format: string

## Navigation
# Warmhole: start
- description: "Start warmhole"
- state_transfer: ["text"]
- condition: "true"
- next_warmhole: "process"
"#;

    #[test]
    fn init_reports_counts_and_persists() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut session = Session::new(store.clone());
        let summary = session.init(DOC).unwrap();
        assert_eq!(summary.functions, 1);
        assert_eq!(summary.templates, 1);
        assert_eq!(summary.warmholes, 1);
        assert_eq!(summary.sections, 2);

        let snapshot = store.load_snapshot().unwrap().unwrap();
        assert_eq!(snapshot["variables"]["readme_content"], json!(DOC));
    }

    #[test]
    fn describe_prefers_functions() {
        let mut session = Session::in_memory();
        session.init(DOC).unwrap();
        assert_eq!(session.describe("process_text").unwrap().kind, "function");
        assert_eq!(session.describe("start").unwrap().description, "Start warmhole");
        assert!(session.describe("text_processor").is_none());
    }

    #[tokio::test]
    async fn state_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let mut session = Session::new(Arc::new(JsonStateStore::new(path.clone())));
            session.init(DOC).unwrap();
            session.set_context(json!({"text": "hi"}).as_object().cloned().unwrap()).unwrap();
            session.navigate("start").await.unwrap();
        }
        let mut restored = Session::new(Arc::new(JsonStateStore::new(path)));
        assert!(restored.load().unwrap());
        assert_eq!(restored.state().variables["text"], json!("hi"));
        assert_eq!(restored.state().active_warmhole(), Some("process"));
        assert_eq!(restored.state().history.len(), 2);
    }

    #[tokio::test]
    async fn decision_helpers_need_a_service() {
        let mut session = Session::in_memory();
        assert!(matches!(session.analyze_state().await, Err(EngineError::DecisionUnavailable(DecisionKind::AnalyzeState))));
        assert!(matches!(session.run_plan("anything").await, Err(EngineError::DecisionUnavailable(_))));
    }

    #[tokio::test]
    async fn failed_guided_navigation_still_persists_promotion() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut session = Session::new(store.clone()).with_decision_transport(Arc::new(ScriptedTransport::new()));
        session.init(DOC).unwrap();
        session.set_context(json!({"text": "kept"}).as_object().cloned().unwrap()).unwrap();

        assert!(session.navigate_with("start", NavigationMode::Guided).await.is_err());
        let snapshot = store.load_snapshot().unwrap().unwrap();
        assert_eq!(snapshot["variables"]["text"], json!("kept"));
    }
}
