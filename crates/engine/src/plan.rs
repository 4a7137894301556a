//! Plan interpreter: runs decision-service plans step by step.
//!
//! Steps run strictly in order. A step that fails hard (unknown name, unknown step type,
//! failed decision call) aborts the rest of the plan; steps already run stay applied and,
//! when a checkpoint store is attached, persisted.

use readmes_types::{DecisionKind, HistoryEntry, HistoryKind, Plan, PlanResult, PlanStatus, PlanStep, StepOutcome};
use readmes_util::state_store::StateStore;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::decision::DecisionAdapter;
use crate::error::{EngineError, Result};
use crate::executor::ExecutionEngine;
use crate::navigator::{NavigationMode, Navigator};
use crate::optimize::apply_optimization;
use crate::state::SystemState;

pub struct PlanInterpreter<'a> {
    executor: &'a ExecutionEngine,
    navigator: Navigator<'a>,
    decisions: Option<&'a DecisionAdapter>,
    mode: NavigationMode,
    checkpoint: Option<&'a dyn StateStore>,
}

impl<'a> PlanInterpreter<'a> {
    pub fn new(executor: &'a ExecutionEngine, navigator: Navigator<'a>, decisions: Option<&'a DecisionAdapter>, mode: NavigationMode) -> Self {
        Self {
            executor,
            navigator,
            decisions,
            mode,
            checkpoint: None,
        }
    }

    /// Saves a snapshot to `store` after every step.
    pub fn with_checkpoint(mut self, store: &'a dyn StateStore) -> Self {
        self.checkpoint = Some(store);
        self
    }

    pub async fn execute_plan(&self, state: &mut SystemState, plan: &Plan) -> Result<PlanResult> {
        let mut results = Vec::with_capacity(plan.steps.len());
        for (index, raw) in plan.steps.iter().enumerate() {
            let step = PlanStep::from_value(raw).inspect_err(|error| {
                warn!(step = index, error = %error, "aborting plan");
            })?;
            let kind = step.kind();
            let outcome = match self.run_step(state, step).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(step = index, kind, error = %error, "plan step failed; aborting plan");
                    return Err(error);
                }
            };
            info!(step = index, kind, "plan step complete");
            results.push(outcome);
            self.save_checkpoint(state)?;
        }

        Ok(PlanResult {
            status: PlanStatus::Complete,
            message: plan.user_message.clone().unwrap_or_default(),
            results,
            active_warmhole: state.active_warmhole().map(str::to_string),
        })
    }

    async fn run_step(&self, state: &mut SystemState, step: PlanStep) -> Result<StepOutcome> {
        match step {
            PlanStep::Navigate { warmhole, context } => {
                if let Some(context) = context {
                    state.current_context = context;
                }
                let navigation = self.navigator.navigate(state, &warmhole, self.mode).await?;
                state.history.push(HistoryEntry::now(
                    HistoryKind::Navigate,
                    &warmhole,
                    "navigated",
                    json!({"to": navigation.to, "plan": true}),
                ));
                Ok(StepOutcome::Navigate { warmhole, navigation })
            }
            PlanStep::Execute { function, context } => {
                let execution = self.executor.execute(state, &function, &context)?;
                state.history.push(HistoryEntry::now(
                    HistoryKind::Execute,
                    &function,
                    execution.status_label(),
                    json!({"plan": true}),
                ));
                Ok(StepOutcome::Execute { function, execution })
            }
            PlanStep::Optimize { warmhole } => {
                let definition = state
                    .warmholes
                    .get(&warmhole)
                    .cloned()
                    .ok_or_else(|| EngineError::WarmholeNotFound(warmhole.clone()))?;
                let decisions = self
                    .decisions
                    .ok_or(EngineError::DecisionUnavailable(DecisionKind::OptimizeWarmhole))?;
                let reply = decisions.optimize_warmhole(state, &definition).await?;
                let optimization = apply_optimization(state, &warmhole, &reply)?;
                state.history.push(HistoryEntry::now(
                    HistoryKind::Optimize,
                    &warmhole,
                    optimization.status.as_str(),
                    Value::Object(optimization.changes.clone()),
                ));
                Ok(StepOutcome::Optimize { warmhole, optimization })
            }
        }
    }

    fn save_checkpoint(&self, state: &SystemState) -> Result<()> {
        if let Some(store) = self.checkpoint {
            store.save_snapshot(&state.to_snapshot()?)?;
        }
        Ok(())
    }
}
