//! Shared data model for the READMEs definition runtime.
//!
//! The types here are plain serde records: the definitions a document declares, the results
//! the execution API hands back, the plans and decision messages exchanged with the external
//! decision service, and the audit journal kept in the system state.

pub mod decision;
pub mod definitions;
pub mod journal;
pub mod plan;
pub mod results;

pub use decision::{DecisionKind, DecisionReply, DecisionRequest};
pub use definitions::{FunctionDef, HeaderEntry, IoSpec, TemplateDef, WarmholeDef};
pub use journal::{DecisionRecord, HistoryEntry, HistoryKind, OptimizationRecord};
pub use plan::{Plan, PlanStep, PlanStepError};
pub use results::{
    ERROR_FORMAT, ExecutionResult, InitStatus, InitSummary, NavigationResult, NavigationStatus, OptimizationOutcome, OptimizationStatus,
    PlanResult, PlanStatus, StepOutcome,
};
