use readmes_types::{DecisionKind, PlanStepError};
use readmes_util::state_store::StateStoreError;
use thiserror::Error;

/// Hard failures raised to callers of the execution API.
///
/// Faults inside template bodies and malformed decision replies never show up here; they are
/// absorbed into result values. Every variant names the identifier that caused it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no function or template found with name: {0}")]
    UnknownName(String),

    #[error("template not found: {template} (referenced by function '{function}')")]
    TemplateNotFound { template: String, function: String },

    #[error("warmhole not found: {0}")]
    WarmholeNotFound(String),

    #[error("navigation denied for '{0}' with no alternative")]
    NavigationDenied(String),

    #[error("alternative chain exceeded {limit} hops: {chain}")]
    AlternativeLimit { limit: usize, chain: String },

    #[error("alternative chain revisits '{warmhole}': {chain}")]
    AlternativeCycle { warmhole: String, chain: String },

    #[error(transparent)]
    PlanStep(#[from] PlanStepError),

    #[error("decision service is not configured (needed for '{0}')")]
    DecisionUnavailable(DecisionKind),

    #[error("decision service request '{kind}' failed: {message}")]
    Decision { kind: DecisionKind, message: String },

    #[error("invalid decision service configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Persistence(#[from] StateStoreError),

    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn decision(kind: DecisionKind, error: anyhow::Error) -> Self {
        Self::Decision {
            kind,
            message: format!("{error:#}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
