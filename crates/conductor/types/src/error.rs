//! Error taxonomy for the orchestration core
//!
//! Definition errors are rejected at registration time and never reach
//! a running workflow. Everything that happens at runtime is recorded
//! in run state instead of being thrown across the submit boundary.

use crate::definition::{StageId, WorkflowDefinitionId};
use crate::guard::GuardError;
use crate::run::RunId;

/// Errors produced by definition validation and orchestrator operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("unknown stage: '{0}'")]
    UnknownStage(StageId),

    #[error("duplicate stage id: '{0}'")]
    DuplicateStage(StageId),

    #[error("workflow definition not found: {0}")]
    DefinitionNotFound(WorkflowDefinitionId),

    #[error("run not found: {0}")]
    RunNotFound(RunId),

    #[error("run {0} is already in a terminal state")]
    AlreadyTerminal(RunId),

    #[error("stage '{0}' is unreachable from the entry stage")]
    UnreachableStage(StageId),

    #[error("non-terminal stage '{0}' has no outgoing transition rule")]
    MissingOutgoingRule(StageId),

    #[error("join on '{target}' can never be satisfied: {reason}")]
    JoinDeadlock { target: StageId, reason: String },

    #[error("escalation ladder starting at '{0}' contains a cycle")]
    EscalationCycle(StageId),

    #[error("stage '{stage}' of run {run_id} is not waiting for input")]
    NotWaitingForInput { run_id: RunId, stage: StageId },

    #[error("context entry for stage '{0}' already exists")]
    ContextOverwrite(StageId),

    #[error("checkpoint persistence failed: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Result type alias used throughout the core
pub type WorkflowResult<T> = Result<T, WorkflowError>;
