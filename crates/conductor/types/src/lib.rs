//! Domain types for Conductor workflows
//!
//! A workflow is a directed graph of stages. Each stage is bound to an
//! opaque executor (an agent), edges between stages carry guard
//! predicates over the accumulated run context, and fan-in targets
//! declare a join policy. Definitions are immutable once validated;
//! runs are the mutable execution instances, snapshotted into
//! checkpoints after every state-affecting event.

pub mod checkpoint;
pub mod definition;
pub mod error;
pub mod guard;
pub mod run;
pub mod stage_result;
pub mod transition;

pub use checkpoint::{Checkpoint, EscalationReason, EscalationRecord};
pub use definition::{
    ExecutionMode, RetryPolicy, StageDefinition, StageId, WorkflowDefinition, WorkflowDefinitionId,
};
pub use error::{WorkflowError, WorkflowResult};
pub use guard::{CmpOp, GuardError, GuardExpr};
pub use run::{
    ContextEntry, FailureCode, FailureReason, JoinProgress, RunContext, RunId, RunStatus,
    WorkflowRun,
};
pub use stage_result::{ErrorInfo, StageOutcome, StageResult};
pub use transition::{JoinPolicy, TransitionRule};
