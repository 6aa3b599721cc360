//! Escalation control
//!
//! When a stage exhausts its retries or succeeds below its confidence
//! threshold, the controller decides the next hop on the stage's
//! ladder. Decisions are a pure function of definition and run state,
//! so replaying a recovered run reaches the same verdicts.

use conductor_types::{
    EscalationReason, EscalationRecord, StageId, WorkflowDefinition, WorkflowRun,
};
use std::sync::Arc;
use tracing::warn;

/// Outcome of an escalation request
#[derive(Debug)]
pub enum EscalationDecision {
    /// Hand the stage to the next tier
    Escalate {
        next_tier: StageId,
        record: EscalationRecord,
    },

    /// The run already used its `max_escalations` budget
    BudgetExhausted,

    /// The failing tier has no `escalate_to`
    NoTarget,
}

pub struct EscalationController {
    definition: Arc<WorkflowDefinition>,
}

impl EscalationController {
    pub fn new(definition: Arc<WorkflowDefinition>) -> Self {
        Self { definition }
    }

    /// Decide what happens after `executing` (possibly an alias tier)
    /// triggered escalation
    pub fn decide(
        &self,
        run: &WorkflowRun,
        executing: &StageId,
        reason: EscalationReason,
    ) -> EscalationDecision {
        if run.escalation_level >= self.definition.max_escalations {
            warn!(
                run_id = %run.id,
                stage = %executing,
                level = run.escalation_level,
                "escalation budget exhausted"
            );
            return EscalationDecision::BudgetExhausted;
        }

        let next_tier = match self
            .definition
            .stage(executing)
            .and_then(|s| s.escalate_to.clone())
        {
            Some(next) => next,
            None => {
                warn!(run_id = %run.id, stage = %executing, "no escalation target");
                return EscalationDecision::NoTarget;
            }
        };

        let origin = run.origin_of(executing);
        let record = EscalationRecord::new(
            run.id.clone(),
            origin,
            executing.clone(),
            next_tier.clone(),
            reason,
        );
        EscalationDecision::Escalate { next_tier, record }
    }
}
