//! Checkpoints and the escalation audit trail

use crate::definition::StageId;
use crate::run::{RunId, WorkflowRun};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A full snapshot of run state at one sequence number
///
/// Sequence numbers are strictly increasing per run with no gaps, so
/// recovery can always resume from the highest one. Writing the same
/// sequence twice must be a no-op in any store implementation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: RunId,
    pub sequence: u64,
    pub snapshot: WorkflowRun,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Snapshot a run at its current state
    pub fn new(sequence: u64, run: &WorkflowRun) -> Self {
        Self {
            run_id: run.id.clone(),
            sequence,
            snapshot: run.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Why a stage escalated
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EscalationReason {
    /// Every retry attempt failed
    RetriesExhausted { attempts: u32 },

    /// The stage succeeded but below its confidence threshold
    LowConfidence { confidence: f64, threshold: f64 },
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RetriesExhausted { attempts } => {
                write!(f, "retries exhausted after {} attempts", attempts)
            }
            Self::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "confidence {:.2} below threshold {:.2}", confidence, threshold),
        }
    }
}

/// One hop of the escalation ladder, kept for audit
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub run_id: RunId,

    /// Graph-level stage the ladder belongs to
    pub stage_id: StageId,

    /// Tier that was executing when escalation fired
    pub from_tier: StageId,

    /// Tier that takes over
    pub to_tier: StageId,

    pub reason: EscalationReason,
    pub at: DateTime<Utc>,
}

impl EscalationRecord {
    pub fn new(
        run_id: RunId,
        stage_id: StageId,
        from_tier: StageId,
        to_tier: StageId,
        reason: EscalationReason,
    ) -> Self {
        Self {
            run_id,
            stage_id,
            from_tier,
            to_tier,
            reason,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::WorkflowDefinitionId;
    use serde_json::json;

    #[test]
    fn test_checkpoint_snapshots_current_state() {
        let mut run = WorkflowRun::new(WorkflowDefinitionId::new("wf-x"), json!({}));
        run.begin(StageId::new("market"));
        let seq = run.next_checkpoint_seq();
        let cp = Checkpoint::new(seq, &run);
        assert_eq!(cp.run_id, run.id);
        assert_eq!(cp.sequence, 0);
        assert_eq!(cp.snapshot.active, vec![StageId::new("market")]);
        // the snapshot carries the already-bumped counter so recovery
        // continues the sequence without a collision
        assert_eq!(cp.snapshot.checkpoint_seq, 1);
    }

    #[test]
    fn test_escalation_reason_display() {
        let r = EscalationReason::RetriesExhausted { attempts: 3 };
        assert_eq!(r.to_string(), "retries exhausted after 3 attempts");
        let r = EscalationReason::LowConfidence {
            confidence: 0.2,
            threshold: 0.5,
        };
        assert_eq!(r.to_string(), "confidence 0.20 below threshold 0.50");
    }

    #[test]
    fn test_checkpoint_serialization_roundtrip() {
        let run = WorkflowRun::new(WorkflowDefinitionId::new("wf-x"), json!({"n": 1}));
        let cp = Checkpoint::new(0, &run);
        let encoded = serde_json::to_string(&cp).unwrap();
        let decoded: Checkpoint = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.run_id, cp.run_id);
        assert_eq!(decoded.sequence, 0);
        assert_eq!(decoded.snapshot.context.input, json!({"n": 1}));
    }
}
