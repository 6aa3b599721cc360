//! Run lifecycle events
//!
//! Observers subscribe through the orchestrator; the run loops publish
//! into a broadcast channel. Lagging or absent subscribers never block
//! execution.

use conductor_types::{EscalationRecord, FailureReason, RunId, StageId};
use tokio::sync::broadcast;

/// Everything observable about run progress
#[derive(Clone, Debug)]
pub enum WorkflowEvent {
    RunStarted {
        run_id: RunId,
    },
    StageStarted {
        run_id: RunId,
        stage: StageId,
        attempt: u32,
    },
    StageCompleted {
        run_id: RunId,
        stage: StageId,
    },
    StageFailed {
        run_id: RunId,
        stage: StageId,
        attempt: u32,
        message: String,
    },
    StageEscalated {
        run_id: RunId,
        record: EscalationRecord,
    },
    TransitionApplied {
        run_id: RunId,
        source: StageId,
        targets: Vec<StageId>,
    },
    RunWaitingInput {
        run_id: RunId,
        stage: StageId,
    },
    RunResumed {
        run_id: RunId,
        stage: StageId,
    },
    CheckpointSaved {
        run_id: RunId,
        sequence: u64,
    },
    RunCompleted {
        run_id: RunId,
    },
    RunFailed {
        run_id: RunId,
        reason: FailureReason,
    },
    RunCancelled {
        run_id: RunId,
    },
    RunDegraded {
        run_id: RunId,
    },
}

/// Broadcast fan-out for [`WorkflowEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }

    /// Publish to whoever is listening. A send error only means there
    /// are no subscribers right now.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(WorkflowEvent::RunStarted {
            run_id: RunId::new("run-1"),
        });
        match rx.recv().await.unwrap() {
            WorkflowEvent::RunStarted { run_id } => assert_eq!(run_id.as_str(), "run-1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(16);
        bus.publish(WorkflowEvent::RunCompleted {
            run_id: RunId::new("run-1"),
        });
    }
}
