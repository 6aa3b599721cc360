//! In-memory checkpoint store
//!
//! Default backend for tests and single-process deployments. Survives
//! run-loop crashes within the process but not process restarts.

use crate::{CheckpointStore, StoreResult};
use async_trait::async_trait;
use conductor_types::{Checkpoint, RunId};
use dashmap::DashMap;
use tracing::debug;

/// Checkpoints held in a concurrent map, one ordered vector per run
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: DashMap<RunId, Vec<Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints held for a run
    pub fn count(&self, run_id: &RunId) -> usize {
        self.checkpoints.get(run_id).map(|v| v.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> StoreResult<()> {
        let mut entry = self
            .checkpoints
            .entry(checkpoint.run_id.clone())
            .or_default();

        // Idempotent on duplicate sequence: a retried save after a
        // partial failure must not create a second record.
        match entry.binary_search_by_key(&checkpoint.sequence, |c| c.sequence) {
            Ok(_) => {
                debug!(
                    run_id = %checkpoint.run_id,
                    sequence = checkpoint.sequence,
                    "duplicate checkpoint save ignored"
                );
            }
            Err(pos) => entry.insert(pos, checkpoint),
        }
        Ok(())
    }

    async fn load_latest(&self, run_id: &RunId) -> StoreResult<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .get(run_id)
            .and_then(|v| v.last().cloned()))
    }

    async fn list(&self, run_id: &RunId) -> StoreResult<Vec<Checkpoint>> {
        Ok(self
            .checkpoints
            .get(run_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn run_ids(&self) -> StoreResult<Vec<RunId>> {
        Ok(self.checkpoints.iter().map(|e| e.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::{StageId, WorkflowDefinitionId, WorkflowRun};
    use serde_json::json;

    fn make_run() -> WorkflowRun {
        WorkflowRun::new(WorkflowDefinitionId::new("wf-test"), json!({}))
    }

    fn snapshot(run: &mut WorkflowRun) -> Checkpoint {
        let seq = run.next_checkpoint_seq();
        Checkpoint::new(seq, run)
    }

    #[tokio::test]
    async fn test_save_and_load_latest() {
        let store = InMemoryCheckpointStore::new();
        let mut run = make_run();

        store.save(snapshot(&mut run)).await.unwrap();
        run.begin(StageId::new("market"));
        store.save(snapshot(&mut run)).await.unwrap();

        let latest = store.load_latest(&run.id).await.unwrap().unwrap();
        assert_eq!(latest.sequence, 1);
        assert_eq!(latest.snapshot.active, vec![StageId::new("market")]);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_is_ignored() {
        let store = InMemoryCheckpointStore::new();
        let run = make_run();

        let first = Checkpoint::new(0, &run);
        let mut shadowed = run.clone();
        shadowed.begin(StageId::new("x"));
        let second = Checkpoint::new(0, &shadowed);

        store.save(first).await.unwrap();
        store.save(second).await.unwrap();

        assert_eq!(store.count(&run.id), 1);
        let latest = store.load_latest(&run.id).await.unwrap().unwrap();
        // the first write wins
        assert!(latest.snapshot.active.is_empty());
    }

    #[tokio::test]
    async fn test_list_is_ordered_even_with_out_of_order_saves() {
        let store = InMemoryCheckpointStore::new();
        let run = make_run();

        store.save(Checkpoint::new(2, &run)).await.unwrap();
        store.save(Checkpoint::new(0, &run)).await.unwrap();
        store.save(Checkpoint::new(1, &run)).await.unwrap();

        let all = store.list(&run.id).await.unwrap();
        let sequences: Vec<u64> = all.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(
            store.load_latest(&run.id).await.unwrap().unwrap().sequence,
            2
        );
    }

    #[tokio::test]
    async fn test_unknown_run_is_empty() {
        let store = InMemoryCheckpointStore::new();
        let ghost = RunId::new("run-ghost");
        assert!(store.load_latest(&ghost).await.unwrap().is_none());
        assert!(store.list(&ghost).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_ids_enumerates_all_runs() {
        let store = InMemoryCheckpointStore::new();
        let a = make_run();
        let b = make_run();
        store.save(Checkpoint::new(0, &a)).await.unwrap();
        store.save(Checkpoint::new(0, &b)).await.unwrap();

        let mut ids = store.run_ids().await.unwrap();
        ids.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
