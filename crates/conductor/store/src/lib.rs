//! Checkpoint persistence for Conductor runs
//!
//! The scheduler snapshots each run after every state-affecting event
//! and hands the snapshot to a [`CheckpointStore`]. The store contract
//! is deliberately small so backends can range from the in-memory map
//! used in tests to a database. Two properties matter to the engine:
//! saves with a duplicate `(run_id, sequence)` pair must be idempotent,
//! and `load_latest` must return the checkpoint with the highest
//! sequence number.

pub mod memory;

use async_trait::async_trait;
use conductor_types::{Checkpoint, RunId};

pub use memory::InMemoryCheckpointStore;

/// Errors surfaced by checkpoint backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("checkpoint backend unavailable: {0}")]
    Unavailable(String),

    #[error("checkpoint payload could not be encoded: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence seam for run snapshots
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist one checkpoint. Re-saving an already stored sequence
    /// for the same run is a no-op, not an error.
    async fn save(&self, checkpoint: Checkpoint) -> StoreResult<()>;

    /// The highest-sequence checkpoint for a run, if any
    async fn load_latest(&self, run_id: &RunId) -> StoreResult<Option<Checkpoint>>;

    /// All checkpoints for a run, ordered by ascending sequence
    async fn list(&self, run_id: &RunId) -> StoreResult<Vec<Checkpoint>>;

    /// Every run id with at least one checkpoint
    async fn run_ids(&self) -> StoreResult<Vec<RunId>>;
}
