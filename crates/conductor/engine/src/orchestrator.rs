//! Orchestrator: the front door of the engine
//!
//! Owns the definition and executor registries, spawns one scheduler
//! task per run, and exposes submit, status, cancel, resume, recover
//! and event subscription. Run state is shared with the scheduler
//! through a lock so status reads never block execution for long.

use crate::config::EngineConfig;
use crate::definitions::DefinitionRegistry;
use crate::escalation::EscalationController;
use crate::events::{EventBus, WorkflowEvent};
use crate::registry::{ExecutorRegistry, StageExecutor};
use crate::scheduler::{ResumeRequest, RunLoop};
use conductor_store::CheckpointStore;
use conductor_types::{
    RunId, RunStatus, StageId, WorkflowDefinition, WorkflowDefinitionId, WorkflowError,
    WorkflowResult, WorkflowRun,
};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tracing::{info, warn};

struct RunHandle {
    run: Arc<RwLock<WorkflowRun>>,
    cancel_tx: watch::Sender<bool>,
    resume_tx: mpsc::Sender<ResumeRequest>,
}

pub struct Orchestrator {
    definitions: DefinitionRegistry,
    executors: Arc<ExecutorRegistry>,
    store: Arc<dyn CheckpointStore>,
    events: EventBus,
    config: EngineConfig,
    runs: DashMap<RunId, RunHandle>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn CheckpointStore>, config: EngineConfig) -> Self {
        Self {
            definitions: DefinitionRegistry::new(),
            executors: Arc::new(ExecutorRegistry::new()),
            store,
            events: EventBus::new(config.event_capacity),
            config,
            runs: DashMap::new(),
        }
    }

    /// Bind an executor implementation to a registry key
    pub fn register_executor(&self, key: impl Into<String>, executor: Arc<dyn StageExecutor>) {
        self.executors.register(key, executor);
    }

    /// Validate and register a workflow definition. Every stage must
    /// reference an already registered executor.
    pub fn register_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> WorkflowResult<WorkflowDefinitionId> {
        for stage in &definition.stages {
            if !self.executors.contains(&stage.executor) {
                return Err(WorkflowError::ValidationError(format!(
                    "stage '{}' references unregistered executor '{}'",
                    stage.id, stage.executor
                )));
            }
        }
        self.definitions.register(definition)
    }

    /// Start a new run of a registered definition
    pub fn submit(
        &self,
        definition_id: &WorkflowDefinitionId,
        input: Value,
    ) -> WorkflowResult<RunId> {
        let definition = self.definitions.get(definition_id)?;
        let mut run = WorkflowRun::new(definition.id.clone(), input);
        run.begin(definition.entry.clone());
        info!(run_id = %run.id, definition_id = %definition.id, "run submitted");
        Ok(self.spawn_run(run, definition))
    }

    fn spawn_run(&self, run: WorkflowRun, definition: Arc<WorkflowDefinition>) -> RunId {
        let run_id = run.id.clone();
        let run = Arc::new(RwLock::new(run));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (resume_tx, resume_rx) = mpsc::channel(16);

        self.runs.insert(
            run_id.clone(),
            RunHandle {
                run: Arc::clone(&run),
                cancel_tx,
                resume_tx,
            },
        );

        let run_loop = RunLoop {
            run,
            escalation: EscalationController::new(Arc::clone(&definition)),
            definition,
            executors: Arc::clone(&self.executors),
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            config: self.config.clone(),
            cancel_rx,
            resume_rx,
        };
        tokio::spawn(run_loop.drive());
        run_id
    }

    /// Snapshot of the run's current state
    pub async fn run_status(&self, run_id: &RunId) -> WorkflowResult<WorkflowRun> {
        if let Some(handle) = self.runs.get(run_id) {
            return Ok(handle.run.read().await.clone());
        }
        // not in memory; the checkpoint store may still know it
        let latest = self
            .store
            .load_latest(run_id)
            .await
            .map_err(|e| WorkflowError::Checkpoint(e.to_string()))?;
        latest
            .map(|cp| cp.snapshot)
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.clone()))
    }

    /// Request cooperative cancellation of a run. Idempotent:
    /// cancelling an already-terminal run is a no-op.
    pub async fn cancel(&self, run_id: &RunId) -> WorkflowResult<()> {
        let handle = self
            .runs
            .get(run_id)
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.clone()))?;
        if handle.run.read().await.is_terminal() {
            return Ok(());
        }
        // a send error means the loop already exited
        let _ = handle.cancel_tx.send(true);
        Ok(())
    }

    /// Supply the external input a pending stage is waiting for. The
    /// payload is recorded as that stage's successful output.
    pub async fn resume(
        &self,
        run_id: &RunId,
        stage: StageId,
        payload: Value,
    ) -> WorkflowResult<()> {
        let handle = self
            .runs
            .get(run_id)
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.clone()))?;
        {
            let run = handle.run.read().await;
            if !run.waiting_input.contains(&stage) {
                return Err(WorkflowError::NotWaitingForInput {
                    run_id: run_id.clone(),
                    stage,
                });
            }
        }
        handle
            .resume_tx
            .send(ResumeRequest { stage, payload })
            .await
            .map_err(|_| WorkflowError::AlreadyTerminal(run_id.clone()))
    }

    /// Resume every non-terminal run found in the checkpoint store
    /// that this orchestrator is not already driving. Used after a
    /// crash: each run restarts from its latest snapshot.
    pub async fn recover(&self) -> WorkflowResult<Vec<RunId>> {
        let ids = self
            .store
            .run_ids()
            .await
            .map_err(|e| WorkflowError::Checkpoint(e.to_string()))?;

        let mut resumed = Vec::new();
        for run_id in ids {
            if self.runs.contains_key(&run_id) {
                continue;
            }
            let checkpoint = match self
                .store
                .load_latest(&run_id)
                .await
                .map_err(|e| WorkflowError::Checkpoint(e.to_string()))?
            {
                Some(cp) => cp,
                None => continue,
            };
            let mut snapshot = checkpoint.snapshot;
            if snapshot.is_terminal() {
                continue;
            }
            let definition = match self.definitions.get(&snapshot.definition_id) {
                Ok(d) => d,
                Err(_) => {
                    warn!(
                        run_id = %run_id,
                        definition_id = %snapshot.definition_id,
                        "cannot recover run, definition not registered"
                    );
                    continue;
                }
            };
            // a degraded run resumes normal scheduling once the store
            // accepts writes again
            if snapshot.status == RunStatus::Degraded {
                snapshot.status = if snapshot.waiting_input.is_empty() {
                    RunStatus::Running
                } else {
                    RunStatus::WaitingInput
                };
            }
            info!(run_id = %run_id, sequence = checkpoint.sequence, "recovering run from checkpoint");
            resumed.push(self.spawn_run(snapshot, definition));
        }
        Ok(resumed)
    }

    /// Observe run lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }
}
