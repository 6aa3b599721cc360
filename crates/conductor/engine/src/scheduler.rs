//! Per-run scheduler loop
//!
//! Each run is driven by exactly one task, the single writer of its
//! state. The loop executes active stages, applies retry and timeout
//! policy, routes escalations, resolves guarded transitions, tracks
//! join progress and snapshots the run after every state-affecting
//! event. Checkpoint persistence failures park the run as degraded
//! instead of losing state silently.

use crate::config::EngineConfig;
use crate::escalation::{EscalationController, EscalationDecision};
use crate::events::{EventBus, WorkflowEvent};
use crate::registry::{CancelToken, ExecutorRegistry};
use conductor_store::CheckpointStore;
use conductor_types::{
    Checkpoint, EscalationReason, ExecutionMode, FailureCode, FailureReason, JoinProgress,
    RunStatus, StageId, StageOutcome, WorkflowDefinition, WorkflowRun,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

/// External input for a stage parked on a pending result
pub(crate) struct ResumeRequest {
    pub stage: StageId,
    pub payload: Value,
}

/// What one stage execution produced, as seen by the loop
enum StageEvent {
    Succeeded { executing: StageId, output: Value },
    Parked { executing: StageId },
    Escalate {
        executing: StageId,
        reason: EscalationReason,
    },
    Internal { message: String },
    StoreFailed,
    Cancelled,
}

enum LoopOutcome {
    Continue,
    Stop,
}

pub(crate) struct RunLoop {
    pub run: Arc<RwLock<WorkflowRun>>,
    pub definition: Arc<WorkflowDefinition>,
    pub executors: Arc<ExecutorRegistry>,
    pub store: Arc<dyn CheckpointStore>,
    pub events: EventBus,
    pub config: EngineConfig,
    pub escalation: EscalationController,
    pub cancel_rx: watch::Receiver<bool>,
    pub resume_rx: mpsc::Receiver<ResumeRequest>,
}

impl RunLoop {
    pub(crate) async fn drive(mut self) {
        let run_id = { self.run.read().await.id.clone() };
        info!(run_id = %run_id, "run loop started");
        self.events.publish(WorkflowEvent::RunStarted {
            run_id: run_id.clone(),
        });

        // the first checkpoint records the activated entry stage
        if self.checkpoint().await.is_err() {
            return;
        }

        loop {
            if *self.cancel_rx.borrow() {
                self.finish_cancelled().await;
                return;
            }

            let (runnable, waiting, terminal) = {
                let run = self.run.read().await;
                let runnable: Vec<StageId> = run
                    .active
                    .iter()
                    .filter(|s| !run.waiting_input.contains(s) && !run.completed.contains(s))
                    .cloned()
                    .collect();
                (runnable, run.waiting_input.clone(), run.is_terminal())
            };

            if terminal {
                return;
            }

            if runnable.is_empty() {
                if !waiting.is_empty() {
                    if matches!(self.await_resume().await, LoopOutcome::Stop) {
                        return;
                    }
                    continue;
                }
                // No work left but the run is not terminal. If a
                // terminal stage already completed the remaining
                // branches have simply drained, e.g. behind an
                // any-join; that is a completed run.
                let terminal_done = {
                    let run = self.run.read().await;
                    run.completed.iter().any(|s| self.definition.is_terminal(s))
                };
                if terminal_done {
                    {
                        self.run.write().await.complete();
                    }
                    let _ = self.checkpoint().await;
                    info!(run_id = %run_id, "run completed");
                    self.events.publish(WorkflowEvent::RunCompleted {
                        run_id: run_id.clone(),
                    });
                    return;
                }
                let pending_join = {
                    let run = self.run.read().await;
                    run.joins.values().any(|j| !j.satisfied())
                };
                if pending_join {
                    warn!(run_id = %run_id, "run parked at an unsatisfied join");
                    {
                        self.run.write().await.status = RunStatus::WaitingJoin;
                    }
                    if self.checkpoint().await.is_err() {
                        return;
                    }
                    // stay alive so cancellation still lands
                    if matches!(self.await_resume().await, LoopOutcome::Stop) {
                        return;
                    }
                    continue;
                }
                self.fail_run(FailureReason::new(
                    FailureCode::Internal,
                    None,
                    "scheduler stalled with no active stages",
                ))
                .await;
                return;
            }

            let mut parallel = Vec::new();
            let mut sequential = Vec::new();
            for stage_id in runnable {
                match self.definition.stage(&stage_id).map(|s| s.mode) {
                    Some(ExecutionMode::Parallelizable) => parallel.push(stage_id),
                    _ => sequential.push(stage_id),
                }
            }

            let mut batch = Vec::new();
            if !parallel.is_empty() {
                let executions = parallel.into_iter().map(|s| self.execute_stage(s));
                batch.extend(futures::future::join_all(executions).await);
            }
            for stage_id in sequential {
                batch.push(self.execute_stage(stage_id).await);
            }

            for event in batch {
                if matches!(self.handle_event(event).await, LoopOutcome::Stop) {
                    return;
                }
            }
        }
    }

    /// Run one stage to a verdict: success, parked, escalation request
    /// or cancellation. Retries and timeouts are applied here.
    async fn execute_stage(&self, executing: StageId) -> StageEvent {
        let stage = match self.definition.stage(&executing) {
            Some(s) => s.clone(),
            None => {
                return StageEvent::Internal {
                    message: format!("active stage '{}' is not in the definition", executing),
                }
            }
        };
        let executor = match self.executors.get(&stage.executor) {
            Some(e) => e,
            None => {
                return StageEvent::Internal {
                    message: format!("executor '{}' is not registered", stage.executor),
                }
            }
        };
        let timeout = Duration::from_secs(
            stage
                .timeout_secs
                .unwrap_or(self.config.default_timeout_secs),
        );

        loop {
            let (run_id, attempt, input, context) = {
                let mut run = self.run.write().await;
                let attempt = run.record_attempt(&executing);
                (
                    run.id.clone(),
                    attempt,
                    run.context.input.clone(),
                    run.context.clone(),
                )
            };
            if self.checkpoint().await.is_err() {
                return StageEvent::StoreFailed;
            }

            debug!(run_id = %run_id, stage = %executing, attempt, "stage starting");
            self.events.publish(WorkflowEvent::StageStarted {
                run_id: run_id.clone(),
                stage: executing.clone(),
                attempt,
            });

            let cancel = CancelToken::new(self.cancel_rx.clone());
            let mut cancel_rx = self.cancel_rx.clone();
            let invocation = executor.invoke(input, &context, cancel);
            tokio::pin!(invocation);

            let result = tokio::select! {
                res = tokio::time::timeout(timeout, &mut invocation) => match res {
                    Ok(result) => result,
                    Err(_) => conductor_types::StageResult::failure(
                        conductor_types::ErrorInfo::new(
                            "timeout",
                            format!("stage '{}' exceeded {}s", executing, timeout.as_secs()),
                        ),
                    ),
                },
                _ = cancel_rx.changed() => {
                    info!(run_id = %run_id, stage = %executing, "cancellation requested, waiting out grace period");
                    let grace = Duration::from_millis(self.config.cancel_grace_ms);
                    let _ = tokio::time::timeout(grace, &mut invocation).await;
                    return StageEvent::Cancelled;
                }
            };

            match result.outcome {
                StageOutcome::Succeeded => {
                    if let (Some(confidence), Some(threshold)) =
                        (result.confidence, stage.confidence_threshold)
                    {
                        if confidence < threshold {
                            return StageEvent::Escalate {
                                executing,
                                reason: EscalationReason::LowConfidence {
                                    confidence,
                                    threshold,
                                },
                            };
                        }
                    }
                    return StageEvent::Succeeded {
                        executing,
                        output: result.output,
                    };
                }
                StageOutcome::Pending => return StageEvent::Parked { executing },
                StageOutcome::Failed => {
                    let message = result
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "stage failed".to_string());
                    warn!(run_id = %run_id, stage = %executing, attempt, %message, "stage attempt failed");
                    self.events.publish(WorkflowEvent::StageFailed {
                        run_id,
                        stage: executing.clone(),
                        attempt,
                        message,
                    });
                    if attempt >= stage.retry.max_attempts {
                        return StageEvent::Escalate {
                            executing,
                            reason: EscalationReason::RetriesExhausted { attempts: attempt },
                        };
                    }
                    tokio::time::sleep(Duration::from_millis(stage.retry.backoff_ms)).await;
                }
            }
        }
    }

    async fn handle_event(&self, event: StageEvent) -> LoopOutcome {
        match event {
            StageEvent::Succeeded { executing, output } => {
                self.handle_success(executing, output).await
            }
            StageEvent::Parked { executing } => {
                let run_id = {
                    let mut run = self.run.write().await;
                    run.park_waiting_input(executing.clone());
                    run.id.clone()
                };
                info!(run_id = %run_id, stage = %executing, "stage parked waiting for input");
                self.events.publish(WorkflowEvent::RunWaitingInput {
                    run_id,
                    stage: executing,
                });
                match self.checkpoint().await {
                    Ok(()) => LoopOutcome::Continue,
                    Err(()) => LoopOutcome::Stop,
                }
            }
            StageEvent::Escalate { executing, reason } => {
                self.handle_escalation(executing, reason).await
            }
            StageEvent::Internal { message } => {
                self.fail_run(FailureReason::new(FailureCode::Internal, None, message))
                    .await;
                LoopOutcome::Stop
            }
            StageEvent::StoreFailed => LoopOutcome::Stop,
            StageEvent::Cancelled => {
                self.finish_cancelled().await;
                LoopOutcome::Stop
            }
        }
    }

    /// Record a successful output under the graph-level stage id, then
    /// either finish the run or resolve outgoing transitions.
    async fn handle_success(&self, executing: StageId, output: Value) -> LoopOutcome {
        let (run_id, origin) = {
            let mut run = self.run.write().await;
            let origin = run.origin_of(&executing);
            // Escalation tiers publish their output under the origin
            // id so guards keep addressing one namespace per stage.
            // Re-execution after recovery may find it already there.
            if run.context.output_of(&origin).is_none() {
                if let Err(err) = run.context.append(origin.clone(), output) {
                    debug!(run_id = %run.id, stage = %origin, %err, "output already recorded");
                }
            }
            run.deactivate(&executing);
            run.mark_completed(origin.clone());
            run.status = if run.waiting_input.is_empty() {
                RunStatus::Running
            } else {
                RunStatus::WaitingInput
            };
            (run.id.clone(), origin)
        };

        debug!(run_id = %run_id, stage = %origin, "stage completed");
        self.events.publish(WorkflowEvent::StageCompleted {
            run_id: run_id.clone(),
            stage: origin.clone(),
        });

        if self.definition.is_terminal(&origin) {
            let all_done = {
                let run = self.run.read().await;
                run.active.is_empty() && run.waiting_input.is_empty()
            };
            if all_done {
                {
                    self.run.write().await.complete();
                }
                let _ = self.checkpoint().await;
                info!(run_id = %run_id, "run completed");
                self.events
                    .publish(WorkflowEvent::RunCompleted { run_id });
                return LoopOutcome::Stop;
            }
            return match self.checkpoint().await {
                Ok(()) => LoopOutcome::Continue,
                Err(()) => LoopOutcome::Stop,
            };
        }

        // first rule whose guard holds wins, in declaration order
        let context = { self.run.read().await.context.clone() };
        let mut chosen = None;
        for rule in self.definition.rules_from(&origin) {
            match rule.guard.evaluate(&context) {
                Ok(true) => {
                    chosen = Some(rule);
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(run_id = %run_id, stage = %origin, %err, "guard evaluation failed, treated as false");
                }
            }
        }

        let rule = match chosen {
            Some(rule) => rule,
            None => {
                self.fail_run(FailureReason::new(
                    FailureCode::NoTransition,
                    Some(origin.clone()),
                    format!("no outgoing guard held after stage '{}'", origin),
                ))
                .await;
                return LoopOutcome::Stop;
            }
        };

        self.events.publish(WorkflowEvent::TransitionApplied {
            run_id: run_id.clone(),
            source: origin.clone(),
            targets: rule.targets.clone(),
        });
        let mut advanced = false;
        for target in &rule.targets {
            if self.arrive_at(target, &origin).await {
                advanced = true;
            }
        }
        if !advanced {
            self.fail_run(FailureReason::new(
                FailureCode::NoTransition,
                Some(origin.clone()),
                format!(
                    "every transition target from '{}' was already completed",
                    origin
                ),
            ))
            .await;
            return LoopOutcome::Stop;
        }

        match self.checkpoint().await {
            Ok(()) => LoopOutcome::Continue,
            Err(()) => LoopOutcome::Stop,
        }
    }

    /// Either activate a successor directly or record a join arrival
    /// and activate once the join policy is satisfied. Returns false
    /// only when the arrival went nowhere: a direct edge into a stage
    /// that already completed. Join arrivals always count, a branch
    /// draining into an already-fired join is normal.
    async fn arrive_at(&self, target: &StageId, source: &StageId) -> bool {
        let fan_in = self.definition.fan_in_sources(target).len();
        let mut run = self.run.write().await;
        if fan_in > 1 {
            let policy = self.definition.join_policy_for(target);
            let progress = run
                .joins
                .entry(target.clone())
                .or_insert_with(|| JoinProgress::new(policy, fan_in as u32));
            let already_fired = progress.satisfied();
            progress.arrive(source.clone());
            let fires = progress.satisfied() && !already_fired;
            if fires && !run.completed.contains(target) {
                debug!(run_id = %run.id, stage = %target, "join satisfied");
                run.activate(target.clone());
            }
            true
        } else if run.completed.contains(target) {
            // outputs are write-once, so re-running a completed stage
            // could never produce new routing data
            warn!(run_id = %run.id, stage = %target, "transition re-targets a completed stage");
            false
        } else {
            run.activate(target.clone());
            true
        }
    }

    async fn handle_escalation(&self, executing: StageId, reason: EscalationReason) -> LoopOutcome {
        let decision = {
            let run = self.run.read().await;
            self.escalation.decide(&run, &executing, reason.clone())
        };

        match decision {
            EscalationDecision::Escalate { next_tier, record } => {
                let run_id = {
                    let mut run = self.run.write().await;
                    run.deactivate(&executing);
                    run.set_alias(next_tier.clone(), executing.clone());
                    run.record_escalation(record.clone());
                    run.activate(next_tier.clone());
                    run.id.clone()
                };
                info!(
                    run_id = %run_id,
                    stage = %record.stage_id,
                    from = %record.from_tier,
                    to = %record.to_tier,
                    reason = %record.reason,
                    "stage escalated"
                );
                self.events
                    .publish(WorkflowEvent::StageEscalated { run_id, record });
                match self.checkpoint().await {
                    Ok(()) => LoopOutcome::Continue,
                    Err(()) => LoopOutcome::Stop,
                }
            }
            EscalationDecision::BudgetExhausted => {
                let origin = { self.run.read().await.origin_of(&executing) };
                self.fail_run(FailureReason::new(
                    FailureCode::EscalationBudgetExhausted,
                    Some(origin),
                    format!("escalation budget exhausted at tier '{}'", executing),
                ))
                .await;
                LoopOutcome::Stop
            }
            EscalationDecision::NoTarget => {
                let origin = { self.run.read().await.origin_of(&executing) };
                let (code, message) = match reason {
                    EscalationReason::RetriesExhausted { attempts } => (
                        FailureCode::StageFailed,
                        format!("stage '{}' failed after {} attempts", executing, attempts),
                    ),
                    EscalationReason::LowConfidence {
                        confidence,
                        threshold,
                    } => (
                        FailureCode::NoEscalationTarget,
                        format!(
                            "stage '{}' confidence {:.2} below {:.2} with no tier to escalate to",
                            executing, confidence, threshold
                        ),
                    ),
                };
                self.fail_run(FailureReason::new(code, Some(origin), message))
                    .await;
                LoopOutcome::Stop
            }
        }
    }

    /// Park until external input arrives or cancellation fires
    async fn await_resume(&mut self) -> LoopOutcome {
        // wait_for also catches a cancellation sent before we parked
        let mut cancel_rx = self.cancel_rx.clone();
        tokio::select! {
            request = self.resume_rx.recv() => match request {
                Some(request) => self.handle_resume(request).await,
                // the orchestrator handle is gone; nothing can ever
                // resume this run
                None => LoopOutcome::Stop,
            },
            _ = async { let _ = cancel_rx.wait_for(|cancelled| *cancelled).await; } => {
                self.finish_cancelled().await;
                LoopOutcome::Stop
            }
        }
    }

    async fn handle_resume(&self, request: ResumeRequest) -> LoopOutcome {
        let run_id = {
            let mut run = self.run.write().await;
            if !run.waiting_input.contains(&request.stage) {
                warn!(run_id = %run.id, stage = %request.stage, "resume for a stage that is not waiting");
                return LoopOutcome::Continue;
            }
            run.unpark_waiting_input(&request.stage);
            run.id.clone()
        };
        self.events.publish(WorkflowEvent::RunResumed {
            run_id,
            stage: request.stage.clone(),
        });
        // the supplied payload stands in for a successful stage output
        self.handle_event(StageEvent::Succeeded {
            executing: request.stage,
            output: request.payload,
        })
        .await
    }

    async fn fail_run(&self, reason: FailureReason) {
        let run_id = {
            let mut run = self.run.write().await;
            run.fail(reason.clone());
            run.id.clone()
        };
        let _ = self.checkpoint().await;
        warn!(run_id = %run_id, code = ?reason.code, message = %reason.message, "run failed");
        self.events
            .publish(WorkflowEvent::RunFailed { run_id, reason });
    }

    async fn finish_cancelled(&self) {
        let run_id = {
            let mut run = self.run.write().await;
            if run.is_terminal() {
                return;
            }
            run.cancel();
            run.id.clone()
        };
        let _ = self.checkpoint().await;
        info!(run_id = %run_id, "run cancelled");
        self.events.publish(WorkflowEvent::RunCancelled { run_id });
    }

    /// Snapshot the run and persist with bounded retries. A persistent
    /// failure parks the run as degraded and stops the loop.
    async fn checkpoint(&self) -> Result<(), ()> {
        let checkpoint = {
            let mut run = self.run.write().await;
            let sequence = run.next_checkpoint_seq();
            Checkpoint::new(sequence, &run)
        };
        let run_id = checkpoint.run_id.clone();
        let sequence = checkpoint.sequence;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.save(checkpoint.clone()).await {
                Ok(()) => {
                    self.events.publish(WorkflowEvent::CheckpointSaved {
                        run_id: run_id.clone(),
                        sequence,
                    });
                    return Ok(());
                }
                Err(err) => {
                    warn!(run_id = %run_id, sequence, attempt, %err, "checkpoint save failed");
                    if attempt >= self.config.checkpoint_retries {
                        error!(run_id = %run_id, sequence, "checkpoint retries exhausted, parking run as degraded");
                        {
                            self.run.write().await.degrade();
                        }
                        self.events
                            .publish(WorkflowEvent::RunDegraded { run_id: run_id.clone() });
                        return Err(());
                    }
                    tokio::time::sleep(Duration::from_millis(self.config.checkpoint_retry_delay_ms))
                        .await;
                }
            }
        }
    }
}
