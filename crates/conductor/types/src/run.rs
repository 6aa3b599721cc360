//! Workflow runs: the mutable execution instance of a definition
//!
//! A run owns the accumulated context, the set of active stages, join
//! progress, retry counters and the escalation audit trail. Every
//! mutation bumps `updated_at`; the scheduler snapshots the whole run
//! into a checkpoint after each state-affecting event.

use crate::checkpoint::EscalationRecord;
use crate::definition::StageId;
use crate::transition::JoinPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Identifier of a workflow run
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(format!("run-{}", Uuid::new_v4()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines
    pub fn short(&self) -> &str {
        let len = self.0.len().min(12);
        &self.0[..len]
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Accepted, not yet scheduled
    Pending,

    /// At least one stage is executing or runnable
    Running,

    /// All active branches are parked at unsatisfied joins
    WaitingJoin,

    /// A stage returned a pending result and awaits external input
    WaitingInput,

    /// An escalation hop is in flight
    Escalated,

    /// Checkpoint persistence failed repeatedly; parked for operator
    /// attention, resumable once the store recovers
    Degraded,

    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingJoin => "waiting_join",
            Self::WaitingInput => "waiting_input",
            Self::Escalated => "escalated",
            Self::Degraded => "degraded",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Machine-readable classification of a run failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCode {
    /// A stage exhausted its retry budget
    StageFailed,

    /// The escalation ladder ran past `max_escalations`
    EscalationBudgetExhausted,

    /// Escalation was required but the stage has no `escalate_to`
    NoEscalationTarget,

    /// A non-terminal stage completed and no outgoing guard held
    NoTransition,

    Internal,
}

/// Why a run ended in `Failed`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub code: FailureCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageId>,
    pub message: String,
}

impl FailureReason {
    pub fn new(code: FailureCode, stage: Option<StageId>, message: impl Into<String>) -> Self {
        Self {
            code,
            stage,
            message: message.into(),
        }
    }
}

/// One recorded stage output
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextEntry {
    pub stage_id: StageId,
    pub output: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only accumulation of stage outputs plus the initial input
///
/// Guards address it with dotted paths: `input.<field>` reaches into
/// the submission payload, `<stage_id>.<field>` into that stage's
/// recorded output.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunContext {
    pub input: Value,
    pub entries: Vec<ContextEntry>,
}

impl RunContext {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            entries: Vec::new(),
        }
    }

    /// Record a stage output. Each stage id may be recorded once.
    pub fn append(&mut self, stage_id: StageId, output: Value) -> crate::WorkflowResult<()> {
        if self.entries.iter().any(|e| e.stage_id == stage_id) {
            return Err(crate::WorkflowError::ContextOverwrite(stage_id));
        }
        self.entries.push(ContextEntry {
            stage_id,
            output,
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    pub fn output_of(&self, stage_id: &StageId) -> Option<&Value> {
        self.entries
            .iter()
            .find(|e| &e.stage_id == stage_id)
            .map(|e| &e.output)
    }

    /// Resolve a dotted path against the context
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let root = segments.next()?;
        let mut current = if root == "input" {
            &self.input
        } else {
            self.output_of(&StageId::new(root))?
        };
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current)
    }
}

/// Arrival tracking for one fan-in target
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinProgress {
    pub policy: JoinPolicy,

    /// Number of distinct branches feeding the target
    pub required: u32,

    /// Branches that have arrived so far
    pub arrived: Vec<StageId>,
}

impl JoinProgress {
    pub fn new(policy: JoinPolicy, required: u32) -> Self {
        Self {
            policy,
            required,
            arrived: Vec::new(),
        }
    }

    /// Record an arrival; duplicates from retried branches count once
    pub fn arrive(&mut self, source: StageId) {
        if !self.arrived.contains(&source) {
            self.arrived.push(source);
        }
    }

    pub fn satisfied(&self) -> bool {
        self.policy.satisfied(self.arrived.len() as u32, self.required)
    }
}

/// A single execution of a workflow definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: RunId,
    pub definition_id: crate::definition::WorkflowDefinitionId,
    pub status: RunStatus,
    pub context: RunContext,

    /// Stages currently executing or runnable, as graph-level ids
    pub active: Vec<StageId>,

    /// Stages that completed successfully, in completion order
    pub completed: Vec<StageId>,

    /// Attempt counters, keyed by the executing stage id
    pub attempts: HashMap<StageId, u32>,

    /// Escalation aliases: executing replacement stage to the origin
    /// stage it stands in for
    pub aliases: HashMap<StageId, StageId>,

    pub escalation_level: u32,
    pub escalations: Vec<EscalationRecord>,

    /// Join progress keyed by fan-in target
    pub joins: HashMap<StageId, JoinProgress>,

    /// Stages parked on a pending result
    pub waiting_input: Vec<StageId>,

    /// Sequence number of the next checkpoint to write
    pub checkpoint_seq: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(definition_id: crate::definition::WorkflowDefinitionId, input: Value) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::generate(),
            definition_id,
            status: RunStatus::Pending,
            context: RunContext::new(input),
            active: Vec::new(),
            completed: Vec::new(),
            attempts: HashMap::new(),
            aliases: HashMap::new(),
            escalation_level: 0,
            escalations: Vec::new(),
            joins: HashMap::new(),
            waiting_input: Vec::new(),
            checkpoint_seq: 0,
            failure: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move from `Pending` to `Running` at the entry stage
    pub fn begin(&mut self, entry: StageId) {
        self.status = RunStatus::Running;
        self.active.push(entry);
        self.touch();
    }

    /// Graph-level identity of an executing stage. Escalation
    /// replacements resolve to the stage they stand in for.
    pub fn origin_of(&self, stage: &StageId) -> StageId {
        let mut current = stage.clone();
        while let Some(origin) = self.aliases.get(&current) {
            current = origin.clone();
        }
        current
    }

    pub fn set_alias(&mut self, replacement: StageId, origin: StageId) {
        self.aliases.insert(replacement, origin);
        self.touch();
    }

    pub fn attempts_for(&self, stage: &StageId) -> u32 {
        self.attempts.get(stage).copied().unwrap_or(0)
    }

    pub fn record_attempt(&mut self, stage: &StageId) -> u32 {
        let count = self.attempts.entry(stage.clone()).or_insert(0);
        *count += 1;
        let count = *count;
        self.touch();
        count
    }

    pub fn activate(&mut self, stage: StageId) {
        if !self.active.contains(&stage) {
            self.active.push(stage);
        }
        self.touch();
    }

    pub fn deactivate(&mut self, stage: &StageId) {
        self.active.retain(|s| s != stage);
        self.touch();
    }

    /// Mark a graph-level stage as completed
    pub fn mark_completed(&mut self, stage: StageId) {
        if !self.completed.contains(&stage) {
            self.completed.push(stage);
        }
        self.touch();
    }

    pub fn park_waiting_input(&mut self, stage: StageId) {
        if !self.waiting_input.contains(&stage) {
            self.waiting_input.push(stage);
        }
        self.status = RunStatus::WaitingInput;
        self.touch();
    }

    pub fn unpark_waiting_input(&mut self, stage: &StageId) {
        self.waiting_input.retain(|s| s != stage);
        if self.waiting_input.is_empty() && self.status == RunStatus::WaitingInput {
            self.status = RunStatus::Running;
        }
        self.touch();
    }

    pub fn record_escalation(&mut self, record: EscalationRecord) {
        self.escalation_level += 1;
        self.escalations.push(record);
        self.status = RunStatus::Escalated;
        self.touch();
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.active.clear();
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    pub fn fail(&mut self, reason: FailureReason) {
        self.status = RunStatus::Failed;
        self.failure = Some(reason);
        self.active.clear();
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    pub fn cancel(&mut self) {
        self.status = RunStatus::Cancelled;
        self.active.clear();
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    pub fn degrade(&mut self) {
        self.status = RunStatus::Degraded;
        self.touch();
    }

    /// Next checkpoint sequence number, consumed exactly once per
    /// snapshot
    pub fn next_checkpoint_seq(&mut self) -> u64 {
        let seq = self.checkpoint_seq;
        self.checkpoint_seq += 1;
        seq
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{EscalationReason, EscalationRecord};
    use crate::definition::WorkflowDefinitionId;
    use serde_json::json;

    fn make_run() -> WorkflowRun {
        WorkflowRun::new(WorkflowDefinitionId::new("wf-test"), json!({"idea": "crm"}))
    }

    #[test]
    fn test_new_run_is_pending() {
        let run = make_run();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(!run.is_terminal());
        assert!(run.active.is_empty());
        assert_eq!(run.checkpoint_seq, 0);
    }

    #[test]
    fn test_begin_activates_entry() {
        let mut run = make_run();
        run.begin(StageId::new("market"));
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.active, vec![StageId::new("market")]);
    }

    #[test]
    fn test_context_append_is_write_once() {
        let mut ctx = RunContext::new(json!({}));
        ctx.append(StageId::new("dev"), json!({"ok": true})).unwrap();
        let err = ctx.append(StageId::new("dev"), json!({"ok": false}));
        assert!(err.is_err());
        assert_eq!(ctx.output_of(&StageId::new("dev")), Some(&json!({"ok": true})));
    }

    #[test]
    fn test_context_lookup_paths() {
        let mut ctx = RunContext::new(json!({"budget": 5}));
        ctx.append(StageId::new("arch"), json!({"stack": {"lang": "rust"}}))
            .unwrap();
        assert_eq!(ctx.lookup("input.budget"), Some(&json!(5)));
        assert_eq!(ctx.lookup("arch.stack.lang"), Some(&json!("rust")));
        assert_eq!(ctx.lookup("arch"), Some(&json!({"stack": {"lang": "rust"}})));
        assert_eq!(ctx.lookup("arch.missing"), None);
        assert_eq!(ctx.lookup("ghost.field"), None);
    }

    #[test]
    fn test_attempt_counter() {
        let mut run = make_run();
        let dev = StageId::new("dev");
        assert_eq!(run.attempts_for(&dev), 0);
        assert_eq!(run.record_attempt(&dev), 1);
        assert_eq!(run.record_attempt(&dev), 2);
        assert_eq!(run.attempts_for(&dev), 2);
    }

    #[test]
    fn test_alias_resolution_is_transitive() {
        let mut run = make_run();
        run.set_alias(StageId::new("dev_senior"), StageId::new("dev"));
        run.set_alias(StageId::new("dev_principal"), StageId::new("dev_senior"));
        assert_eq!(run.origin_of(&StageId::new("dev_principal")), StageId::new("dev"));
        assert_eq!(run.origin_of(&StageId::new("dev")), StageId::new("dev"));
    }

    #[test]
    fn test_join_progress_dedupes_arrivals() {
        let mut join = JoinProgress::new(JoinPolicy::All, 2);
        join.arrive(StageId::new("backend"));
        join.arrive(StageId::new("backend"));
        assert!(!join.satisfied());
        join.arrive(StageId::new("frontend"));
        assert!(join.satisfied());
    }

    #[test]
    fn test_waiting_input_park_and_unpark() {
        let mut run = make_run();
        run.begin(StageId::new("review"));
        run.park_waiting_input(StageId::new("review"));
        assert_eq!(run.status, RunStatus::WaitingInput);
        run.unpark_waiting_input(&StageId::new("review"));
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn test_terminal_transitions_clear_active() {
        let mut run = make_run();
        run.begin(StageId::new("a"));

        let mut completed = run.clone();
        completed.complete();
        assert!(completed.is_terminal());
        assert!(completed.active.is_empty());
        assert!(completed.completed_at.is_some());

        let mut failed = run.clone();
        failed.fail(FailureReason::new(
            FailureCode::StageFailed,
            Some(StageId::new("a")),
            "retries exhausted",
        ));
        assert!(failed.is_terminal());
        assert_eq!(failed.failure.as_ref().map(|f| f.code), Some(FailureCode::StageFailed));

        run.cancel();
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[test]
    fn test_escalation_bumps_level() {
        let mut run = make_run();
        run.begin(StageId::new("dev"));
        run.record_escalation(EscalationRecord::new(
            run.id.clone(),
            StageId::new("dev"),
            StageId::new("dev"),
            StageId::new("dev_senior"),
            EscalationReason::RetriesExhausted { attempts: 3 },
        ));
        assert_eq!(run.escalation_level, 1);
        assert_eq!(run.status, RunStatus::Escalated);
        assert_eq!(run.escalations.len(), 1);
    }

    #[test]
    fn test_checkpoint_seq_is_monotonic() {
        let mut run = make_run();
        assert_eq!(run.next_checkpoint_seq(), 0);
        assert_eq!(run.next_checkpoint_seq(), 1);
        assert_eq!(run.checkpoint_seq, 2);
    }

    #[test]
    fn test_run_serialization_roundtrip() {
        let mut run = make_run();
        run.begin(StageId::new("market"));
        run.context
            .append(StageId::new("market"), json!({"viability": "high"}))
            .unwrap();
        let encoded = serde_json::to_string(&run).unwrap();
        let decoded: WorkflowRun = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, run.id);
        assert_eq!(decoded.status, RunStatus::Running);
        assert_eq!(
            decoded.context.lookup("market.viability"),
            Some(&json!("high"))
        );
    }
}
