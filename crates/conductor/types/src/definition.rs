//! Workflow definitions: immutable, validated stage graphs
//!
//! A definition is assembled with the builder methods, then sealed by
//! [`WorkflowDefinition::validate`]. Validation rejects structural
//! problems (unknown references, unreachable stages, dead ends,
//! impossible joins, escalation cycles) before any run is created, so
//! the scheduler never has to defend against a malformed graph.

use crate::error::{WorkflowError, WorkflowResult};
use crate::transition::{JoinPolicy, TransitionRule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

/// Identifier of a workflow definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowDefinitionId(pub String);

impl WorkflowDefinitionId {
    pub fn generate() -> Self {
        Self(format!("wf-{}", Uuid::new_v4()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkflowDefinitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stage within a definition
///
/// Stage ids double as the context namespace: the output of stage
/// `market` is addressable from guards as `market.<field>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(pub String);

impl StageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether sibling fan-out branches may run concurrently
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Run in declaration order even when activated together
    #[default]
    Sequential,

    /// May run concurrently with other parallelizable siblings
    Parallelizable,
}

/// Retry behavior for a failing stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Fixed delay between attempts
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

/// A single stage of a workflow
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: StageId,
    pub name: String,

    /// Registry key of the executor bound to this stage
    pub executor: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<String>,

    #[serde(default)]
    pub mode: ExecutionMode,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Successful results below this confidence escalate instead of
    /// advancing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,

    /// Next tier in the escalation ladder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_to: Option<StageId>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl StageDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, executor: impl Into<String>) -> Self {
        Self {
            id: StageId::new(id),
            name: name.into(),
            executor: executor.into(),
            input_schema: None,
            output_schema: None,
            mode: ExecutionMode::Sequential,
            retry: RetryPolicy::default(),
            timeout_secs: None,
            confidence_threshold: None,
            escalate_to: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    pub fn with_escalate_to(mut self, target: impl Into<String>) -> Self {
        self.escalate_to = Some(StageId::new(target));
        self
    }

    pub fn with_input_schema(mut self, schema: impl Into<String>) -> Self {
        self.input_schema = Some(schema.into());
        self
    }

    pub fn with_output_schema(mut self, schema: impl Into<String>) -> Self {
        self.output_schema = Some(schema.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An immutable workflow graph
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowDefinitionId,
    pub name: String,
    pub version: u32,

    #[serde(default)]
    pub description: String,

    pub stages: Vec<StageDefinition>,
    pub transitions: Vec<TransitionRule>,

    pub entry: StageId,
    pub terminals: Vec<StageId>,

    /// Upper bound on escalation hops per run
    pub max_escalations: u32,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            id: WorkflowDefinitionId::generate(),
            name: name.into(),
            version: 1,
            description: String::new(),
            stages: Vec::new(),
            transitions: Vec::new(),
            entry: StageId::new(entry),
            terminals: Vec::new(),
            max_escalations: 3,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = WorkflowDefinitionId::new(id);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_escalations(mut self, max: u32) -> Self {
        self.max_escalations = max;
        self
    }

    pub fn with_terminal(mut self, stage: impl Into<String>) -> Self {
        self.terminals.push(StageId::new(stage));
        self
    }

    /// Add a stage, rejecting duplicate ids
    pub fn add_stage(&mut self, stage: StageDefinition) -> WorkflowResult<()> {
        if self.stages.iter().any(|s| s.id == stage.id) {
            return Err(WorkflowError::DuplicateStage(stage.id));
        }
        self.stages.push(stage);
        Ok(())
    }

    /// Add a transition rule, rejecting references to unknown stages
    pub fn add_transition(&mut self, rule: TransitionRule) -> WorkflowResult<()> {
        if self.stage(&rule.source).is_none() {
            return Err(WorkflowError::UnknownStage(rule.source));
        }
        for target in &rule.targets {
            if self.stage(target).is_none() {
                return Err(WorkflowError::UnknownStage(target.clone()));
            }
        }
        self.transitions.push(rule);
        Ok(())
    }

    pub fn stage(&self, id: &StageId) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| &s.id == id)
    }

    /// Outgoing rules of a stage, in declaration order
    pub fn rules_from(&self, source: &StageId) -> Vec<&TransitionRule> {
        self.transitions
            .iter()
            .filter(|r| &r.source == source)
            .collect()
    }

    /// Distinct sources of all rules targeting a stage, in declaration
    /// order
    pub fn fan_in_sources(&self, target: &StageId) -> Vec<&StageId> {
        let mut seen = HashSet::new();
        self.transitions
            .iter()
            .filter(|r| r.targets.contains(target))
            .map(|r| &r.source)
            .filter(|s| seen.insert((*s).clone()))
            .collect()
    }

    /// Join policy declared by rules targeting a stage
    pub fn join_policy_for(&self, target: &StageId) -> JoinPolicy {
        self.transitions
            .iter()
            .find(|r| r.targets.contains(target))
            .map(|r| r.join)
            .unwrap_or_default()
    }

    pub fn is_terminal(&self, id: &StageId) -> bool {
        self.terminals.contains(id)
    }

    /// Stages that only exist as escalation tiers. They are exempt
    /// from reachability and dead-end checks because they stand in for
    /// their origin stage at runtime.
    pub fn escalation_alternates(&self) -> HashSet<StageId> {
        let mut alternates = HashSet::new();
        for stage in &self.stages {
            let mut next = stage.escalate_to.clone();
            while let Some(id) = next {
                if !alternates.insert(id.clone()) {
                    break;
                }
                next = self.stage(&id).and_then(|s| s.escalate_to.clone());
            }
        }
        alternates
    }

    /// Structural validation, run once at registration time
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.stages.is_empty() {
            return Err(WorkflowError::ValidationError(
                "workflow has no stages".into(),
            ));
        }

        let mut ids = HashSet::new();
        for stage in &self.stages {
            if !ids.insert(&stage.id) {
                return Err(WorkflowError::DuplicateStage(stage.id.clone()));
            }
        }

        if self.stage(&self.entry).is_none() {
            return Err(WorkflowError::UnknownStage(self.entry.clone()));
        }
        if self.terminals.is_empty() {
            return Err(WorkflowError::ValidationError(
                "workflow declares no terminal stages".into(),
            ));
        }
        for terminal in &self.terminals {
            if self.stage(terminal).is_none() {
                return Err(WorkflowError::UnknownStage(terminal.clone()));
            }
        }

        for rule in &self.transitions {
            if self.stage(&rule.source).is_none() {
                return Err(WorkflowError::UnknownStage(rule.source.clone()));
            }
            for target in &rule.targets {
                if self.stage(target).is_none() {
                    return Err(WorkflowError::UnknownStage(target.clone()));
                }
            }
        }

        self.validate_escalation_ladders()?;
        self.validate_reachability()?;
        self.validate_joins()?;
        Ok(())
    }

    fn validate_escalation_ladders(&self) -> WorkflowResult<()> {
        for stage in &self.stages {
            if let Some(target) = &stage.escalate_to {
                if self.stage(target).is_none() {
                    return Err(WorkflowError::UnknownStage(target.clone()));
                }
            }
            // Walk the ladder from this stage; revisiting any tier is
            // a cycle.
            let mut visited = HashSet::new();
            visited.insert(stage.id.clone());
            let mut next = stage.escalate_to.clone();
            while let Some(id) = next {
                if !visited.insert(id.clone()) {
                    return Err(WorkflowError::EscalationCycle(stage.id.clone()));
                }
                next = self.stage(&id).and_then(|s| s.escalate_to.clone());
            }
        }

        let alternates = self.escalation_alternates();
        if alternates.contains(&self.entry) {
            return Err(WorkflowError::ValidationError(format!(
                "entry stage '{}' cannot be an escalation target",
                self.entry
            )));
        }
        Ok(())
    }

    fn validate_reachability(&self) -> WorkflowResult<()> {
        let alternates = self.escalation_alternates();

        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();
        reachable.insert(self.entry.clone());
        queue.push_back(self.entry.clone());
        while let Some(current) = queue.pop_front() {
            for rule in self.rules_from(&current) {
                for target in &rule.targets {
                    if reachable.insert(target.clone()) {
                        queue.push_back(target.clone());
                    }
                }
            }
        }

        for stage in &self.stages {
            if !reachable.contains(&stage.id) && !alternates.contains(&stage.id) {
                return Err(WorkflowError::UnreachableStage(stage.id.clone()));
            }
            // Reachable non-terminals must be able to go somewhere.
            // Alternates route through their origin's rules instead.
            if reachable.contains(&stage.id)
                && !self.is_terminal(&stage.id)
                && !alternates.contains(&stage.id)
                && self.rules_from(&stage.id).is_empty()
            {
                return Err(WorkflowError::MissingOutgoingRule(stage.id.clone()));
            }
        }
        Ok(())
    }

    fn validate_joins(&self) -> WorkflowResult<()> {
        let mut targets: HashSet<&StageId> = HashSet::new();
        for rule in &self.transitions {
            targets.extend(rule.targets.iter());
        }

        for target in targets {
            let incoming: Vec<&TransitionRule> = self
                .transitions
                .iter()
                .filter(|r| r.targets.contains(target))
                .collect();
            if incoming.len() < 2 {
                continue;
            }

            let policy = incoming[0].join;
            if incoming.iter().any(|r| r.join != policy) {
                return Err(WorkflowError::JoinDeadlock {
                    target: target.clone(),
                    reason: "incoming rules declare conflicting join policies".into(),
                });
            }
            if let JoinPolicy::Quorum(n) = policy {
                let branches = self.fan_in_sources(target).len() as u32;
                if n == 0 {
                    return Err(WorkflowError::JoinDeadlock {
                        target: target.clone(),
                        reason: "quorum of zero never gates anything".into(),
                    });
                }
                if n > branches {
                    return Err(WorkflowError::JoinDeadlock {
                        target: target.clone(),
                        reason: format!("quorum {} exceeds the {} incoming branches", n, branches),
                    });
                }
            }
        }
        Ok(())
    }
}
