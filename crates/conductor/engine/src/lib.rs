//! Conductor orchestration engine
//!
//! Drives validated workflow definitions: one scheduler task per run,
//! guarded transition routing, fan-out with join policies, retry and
//! timeout enforcement, deterministic escalation ladders, checkpoint
//! persistence after every state-affecting event, and crash recovery
//! from the latest snapshot.

#![deny(unsafe_code)]

pub mod config;
pub mod definitions;
pub mod escalation;
pub mod events;
pub mod orchestrator;
pub mod registry;

mod scheduler;

pub use config::EngineConfig;
pub use definitions::DefinitionRegistry;
pub use escalation::{EscalationController, EscalationDecision};
pub use events::{EventBus, WorkflowEvent};
pub use orchestrator::Orchestrator;
pub use registry::{CancelToken, ExecutorRegistry, StageExecutor};
