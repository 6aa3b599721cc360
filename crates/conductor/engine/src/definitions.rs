//! Registry of validated workflow definitions
//!
//! Definitions are validated once at registration and shared immutably
//! with every run spawned from them.

use conductor_types::{WorkflowDefinition, WorkflowDefinitionId, WorkflowError, WorkflowResult};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Default)]
pub struct DefinitionRegistry {
    definitions: DashMap<WorkflowDefinitionId, Arc<WorkflowDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a definition
    pub fn register(&self, definition: WorkflowDefinition) -> WorkflowResult<WorkflowDefinitionId> {
        definition.validate()?;
        let id = definition.id.clone();
        info!(
            definition_id = %id,
            name = %definition.name,
            stages = definition.stages.len(),
            "workflow definition registered"
        );
        self.definitions.insert(id.clone(), Arc::new(definition));
        Ok(id)
    }

    pub fn get(&self, id: &WorkflowDefinitionId) -> WorkflowResult<Arc<WorkflowDefinition>> {
        self.definitions
            .get(id)
            .map(|d| Arc::clone(&d))
            .ok_or_else(|| WorkflowError::DefinitionNotFound(id.clone()))
    }

    pub fn list(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.definitions.iter().map(|e| Arc::clone(&e)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::{StageDefinition, StageId, TransitionRule};

    fn valid_definition() -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("tiny", "a").with_terminal("b");
        def.add_stage(StageDefinition::new("a", "A", "agent-a"))
            .unwrap();
        def.add_stage(StageDefinition::new("b", "B", "agent-b"))
            .unwrap();
        def.add_transition(TransitionRule::new(StageId::new("a"), StageId::new("b")))
            .unwrap();
        def
    }

    #[test]
    fn test_register_and_get() {
        let registry = DefinitionRegistry::new();
        let id = registry.register(valid_definition()).unwrap();
        let stored = registry.get(&id).unwrap();
        assert_eq!(stored.name, "tiny");
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_invalid_definition_rejected() {
        let registry = DefinitionRegistry::new();
        let def = WorkflowDefinition::new("empty", "a");
        assert!(registry.register(def).is_err());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_unknown_id_errors() {
        let registry = DefinitionRegistry::new();
        let err = registry.get(&WorkflowDefinitionId::new("missing"));
        assert!(matches!(err, Err(WorkflowError::DefinitionNotFound(_))));
    }
}
