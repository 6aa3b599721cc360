//! Compiler: ParsedPipeline to WorkflowDefinition
//!
//! Fills in defaults, maps mode and join keywords, expands
//! multi-source edges into one rule per source, and runs the full
//! structural validation before handing the definition back.

use crate::errors::{DslError, DslResult};
use crate::parser::{ParsedPipeline, ParsedStage, Parser};
use conductor_types::{
    ExecutionMode, JoinPolicy, RetryPolicy, StageDefinition, StageId, TransitionRule,
    WorkflowDefinition,
};

/// Parse and compile DSL text into a validated workflow definition
pub fn compile(input: &str) -> DslResult<WorkflowDefinition> {
    let parsed = Parser::parse(input)?;
    compile_pipeline(parsed)
}

/// Compile an already parsed pipeline
pub fn compile_pipeline(parsed: ParsedPipeline) -> DslResult<WorkflowDefinition> {
    let entry = parsed
        .entry
        .clone()
        .ok_or_else(|| DslError::MissingField("ENTRY".into()))?;
    if parsed.terminals.is_empty() {
        return Err(DslError::MissingField("TERMINAL".into()));
    }

    let mut definition = WorkflowDefinition::new(parsed.name.clone(), entry);
    if let Some(version) = parsed.version {
        definition = definition.with_version(version);
    }
    if let Some(max) = parsed.max_escalations {
        definition = definition.with_max_escalations(max);
    }
    for terminal in &parsed.terminals {
        definition = definition.with_terminal(terminal.clone());
    }

    for stage in &parsed.stages {
        let compiled = compile_stage(stage)?;
        definition.add_stage(compiled).map_err(|_| {
            DslError::DuplicateStageId(stage.id.clone())
        })?;
    }

    for edge in &parsed.edges {
        let join = match &edge.join {
            None => JoinPolicy::All,
            Some(join) => match join.policy.as_str() {
                "all" => JoinPolicy::All,
                "any" => JoinPolicy::Any,
                "quorum" => {
                    let n = join.quorum.ok_or_else(|| DslError::InvalidValue {
                        field: "JOIN quorum".into(),
                        message: "quorum requires a count".into(),
                    })?;
                    JoinPolicy::Quorum(n)
                }
                other => return Err(DslError::UnknownJoinPolicy(other.to_string())),
            },
        };

        let targets: Vec<StageId> = edge.targets.iter().map(StageId::new).collect();
        for source in &edge.sources {
            let mut rule = TransitionRule::fan_out(StageId::new(source), targets.clone());
            if let Some(guard) = &edge.guard {
                rule = rule.with_guard(guard.clone());
            }
            rule = rule.with_join(join);
            definition.add_transition(rule)?;
        }
    }

    definition.validate()?;
    Ok(definition)
}

fn compile_stage(stage: &ParsedStage) -> DslResult<StageDefinition> {
    let executor = stage
        .executor
        .clone()
        .ok_or_else(|| DslError::MissingField(format!("EXECUTOR for stage '{}'", stage.id)))?;
    let name = stage.name.clone().unwrap_or_else(|| stage.id.clone());

    let mut compiled = StageDefinition::new(stage.id.clone(), name, executor);
    if let Some(timeout) = stage.timeout {
        compiled = compiled.with_timeout_secs(timeout);
    }
    if let Some(retry) = stage.retry {
        compiled = compiled.with_retry(RetryPolicy {
            max_attempts: retry,
            ..RetryPolicy::default()
        });
    }
    if let Some(confidence) = stage.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(DslError::InvalidValue {
                field: format!("CONFIDENCE for stage '{}'", stage.id),
                message: "must be between 0.0 and 1.0".into(),
            });
        }
        compiled = compiled.with_confidence_threshold(confidence);
    }
    if let Some(target) = &stage.escalate_to {
        compiled = compiled.with_escalate_to(target.clone());
    }
    if let Some(mode) = &stage.mode {
        let mode = match mode.as_str() {
            "sequential" => ExecutionMode::Sequential,
            "parallel" => ExecutionMode::Parallelizable,
            other => return Err(DslError::UnknownMode(other.to_string())),
        };
        compiled = compiled.with_mode(mode);
    }
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::{CmpOp, GuardExpr};
    use serde_json::json;

    const SDLC: &str = r#"
    PIPELINE "product_build" {
        VERSION 2
        MAX_ESCALATIONS 2

        STAGE market { EXECUTOR market_validation TIMEOUT 300 RETRY 3 }
        STAGE arch { EXECUTOR architect }
        STAGE backend { MODE parallel EXECUTOR backend_dev }
        STAGE frontend { MODE parallel EXECUTOR frontend_dev }
        STAGE integration { EXECUTOR integrator }
        STAGE dev { EXECUTOR dev_junior CONFIDENCE 0.5 ESCALATE dev_senior }
        STAGE dev_senior { EXECUTOR senior }
        STAGE deploy { EXECUTOR deployer }

        ENTRY market
        TERMINAL deploy

        EDGES {
            market -> arch ON market.viability == "high"
            arch -> backend, frontend
            backend, frontend -> integration JOIN all
            integration -> dev
            dev -> deploy
        }
    }
    "#;

    #[test]
    fn test_compile_full_pipeline() {
        let def = compile(SDLC).unwrap();
        assert_eq!(def.name, "product_build");
        assert_eq!(def.version, 2);
        assert_eq!(def.max_escalations, 2);
        assert_eq!(def.stages.len(), 8);
        assert_eq!(def.entry, StageId::new("market"));
        assert!(def.is_terminal(&StageId::new("deploy")));

        let market = def.stage(&StageId::new("market")).unwrap();
        assert_eq!(market.executor, "market_validation");
        assert_eq!(market.timeout_secs, Some(300));
        assert_eq!(market.retry.max_attempts, 3);

        let dev = def.stage(&StageId::new("dev")).unwrap();
        assert_eq!(dev.confidence_threshold, Some(0.5));
        assert_eq!(dev.escalate_to, Some(StageId::new("dev_senior")));

        let backend = def.stage(&StageId::new("backend")).unwrap();
        assert_eq!(backend.mode, ExecutionMode::Parallelizable);

        // multi-source edge expanded to one rule per source
        let fan_in = def.fan_in_sources(&StageId::new("integration"));
        assert_eq!(fan_in.len(), 2);
        assert_eq!(
            def.join_policy_for(&StageId::new("integration")),
            JoinPolicy::All
        );

        // guard survived compilation as data
        let rules = def.rules_from(&StageId::new("market"));
        assert_eq!(
            rules[0].guard,
            GuardExpr::Compare {
                path: "market.viability".into(),
                op: CmpOp::Eq,
                value: json!("high"),
            }
        );
    }

    #[test]
    fn test_missing_entry_rejected() {
        let input = r#"
        PIPELINE "p" {
            STAGE a { EXECUTOR x }
            TERMINAL a
        }
        "#;
        assert!(matches!(compile(input), Err(DslError::MissingField(_))));
    }

    #[test]
    fn test_missing_executor_rejected() {
        let input = r#"
        PIPELINE "p" {
            STAGE a { TIMEOUT 5 }
            ENTRY a
            TERMINAL a
        }
        "#;
        assert!(matches!(compile(input), Err(DslError::MissingField(_))));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let input = r#"
        PIPELINE "p" {
            STAGE a { EXECUTOR x MODE sideways }
            ENTRY a
            TERMINAL a
        }
        "#;
        assert!(matches!(compile(input), Err(DslError::UnknownMode(_))));
    }

    #[test]
    fn test_quorum_without_count_rejected() {
        let input = r#"
        PIPELINE "p" {
            STAGE a { EXECUTOR x }
            STAGE b { EXECUTOR x }
            STAGE c { EXECUTOR x }
            STAGE m { EXECUTOR x }
            ENTRY a
            TERMINAL m
            EDGES {
                a -> b, c
                b, c -> m JOIN quorum
            }
        }
        "#;
        assert!(matches!(compile(input), Err(DslError::InvalidValue { .. })));
    }

    #[test]
    fn test_structural_validation_runs() {
        // edge references a stage that was never declared
        let input = r#"
        PIPELINE "p" {
            STAGE a { EXECUTOR x }
            ENTRY a
            TERMINAL a
            EDGES {
                a -> ghost
            }
        }
        "#;
        assert!(matches!(compile(input), Err(DslError::WorkflowError(_))));
    }

    #[test]
    fn test_confidence_out_of_range_rejected() {
        let input = r#"
        PIPELINE "p" {
            STAGE a { EXECUTOR x CONFIDENCE 1.5 }
            ENTRY a
            TERMINAL a
        }
        "#;
        assert!(matches!(compile(input), Err(DslError::InvalidValue { .. })));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let input = r#"
        PIPELINE "p" {
            STAGE a { EXECUTOR x }
            STAGE a { EXECUTOR y }
            ENTRY a
            TERMINAL a
        }
        "#;
        assert!(matches!(compile(input), Err(DslError::DuplicateStageId(_))));
    }
}
