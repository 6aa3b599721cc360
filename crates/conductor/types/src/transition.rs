//! Transition rules: the edges of the stage graph

use crate::definition::StageId;
use crate::guard::GuardExpr;
use serde::{Deserialize, Serialize};

/// How a fan-in target decides it has enough arrivals to fire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinPolicy {
    /// Every incoming branch must arrive
    All,

    /// The first arrival fires the target; later arrivals are ignored
    Any,

    /// At least N branches must arrive
    Quorum(u32),
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self::All
    }
}

impl JoinPolicy {
    /// Whether `arrived` arrivals out of `required` branches satisfy
    /// this policy
    pub fn satisfied(&self, arrived: u32, required: u32) -> bool {
        match self {
            Self::All => arrived >= required,
            Self::Any => arrived >= 1,
            Self::Quorum(n) => arrived >= *n,
        }
    }
}

impl std::fmt::Display for JoinPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Any => write!(f, "any"),
            Self::Quorum(n) => write!(f, "quorum:{}", n),
        }
    }
}

/// A guarded edge from one stage to one or more successor stages
///
/// Rules from the same source are evaluated in declaration order and
/// the first rule whose guard holds wins. A rule with multiple targets
/// is a fan-out: all targets activate together.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionRule {
    pub source: StageId,

    #[serde(default)]
    pub guard: GuardExpr,

    pub targets: Vec<StageId>,

    /// Join policy applied at each target when it has multiple
    /// incoming rules
    #[serde(default)]
    pub join: JoinPolicy,
}

impl TransitionRule {
    /// Unconditional edge to a single successor
    pub fn new(source: StageId, target: StageId) -> Self {
        Self {
            source,
            guard: GuardExpr::Always,
            targets: vec![target],
            join: JoinPolicy::All,
        }
    }

    /// Edge taken only when `guard` holds
    pub fn guarded(source: StageId, target: StageId, guard: GuardExpr) -> Self {
        Self {
            source,
            guard,
            targets: vec![target],
            join: JoinPolicy::All,
        }
    }

    /// Unconditional fan-out to several successors
    pub fn fan_out(source: StageId, targets: Vec<StageId>) -> Self {
        Self {
            source,
            guard: GuardExpr::Always,
            targets,
            join: JoinPolicy::All,
        }
    }

    pub fn with_guard(mut self, guard: GuardExpr) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_join(mut self, join: JoinPolicy) -> Self {
        self.join = join;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::CmpOp;

    #[test]
    fn test_join_policy_all() {
        let p = JoinPolicy::All;
        assert!(!p.satisfied(1, 2));
        assert!(p.satisfied(2, 2));
    }

    #[test]
    fn test_join_policy_any() {
        let p = JoinPolicy::Any;
        assert!(p.satisfied(1, 3));
        assert!(!p.satisfied(0, 3));
    }

    #[test]
    fn test_join_policy_quorum() {
        let p = JoinPolicy::Quorum(2);
        assert!(!p.satisfied(1, 3));
        assert!(p.satisfied(2, 3));
        assert!(p.satisfied(3, 3));
    }

    #[test]
    fn test_default_rule_is_unconditional() {
        let rule = TransitionRule::new(StageId::new("dev"), StageId::new("qa"));
        assert!(rule.guard.is_always());
        assert_eq!(rule.targets.len(), 1);
        assert_eq!(rule.join, JoinPolicy::All);
    }

    #[test]
    fn test_fan_out_with_join() {
        let rule = TransitionRule::fan_out(
            StageId::new("arch"),
            vec![StageId::new("backend"), StageId::new("frontend")],
        )
        .with_join(JoinPolicy::Quorum(1));
        assert_eq!(rule.targets.len(), 2);
        assert_eq!(rule.join, JoinPolicy::Quorum(1));
    }

    #[test]
    fn test_rule_serialization_defaults() {
        // guard and join are optional on the wire
        let raw = r#"{"source":"dev","targets":["qa"]}"#;
        let rule: TransitionRule = serde_json::from_str(raw).unwrap();
        assert!(rule.guard.is_always());
        assert_eq!(rule.join, JoinPolicy::All);

        let rule = TransitionRule::guarded(
            StageId::new("qa"),
            StageId::new("deploy"),
            GuardExpr::compare("qa.passed", CmpOp::Eq, true),
        );
        let encoded = serde_json::to_string(&rule).unwrap();
        let decoded: TransitionRule = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.source, rule.source);
        assert_eq!(decoded.guard, rule.guard);
    }
}
