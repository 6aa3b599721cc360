//! Guard predicates: conditional routing as data
//!
//! Guards are small serializable expressions evaluated against the run
//! context, not opaque closures. This keeps workflow definitions
//! auditable and replayable: the same context always routes the same
//! way, and a definition can be persisted and reloaded without losing
//! its routing logic.

use crate::run::RunContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator used by [`GuardExpr::Compare`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        };
        write!(f, "{}", s)
    }
}

/// A guard predicate over the accumulated run context
///
/// Paths are dot-separated: the first segment names a completed stage
/// (or the reserved `input` root for the run's initial payload), the
/// remaining segments index into that stage's output object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GuardExpr {
    /// Always satisfied, the default guard
    Always,

    /// Compare the value at `path` against a literal
    Compare {
        path: String,
        op: CmpOp,
        value: Value,
    },

    /// Negation
    Not(Box<GuardExpr>),

    /// All sub-guards must hold
    All(Vec<GuardExpr>),

    /// At least one sub-guard must hold
    Any(Vec<GuardExpr>),
}

/// Errors raised while evaluating a guard
///
/// The scheduler treats an evaluation error as guard-false plus a
/// warning; it never aborts the run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GuardError {
    #[error("guard path '{0}' not present in run context")]
    PathNotFound(String),

    #[error("guard path '{path}' cannot be compared with {op} ({message})")]
    Incomparable {
        path: String,
        op: CmpOp,
        message: String,
    },
}

impl GuardExpr {
    /// Shorthand for a comparison guard
    pub fn compare(path: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            path: path.into(),
            op,
            value: value.into(),
        }
    }

    /// Check if this is the always-satisfied guard
    pub fn is_always(&self) -> bool {
        matches!(self, Self::Always)
    }

    /// Evaluate against a run context
    pub fn evaluate(&self, context: &RunContext) -> Result<bool, GuardError> {
        match self {
            Self::Always => Ok(true),
            Self::Compare { path, op, value } => {
                let actual = context
                    .lookup(path)
                    .ok_or_else(|| GuardError::PathNotFound(path.clone()))?;
                compare_values(path, actual, *op, value)
            }
            Self::Not(inner) => Ok(!inner.evaluate(context)?),
            Self::All(guards) => {
                for g in guards {
                    if !g.evaluate(context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(guards) => {
                for g in guards {
                    if g.evaluate(context)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

impl Default for GuardExpr {
    fn default() -> Self {
        Self::Always
    }
}

fn compare_values(path: &str, actual: &Value, op: CmpOp, expected: &Value) -> Result<bool, GuardError> {
    // Numbers compare numerically, strings lexicographically; equality
    // falls back to structural comparison for everything else.
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return Ok(match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
        });
    }

    if let (Some(a), Some(b)) = (actual.as_str(), expected.as_str()) {
        return Ok(match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
        });
    }

    match op {
        CmpOp::Eq => Ok(actual == expected),
        CmpOp::Ne => Ok(actual != expected),
        _ => Err(GuardError::Incomparable {
            path: path.to_string(),
            op,
            message: format!(
                "ordering is not defined between {} and {}",
                type_name(actual),
                type_name(expected)
            ),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
