//! Stage execution results as reported by executors

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What happened when an executor ran a stage
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageOutcome {
    /// The stage produced usable output
    Succeeded,

    /// The stage failed; the scheduler decides whether to retry
    Failed,

    /// The stage cannot finish without external input. The run parks
    /// until a resume call supplies the missing payload.
    Pending,
}

/// Structured error detail attached to a failed result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine-readable code, e.g. `"timeout"` or `"tool_error"`
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The full result envelope returned by a stage executor
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageResult {
    pub outcome: StageOutcome,

    /// Output payload; recorded into the run context on success
    #[serde(default)]
    pub output: Value,

    /// Executor self-assessment in `[0.0, 1.0]`. A successful result
    /// below the stage's threshold still triggers escalation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl StageResult {
    pub fn success(output: Value) -> Self {
        Self {
            outcome: StageOutcome::Succeeded,
            output,
            confidence: None,
            error: None,
        }
    }

    pub fn success_with_confidence(output: Value, confidence: f64) -> Self {
        Self {
            outcome: StageOutcome::Succeeded,
            output,
            confidence: Some(confidence),
            error: None,
        }
    }

    pub fn failure(error: ErrorInfo) -> Self {
        Self {
            outcome: StageOutcome::Failed,
            output: Value::Null,
            confidence: None,
            error: Some(error),
        }
    }

    /// Park the stage until external input arrives
    pub fn pending() -> Self {
        Self {
            outcome: StageOutcome::Pending,
            output: Value::Null,
            confidence: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StageOutcome::Succeeded
    }

    pub fn is_pending(&self) -> bool {
        self.outcome == StageOutcome::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_result() {
        let r = StageResult::success(json!({"plan": "ok"}));
        assert!(r.is_success());
        assert!(!r.is_pending());
        assert!(r.error.is_none());
        assert!(r.confidence.is_none());
    }

    #[test]
    fn test_failure_result() {
        let r = StageResult::failure(ErrorInfo::new("timeout", "stage exceeded 30s"));
        assert!(!r.is_success());
        assert_eq!(r.outcome, StageOutcome::Failed);
        assert_eq!(r.error.as_ref().map(|e| e.code.as_str()), Some("timeout"));
    }

    #[test]
    fn test_confidence_is_carried() {
        let r = StageResult::success_with_confidence(json!({"code": "fn main() {}"}), 0.35);
        assert!(r.is_success());
        assert_eq!(r.confidence, Some(0.35));
    }

    #[test]
    fn test_result_deserializes_with_defaults() {
        let r: StageResult = serde_json::from_str(r#"{"outcome":"Succeeded"}"#).unwrap();
        assert!(r.is_success());
        assert_eq!(r.output, Value::Null);
        assert!(r.confidence.is_none());
    }
}
