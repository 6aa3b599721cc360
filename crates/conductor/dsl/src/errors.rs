//! DSL error types

/// Errors that can occur during DSL parsing or compilation
#[derive(Debug, thiserror::Error)]
pub enum DslError {
    #[error("Parse error at line {line}, column {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
    },

    #[error("Unexpected token: expected {expected}, found '{found}'")]
    UnexpectedToken { expected: String, found: String },

    #[error("Unexpected end of input: expected {0}")]
    UnexpectedEof(String),

    #[error("Unknown keyword: '{0}'")]
    UnknownKeyword(String),

    #[error("Unknown execution mode: '{0}'")]
    UnknownMode(String),

    #[error("Unknown join policy: '{0}'")]
    UnknownJoinPolicy(String),

    #[error("Duplicate stage id: '{0}'")]
    DuplicateStageId(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Workflow error: {0}")]
    WorkflowError(#[from] conductor_types::WorkflowError),
}

/// Result type alias for DSL operations
pub type DslResult<T> = Result<T, DslError>;
