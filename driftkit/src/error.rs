//! Workflow error taxonomy.
//!
//! The engine classifies failures by [`ErrorKind`], never by message text.
//! Step executors, agents, and collaborators funnel their failures into
//! [`WorkflowError`] so retry and circuit-breaker decisions stay typed.

use thiserror::Error;

/// Kind of a workflow failure. Drives retry classification and the error
/// field of user-visible responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Schema binding failed: invalid property, missing required field.
    Validation,
    /// The referenced workflow id is not registered.
    UnknownWorkflow,
    /// A step id referenced at runtime does not exist in the definition.
    UnknownStep,
    /// A `Branch` result named a step outside the source step's next set.
    InvalidBranch,
    /// Resume with an unknown, consumed, or mismatched message id.
    InvalidResume,
    /// A step's invocation guard tripped with the `Fail` policy.
    InvocationLimitExceeded,
    /// Transient external failure; subject to the retry policy.
    RetryableFailure,
    /// Non-retryable external failure; terminates the run.
    PermanentFailure,
    /// Deadline exceeded; subject to the retry policy.
    Timeout,
    /// Short-circuited by an open circuit breaker.
    CircuitOpen,
    /// Model output did not conform to the requested schema.
    StructuredParse,
    /// Agent tool-call loop ran past its depth cap.
    ToolDepthExceeded,
    /// Explicit cancellation.
    Cancelled,
    /// Persistence or messaging failure.
    Infrastructure,
}

impl ErrorKind {
    /// Whether failures of this kind are eligible for retry.
    ///
    /// `CircuitOpen` is retryable: a short-circuited step waits out the
    /// cooldown under its policy rather than failing the run outright.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RetryableFailure | ErrorKind::Timeout | ErrorKind::CircuitOpen
        )
    }

    /// Stable lowercase label used in responses and logs.
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::UnknownWorkflow => "unknown_workflow",
            ErrorKind::UnknownStep => "unknown_step",
            ErrorKind::InvalidBranch => "invalid_branch",
            ErrorKind::InvalidResume => "invalid_resume",
            ErrorKind::InvocationLimitExceeded => "invocation_limit_exceeded",
            ErrorKind::RetryableFailure => "retryable_failure",
            ErrorKind::PermanentFailure => "permanent_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::StructuredParse => "structured_parse",
            ErrorKind::ToolDepthExceeded => "tool_depth_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified workflow failure: kind plus the underlying message.
///
/// Returned by step executors and the engine. The engine branches on
/// [`WorkflowError::kind`]; the message is carried verbatim into responses
/// and trace records.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[error("{kind}: {message}")]
pub struct WorkflowError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WorkflowError {
    /// Creates an error of `kind` with the given message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Transient external failure (retryable).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RetryableFailure, message)
    }

    /// Non-retryable external failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermanentFailure, message)
    }

    /// Persistence / messaging failure.
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Infrastructure, message)
    }

    /// Whether the retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        self.kind.retryable()
    }
}
