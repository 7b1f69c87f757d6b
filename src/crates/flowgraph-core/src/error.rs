//! Engine error taxonomy.
//!
//! Every failure the engine can surface maps to a stable string code that
//! callers (and the run record) see unchanged across releases. Node handlers
//! return errors through [`NodeExecutionResult`](crate::node::NodeExecutionResult);
//! this enum covers everything that escapes a run or aborts one.

use crate::llm::LlmError;
use crate::template::TemplateRenderError;
use thiserror::Error;

/// Convenience result type using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by graph validation and execution.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The graph failed validation; execution never started.
    #[error("workflow validation failed: {}", errors.join("; "))]
    ValidationFailed {
        /// Validator error messages, in pass order
        errors: Vec<String>,
    },

    /// A required input port could not be resolved from the variable pool.
    #[error("node '{node}' input '{port}' could not be resolved")]
    NodeInputUnresolved { node: String, port: String },

    /// A resolved input value did not coerce to the declared port type.
    #[error("node '{node}' input '{port}' expected {expected}, got {actual}")]
    InputTypeMismatch {
        node: String,
        port: String,
        expected: String,
        actual: String,
    },

    /// Template parsing or rendering failed.
    #[error(transparent)]
    TemplateRender(#[from] TemplateRenderError),

    /// An LLM provider call failed after retries.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Vector store lookup failed.
    #[error("vector store error: {0}")]
    VectorStore(String),

    /// A node failed for a reason of its own.
    #[error("node '{node}' execution failed: {error}")]
    NodeExecution { node: String, error: String },

    /// The run was cancelled by its caller.
    #[error("run cancelled")]
    Cancelled,

    /// The run exceeded its deadline.
    #[error("run timed out after {elapsed_ms}ms")]
    RunTimeout { elapsed_ms: u64 },

    /// A single node exceeded its deadline.
    #[error("node '{node}' timed out after {elapsed_ms}ms")]
    NodeTimeout { node: String, elapsed_ms: u64 },

    /// No End node executed and no Answer produced output.
    #[error("workflow produced no answer")]
    NoAnswer,

    /// Invalid engine or node configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// JSON serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::ValidationFailed { .. } => "validation_failed",
            EngineError::NodeInputUnresolved { .. } => "node_input_unresolved",
            EngineError::InputTypeMismatch { .. } => "input_type_mismatch",
            EngineError::TemplateRender(_) => "template_render_failed",
            EngineError::Llm(err) => err.code(),
            EngineError::VectorStore(_) => "vector_store_error",
            EngineError::NodeExecution { .. } => "node_execution_failed",
            EngineError::Cancelled => "cancelled",
            EngineError::RunTimeout { .. } => "run_timeout",
            EngineError::NodeTimeout { .. } => "node_timeout",
            EngineError::NoAnswer => "no_answer",
            EngineError::Configuration(_) => "configuration_error",
            EngineError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the scheduler may retry the failing node.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Llm(err) => err.is_retryable(),
            EngineError::NodeTimeout { .. } => true,
            _ => false,
        }
    }

    /// Create a node execution error with context.
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = EngineError::ValidationFailed {
            errors: vec!["missing start".into()],
        };
        assert_eq!(err.code(), "validation_failed");

        assert_eq!(EngineError::Cancelled.code(), "cancelled");
        assert_eq!(EngineError::RunTimeout { elapsed_ms: 1 }.code(), "run_timeout");
        assert_eq!(EngineError::NoAnswer.code(), "no_answer");
    }

    #[test]
    fn llm_errors_pass_through_their_code() {
        let err = EngineError::Llm(LlmError::RateLimit("429".into()));
        assert_eq!(err.code(), "llm_rate_limit");
        assert!(err.is_retryable());

        let err = EngineError::Llm(LlmError::Auth("bad key".into()));
        assert_eq!(err.code(), "llm_auth");
        assert!(!err.is_retryable());
    }
}
