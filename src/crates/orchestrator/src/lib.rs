//! Run orchestration and persistence for flowgraph.
//!
//! The orchestrator sits between the transport layer (HTTP/WebSocket,
//! out of scope here) and the engine: it wires the process-scoped services,
//! executes runs through [`flowgraph_core::WorkflowExecutor`], persists
//! run and node-execution records, keeps conversation variables in the
//! session store, and emits `workflow.log` events for out-of-band log
//! ingestion.

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod events;
pub mod http;
pub mod recorder;
pub mod service;
pub mod session;

use thiserror::Error;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Engine-level failure
    #[error(transparent)]
    Engine(#[from] flowgraph_core::EngineError),

    /// Database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error
    #[error("orchestrator error: {0}")]
    General(String),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

pub use recorder::{MemoryRunStore, RunRecorder, RunStore};
pub use service::{ExecuteRequest, ExecuteResponse, RunService};
pub use session::PgSessionStore;
