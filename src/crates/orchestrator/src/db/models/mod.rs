//! Row models for database persistence.

pub mod document;
pub mod node_execution;
pub mod workflow_run;
pub mod workflow_version;

pub use document::{Document, DocumentStatus};
pub use node_execution::NodeExecutionRow;
pub use workflow_run::WorkflowRunRow;
pub use workflow_version::WorkflowVersionRow;
