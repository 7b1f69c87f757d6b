//! Core workflow engine for flowgraph.
//!
//! This crate turns user-authored node graphs into validated, executable
//! workflows. A graph mixes LLM calls, retrieval-augmented search, branching,
//! variable assignment, and template rendering; the engine walks it in
//! topological order, resolves every input through the [`VariablePool`],
//! dispatches to the matching [`NodeHandler`], and streams the final answer
//! to the caller.
//!
//! # Components
//!
//! - [`schema`]: graph documents: nodes, edges, ports, selectors.
//! - [`pool`]: the run-scoped variable pool (`sys` / `env` / `conv` /
//!   node outputs) with dotted-selector resolution.
//! - [`template`]: `{{ selector }}` rendering against the pool.
//! - [`registry`] / [`node`] / [`nodes`]: node-type registry and the
//!   twelve built-in handlers.
//! - [`validator`]: structural and semantic validation plus the
//!   normalization passes that rewrite loose graphs into strict
//!   port-and-selector form.
//! - [`executor`]: the sequential scheduler with branch gating, retries,
//!   timeouts, cancellation, and streaming.
//! - [`llm`] / [`services`]: provider-agnostic service contracts injected
//!   into handlers at run time.

pub mod error;
pub mod executor;
pub mod llm;
pub mod node;
pub mod nodes;
pub mod pool;
pub mod registry;
pub mod schema;
pub mod selector;
pub mod services;
pub mod stream;
pub mod template;
pub mod testing;
pub mod validator;

pub use error::{EngineError, Result};
pub use executor::{ExecuteParams, ExecutionReport, ExecutorConfig, RunStatus, WorkflowExecutor};
pub use node::{NodeContext, NodeExecutionResult, NodeHandler, NodeSchema, NodeStatus};
pub use pool::VariablePool;
pub use registry::NodeRegistry;
pub use schema::{EdgeDef, NodeDef, NodeKind, Port, PortType, Ports, WorkflowGraph};
pub use selector::Selector;
pub use services::Services;
pub use stream::{StreamFrame, StreamSink};
pub use template::TemplateRenderer;
pub use validator::{ValidationIssue, ValidationOutcome, WorkflowValidator};
