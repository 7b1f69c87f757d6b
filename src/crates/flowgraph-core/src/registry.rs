//! Node type registry.
//!
//! A static table mapping node-type names to schema and constructor
//! functions. Registration is declarative, duplicates are errors, and the
//! table is immutable after process start.

use crate::error::EngineError;
use crate::node::{NodeHandler, NodeSchema};
use crate::schema::{NodeDef, NodeKind, Ports};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Schema provider for a node type.
pub type SchemaFn = fn() -> NodeSchema;

/// Handler constructor for a node type.
pub type ConstructFn = fn(&NodeDef) -> Result<Box<dyn NodeHandler>, String>;

struct Registration {
    schema: SchemaFn,
    construct: ConstructFn,
}

/// Immutable map from node-type name to `{SchemaFn, ConstructFn}`.
#[derive(Default)]
pub struct NodeRegistry {
    entries: HashMap<NodeKind, Registration>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type. Registering the same kind twice is an error.
    pub fn register(
        &mut self,
        kind: NodeKind,
        schema: SchemaFn,
        construct: ConstructFn,
    ) -> Result<(), EngineError> {
        if self.entries.contains_key(&kind) {
            return Err(EngineError::Configuration(format!(
                "node type '{kind}' registered twice"
            )));
        }
        self.entries.insert(kind, Registration { schema, construct });
        Ok(())
    }

    pub fn contains(&self, kind: NodeKind) -> bool {
        self.entries.contains_key(&kind)
    }

    pub fn schema(&self, kind: NodeKind) -> Option<NodeSchema> {
        self.entries.get(&kind).map(|r| (r.schema)())
    }

    /// Declared ports for a node: embedded ports win, then the schema.
    pub fn ports_for(&self, node: &NodeDef) -> Ports {
        if let Some(ports) = &node.ports {
            if !ports.inputs.is_empty() || !ports.outputs.is_empty() {
                return ports.clone();
            }
        }
        node.kind()
            .and_then(|kind| self.schema(kind))
            .map(|schema| schema.ports())
            .unwrap_or_default()
    }

    /// Build the handler for a node definition.
    pub fn construct(&self, node: &NodeDef) -> Result<Box<dyn NodeHandler>, EngineError> {
        let kind = node.kind().ok_or_else(|| {
            EngineError::Configuration(format!(
                "node '{}' has unknown type '{}'",
                node.id,
                node.type_name()
            ))
        })?;

        let registration = self.entries.get(&kind).ok_or_else(|| {
            EngineError::Configuration(format!("node type '{kind}' is not registered"))
        })?;

        (registration.construct)(node)
            .map_err(|e| EngineError::Configuration(format!("node '{}': {e}", node.id)))
    }

    /// The output port a dotless selector resolves to for this node type:
    /// the single declared output, else the `response`/`result`/
    /// `final_output` convention.
    pub fn default_output_port(&self, kind: NodeKind) -> Option<String> {
        let schema = self.schema(kind)?;
        if schema.outputs.len() == 1 {
            return Some(schema.outputs[0].name.clone());
        }
        for conventional in ["response", "result", "final_output"] {
            if schema.outputs.iter().any(|p| p.name == conventional) {
                return Some(conventional.to_string());
            }
        }
        schema.outputs.first().map(|p| p.name.clone())
    }

    /// The process-wide registry with all built-in node types.
    pub fn builtin() -> &'static NodeRegistry {
        static REGISTRY: OnceLock<NodeRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            let mut registry = NodeRegistry::new();
            crate::nodes::register_builtin(&mut registry)
                .unwrap_or_else(|e| unreachable!("builtin registration is static: {e}"));
            registry
        })
    }
}
