//! The run-scoped variable pool.
//!
//! Four namespaces: `sys` (bootstrap values), `env` (immutable for the run),
//! `conv` (mutable, session-persistent), and node outputs. Selector
//! resolution walks dotted tails segment by segment; integer segments index
//! lists, string segments look up map fields.

use crate::selector::{Scope, Selector};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Run-scoped store of system/env/conversation/node-output values.
///
/// Owned by exactly one run; never shared across runs.
#[derive(Debug, Default)]
pub struct VariablePool {
    system: HashMap<String, Value>,
    environment: HashMap<String, Value>,
    conversation: HashMap<String, Value>,
    conversation_defaults: HashMap<String, Value>,
    node_outputs: HashMap<String, HashMap<String, Value>>,
    /// Node ids known to the graph; lets resolution distinguish a skipped
    /// node (Null) from a selector pointing nowhere (unresolved)
    known_nodes: HashSet<String>,
    /// Default output port per node, for dotless selectors
    default_output_ports: HashMap<String, String>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_system(&mut self, key: impl Into<String>, value: Value) {
        self.system.insert(key.into(), value);
    }

    pub fn get_system(&self, key: &str) -> Option<&Value> {
        self.system.get(key)
    }

    /// Load environment variables once at run start.
    pub fn init_env(&mut self, vars: &Map<String, Value>) {
        for (key, value) in vars {
            self.environment.insert(key.clone(), value.clone());
        }
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: Value) {
        self.environment.insert(key.into(), value);
    }

    pub fn get_env(&self, key: &str) -> Option<&Value> {
        self.environment.get(key)
    }

    /// Seed conversation values and their graph-declared defaults.
    pub fn init_conversation(
        &mut self,
        snapshot: &Map<String, Value>,
        defaults: &Map<String, Value>,
    ) {
        for (key, value) in defaults {
            self.conversation_defaults.insert(key.clone(), value.clone());
        }
        for (key, value) in snapshot {
            self.conversation.insert(key.clone(), value.clone());
        }
    }

    pub fn set_conversation(&mut self, key: impl Into<String>, value: Value) {
        self.conversation.insert(key.into(), value);
    }

    /// Read a conversation value, falling back to the declared default.
    /// Unknown keys with no default resolve to `Null`.
    pub fn get_conversation(&self, key: &str) -> Value {
        if let Some(value) = self.conversation.get(key) {
            return value.clone();
        }
        self.conversation_defaults
            .get(key)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Declare a node id so resolution can tell "skipped" from "unknown".
    pub fn register_node(&mut self, node_id: impl Into<String>) {
        self.known_nodes.insert(node_id.into());
    }

    /// Register the port a dotless selector for this node resolves to.
    pub fn register_default_output(&mut self, node_id: impl Into<String>, port: impl Into<String>) {
        self.default_output_ports.insert(node_id.into(), port.into());
    }

    pub fn set_node_output(&mut self, node_id: &str, port: impl Into<String>, value: Value) {
        self.node_outputs
            .entry(node_id.to_string())
            .or_default()
            .insert(port.into(), value);
    }

    /// A single port value, or the whole output map when `port` is `None`.
    pub fn get_node_output(&self, node_id: &str, port: Option<&str>) -> Option<Value> {
        let outputs = self.node_outputs.get(node_id)?;
        match port {
            Some(port) => outputs.get(port).cloned(),
            None => {
                let map: Map<String, Value> =
                    outputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                Some(Value::Object(map))
            }
        }
    }

    pub fn has_node_output(&self, node_id: &str, port: &str) -> bool {
        self.node_outputs
            .get(node_id)
            .map(|outputs| outputs.contains_key(port))
            .unwrap_or(false)
    }

    /// Resolve a parsed selector. `None` means the selector points nowhere;
    /// `Some(Null)` means the target exists but holds no value (e.g. a
    /// skipped node's output).
    pub fn resolve(&self, selector: &Selector) -> Option<Value> {
        let (root, tail): (Value, &[String]) = match &selector.scope {
            Scope::Sys => {
                let key = selector.key()?;
                (self.system.get(key).cloned().unwrap_or(Value::Null), &selector.path[1..])
            }
            Scope::Env => {
                let key = selector.key()?;
                (self.environment.get(key)?.clone(), &selector.path[1..])
            }
            Scope::Conversation => {
                let key = selector.key()?;
                (self.get_conversation(key), &selector.path[1..])
            }
            Scope::SelfNode => return None,
            Scope::Node(node_id) => {
                if !self.known_nodes.contains(node_id) && !self.node_outputs.contains_key(node_id) {
                    return None;
                }
                match selector.key() {
                    Some(port) => {
                        let value = self
                            .get_node_output(node_id, Some(port))
                            .unwrap_or(Value::Null);
                        (value, &selector.path[1..])
                    }
                    None => {
                        // Dotless selector: the node's default output port.
                        let port = self.default_output_ports.get(node_id)?;
                        let value = self
                            .get_node_output(node_id, Some(port))
                            .unwrap_or(Value::Null);
                        (value, &[][..])
                    }
                }
            }
        };

        walk(root, tail)
    }

    /// Resolve a raw selector string.
    pub fn resolve_str(&self, raw: &str) -> Option<Value> {
        let selector = Selector::parse(raw).ok()?;
        self.resolve(&selector)
    }

    /// Snapshot of the conversation namespace.
    pub fn conversation_snapshot(&self) -> Map<String, Value> {
        self.conversation
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Walk remaining path segments: integers index lists, strings index maps.
fn walk(mut current: Value, tail: &[String]) -> Option<Value> {
    for segment in tail {
        current = match current {
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?.clone()
            }
            Value::Object(map) => map.get(segment)?.clone(),
            _ => return None,
        };
    }
    Some(current)
}
