//! Workflow graph documents: nodes, edges, ports, and the side tables.
//!
//! Graphs arrive as loosely-typed JSON authored by the workflow editor. The
//! types here deserialize that JSON and normalize legacy spellings (model
//! objects, camelCase aliases, list-form variable mappings) into the strict
//! form the validator and executor operate on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Data type carried by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    #[default]
    Any,
}

impl PortType {
    /// `any` is assignment-compatible with every type in both directions.
    pub fn is_compatible(self, other: PortType) -> bool {
        self == other || self == PortType::Any || other == PortType::Any
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PortType::String => "string",
            PortType::Number => "number",
            PortType::Boolean => "boolean",
            PortType::Array => "array",
            PortType::Object => "object",
            PortType::Any => "any",
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, typed input or output slot on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    #[serde(rename = "type", default)]
    pub port_type: PortType,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Port {
    pub fn new(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
            required: true,
            default: None,
            description: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self.required = false;
        self
    }
}

/// Declared input/output ports of a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ports {
    #[serde(default)]
    pub inputs: Vec<Port>,
    #[serde(default)]
    pub outputs: Vec<Port>,
}

impl Ports {
    pub fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

/// Built-in node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Start,
    End,
    Answer,
    Llm,
    KnowledgeRetrieval,
    IfElse,
    QuestionClassifier,
    Assigner,
    TavilySearch,
    HttpRequest,
    Code,
    TemplateTransform,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::End => "end",
            NodeKind::Answer => "answer",
            NodeKind::Llm => "llm",
            NodeKind::KnowledgeRetrieval => "knowledge-retrieval",
            NodeKind::IfElse => "if-else",
            NodeKind::QuestionClassifier => "question-classifier",
            NodeKind::Assigner => "assigner",
            NodeKind::TavilySearch => "tavily-search",
            NodeKind::HttpRequest => "http-request",
            NodeKind::Code => "code",
            NodeKind::TemplateTransform => "template-transform",
        }
    }

    pub fn parse(s: &str) -> Option<NodeKind> {
        match s {
            "start" => Some(NodeKind::Start),
            "end" => Some(NodeKind::End),
            "answer" => Some(NodeKind::Answer),
            "llm" => Some(NodeKind::Llm),
            "knowledge-retrieval" => Some(NodeKind::KnowledgeRetrieval),
            "if-else" => Some(NodeKind::IfElse),
            "question-classifier" => Some(NodeKind::QuestionClassifier),
            "assigner" => Some(NodeKind::Assigner),
            "tavily-search" => Some(NodeKind::TavilySearch),
            "http-request" => Some(NodeKind::HttpRequest),
            "code" => Some(NodeKind::Code),
            "template-transform" => Some(NodeKind::TemplateTransform),
            _ => None,
        }
    }

    /// Branch nodes gate their successors on a fired output port.
    pub fn is_branch(self) -> bool {
        matches!(self, NodeKind::IfElse | NodeKind::QuestionClassifier)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    /// Node type name; editors may also put it in `data.type`
    #[serde(rename = "type", default)]
    pub node_type: String,
    /// Opaque editor coordinates, ignored by the engine
    #[serde(default)]
    pub position: Value,
    /// Type-specific settings
    #[serde(rename = "data", default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Ports>,
    /// `input port -> ValueSelector`; loose forms are normalized by
    /// [`WorkflowGraph::normalize_legacy`]
    #[serde(default, deserialize_with = "de_variable_mappings")]
    pub variable_mappings: Map<String, Value>,
}

/// Accept both the canonical map form and the legacy list form.
fn de_variable_mappings<'de, D>(deserializer: D) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(map) => map,
        Value::Array(entries) => coerce_mapping_list(&entries),
        _ => Map::new(),
    })
}

impl NodeDef {
    /// Resolved node kind: `data.type` wins over the outer `type` field.
    pub fn kind(&self) -> Option<NodeKind> {
        if let Some(Value::String(t)) = self.config.get("type") {
            if let Some(kind) = NodeKind::parse(t) {
                return Some(kind);
            }
        }
        NodeKind::parse(&self.node_type)
    }

    pub fn type_name(&self) -> &str {
        if let Some(Value::String(t)) = self.config.get("type") {
            t
        } else {
            &self.node_type
        }
    }

    /// Mapping selector for a port, if present and well-formed.
    pub fn mapping(&self, port: &str) -> Option<&str> {
        extract_selector(self.variable_mappings.get(port)?)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// One edge of a workflow graph.
///
/// Edges are hints about data flow; the authoritative data path is each
/// node's `variable_mappings`. The validator reconciles the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    #[serde(default)]
    pub id: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<PortType>,
}

/// The user-authored DAG plus its side tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
    #[serde(default)]
    pub environment_variables: Map<String, Value>,
    #[serde(default)]
    pub conversation_variables: Map<String, Value>,
}

/// Reserved selector scopes that masquerade as node ids in edges.
pub fn reserved_scope(id: &str) -> Option<&'static str> {
    match id.to_ascii_lowercase().as_str() {
        "env" | "environment" => Some("env"),
        "conv" | "conversation" => Some("conv"),
        "sys" | "system" => Some("sys"),
        _ => None,
    }
}

/// Pull a selector string out of a mapping value.
///
/// Accepts a bare string, `{"variable": "..."}`, or
/// `{"source": {"variable": "..."}}`.
pub fn extract_selector(mapping: &Value) -> Option<&str> {
    match mapping {
        Value::String(s) => Some(s),
        Value::Object(obj) => {
            if let Some(Value::String(s)) = obj.get("variable") {
                return Some(s);
            }
            if let Some(Value::Object(source)) = obj.get("source") {
                if let Some(Value::String(s)) = source.get("variable") {
                    return Some(s);
                }
            }
            None
        }
        _ => None,
    }
}

impl WorkflowGraph {
    /// Parse a graph from a JSON document.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn from_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut NodeDef> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Rewrite legacy spellings in place. Idempotent.
    ///
    /// - LLM `model` objects (`{provider, name, completion_params}`) flatten
    ///   to a model string plus top-level provider/params.
    /// - `prompt` aliases `prompt_template`.
    /// - Knowledge nodes accept `topK` / `documentIds`.
    /// - List-form `variable_mappings` coerce to the canonical map.
    pub fn normalize_legacy(&mut self) {
        for node in &mut self.nodes {
            let kind = node.kind();

            if kind == Some(NodeKind::Llm) || kind == Some(NodeKind::QuestionClassifier) {
                normalize_model_config(&mut node.config);
                if !node.config.contains_key("prompt_template") {
                    if let Some(prompt) = node.config.get("prompt").cloned() {
                        node.config.insert("prompt_template".into(), prompt);
                    }
                }
            }

            if kind == Some(NodeKind::KnowledgeRetrieval) {
                alias_config_key(&mut node.config, "topK", "top_k");
                alias_config_key(&mut node.config, "documentIds", "document_ids");
            }

            node.variable_mappings = coerce_variable_mappings(&node.variable_mappings);
        }
    }
}

fn alias_config_key(config: &mut Map<String, Value>, from: &str, to: &str) {
    if !config.contains_key(to) {
        if let Some(value) = config.get(from).cloned() {
            config.insert(to.to_string(), value);
        }
    }
}

/// Flatten a `model` object into `model` (string) + `provider` +
/// completion params.
fn normalize_model_config(config: &mut Map<String, Value>) {
    let Some(Value::Object(model_obj)) = config.get("model").cloned() else {
        return;
    };

    let name = model_obj
        .get("name")
        .or_else(|| model_obj.get("id"))
        .and_then(Value::as_str)
        .unwrap_or("gpt-4o-mini")
        .to_string();

    if !config.contains_key("provider") {
        if let Some(Value::String(provider)) = model_obj.get("provider") {
            config.insert("provider".into(), Value::String(provider.clone()));
        }
    }
    if let Some(Value::Object(params)) = model_obj.get("completion_params") {
        for (key, value) in params {
            if !config.contains_key(key) {
                config.insert(key.clone(), value.clone());
            }
        }
    }
    config.insert("model".into(), Value::String(name));
}

/// Coerce `variable_mappings` into `map<port, selector-string>`.
///
/// Accepts the canonical map, a map with `{variable: ...}` values, or the
/// legacy list of `{target_port, variable|source}` entries.
pub fn coerce_variable_mappings(raw: &Map<String, Value>) -> Map<String, Value> {
    let mut normalized = Map::new();
    for (port, value) in raw {
        match extract_selector(value) {
            Some(selector) => {
                normalized.insert(port.clone(), Value::String(selector.to_string()));
            }
            None => {
                normalized.insert(port.clone(), value.clone());
            }
        }
    }
    normalized
}

/// Coerce a list-form mapping (`[{target_port, variable}]`) into the map form.
pub fn coerce_mapping_list(entries: &[Value]) -> Map<String, Value> {
    let mut normalized = Map::new();
    for entry in entries {
        let Value::Object(obj) = entry else { continue };
        let target = obj
            .get("target_port")
            .or_else(|| obj.get("target"))
            .and_then(Value::as_str);
        let Some(target) = target else { continue };
        let Some(selector) = extract_selector(entry) else {
            continue;
        };
        normalized.insert(target.to_string(), Value::String(selector.to_string()));
    }
    normalized
}

/// Canonical JSON with recursively sorted object keys.
pub fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<_, _> = map.iter().map(|(k, v)| (k.clone(), sort(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}
