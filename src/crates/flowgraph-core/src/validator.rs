//! Workflow validation and normalization.
//!
//! `validate` runs a fixed sequence of passes over a graph document; the
//! order is significant. The early passes *rewrite* the graph (placeholder
//! ports, synthesized variable mappings, `self.` normalization) so that the
//! executor only ever sees the strict port-and-selector form. Later passes
//! are purely diagnostic. Normalization is idempotent: validating an
//! already-validated graph changes nothing.

use crate::node::NodeHandler;
use crate::registry::NodeRegistry;
use crate::schema::{
    extract_selector, reserved_scope, EdgeDef, NodeKind, PortType, Ports, WorkflowGraph,
};
use crate::selector::{Scope, Selector};
use crate::template::TemplateRenderer;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Edge handles rewritten to a concrete port name during normalization.
const HANDLE_PLACEHOLDERS: [&str; 5] = ["source", "target", "default", "input", "output"];

/// One validation finding with a stable code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub message: String,
}

impl ValidationIssue {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Result of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationOutcome {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }
}

/// Structural and semantic validator.
pub struct WorkflowValidator {
    registry: &'static NodeRegistry,
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowValidator {
    pub fn new() -> Self {
        Self { registry: NodeRegistry::builtin() }
    }

    /// Validate and normalize a graph in place.
    pub fn validate(&self, graph: &mut WorkflowGraph) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        graph.normalize_legacy();

        if graph.nodes.is_empty() {
            outcome
                .errors
                .push(ValidationIssue::new("empty_workflow", "workflow has no nodes"));
            return outcome;
        }

        self.check_presence(graph, &mut outcome);
        let port_map = self.resolve_ports(graph, &mut outcome);
        self.normalize_edge_ports(graph, &port_map, &mut outcome);
        self.synthesize_mappings(graph, &port_map, &mut outcome);
        self.normalize_self_mappings(graph);
        self.check_selectors(graph, &port_map, &mut outcome);
        self.check_required_inputs(graph, &port_map, &mut outcome);
        self.check_template_coverage(graph, &port_map, &mut outcome);
        self.check_structure(graph, &mut outcome);
        self.check_branch_constraints(graph, &mut outcome);
        self.check_answer_end_wiring(graph, &mut outcome);

        debug!(
            errors = outcome.errors.len(),
            warnings = outcome.warnings.len(),
            "workflow validation finished"
        );
        outcome
    }

    /// Pass 1: node presence and counts.
    fn check_presence(&self, graph: &WorkflowGraph, outcome: &mut ValidationOutcome) {
        let mut seen_ids = HashSet::new();
        for node in &graph.nodes {
            if node.id.is_empty() {
                outcome
                    .errors
                    .push(ValidationIssue::new("node_missing_id", "a node has no id"));
                continue;
            }
            if !seen_ids.insert(node.id.clone()) {
                outcome.errors.push(ValidationIssue::new(
                    "duplicate_node_id",
                    format!("node id '{}' is used more than once", node.id),
                ));
            }
            if node.type_name().is_empty() {
                outcome.errors.push(ValidationIssue::new(
                    "node_missing_type",
                    format!("node '{}' has no type", node.id),
                ));
            }
        }

        let count = |kind: NodeKind| graph.nodes.iter().filter(|n| n.kind() == Some(kind)).count();

        match count(NodeKind::Start) {
            0 => outcome
                .errors
                .push(ValidationIssue::new("missing_start", "workflow needs a Start node")),
            1 => {}
            _ => outcome.errors.push(ValidationIssue::new(
                "multiple_start",
                "workflow must have exactly one Start node",
            )),
        }

        let has_branch = graph
            .nodes
            .iter()
            .any(|n| n.kind().is_some_and(NodeKind::is_branch));
        match count(NodeKind::End) {
            0 => outcome
                .errors
                .push(ValidationIssue::new("missing_end", "workflow needs an End node")),
            1 => {}
            n if !has_branch => outcome.errors.push(ValidationIssue::new(
                "multiple_ends_without_branch",
                format!("{n} End nodes require a branching node (if-else or question-classifier)"),
            )),
            _ => {}
        }

    }

    /// Pass 2: resolve each node's ports (embedded ports win, then the
    /// handler instance, then the type schema) and validate configs.
    fn resolve_ports(
        &self,
        graph: &WorkflowGraph,
        outcome: &mut ValidationOutcome,
    ) -> HashMap<String, Ports> {
        let mut port_map = HashMap::new();

        for node in &graph.nodes {
            if node.id.is_empty() {
                continue;
            }

            if node.kind().is_none() {
                outcome.errors.push(ValidationIssue::new(
                    "unknown_node_type",
                    format!("node '{}' has unknown type '{}'", node.id, node.type_name()),
                ));
                port_map.insert(node.id.clone(), node.ports.clone().unwrap_or_default());
                continue;
            }

            let handler: Option<Box<dyn NodeHandler>> = match self.registry.construct(node) {
                Ok(handler) => Some(handler),
                Err(e) => {
                    outcome.errors.push(ValidationIssue::new(
                        "invalid_node_config",
                        e.to_string(),
                    ));
                    None
                }
            };

            if let Some(handler) = &handler {
                if let Err(e) = handler.validate_static() {
                    outcome.errors.push(ValidationIssue::new(
                        "invalid_node_config",
                        format!("node '{}': {e}", node.id),
                    ));
                }
            }

            let ports = match &node.ports {
                Some(ports) if !ports.inputs.is_empty() || !ports.outputs.is_empty() => {
                    ports.clone()
                }
                _ => handler
                    .as_ref()
                    .map(|h| h.instance_ports())
                    .unwrap_or_default(),
            };
            port_map.insert(node.id.clone(), ports);
        }

        port_map
    }

    /// Pass 3: rewrite placeholder edge handles to declared port names and
    /// validate the remaining explicit ones.
    fn normalize_edge_ports(
        &self,
        graph: &mut WorkflowGraph,
        port_map: &HashMap<String, Ports>,
        outcome: &mut ValidationOutcome,
    ) {
        let node_ids: HashSet<&String> = graph.nodes.iter().map(|n| &n.id).collect();

        for edge in &mut graph.edges {
            if edge.source.is_empty() || edge.target.is_empty() {
                outcome.errors.push(ValidationIssue::new(
                    "edge_missing_endpoint",
                    format!("edge '{}' is missing source or target", edge.id),
                ));
                continue;
            }
            if edge.source == edge.target {
                outcome.errors.push(ValidationIssue::new(
                    "self_edge",
                    format!("edge '{}' connects node '{}' to itself", edge.id, edge.source),
                ));
                continue;
            }

            let source_is_scope = reserved_scope(&edge.source).is_some();
            if !source_is_scope && !node_ids.contains(&edge.source) {
                outcome.errors.push(ValidationIssue::new(
                    "unknown_edge_source",
                    format!("edge '{}' references unknown source '{}'", edge.id, edge.source),
                ));
                continue;
            }
            if !node_ids.contains(&edge.target) {
                outcome.errors.push(ValidationIssue::new(
                    "unknown_edge_target",
                    format!("edge '{}' references unknown target '{}'", edge.id, edge.target),
                ));
                continue;
            }

            if !source_is_scope {
                let outputs = port_map
                    .get(&edge.source)
                    .map(|p| p.outputs.as_slice())
                    .unwrap_or_default();
                edge.source_port = infer_port_name(edge.source_port.take(), outputs);
                if let Some(port) = &edge.source_port {
                    if !outputs.is_empty() && !outputs.iter().any(|p| &p.name == port) {
                        outcome.errors.push(ValidationIssue::new(
                            "edge_port_unknown",
                            format!(
                                "edge '{}' source_port '{port}' does not exist on node '{}'",
                                edge.id, edge.source
                            ),
                        ));
                    }
                }
            } else if edge.source_port.is_none() {
                outcome.errors.push(ValidationIssue::new(
                    "scope_edge_missing_port",
                    format!(
                        "edge '{}' from scope '{}' needs a source_port naming the variable",
                        edge.id, edge.source
                    ),
                ));
            }

            let inputs = port_map
                .get(&edge.target)
                .map(|p| p.inputs.as_slice())
                .unwrap_or_default();
            edge.target_port = infer_port_name(edge.target_port.take(), inputs);
            if let Some(port) = &edge.target_port {
                if !inputs.is_empty() && !inputs.iter().any(|p| &p.name == port) {
                    outcome.errors.push(ValidationIssue::new(
                        "edge_port_unknown",
                        format!(
                            "edge '{}' target_port '{port}' does not exist on node '{}'",
                            edge.id, edge.target
                        ),
                    ));
                }
            }

            if edge.data_type.is_none() {
                if let (Some(port), Some(ports)) = (&edge.source_port, port_map.get(&edge.source)) {
                    edge.data_type = ports.output(port).map(|p| p.port_type);
                }
            }
        }
    }

    /// Pass 4: synthesize missing `variable_mappings` entries from edges.
    fn synthesize_mappings(
        &self,
        graph: &mut WorkflowGraph,
        port_map: &HashMap<String, Ports>,
        outcome: &mut ValidationOutcome,
    ) {
        let edges = graph.edges.clone();
        let mut incoming: HashMap<&str, Vec<&EdgeDef>> = HashMap::new();
        for edge in &edges {
            incoming.entry(edge.target.as_str()).or_default().push(edge);
        }

        for node in &mut graph.nodes {
            let Some(ports) = port_map.get(&node.id) else { continue };
            let node_edges = incoming.get(node.id.as_str()).cloned().unwrap_or_default();

            for port in &ports.inputs {
                let existing = node
                    .variable_mappings
                    .get(&port.name)
                    .and_then(extract_selector);
                if existing.is_some() {
                    continue;
                }

                // An edge explicitly wired to this port wins.
                let mut candidate = node_edges.iter().find(|e| {
                    e.source_port.is_some() && e.target_port.as_deref() == Some(&port.name)
                });

                // Otherwise a unique type-compatible incoming edge. Edges
                // explicitly claimed by a different declared input port are
                // not up for grabs.
                if candidate.is_none() {
                    let compatible: Vec<_> = node_edges
                        .iter()
                        .filter(|e| {
                            let Some(source_port) = &e.source_port else { return false };
                            if reserved_scope(&e.source).is_some() {
                                return false;
                            }
                            if let Some(target) = e.target_port.as_deref() {
                                if target != port.name
                                    && ports.inputs.iter().any(|p| p.name == target)
                                {
                                    return false;
                                }
                            }
                            let source_type = port_map
                                .get(&e.source)
                                .and_then(|p| p.output(source_port))
                                .map(|p| p.port_type)
                                .unwrap_or(PortType::Any);
                            source_type.is_compatible(port.port_type)
                        })
                        .collect();
                    if compatible.len() == 1 {
                        candidate = Some(compatible[0]);
                    }
                }

                // A single-input node accepts its only incoming edge.
                if candidate.is_none() && ports.inputs.len() == 1 {
                    candidate = node_edges.iter().find(|e| e.source_port.is_some());
                }

                let Some(edge) = candidate else { continue };

                if let Some(scope) = reserved_scope(&edge.source) {
                    match &edge.source_port {
                        Some(variable) => {
                            node.variable_mappings.insert(
                                port.name.clone(),
                                Value::String(format!("{scope}.{variable}")),
                            );
                        }
                        None => outcome.errors.push(ValidationIssue::new(
                            "scope_edge_missing_port",
                            format!(
                                "node '{}' input '{}' references scope '{scope}' without a source_port",
                                node.id, port.name
                            ),
                        )),
                    }
                    continue;
                }

                if let Some(source_port) = &edge.source_port {
                    node.variable_mappings.insert(
                        port.name.clone(),
                        Value::String(format!("{}.{source_port}", edge.source)),
                    );
                }
            }
        }
    }

    /// Pass 5: rewrite `self.x` mapping selectors to the node's own id.
    fn normalize_self_mappings(&self, graph: &mut WorkflowGraph) {
        for node in &mut graph.nodes {
            let own_id = node.id.clone();
            for (_, value) in node.variable_mappings.iter_mut() {
                let Some(selector) = extract_selector(value).map(str::to_string) else {
                    continue;
                };
                if let Some(rest) = selector.strip_prefix("self.") {
                    *value = Value::String(format!("{own_id}.{rest}"));
                }
            }
        }
    }

    /// Pass 6: every mapped selector must resolve structurally.
    fn check_selectors(
        &self,
        graph: &WorkflowGraph,
        port_map: &HashMap<String, Ports>,
        outcome: &mut ValidationOutcome,
    ) {
        let node_ids: HashSet<&String> = graph.nodes.iter().map(|n| &n.id).collect();

        for node in &graph.nodes {
            for (port, value) in &node.variable_mappings {
                let Some(raw) = extract_selector(value) else {
                    outcome.errors.push(ValidationIssue::new(
                        "invalid_selector",
                        format!("node '{}' port '{port}' has no usable selector", node.id),
                    ));
                    continue;
                };

                let selector = match Selector::parse(raw) {
                    Ok(selector) => selector,
                    Err(_) => {
                        outcome.errors.push(ValidationIssue::new(
                            "invalid_selector",
                            format!("node '{}' port '{port}' selector '{raw}' is malformed", node.id),
                        ));
                        continue;
                    }
                };

                match &selector.scope {
                    Scope::Sys | Scope::Env | Scope::Conversation => {}
                    Scope::SelfNode => {
                        // Rewritten in pass 5; anything left is malformed.
                        outcome.errors.push(ValidationIssue::new(
                            "invalid_selector",
                            format!("node '{}' port '{port}' kept an unresolved self selector", node.id),
                        ));
                    }
                    Scope::Node(source) => {
                        if !node_ids.contains(source) {
                            outcome.errors.push(ValidationIssue::new(
                                "unknown_selector_node",
                                format!(
                                    "node '{}' port '{port}' references unknown node '{source}'",
                                    node.id
                                ),
                            ));
                            continue;
                        }
                        let Some(key) = selector.key() else { continue };
                        let Some(ports) = port_map.get(source) else { continue };

                        let valid = if source == &node.id {
                            // Own id: the selector names one of this node's inputs.
                            ports.input(key).is_some()
                        } else {
                            ports.outputs.is_empty() || ports.output(key).is_some()
                        };
                        if !valid {
                            outcome.errors.push(ValidationIssue::new(
                                "unknown_selector_port",
                                format!(
                                    "node '{}' port '{port}' references missing port '{source}.{key}'",
                                    node.id
                                ),
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Pass 6b: every required input has a mapping or a declared default.
    fn check_required_inputs(
        &self,
        graph: &WorkflowGraph,
        port_map: &HashMap<String, Ports>,
        outcome: &mut ValidationOutcome,
    ) {
        for node in &graph.nodes {
            let Some(ports) = port_map.get(&node.id) else { continue };
            let allow_context_fallback = node
                .config
                .get("allow_conversation_context_fallback")
                .and_then(Value::as_bool)
                .unwrap_or(false);

            for port in ports.inputs.iter().filter(|p| p.required) {
                // The LLM context port may fall back to conversation context.
                if port.name == "context"
                    && node.kind() == Some(NodeKind::Llm)
                    && allow_context_fallback
                {
                    continue;
                }
                if port.default.is_some() {
                    continue;
                }
                let mapped = node
                    .variable_mappings
                    .get(&port.name)
                    .and_then(extract_selector)
                    .is_some();
                if !mapped {
                    outcome.errors.push(ValidationIssue::new(
                        "required_input_unmapped",
                        format!(
                            "node '{}' required input '{}' has no variable mapping",
                            node.id, port.name
                        ),
                    ));
                }
            }
        }
    }

    /// Pass 7: template variables in answer/llm nodes must be connected.
    fn check_template_coverage(
        &self,
        graph: &WorkflowGraph,
        port_map: &HashMap<String, Ports>,
        outcome: &mut ValidationOutcome,
    ) {
        for node in &graph.nodes {
            let template = match node.kind() {
                Some(NodeKind::Answer) => node.config_str("template"),
                Some(NodeKind::Llm) => node.config_str("prompt_template"),
                _ => None,
            };
            let Some(template) = template else { continue };

            let selectors = match TemplateRenderer::parse_template(template) {
                Ok(selectors) => selectors,
                Err(e) => {
                    outcome.errors.push(ValidationIssue::new(
                        "template_syntax",
                        format!("node '{}' template: {e}", node.id),
                    ));
                    continue;
                }
            };

            let allowed: HashSet<String> = node
                .variable_mappings
                .values()
                .filter_map(extract_selector)
                .map(str::to_string)
                .collect();
            let own_inputs: HashSet<&str> = port_map
                .get(&node.id)
                .map(|p| p.inputs.iter().map(|port| port.name.as_str()).collect())
                .unwrap_or_default();

            for raw in selectors {
                let Ok(selector) = Selector::parse(&raw) else { continue };
                if selector.scope.is_reserved() {
                    continue;
                }
                if allowed.contains(&raw) {
                    continue;
                }

                // self.<input>, <own id>.<input>, or a bare input-port name.
                let is_self = matches!(selector.scope, Scope::SelfNode)
                    || selector.node_id() == Some(node.id.as_str());
                if is_self && selector.key().is_some_and(|key| own_inputs.contains(key)) {
                    continue;
                }
                if selector.path.is_empty()
                    && selector.node_id().is_some_and(|name| own_inputs.contains(name))
                {
                    continue;
                }

                // An actual upstream edge source.
                let source = selector.node_id().unwrap_or_default();
                let connected = graph
                    .edges
                    .iter()
                    .any(|e| e.source == source && e.target == node.id);
                if !connected {
                    outcome.errors.push(ValidationIssue::new(
                        "template_variable_unconnected",
                        format!(
                            "node '{}' template references '{raw}' but no edge connects '{source}' to it",
                            node.id
                        ),
                    ));
                }
            }
        }
    }

    /// Pass 8: cycles, isolated nodes, reachability from Start.
    fn check_structure(&self, graph: &WorkflowGraph, outcome: &mut ValidationOutcome) {
        let adjacency = scheduling_adjacency(graph);

        if let Some(cycle_node) = find_cycle(&adjacency) {
            outcome.errors.push(ValidationIssue::new(
                "cycle_detected",
                format!("workflow contains a cycle through node '{cycle_node}'"),
            ));
        }

        let mut degree: HashMap<&str, usize> = HashMap::new();
        for (source, targets) in &adjacency {
            *degree.entry(source).or_default() += targets.len();
            for target in targets {
                *degree.entry(target).or_default() += 1;
            }
        }
        for node in &graph.nodes {
            let isolated = degree.get(node.id.as_str()).copied().unwrap_or(0) == 0;
            let exempt = matches!(node.kind(), Some(NodeKind::Start) | Some(NodeKind::End));
            if isolated && !exempt {
                outcome.warnings.push(ValidationIssue::new(
                    "isolated_node",
                    format!("node '{}' ({}) has no connections", node.id, node.type_name()),
                ));
            }
        }

        if let Some(start) = graph.nodes.iter().find(|n| n.kind() == Some(NodeKind::Start)) {
            let mut reachable = HashSet::new();
            let mut queue = VecDeque::from([start.id.as_str()]);
            while let Some(current) = queue.pop_front() {
                if !reachable.insert(current) {
                    continue;
                }
                if let Some(targets) = adjacency.get(current) {
                    for target in targets {
                        queue.push_back(target);
                    }
                }
            }
            for node in &graph.nodes {
                if !reachable.contains(node.id.as_str()) {
                    outcome.warnings.push(ValidationIssue::new(
                        "unreachable_node",
                        format!("node '{}' is not reachable from Start", node.id),
                    ));
                }
            }
        }
    }

    /// Pass 9: Start fan-out and branch-convergence advisories.
    fn check_branch_constraints(&self, graph: &WorkflowGraph, outcome: &mut ValidationOutcome) {
        let kind_of: HashMap<&str, Option<NodeKind>> =
            graph.nodes.iter().map(|n| (n.id.as_str(), n.kind())).collect();
        let is_branch =
            |id: &str| kind_of.get(id).copied().flatten().is_some_and(NodeKind::is_branch);

        if let Some(start) = graph.nodes.iter().find(|n| n.kind() == Some(NodeKind::Start)) {
            let successors: Vec<&str> = graph
                .edges
                .iter()
                .filter(|e| e.source == start.id)
                .map(|e| e.target.as_str())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if successors.len() > 1 && !successors.iter().all(|s| is_branch(s)) {
                outcome.warnings.push(ValidationIssue::new(
                    "start_multiple_successors",
                    format!(
                        "Start feeds {} nodes directly; route through a branch node instead",
                        successors.len()
                    ),
                ));
            }
        }

        let mut edges_by_source: HashMap<&str, Vec<&EdgeDef>> = HashMap::new();
        for edge in &graph.edges {
            if reserved_scope(&edge.source).is_none() {
                edges_by_source.entry(edge.source.as_str()).or_default().push(edge);
            }
        }

        for node in &graph.nodes {
            if !node.kind().is_some_and(NodeKind::is_branch) {
                continue;
            }
            let outgoing = edges_by_source.get(node.id.as_str()).cloned().unwrap_or_default();

            let mut branches: HashMap<&str, Vec<&str>> = HashMap::new();
            for edge in outgoing {
                let port = edge.source_port.as_deref().unwrap_or("default");
                branches.entry(port).or_default().push(edge.target.as_str());
            }
            if branches.len() < 2 {
                continue;
            }

            let streams: Vec<(&str, HashSet<&str>)> = branches
                .iter()
                .map(|(port, targets)| {
                    let mut downstream = downstream_nodes(targets, &edges_by_source);
                    downstream.retain(|id| !is_branch(id));
                    (*port, downstream)
                })
                .collect();

            for i in 0..streams.len() {
                for j in (i + 1)..streams.len() {
                    let converging: BTreeSet<&&str> =
                        streams[i].1.intersection(&streams[j].1).collect();
                    if !converging.is_empty() {
                        let mut names: Vec<&str> =
                            converging.iter().take(3).map(|s| **s).collect();
                        names.sort_unstable();
                        let suffix = if converging.len() > 3 { ", ..." } else { "" };
                        outcome.warnings.push(ValidationIssue::new(
                            "branch_convergence",
                            format!(
                                "branches '{}' and '{}' of node '{}' converge into: {}{suffix}; \
                                 the scheduler handles convergence, but separate Answer/End \
                                 chains per branch are clearer",
                                streams[i].0,
                                streams[j].0,
                                node.id,
                                names.join(", ")
                            ),
                        ));
                    }
                }
            }
        }
    }

    /// Pass 10: the graph has a final-response producer; an Answer node
    /// wired into an End, or (Answer-less pipelines) an End whose
    /// `response` input is mapped.
    fn check_answer_end_wiring(&self, graph: &WorkflowGraph, outcome: &mut ValidationOutcome) {
        let answers: HashSet<&str> = graph
            .nodes
            .iter()
            .filter(|n| n.kind() == Some(NodeKind::Answer))
            .map(|n| n.id.as_str())
            .collect();
        let ends: HashSet<&str> = graph
            .nodes
            .iter()
            .filter(|n| n.kind() == Some(NodeKind::End))
            .map(|n| n.id.as_str())
            .collect();
        if ends.is_empty() {
            return;
        }

        if answers.is_empty() {
            let end_fed = graph
                .nodes
                .iter()
                .filter(|n| n.kind() == Some(NodeKind::End))
                .any(|n| n.mapping("response").is_some());
            if end_fed {
                outcome.warnings.push(ValidationIssue::new(
                    "missing_answer",
                    "no Answer node; the final response comes straight from an End input",
                ));
            } else {
                outcome.errors.push(ValidationIssue::new(
                    "missing_answer",
                    "workflow needs an Answer node to produce the final response",
                ));
            }
            return;
        }

        let connected = graph.edges.iter().any(|e| {
            answers.contains(e.source.as_str()) && ends.contains(e.target.as_str())
        });
        if !connected {
            outcome.errors.push(ValidationIssue::new(
                "answer_not_connected_to_end",
                "no Answer node is connected to an End node",
            ));
        }
    }

    /// Kahn's algorithm over the scheduling graph, deterministic via
    /// lexicographic tie-break. `None` when a cycle prevents a full order.
    pub fn execution_order(&self, graph: &WorkflowGraph) -> Option<Vec<String>> {
        let adjacency = scheduling_adjacency(graph);
        let mut in_degree: HashMap<&str, usize> =
            graph.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for targets in adjacency.values() {
            for target in targets {
                if let Some(degree) = in_degree.get_mut(target.as_str()) {
                    *degree += 1;
                }
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(graph.nodes.len());

        while let Some(&next) = ready.iter().next() {
            ready.remove(next);
            order.push(next.to_string());
            if let Some(targets) = adjacency.get(next) {
                for target in targets {
                    if let Some(degree) = in_degree.get_mut(target.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(target.as_str());
                        }
                    }
                }
            }
        }

        (order.len() == graph.nodes.len()).then_some(order)
    }
}

/// Rewrite placeholder handles (`source`, `target`, `default`, `input`,
/// `output`, empty) to the unique required port, else the first declared.
fn infer_port_name(provided: Option<String>, available: &[crate::schema::Port]) -> Option<String> {
    if available.is_empty() {
        return provided;
    }
    if let Some(name) = &provided {
        if available.iter().any(|p| &p.name == name) {
            return provided;
        }
        let lowered = name.to_ascii_lowercase();
        if !name.is_empty() && !HANDLE_PLACEHOLDERS.contains(&lowered.as_str()) {
            return provided;
        }
    }

    let required: Vec<&crate::schema::Port> = available.iter().filter(|p| p.required).collect();
    let inferred = match required.as_slice() {
        [only] => Some(only.name.clone()),
        [] => available.first().map(|p| p.name.clone()),
        // Multiple required ports: pick the first, matching declaration order.
        [first, ..] => Some(first.name.clone()),
    };
    inferred.or(provided)
}

/// Adjacency of the scheduling graph: edges whose source is a reserved
/// scope carry data only and are excluded.
fn scheduling_adjacency(graph: &WorkflowGraph) -> HashMap<&str, Vec<String>> {
    let node_ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut adjacency: HashMap<&str, Vec<String>> = HashMap::new();
    for edge in &graph.edges {
        if reserved_scope(&edge.source).is_some() {
            continue;
        }
        if !node_ids.contains(edge.source.as_str()) || !node_ids.contains(edge.target.as_str()) {
            continue;
        }
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.clone());
    }
    adjacency
}

/// DFS with a recursion stack; returns a node on the first cycle found.
fn find_cycle(adjacency: &HashMap<&str, Vec<String>>) -> Option<String> {
    fn visit(
        node: &str,
        adjacency: &HashMap<&str, Vec<String>>,
        visited: &mut HashSet<String>,
        stack: &mut HashSet<String>,
    ) -> Option<String> {
        visited.insert(node.to_string());
        stack.insert(node.to_string());
        for neighbor in adjacency.get(node).into_iter().flatten() {
            if stack.contains(neighbor) {
                return Some(neighbor.clone());
            }
            if !visited.contains(neighbor) {
                if let Some(found) = visit(neighbor, adjacency, visited, stack) {
                    return Some(found);
                }
            }
        }
        stack.remove(node);
        None
    }

    let mut visited = HashSet::new();
    let mut stack = HashSet::new();
    let mut roots: Vec<&str> = adjacency.keys().copied().collect();
    roots.sort_unstable();
    for root in roots {
        if !visited.contains(root) {
            if let Some(found) = visit(root, adjacency, &mut visited, &mut stack) {
                return Some(found);
            }
        }
    }
    None
}

/// BFS over outgoing edges from a set of starting targets.
fn downstream_nodes<'a>(
    starts: &[&'a str],
    edges_by_source: &HashMap<&'a str, Vec<&'a EdgeDef>>,
) -> HashSet<&'a str> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = starts.iter().copied().collect();
    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        for edge in edges_by_source.get(current).into_iter().flatten() {
            if reserved_scope(&edge.target).is_none() {
                queue.push_back(edge.target.as_str());
            }
        }
    }
    for start in starts {
        visited.remove(*start);
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_graph() -> WorkflowGraph {
        WorkflowGraph::from_value(json!({
            "nodes": [
                {"id": "start-1", "type": "start", "data": {"type": "start"}},
                {
                    "id": "answer-1",
                    "type": "answer",
                    "data": {"type": "answer", "template": "{{ start-1.query }}"}
                },
                {"id": "end-1", "type": "end", "data": {"type": "end"}}
            ],
            "edges": [
                {"id": "e1", "source": "start-1", "target": "answer-1", "source_port": "query"},
                {
                    "id": "e2",
                    "source": "answer-1",
                    "target": "end-1",
                    "source_port": "final_output",
                    "target_port": "response"
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn minimal_graph_validates() {
        let mut graph = minimal_graph();
        let outcome = WorkflowValidator::new().validate(&mut graph);
        assert!(outcome.ok(), "errors: {:?}", outcome.errors);
    }

    #[test]
    fn missing_start_is_an_error() {
        let mut graph = minimal_graph();
        graph.nodes.retain(|n| n.id != "start-1");
        let outcome = WorkflowValidator::new().validate(&mut graph);
        assert!(outcome.errors.iter().any(|e| e.code == "missing_start"));
    }

    #[test]
    fn multiple_ends_need_a_branch_node() {
        let mut graph = minimal_graph();
        let mut second_end = graph.node("end-1").unwrap().clone();
        second_end.id = "end-2".into();
        graph.nodes.push(second_end);
        graph.edges.push(
            serde_json::from_value(json!({
                "id": "e3",
                "source": "answer-1",
                "target": "end-2",
                "source_port": "final_output",
                "target_port": "response"
            }))
            .unwrap(),
        );

        let outcome = WorkflowValidator::new().validate(&mut graph.clone());
        assert!(
            outcome.errors.iter().any(|e| e.code == "multiple_ends_without_branch"),
            "errors: {:?}",
            outcome.errors
        );

        // Adding an if-else upstream flips validation to ok.
        graph.nodes.push(
            serde_json::from_value(json!({
                "id": "router-1",
                "type": "if-else",
                "data": {"type": "if-else", "cases": [{
                    "case_id": "a",
                    "logical_operator": "and",
                    "conditions": [{
                        "variable_selector": "sys.user_message",
                        "comparison_operator": "is_not_empty",
                        "value": null,
                        "varType": "string"
                    }]
                }]}
            }))
            .unwrap(),
        );
        graph.edges.push(
            serde_json::from_value(
                json!({"id": "e4", "source": "start-1", "target": "router-1", "source_port": "query"}),
            )
            .unwrap(),
        );
        let outcome = WorkflowValidator::new().validate(&mut graph);
        assert!(
            !outcome.errors.iter().any(|e| e.code == "multiple_ends_without_branch"),
            "errors: {:?}",
            outcome.errors
        );
    }

    #[test]
    fn placeholder_target_port_is_rewritten() {
        let mut graph = minimal_graph();
        graph.edges[1].target_port = Some("target".into());
        let outcome = WorkflowValidator::new().validate(&mut graph);
        assert!(outcome.ok(), "errors: {:?}", outcome.errors);
        assert_eq!(graph.edges[1].target_port.as_deref(), Some("response"));
    }

    #[test]
    fn mappings_are_synthesized_from_edges() {
        let mut graph = minimal_graph();
        let outcome = WorkflowValidator::new().validate(&mut graph);
        assert!(outcome.ok());
        assert_eq!(
            graph.node("end-1").unwrap().mapping("response"),
            Some("answer-1.final_output")
        );
    }

    #[test]
    fn scope_edges_synthesize_scope_selectors() {
        let mut graph = WorkflowGraph::from_value(json!({
            "nodes": [
                {"id": "start-1", "type": "start", "data": {"type": "start"}},
                {
                    "id": "answer-1",
                    "type": "answer",
                    "data": {"type": "answer", "template": "{{ conv.pending }}"}
                },
                {"id": "end-1", "type": "end", "data": {"type": "end"}},
                {
                    "id": "tpl-1",
                    "type": "template-transform",
                    "data": {"type": "template-transform", "template": "{{ self.input }}"}
                }
            ],
            "edges": [
                {"id": "e1", "source": "start-1", "target": "answer-1", "source_port": "query"},
                {"id": "e2", "source": "answer-1", "target": "end-1",
                 "source_port": "final_output", "target_port": "response"},
                {"id": "e3", "source": "env", "target": "tpl-1",
                 "source_port": "GREETING", "target_port": "input"},
                {"id": "e4", "source": "start-1", "target": "tpl-1", "source_port": "query"}
            ]
        }))
        .unwrap();

        let outcome = WorkflowValidator::new().validate(&mut graph);
        assert!(outcome.ok(), "errors: {:?}", outcome.errors);
        assert_eq!(graph.node("tpl-1").unwrap().mapping("input"), Some("env.GREETING"));
    }

    #[test]
    fn template_variable_without_edge_is_rejected() {
        let mut graph = minimal_graph();
        graph.node_mut("answer-1").unwrap().config.insert(
            "template".into(),
            json!("{{ orphan-node.text }}"),
        );
        let outcome = WorkflowValidator::new().validate(&mut graph);
        assert!(!outcome.ok());
        let issue = outcome
            .errors
            .iter()
            .find(|e| e.code == "template_variable_unconnected")
            .expect("expected template_variable_unconnected");
        assert!(issue.message.contains("orphan-node.text"));
    }

    #[test]
    fn cycles_are_detected() {
        let mut graph = minimal_graph();
        // answer-1 -> start-1 closes a cycle.
        graph.edges.push(
            serde_json::from_value(
                json!({"id": "back", "source": "answer-1", "target": "start-1"}),
            )
            .unwrap(),
        );
        let outcome = WorkflowValidator::new().validate(&mut graph);
        assert!(outcome.errors.iter().any(|e| e.code == "cycle_detected"));
        assert!(WorkflowValidator::new().execution_order(&graph).is_none());
    }

    #[test]
    fn isolated_node_warns() {
        let mut graph = minimal_graph();
        graph.nodes.push(
            serde_json::from_value(json!({
                "id": "lonely",
                "type": "template-transform",
                "data": {"type": "template-transform", "template": "x"}
            }))
            .unwrap(),
        );
        let outcome = WorkflowValidator::new().validate(&mut graph);
        assert!(outcome.warnings.iter().any(|w| w.code == "isolated_node"));
        assert!(outcome.warnings.iter().any(|w| w.code == "unreachable_node"));
    }

    #[test]
    fn answer_must_reach_end() {
        let mut graph = minimal_graph();
        graph.edges.remove(1);
        let outcome = WorkflowValidator::new().validate(&mut graph);
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.code == "answer_not_connected_to_end"));
    }

    #[test]
    fn execution_order_is_deterministic_and_topological() {
        let graph = {
            let mut graph = minimal_graph();
            WorkflowValidator::new().validate(&mut graph);
            graph
        };
        let order = WorkflowValidator::new().execution_order(&graph).unwrap();
        assert_eq!(order, vec!["start-1", "answer-1", "end-1"]);
    }

    #[test]
    fn validation_is_idempotent() {
        let mut graph = minimal_graph();
        let validator = WorkflowValidator::new();
        let first = validator.validate(&mut graph);
        let snapshot = serde_json::to_value(&graph).unwrap();
        let second = validator.validate(&mut graph);
        assert_eq!(first, second);
        assert_eq!(snapshot, serde_json::to_value(&graph).unwrap());
    }
}
