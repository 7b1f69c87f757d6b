//! Property tests for validator normalization.

use flowgraph_core::schema::WorkflowGraph;
use flowgraph_core::validator::WorkflowValidator;
use proptest::prelude::*;
use serde_json::json;

/// A linear chain: start -> tpl_0 -> ... -> tpl_{n-1} -> answer -> end,
/// with placeholder edge handles everywhere.
fn chain_graph(middle_nodes: usize) -> WorkflowGraph {
    let mut nodes = vec![json!({"id": "start-1", "type": "start", "data": {"type": "start"}})];
    let mut edges = Vec::new();
    let mut previous = "start-1".to_string();

    for i in 0..middle_nodes {
        let id = format!("tpl-{i}");
        nodes.push(json!({
            "id": id,
            "type": "template-transform",
            "data": {"type": "template-transform", "template": "step {{ self.input }}"}
        }));
        edges.push(json!({
            "id": format!("e-{previous}-{id}"),
            "source": previous,
            "target": id,
            "source_port": "source",
            "target_port": "target"
        }));
        previous = id;
    }

    nodes.push(json!({
        "id": "answer-1",
        "type": "answer",
        "data": {"type": "answer", "template": "done"}
    }));
    nodes.push(json!({"id": "end-1", "type": "end", "data": {"type": "end"}}));
    edges.push(json!({
        "id": "e-answer",
        "source": previous,
        "target": "answer-1",
        "source_port": "",
        "target_port": ""
    }));
    edges.push(json!({
        "id": "e-end",
        "source": "answer-1",
        "target": "end-1",
        "source_port": "default",
        "target_port": "default"
    }));

    WorkflowGraph::from_value(json!({"nodes": nodes, "edges": edges})).unwrap()
}

proptest! {
    /// Normalization is idempotent: a second validation pass neither
    /// changes the graph nor the outcome.
    #[test]
    fn normalization_is_idempotent(middle in 0usize..6) {
        let validator = WorkflowValidator::new();
        let mut graph = chain_graph(middle);

        let first = validator.validate(&mut graph);
        prop_assert!(first.ok(), "errors: {:?}", first.errors);
        let snapshot = serde_json::to_value(&graph).unwrap();

        let second = validator.validate(&mut graph);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(snapshot, serde_json::to_value(&graph).unwrap());
    }

    /// Placeholder handles always rewrite to declared port names, and the
    /// execution order respects every variable-mapping dependency.
    #[test]
    fn placeholders_rewrite_and_order_is_topological(middle in 0usize..6) {
        let validator = WorkflowValidator::new();
        let mut graph = chain_graph(middle);
        let outcome = validator.validate(&mut graph);
        prop_assert!(outcome.ok(), "errors: {:?}", outcome.errors);

        let registry = flowgraph_core::registry::NodeRegistry::builtin();
        for edge in &graph.edges {
            let source_ports = registry.ports_for(graph.node(&edge.source).unwrap());
            let target_ports = registry.ports_for(graph.node(&edge.target).unwrap());
            let source_port = edge.source_port.as_deref().unwrap_or("");
            let target_port = edge.target_port.as_deref().unwrap_or("");
            prop_assert!(
                source_ports.output(source_port).is_some(),
                "edge '{}' source_port '{source_port}' is not a declared output",
                edge.id
            );
            prop_assert!(
                target_ports.input(target_port).is_some(),
                "edge '{}' target_port '{target_port}' is not a declared input",
                edge.id
            );
        }

        let order = validator.execution_order(&graph).unwrap();
        let position = |id: &str| order.iter().position(|n| n == id).unwrap();
        for node in &graph.nodes {
            for value in node.variable_mappings.values() {
                let Some(selector) = value.as_str() else { continue };
                let Some((source, _)) = selector.split_once('.') else { continue };
                if graph.node(source).is_some() && source != node.id {
                    prop_assert!(position(source) < position(&node.id));
                }
            }
        }
    }
}
