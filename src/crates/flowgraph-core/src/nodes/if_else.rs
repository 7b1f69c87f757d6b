//! If-else node: condition-driven branching.

use crate::node::{NodeContext, NodeExecutionResult, NodeHandler, NodeSchema};
use crate::schema::{NodeDef, NodeKind, Port, PortType, Ports};
use crate::template::coerce_to_string;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// One branch case.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseDef {
    pub case_id: String,
    #[serde(default = "default_logical_operator")]
    pub logical_operator: String,
    #[serde(default)]
    pub conditions: Vec<ConditionDef>,
}

fn default_logical_operator() -> String {
    "and".into()
}

/// One comparison inside a case.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionDef {
    pub variable_selector: String,
    pub comparison_operator: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, rename = "varType")]
    pub var_type: Option<String>,
}

/// Evaluates cases top-to-bottom; the first matching case fires its output
/// port, otherwise `else` fires. Downstream nodes on non-fired branches are
/// skipped by the scheduler.
pub struct IfElseNode {
    id: String,
    cases: Vec<CaseDef>,
}

impl IfElseNode {
    pub fn from_def(def: &NodeDef) -> Result<Box<dyn NodeHandler>, String> {
        let cases: Vec<CaseDef> = match def.config.get("cases") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| format!("invalid if-else cases: {e}"))?,
            None => Vec::new(),
        };
        Ok(Box::new(IfElseNode { id: def.id.clone(), cases }))
    }

    pub fn schema() -> NodeSchema {
        NodeSchema {
            kind: NodeKind::IfElse,
            label: "If/Else",
            icon: "git-branch",
            max_instances: -1,
            configurable: true,
            inputs: vec![Port::new("input", PortType::Any).optional()],
            outputs: vec![
                Port::new("if", PortType::Any).optional(),
                Port::new("else", PortType::Any).optional(),
            ],
        }
    }

    fn case_matches(&self, case: &CaseDef, ctx: &NodeContext<'_>) -> bool {
        if case.conditions.is_empty() {
            return false;
        }
        let mut results = case
            .conditions
            .iter()
            .map(|c| evaluate_condition(c, ctx));
        match case.logical_operator.as_str() {
            "or" => results.any(|r| r),
            _ => results.all(|r| r),
        }
    }
}

#[async_trait]
impl NodeHandler for IfElseNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::IfElse
    }

    fn schema(&self) -> NodeSchema {
        Self::schema()
    }

    /// Output ports follow the configured cases: one per `case_id`, a legacy
    /// `if` alias for the first case, and `else`.
    fn instance_ports(&self) -> Ports {
        let mut outputs = Vec::new();
        for (i, case) in self.cases.iter().enumerate() {
            outputs.push(Port::new(case.case_id.clone(), PortType::Any).optional());
            if i == 0 && case.case_id != "if" {
                outputs.push(Port::new("if", PortType::Any).optional());
            }
        }
        if outputs.is_empty() {
            outputs.push(Port::new("if", PortType::Any).optional());
        }
        outputs.push(Port::new("else", PortType::Any).optional());

        Ports {
            inputs: vec![Port::new("input", PortType::Any).optional()],
            outputs,
        }
    }

    fn validate_static(&self) -> Result<(), String> {
        for case in &self.cases {
            if case.case_id.is_empty() {
                return Err("if-else case without case_id".into());
            }
            if !matches!(case.logical_operator.as_str(), "and" | "or") {
                return Err(format!(
                    "unknown logical_operator '{}' in case '{}'",
                    case.logical_operator, case.case_id
                ));
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &mut NodeContext<'_>,
        _inputs: &Map<String, Value>,
    ) -> NodeExecutionResult {
        let mut outputs = Map::new();
        let mut selected = "else".to_string();

        for (i, case) in self.cases.iter().enumerate() {
            if self.case_matches(case, ctx) {
                selected = case.case_id.clone();
                outputs.insert(case.case_id.clone(), Value::Bool(true));
                if i == 0 && case.case_id != "if" {
                    outputs.insert("if".into(), Value::Bool(true));
                }
                break;
            }
        }
        if outputs.is_empty() {
            outputs.insert("else".into(), Value::Bool(true));
        }
        debug!(node = %self.id, case = %selected, "branch selected");

        let mut process_data = Map::new();
        process_data.insert("selected_case".into(), Value::String(selected));
        NodeExecutionResult::success(outputs).with_process_data(process_data)
    }
}

/// Type-aware condition evaluation. Unresolved selectors behave as `Null`.
fn evaluate_condition(condition: &ConditionDef, ctx: &NodeContext<'_>) -> bool {
    let actual = ctx
        .pool
        .resolve_str(&condition.variable_selector)
        .unwrap_or(Value::Null);
    let expected = &condition.value;
    let var_type = condition.var_type.as_deref().unwrap_or("string");

    match condition.comparison_operator.as_str() {
        "is_empty" => is_empty(&actual),
        "is_not_empty" => !is_empty(&actual),
        "=" | "==" => compare_eq(&actual, expected, var_type),
        "≠" | "!=" => !compare_eq(&actual, expected, var_type),
        "contains" => as_text(&actual).contains(&as_text(expected)),
        "not_contains" | "not contains" => !as_text(&actual).contains(&as_text(expected)),
        "starts_with" | "start with" => as_text(&actual).starts_with(&as_text(expected)),
        "ends_with" | "end with" => as_text(&actual).ends_with(&as_text(expected)),
        ">" => compare_numeric(&actual, expected, |a, b| a > b),
        "≥" | ">=" => compare_numeric(&actual, expected, |a, b| a >= b),
        "<" => compare_numeric(&actual, expected, |a, b| a < b),
        "≤" | "<=" => compare_numeric(&actual, expected, |a, b| a <= b),
        _ => false,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn as_text(value: &Value) -> String {
    coerce_to_string(value)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn compare_eq(actual: &Value, expected: &Value, var_type: &str) -> bool {
    match var_type {
        "number" => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        "boolean" => {
            let to_bool = |v: &Value| match v {
                Value::Bool(b) => Some(*b),
                Value::String(s) => match s.as_str() {
                    "true" => Some(true),
                    "false" => Some(false),
                    _ => None,
                },
                _ => None,
            };
            match (to_bool(actual), to_bool(expected)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => as_text(actual) == as_text(expected),
    }
}

fn compare_numeric(actual: &Value, expected: &Value, op: fn(f64, f64) -> bool) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::VariablePool;
    use crate::testing::{bare_services, test_run_info};
    use serde_json::json;
    use std::collections::HashSet;

    fn router(cases: Value) -> IfElseNode {
        IfElseNode {
            id: "router-1".into(),
            cases: serde_json::from_value(cases).unwrap(),
        }
    }

    fn empty_stage_case() -> Value {
        json!([{
            "case_id": "initial_request",
            "logical_operator": "and",
            "conditions": [{
                "variable_selector": "conversation.feedback_stage",
                "comparison_operator": "=",
                "value": "",
                "varType": "string"
            }]
        }])
    }

    #[tokio::test]
    async fn first_matching_case_fires_with_if_alias() {
        let node = router(empty_stage_case());
        let run = test_run_info();
        let services = bare_services();
        let mut pool = VariablePool::new();
        let defaults = serde_json::from_value(json!({"feedback_stage": ""})).unwrap();
        pool.init_conversation(&Map::new(), &defaults);
        let mut streamed = HashSet::new();
        let mut conv_writes = Vec::new();

        let mut ctx = NodeContext {
            run: &run,
            pool: &mut pool,
            services: &services,
            sink: None,
            streamed: &mut streamed,
            conv_writes: &mut conv_writes,
        };

        let result = node.execute(&mut ctx, &Map::new()).await;
        assert_eq!(result.outputs["initial_request"], json!(true));
        assert_eq!(result.outputs["if"], json!(true));
        assert!(!result.outputs.contains_key("else"));
        assert_eq!(result.process_data["selected_case"], json!("initial_request"));
    }

    #[tokio::test]
    async fn else_fires_when_no_case_matches() {
        let node = router(empty_stage_case());
        let run = test_run_info();
        let services = bare_services();
        let mut pool = VariablePool::new();
        pool.set_conversation("feedback_stage", json!("wait_feedback"));
        let mut streamed = HashSet::new();
        let mut conv_writes = Vec::new();

        let mut ctx = NodeContext {
            run: &run,
            pool: &mut pool,
            services: &services,
            sink: None,
            streamed: &mut streamed,
            conv_writes: &mut conv_writes,
        };

        let result = node.execute(&mut ctx, &Map::new()).await;
        assert_eq!(result.outputs["else"], json!(true));
        assert!(!result.outputs.contains_key("initial_request"));
    }

    #[test]
    fn instance_ports_cover_cases_and_else() {
        let node = router(empty_stage_case());
        let ports = node.instance_ports();
        let names: Vec<&str> = ports.outputs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["initial_request", "if", "else"]);
    }

    #[test]
    fn operator_semantics() {
        let run = test_run_info();
        let services = bare_services();
        let mut pool = VariablePool::new();
        pool.set_system("count", json!(7));
        pool.set_system("name", json!("workflow engine"));
        let mut streamed = HashSet::new();
        let mut conv_writes = Vec::new();
        let ctx = NodeContext {
            run: &run,
            pool: &mut pool,
            services: &services,
            sink: None,
            streamed: &mut streamed,
            conv_writes: &mut conv_writes,
        };

        let check = |selector: &str, op: &str, value: Value, var_type: &str| {
            evaluate_condition(
                &ConditionDef {
                    variable_selector: selector.into(),
                    comparison_operator: op.into(),
                    value,
                    var_type: Some(var_type.into()),
                },
                &ctx,
            )
        };

        assert!(check("sys.count", ">", json!(5), "number"));
        assert!(check("sys.count", "≥", json!(7), "number"));
        assert!(!check("sys.count", "<", json!("3"), "number"));
        assert!(check("sys.name", "contains", json!("engine"), "string"));
        assert!(check("sys.name", "starts_with", json!("workflow"), "string"));
        assert!(check("sys.name", "ends_with", json!("engine"), "string"));
        assert!(check("sys.name", "≠", json!("other"), "string"));
        assert!(check("sys.missing", "is_empty", json!(null), "string"));
        assert!(check("sys.name", "is_not_empty", json!(null), "string"));
        // Unknown operator never matches.
        assert!(!check("sys.name", "matches_regex", json!(".*"), "string"));
    }
}
