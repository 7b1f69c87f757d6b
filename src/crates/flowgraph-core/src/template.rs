//! `{{ selector }}` template parsing and rendering.
//!
//! A template is a sequence of literal and selector segments, parsed in a
//! single left-to-right scan. Literal braces are escaped as `\{\{` / `\}\}`.

use crate::pool::VariablePool;
use crate::schema::canonical_json;
use crate::selector::{Scope, Selector};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why template rendering failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateErrorReason {
    /// `{{` without a matching `}}`
    Unterminated,
    /// The text between braces is not a valid selector
    InvalidSelector,
    /// The selector points at nothing the pool knows about
    UnresolvedSelector,
}

impl TemplateErrorReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateErrorReason::Unterminated => "unterminated",
            TemplateErrorReason::InvalidSelector => "invalid_selector",
            TemplateErrorReason::UnresolvedSelector => "unresolved_selector",
        }
    }
}

/// Template parse/render failure, with the byte offset of the offending
/// segment.
#[derive(Debug, Clone, Error)]
#[error("template error ({}) at position {position}{}", reason.as_str(), detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
pub struct TemplateRenderError {
    pub reason: TemplateErrorReason,
    pub position: usize,
    pub detail: Option<String>,
}

/// One parsed segment of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// Raw selector text plus its byte offset in the template
    Selector { raw: String, position: usize },
}

/// Parser and renderer for `{{ selector }}` templates.
pub struct TemplateRenderer;

impl TemplateRenderer {
    /// Split a template into literal and selector segments.
    pub fn parse_segments(template: &str) -> Result<Vec<Segment>, TemplateRenderError> {
        let bytes = template.as_bytes();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < bytes.len() {
            // Escaped braces: \{\{ and \}\} render literally.
            if template[i..].starts_with("\\{\\{") {
                literal.push_str("{{");
                i += 4;
                continue;
            }
            if template[i..].starts_with("\\}\\}") {
                literal.push_str("}}");
                i += 4;
                continue;
            }

            if template[i..].starts_with("{{") {
                let open = i;
                match template[i + 2..].find("}}") {
                    Some(offset) => {
                        if !literal.is_empty() {
                            segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        }
                        let raw = template[i + 2..i + 2 + offset].trim().to_string();
                        if raw.is_empty() {
                            return Err(TemplateRenderError {
                                reason: TemplateErrorReason::InvalidSelector,
                                position: open,
                                detail: Some("empty selector".into()),
                            });
                        }
                        segments.push(Segment::Selector { raw, position: open });
                        i += 2 + offset + 2;
                    }
                    None => {
                        return Err(TemplateRenderError {
                            reason: TemplateErrorReason::Unterminated,
                            position: open,
                            detail: None,
                        });
                    }
                }
                continue;
            }

            let ch = template[i..].chars().next().unwrap_or('\0');
            literal.push(ch);
            i += ch.len_utf8();
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(segments)
    }

    /// Selectors referenced by a template, in order of appearance.
    /// Used by the validator; does not resolve anything.
    pub fn parse_template(template: &str) -> Result<Vec<String>, TemplateRenderError> {
        let mut selectors = Vec::new();
        for segment in Self::parse_segments(template)? {
            if let Segment::Selector { raw, position } = segment {
                Selector::parse(&raw).map_err(|_| TemplateRenderError {
                    reason: TemplateErrorReason::InvalidSelector,
                    position,
                    detail: Some(raw.clone()),
                })?;
                selectors.push(raw);
            }
        }
        Ok(selectors)
    }

    /// Render a template against the pool.
    ///
    /// `self_inputs` overlays the referring node's own resolved input ports:
    /// `self.<port>` (and `<own_id>.<port>` for an input port) resolve there
    /// before falling through to the pool.
    pub fn render(
        template: &str,
        pool: &VariablePool,
        own_id: Option<&str>,
        self_inputs: Option<&Map<String, Value>>,
    ) -> Result<String, TemplateRenderError> {
        let mut out = String::new();

        for segment in Self::parse_segments(template)? {
            match segment {
                Segment::Literal(text) => out.push_str(&text),
                Segment::Selector { raw, position } => {
                    let selector = Selector::parse(&raw).map_err(|_| TemplateRenderError {
                        reason: TemplateErrorReason::InvalidSelector,
                        position,
                        detail: Some(raw.clone()),
                    })?;

                    let value = resolve_with_self(&selector, pool, own_id, self_inputs)
                        .ok_or_else(|| TemplateRenderError {
                            reason: TemplateErrorReason::UnresolvedSelector,
                            position,
                            detail: Some(raw.clone()),
                        })?;

                    out.push_str(&coerce_to_string(&value));
                }
            }
        }

        Ok(out)
    }
}

fn resolve_with_self(
    selector: &Selector,
    pool: &VariablePool,
    own_id: Option<&str>,
    self_inputs: Option<&Map<String, Value>>,
) -> Option<Value> {
    if let Some(inputs) = self_inputs {
        // `self.port` and `<own id>.port` read the node's own inputs. An
        // input that was never assembled (an optional port with no mapping)
        // reads as Null, so it renders empty instead of failing.
        if let Some(key) = selector.key() {
            if matches!(selector.scope, Scope::SelfNode) {
                return Some(inputs.get(key).cloned().unwrap_or(Value::Null));
            }
            if selector.node_id().is_some_and(|id| Some(id) == own_id) {
                if let Some(value) = inputs.get(key) {
                    return Some(value.clone());
                }
            }
        }
        // A bare `{{ query }}` names one of the node's own input ports.
        if selector.path.is_empty() {
            if let Some(name) = selector.node_id() {
                if let Some(value) = inputs.get(name) {
                    return Some(value.clone());
                }
            }
        }
    }
    pool.resolve(selector)
}

/// Type-aware string coercion for rendered values.
pub fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(_) | Value::Object(_) => canonical_json(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pool() -> VariablePool {
        let mut pool = VariablePool::new();
        pool.set_system("user_message", json!("파이썬이란?"));
        pool.register_node("llm-1");
        pool.set_node_output("llm-1", "response", json!("Python is a language."));
        pool
    }

    #[test]
    fn renders_literals_and_selectors() {
        let rendered = TemplateRenderer::render(
            "Q: {{ sys.user_message }} A: {{ llm-1.response }}",
            &pool(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(rendered, "Q: 파이썬이란? A: Python is a language.");
    }

    #[test]
    fn whitespace_inside_braces_is_optional() {
        let pool = pool();
        assert_eq!(
            TemplateRenderer::render("{{sys.user_message}}", &pool, None, None).unwrap(),
            "파이썬이란?"
        );
        assert_eq!(
            TemplateRenderer::render("{{   sys.user_message   }}", &pool, None, None).unwrap(),
            "파이썬이란?"
        );
    }

    #[test]
    fn escaped_braces_render_literally() {
        let rendered =
            TemplateRenderer::render(r"\{\{ not a var \}\}", &pool(), None, None).unwrap();
        assert_eq!(rendered, "{{ not a var }}");
    }

    #[test]
    fn unterminated_selector_reports_position() {
        let err = TemplateRenderer::render("abc {{ sys.user_message", &pool(), None, None)
            .unwrap_err();
        assert_eq!(err.reason, TemplateErrorReason::Unterminated);
        assert_eq!(err.position, 4);
    }

    #[test]
    fn unresolved_selector_errors() {
        let err =
            TemplateRenderer::render("{{ ghost.response }}", &pool(), None, None).unwrap_err();
        assert_eq!(err.reason, TemplateErrorReason::UnresolvedSelector);
    }

    #[test]
    fn skipped_node_output_renders_empty() {
        let mut pool = VariablePool::new();
        pool.register_node("skipped-llm");
        let rendered =
            TemplateRenderer::render("[{{ skipped-llm.response }}]", &pool, None, None).unwrap();
        assert_eq!(rendered, "[]");
    }

    #[test]
    fn value_coercion() {
        assert_eq!(coerce_to_string(&Value::Null), "");
        assert_eq!(coerce_to_string(&json!(42)), "42");
        assert_eq!(coerce_to_string(&json!(1.5)), "1.5");
        assert_eq!(coerce_to_string(&json!(true)), "true");
        assert_eq!(coerce_to_string(&json!({"b": 1, "a": 2})), r#"{"a":2,"b":1}"#);
        assert_eq!(coerce_to_string(&json!([1, "x"])), r#"[1,"x"]"#);
    }

    #[test]
    fn bare_names_resolve_against_own_inputs() {
        let pool = VariablePool::new();
        let inputs: Map<String, Value> =
            serde_json::from_value(json!({"context": "the docs", "query": "q"})).unwrap();

        let rendered = TemplateRenderer::render(
            "Context: {{context}}\n\nQuestion: {{query}}",
            &pool,
            Some("llm-1"),
            Some(&inputs),
        )
        .unwrap();
        assert_eq!(rendered, "Context: the docs\n\nQuestion: q");
    }

    #[test]
    fn self_inputs_overlay_the_pool() {
        let pool = pool();
        let inputs: Map<String, Value> =
            serde_json::from_value(json!({"query": "from input"})).unwrap();

        let rendered = TemplateRenderer::render(
            "{{ self.query }}/{{ answer-1.query }}",
            &pool,
            Some("answer-1"),
            Some(&inputs),
        )
        .unwrap();
        assert_eq!(rendered, "from input/from input");
    }

    #[test]
    fn parse_template_lists_selectors() {
        let selectors =
            TemplateRenderer::parse_template("{{ a.b }} text {{ sys.user_message }}").unwrap();
        assert_eq!(selectors, vec!["a.b", "sys.user_message"]);
    }

    #[test]
    fn parse_template_rejects_invalid_selector() {
        let err = TemplateRenderer::parse_template("{{ .bad }}").unwrap_err();
        assert_eq!(err.reason, TemplateErrorReason::InvalidSelector);
    }
}
