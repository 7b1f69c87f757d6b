//! Dotted value selectors (`node.port`, `env.key`, `sys.key`, `conv.key`).
//!
//! A selector addresses one value in the [`VariablePool`](crate::pool::VariablePool).
//! Multi-segment tails (`node.outputs.0.text`) traverse indexed fields of
//! the referenced value.

use crate::schema::reserved_scope;
use std::fmt;
use thiserror::Error;

/// Selector parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid selector '{selector}': {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: &'static str,
}

/// The namespace a selector addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// `sys.*`; run bootstrap values (user message, ids)
    Sys,
    /// `env.*`; environment variables lifted from the graph
    Env,
    /// `conv.*`; session-scoped conversation variables
    Conversation,
    /// `self.*`; the referring node's own input ports
    SelfNode,
    /// Output ports of another node
    Node(String),
}

impl Scope {
    pub fn is_reserved(&self) -> bool {
        matches!(self, Scope::Sys | Scope::Env | Scope::Conversation)
    }
}

/// A parsed value selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub scope: Scope,
    /// Segments after the scope; empty for a bare node id
    pub path: Vec<String>,
}

impl Selector {
    /// Parse a dotted selector string.
    ///
    /// A selector without a dot is a bare node id whose default output port
    /// is resolved later by the pool.
    pub fn parse(raw: &str) -> Result<Selector, SelectorError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SelectorError {
                selector: raw.to_string(),
                reason: "empty selector",
            });
        }

        let mut segments = trimmed.split('.');
        let head = segments.next().unwrap_or_default();
        if head.is_empty() {
            return Err(SelectorError {
                selector: raw.to_string(),
                reason: "selector starts with a dot",
            });
        }

        let path: Vec<String> = segments.map(|s| s.to_string()).collect();
        if path.iter().any(|s| s.is_empty()) {
            return Err(SelectorError {
                selector: raw.to_string(),
                reason: "empty path segment",
            });
        }

        let scope = match reserved_scope(head) {
            Some("sys") => Scope::Sys,
            Some("env") => Scope::Env,
            Some("conv") => Scope::Conversation,
            _ if head.eq_ignore_ascii_case("self") => Scope::SelfNode,
            _ => Scope::Node(head.to_string()),
        };

        Ok(Selector { scope, path })
    }

    /// Node id for node-scoped selectors.
    pub fn node_id(&self) -> Option<&str> {
        match &self.scope {
            Scope::Node(id) => Some(id),
            _ => None,
        }
    }

    /// First path segment (the port or key name).
    pub fn key(&self) -> Option<&str> {
        self.path.first().map(String::as_str)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = match &self.scope {
            Scope::Sys => "sys",
            Scope::Env => "env",
            Scope::Conversation => "conv",
            Scope::SelfNode => "self",
            Scope::Node(id) => id,
        };
        write!(f, "{}", head)?;
        for segment in &self.path {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reserved_scopes_with_aliases() {
        assert_eq!(Selector::parse("sys.user_message").unwrap().scope, Scope::Sys);
        assert_eq!(Selector::parse("system.user_message").unwrap().scope, Scope::Sys);
        assert_eq!(Selector::parse("env.API_KEY").unwrap().scope, Scope::Env);
        assert_eq!(
            Selector::parse("conversation.feedback_stage").unwrap().scope,
            Scope::Conversation
        );
        assert_eq!(Selector::parse("conv.x").unwrap().scope, Scope::Conversation);
    }

    #[test]
    fn parses_node_selectors_with_multi_segment_tails() {
        let sel = Selector::parse("tavily-1.results.0.content").unwrap();
        assert_eq!(sel.node_id(), Some("tavily-1"));
        assert_eq!(sel.path, vec!["results", "0", "content"]);
    }

    #[test]
    fn bare_node_id_has_empty_path() {
        let sel = Selector::parse("llm-1").unwrap();
        assert_eq!(sel.node_id(), Some("llm-1"));
        assert!(sel.path.is_empty());
    }

    #[test]
    fn self_scope() {
        let sel = Selector::parse("self.query").unwrap();
        assert_eq!(sel.scope, Scope::SelfNode);
        assert_eq!(sel.key(), Some("query"));
    }

    #[test]
    fn rejects_malformed_selectors() {
        assert!(Selector::parse("").is_err());
        assert!(Selector::parse("  ").is_err());
        assert!(Selector::parse(".query").is_err());
        assert!(Selector::parse("node..port").is_err());
    }

    #[test]
    fn display_round_trips() {
        for raw in ["sys.user_message", "llm-1.response", "conv.stage"] {
            assert_eq!(Selector::parse(raw).unwrap().to_string(), raw);
        }
    }
}
