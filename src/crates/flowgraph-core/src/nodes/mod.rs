//! Built-in node handlers.
//!
//! One module per node type. Each handler parses its config up front in
//! `from_def`, so a malformed node fails validation instead of mid-run.

pub mod answer;
pub mod assigner;
pub mod code;
pub mod end;
pub mod http_request;
pub mod if_else;
pub mod knowledge;
pub mod llm;
pub mod question_classifier;
pub mod start;
pub mod tavily;
pub mod template_transform;

use crate::error::EngineError;
use crate::registry::NodeRegistry;
use crate::schema::NodeKind;

/// Register every built-in node type. Called once at process start.
pub fn register_builtin(registry: &mut NodeRegistry) -> Result<(), EngineError> {
    registry.register(NodeKind::Start, start::StartNode::schema, start::StartNode::from_def)?;
    registry.register(NodeKind::End, end::EndNode::schema, end::EndNode::from_def)?;
    registry.register(NodeKind::Answer, answer::AnswerNode::schema, answer::AnswerNode::from_def)?;
    registry.register(NodeKind::Llm, llm::LlmNode::schema, llm::LlmNode::from_def)?;
    registry.register(
        NodeKind::KnowledgeRetrieval,
        knowledge::KnowledgeRetrievalNode::schema,
        knowledge::KnowledgeRetrievalNode::from_def,
    )?;
    registry.register(NodeKind::IfElse, if_else::IfElseNode::schema, if_else::IfElseNode::from_def)?;
    registry.register(
        NodeKind::QuestionClassifier,
        question_classifier::QuestionClassifierNode::schema,
        question_classifier::QuestionClassifierNode::from_def,
    )?;
    registry.register(
        NodeKind::Assigner,
        assigner::AssignerNode::schema,
        assigner::AssignerNode::from_def,
    )?;
    registry.register(
        NodeKind::TavilySearch,
        tavily::TavilySearchNode::schema,
        tavily::TavilySearchNode::from_def,
    )?;
    registry.register(
        NodeKind::HttpRequest,
        http_request::HttpRequestNode::schema,
        http_request::HttpRequestNode::from_def,
    )?;
    registry.register(NodeKind::Code, code::CodeNode::schema, code::CodeNode::from_def)?;
    registry.register(
        NodeKind::TemplateTransform,
        template_transform::TemplateTransformNode::schema,
        template_transform::TemplateTransformNode::from_def,
    )?;
    Ok(())
}
