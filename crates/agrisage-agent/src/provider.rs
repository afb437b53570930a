//! Completion provider interface.
//!
//! The reasoning loop never talks to a model directly.  It hands a
//! [`DecisionRequest`] to a [`CompletionProvider`] and gets back a
//! [`Decision`]: either a tool call or a final answer.  The HTTP-backed
//! implementation lives in [`crate::llm`]; tests use scripted providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agrisage_kernel::ToolDescriptor;

use crate::delegation::DelegationScope;
use crate::error::Result;
use crate::query::Query;
use crate::trace::ReasoningTrace;

/// A tool as presented to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description of what the tool does.
    pub description: String,

    /// JSON Schema describing the tool's input parameters.
    pub input_schema: Value,
}

impl From<&ToolDescriptor> for ToolDefinition {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            input_schema: descriptor.input_schema.clone(),
        }
    }
}

/// What the provider decided to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    /// Call a tool.  `arguments` is passed through unvalidated; the loop
    /// checks it against the tool's input schema.
    Invoke {
        thought: String,
        tool_name: String,
        arguments: Value,
    },
    /// Stop and answer.
    Final { thought: String, answer: String },
}

/// Everything the provider needs to decide the next step.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    /// The query with its whitelisted context.
    pub query: &'a Query,
    /// Tools the provider may call.  Empty on the zero-tool path.
    pub tools: &'a [ToolDefinition],
    /// Steps taken so far.
    pub trace: &'a ReasoningTrace,
    /// Set when this loop runs on behalf of a delegating parent.
    pub scope: Option<&'a DelegationScope>,
}

/// Source of reasoning decisions.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Decide the next step.
    async fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision>;
}
