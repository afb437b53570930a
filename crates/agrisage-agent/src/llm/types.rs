//! Core types for LLM interaction.
//!
//! These types model the chat history exchanged with an OpenAI-compatible
//! endpoint.  The [`super::client`] module translates them into the wire
//! format; [`super::provider`] builds them from reasoning traces.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::ToolDefinition;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and query context.
    System,
    /// The farmer's question.
    User,
    /// Output from the LLM.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

/// A single message in a conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    /// Text content.  May be empty for assistant messages that only carry
    /// tool calls.
    #[serde(default)]
    pub content: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Which tool call a [`Role::Tool`] message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message carrying tool calls and optional text.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier used to correlate the result.
    pub id: String,

    pub name: String,

    /// Parsed arguments.  When the model sent text that is not valid JSON,
    /// the raw text is kept as a [`Value::String`].
    pub arguments: Value,
}

// ---------------------------------------------------------------------------
// LLM response
// ---------------------------------------------------------------------------

/// The model's reply to one chat request.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmResponse {
    /// A plain text answer.
    Text(String),

    /// One or more tool calls, with whatever text accompanied them.
    ToolCalls { content: String, calls: Vec<ToolCall> },
}

// ---------------------------------------------------------------------------
// Chat request
// ---------------------------------------------------------------------------

/// A full request to send to the completion endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatRequest {
    /// Model identifier; empty means the client's default model.
    pub model: String,

    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Ask the endpoint for a JSON object instead of free text.
    #[serde(skip)]
    pub json_mode: bool,
}
