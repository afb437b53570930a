//! LLM integration layer.
//!
//! This module connects the reasoning loop and the intent classifier to an
//! OpenAI-compatible chat completion endpoint.  It is organized into:
//!
//! - [`types`] -- Chat messages, tool calls and requests.
//! - [`client`] -- HTTP client for the Chat Completions API.
//! - [`provider`] -- [`crate::provider::CompletionProvider`] and
//!   [`agrisage_intent::IntentFallback`] implementations on top of the client.

pub mod client;
pub mod provider;
pub mod types;

// Re-export the most commonly used types for convenience.
pub use client::{LlmClient, LlmClientConfig};
pub use provider::{LlmCompletionProvider, LlmIntentFallback};
pub use types::{ChatRequest, LlmResponse, Message, Role, ToolCall};
