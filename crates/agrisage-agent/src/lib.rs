//! Reasoning-loop runtime for AgriSage.
//!
//! This crate turns a farmer's question into an audited answer: it routes
//! the query through the intent engine, drives a think / act / observe loop
//! over the selected tools, delegates sub-questions to specialised agents
//! and synthesizes their answers, disclosing every disagreement.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────┐     ┌──────────────┐
//! │ Orchestrator │────>│ ReasoningLoop │────>│  Capability  │
//! │ (classify,   │     │ (think, act,  │     │  Registry    │
//! │  select)     │     │  observe)     │     │  (tools)     │
//! └──────────────┘     └───────┬───────┘     └──────────────┘
//!                              │
//!              ┌───────────────┼────────────────┐
//!              │               │                │
//!       ┌──────┴──────┐ ┌──────┴──────┐ ┌───────┴──────┐
//!       │ Completion  │ │  Nested     │ │  Response    │
//!       │ Provider    │ │  loops      │ │  Synthesizer │
//!       └─────────────┘ └─────────────┘ └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`orchestrator`] -- Pipeline entry point.
//! - [`runtime`] -- The reasoning loop, budgets and cancellation.
//! - [`synthesis`] -- Final answers, source attribution and conflicts.
//! - [`delegation`] -- Nested-loop budgets and the delegate input shape.
//! - [`schema`] -- Compiled tool input schemas.
//! - [`provider`] -- The decision interface the loop consumes.
//! - [`llm`] -- OpenAI-compatible client and provider implementations.
//! - [`query`] -- Queries and the context whitelist.
//! - [`trace`] -- Steps, traces and orchestration results.
//! - [`config`] -- File and environment configuration.
//! - [`error`] -- Agent error types.

pub mod config;
pub mod delegation;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod provider;
pub mod query;
pub mod runtime;
pub mod schema;
pub mod synthesis;
pub mod trace;

// Re-export the most commonly used types at the crate root.
pub use config::{AgrisageConfig, ExecutorSettings, LlmSettings};
pub use delegation::{DelegateInput, DelegationConfig, DelegationScope, delegate_schema};
pub use error::{AgentError, Result};
pub use llm::{LlmClient, LlmClientConfig, LlmCompletionProvider, LlmIntentFallback};
pub use orchestrator::Orchestrator;
pub use provider::{CompletionProvider, Decision, DecisionRequest, ToolDefinition};
pub use query::{ContextKey, Query};
pub use runtime::{LoopConfig, ReasoningLoop, RunOptions};
pub use schema::ArgumentSchemas;
pub use synthesis::{
    Conflict, ConflictKind, ResponseSynthesizer, SourceAnswer, SourceClaim, SynthesizedAnswer,
};
pub use trace::{
    Failure, FailureKind, Observation, OrchestrationResult, ReasoningStep, ReasoningTrace,
    StepStatus, TerminatedReason,
};
