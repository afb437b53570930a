//! Agent error types.
//!
//! All agent subsystems surface errors through [`AgentError`].  Inside the
//! reasoning loop most of these are not propagated: tool failures and
//! argument errors are recorded as trace steps, and terminal failures are
//! folded into the [`crate::trace::OrchestrationResult`].  They are still
//! typed so that every trace entry and failure detail names its cause.

use std::time::Duration;

/// Unified error type for the agent runtime.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Reasoning loop ------------------------------------------------------
    /// The provider asked for a tool with arguments that do not fit the
    /// tool's input shape, or for a tool outside the selection.
    #[error("invalid call to `{tool}`: {reason}")]
    ArgumentParse { tool: String, reason: String },

    /// A tool invocation failed.
    #[error("tool execution failed for `{tool}`: {reason}")]
    ToolExecution { tool: String, reason: String },

    /// A tool did not answer within its time budget.
    #[error("tool `{tool}` timed out after {}ms", .timeout.as_millis())]
    ToolTimeout { tool: String, timeout: Duration },

    /// The loop used all of its iterations without a final answer.
    #[error("iteration budget of {max_iterations} exhausted")]
    IterationBudgetExceeded { max_iterations: u32 },

    /// The loop ran past its wall-clock ceiling.
    #[error("reasoning loop exceeded its {}s wall-clock budget", .timeout.as_secs())]
    LoopTimeout { timeout: Duration },

    /// No selected tool could serve the query.
    #[error("no applicable tool for this query")]
    NoApplicableTool,

    /// A delegated agent would exceed the nesting limit.
    #[error("delegation to `{agent}` refused: depth limit {max_depth} reached")]
    DelegationDepth { agent: String, max_depth: u32 },

    /// Delegated sources disagree on a claim.
    #[error("sources disagree on {subject}: {details}")]
    SynthesisConflict { subject: String, details: String },

    /// The orchestration was cancelled by the caller.
    #[error("orchestration cancelled")]
    Cancelled,

    // -- Completion provider -------------------------------------------------
    /// The completion provider returned an error.
    #[error("completion provider failed: {reason}")]
    ProviderFailed { reason: String },

    /// The completion provider did not answer in time.
    #[error("completion provider timed out after {}ms", .timeout.as_millis())]
    ProviderTimeout { timeout: Duration },

    /// An HTTP request to the LLM endpoint failed.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The LLM response could not be parsed into the expected format.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The API key is missing for an endpoint that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    // -- Configuration -------------------------------------------------------
    /// Configuration validation or loading failed.
    #[error("config error: {reason}")]
    Config { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the kernel crate.
    #[error("kernel error: {0}")]
    Kernel(#[from] agrisage_kernel::KernelError),

    /// An error propagated from the intent crate.
    #[error("intent error: {0}")]
    Intent(#[from] agrisage_intent::IntentError),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}

impl From<agrisage_kernel::ToolError> for AgentError {
    fn from(err: agrisage_kernel::ToolError) -> Self {
        use agrisage_kernel::ToolError;
        match err {
            ToolError::Timeout { tool, timeout } => Self::ToolTimeout { tool, timeout },
            ToolError::Execution { tool, reason } => Self::ToolExecution { tool, reason },
            ToolError::UnknownTool { ref tool } | ToolError::DelegationScope { ref tool } => {
                Self::ToolExecution {
                    tool: tool.clone(),
                    reason: err.to_string(),
                }
            }
        }
    }
}
