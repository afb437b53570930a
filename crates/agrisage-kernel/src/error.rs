//! Kernel error types.
//!
//! Registry construction surfaces [`KernelError`]; tool invocation surfaces
//! [`ToolError`].  The two are kept apart because invocation failures are an
//! expected, recoverable outcome the reasoning loop records in its trace,
//! while build failures are programming mistakes in the catalog.

use std::time::Duration;

/// Errors raised while assembling a [`crate::CapabilityRegistry`].
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Two tools were registered under the same name.
    #[error("duplicate tool name: {name}")]
    DuplicateTool { name: String },

    /// A tool name is empty or contains whitespace.
    #[error("invalid tool name `{name}`: {reason}")]
    InvalidToolName { name: String, reason: String },

    /// A tool declares itself as its own dependency.
    #[error("tool `{name}` lists itself as a dependency")]
    SelfDependency { name: String },

    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal kernel error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;

/// Errors produced when invoking a registered tool.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// No tool with this name exists in the registry.
    #[error("unknown tool: {tool}")]
    UnknownTool { tool: String },

    /// The tool wraps a nested reasoning loop and must be driven by the
    /// executor rather than invoked directly.
    #[error("tool `{tool}` is a delegation scope and cannot be invoked directly")]
    DelegationScope { tool: String },

    /// The handler rejected the call or failed while running it.
    #[error("tool `{tool}` failed: {reason}")]
    Execution { tool: String, reason: String },

    /// The handler did not finish within its time budget.
    #[error("tool `{tool}` timed out after {}ms", .timeout.as_millis())]
    Timeout { tool: String, timeout: Duration },
}

impl ToolError {
    /// Shorthand for [`ToolError::Execution`].
    pub fn execution(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
