//! Intent engine error types.
//!
//! Classification and selection never fail on user input: an unmatched
//! query is an empty result.  [`IntentError`] covers the remaining failure
//! modes, which are construction mistakes (a bad trigger pattern) and the
//! optional secondary classifier.

use std::time::Duration;

/// Unified error type for the intent engine.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    // -- Construction --------------------------------------------------------
    /// A trigger regex failed to compile.
    #[error("invalid trigger pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A trigger weight is negative or not finite.
    #[error("invalid weight {weight} for trigger `{trigger}`")]
    InvalidWeight { trigger: String, weight: f64 },

    // -- Secondary classifier ------------------------------------------------
    /// The secondary classifier failed.
    #[error("fallback classification failed: {reason}")]
    FallbackFailed { reason: String },

    /// The secondary classifier did not answer in time.
    #[error("fallback classification timed out after {}ms", .timeout.as_millis())]
    FallbackTimeout { timeout: Duration },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.
    #[error("internal intent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the intent crate.
pub type Result<T> = std::result::Result<T, IntentError>;
