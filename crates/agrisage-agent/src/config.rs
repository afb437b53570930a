//! Orchestrator configuration.
//!
//! [`AgrisageConfig`] gathers every tunable of the pipeline: classifier
//! thresholds, selector weights, loop budgets, delegation limits and the LLM
//! endpoint.  It is loaded from a TOML or JSON file (chosen by extension),
//! then a few `AGRISAGE_*` environment variables override the budgets most
//! often tuned per deployment.  Durations are expressed in seconds.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use agrisage_intent::{ClassifierConfig, SelectorConfig};

use crate::delegation::DelegationConfig;
use crate::error::{AgentError, Result};
use crate::runtime::LoopConfig;

/// Environment variable overriding `executor.max_iterations`.
pub const ENV_MAX_ITERATIONS: &str = "AGRISAGE_MAX_ITERATIONS";
/// Environment variable overriding `executor.default_tool_timeout_secs`.
pub const ENV_TOOL_TIMEOUT_SECS: &str = "AGRISAGE_TOOL_TIMEOUT_SECS";
/// Environment variable overriding `executor.loop_timeout_secs`.
pub const ENV_LOOP_TIMEOUT_SECS: &str = "AGRISAGE_LOOP_TIMEOUT_SECS";
/// Environment variable overriding `selector.max_tools`.
pub const ENV_MAX_TOOLS: &str = "AGRISAGE_MAX_TOOLS";

/// Upper bound on every configured duration: one week.
pub const MAX_DURATION_SECS: f64 = 7.0 * 24.0 * 3600.0;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Budgets of the top-level reasoning loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub max_iterations: u32,
    pub provider_timeout_secs: f64,
    pub default_tool_timeout_secs: f64,
    /// Per-tool overrides, by tool name.
    pub tool_timeouts_secs: HashMap<String, f64>,
    pub loop_timeout_secs: f64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            provider_timeout_secs: 60.0,
            default_tool_timeout_secs: 30.0,
            tool_timeouts_secs: HashMap::new(),
            loop_timeout_secs: 180.0,
        }
    }
}

/// OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            temperature: Some(0.0),
            max_tokens: 2048,
        }
    }
}

// ---------------------------------------------------------------------------
// Root config
// ---------------------------------------------------------------------------

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgrisageConfig {
    pub classifier: ClassifierConfig,
    pub selector: SelectorConfig,
    pub executor: ExecutorSettings,
    pub delegation: DelegationConfig,
    pub llm: LlmSettings,
}

impl AgrisageConfig {
    /// Load a configuration file: JSON when the extension is `json`, TOML
    /// otherwise.  Missing sections and fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| AgentError::Config {
            reason: format!("failed to read config file {}: {e}", path.display()),
        })?;

        let config: Self = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(|e| AgentError::Config {
                reason: format!("failed to parse JSON config: {e}"),
            })?
        } else {
            toml::from_str(&content).map_err(|e| AgentError::Config {
                reason: format!("failed to parse TOML config: {e}"),
            })?
        };

        info!(path = %path.display(), "configuration loaded from file");
        Ok(config)
    }

    /// Apply `AGRISAGE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply `AGRISAGE_*` overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_ITERATIONS) {
            self.executor.max_iterations = parse_env(ENV_MAX_ITERATIONS, &value)?;
        }
        if let Some(value) = lookup(ENV_TOOL_TIMEOUT_SECS) {
            self.executor.default_tool_timeout_secs = parse_env(ENV_TOOL_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_LOOP_TIMEOUT_SECS) {
            self.executor.loop_timeout_secs = parse_env(ENV_LOOP_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_TOOLS) {
            self.selector.max_tools = parse_env(ENV_MAX_TOOLS, &value)?;
        }
        Ok(())
    }

    /// Reject budgets the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(AgentError::Config { reason });

        if self.executor.max_iterations == 0 {
            return invalid("executor.max_iterations must be at least 1".into());
        }
        if self.delegation.max_iterations == 0 {
            return invalid("delegation.max_iterations must be at least 1".into());
        }
        if self.selector.max_tools == 0 {
            return invalid("selector.max_tools must be at least 1".into());
        }

        let durations = [
            ("executor.provider_timeout_secs", self.executor.provider_timeout_secs),
            ("executor.default_tool_timeout_secs", self.executor.default_tool_timeout_secs),
            ("executor.loop_timeout_secs", self.executor.loop_timeout_secs),
            ("classifier.fallback_timeout_secs", self.classifier.fallback_timeout_secs),
        ];
        for (name, secs) in durations {
            if !(secs.is_finite() && secs > 0.0 && secs <= MAX_DURATION_SECS) {
                return invalid(format!(
                    "{name} must be a positive number of seconds up to {MAX_DURATION_SECS}, got {secs}"
                ));
            }
        }
        for (tool, secs) in &self.executor.tool_timeouts_secs {
            if !(secs.is_finite() && *secs > 0.0 && *secs <= MAX_DURATION_SECS) {
                return invalid(format!(
                    "timeout for `{tool}` must be positive and at most {MAX_DURATION_SECS}s, got {secs}"
                ));
            }
        }

        for (name, value) in [
            ("classifier.threshold", self.classifier.threshold),
            ("classifier.fallback_floor", self.classifier.fallback_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within [0, 1], got {value}"));
            }
        }

        if self.delegation.max_iterations > self.executor.max_iterations {
            warn!(
                delegation = self.delegation.max_iterations,
                executor = self.executor.max_iterations,
                "delegated loops have a larger budget than the top-level loop"
            );
        }

        Ok(())
    }

    /// Budgets for the top-level [`crate::runtime::ReasoningLoop`].
    ///
    /// Fails when a duration cannot be represented.
    pub fn loop_config(&self) -> Result<LoopConfig> {
        let tool_timeouts = self
            .executor
            .tool_timeouts_secs
            .iter()
            .map(|(tool, secs)| Ok((tool.clone(), seconds(tool, *secs)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(LoopConfig {
            max_iterations: self.executor.max_iterations,
            provider_timeout: seconds("executor.provider_timeout_secs", self.executor.provider_timeout_secs)?,
            default_tool_timeout: seconds(
                "executor.default_tool_timeout_secs",
                self.executor.default_tool_timeout_secs,
            )?,
            tool_timeouts,
            loop_timeout: seconds("executor.loop_timeout_secs", self.executor.loop_timeout_secs)?,
            delegation: self.delegation.clone(),
        })
    }
}

fn seconds(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| AgentError::Config {
        reason: format!("{name}: {secs} is not a valid duration in seconds: {e}"),
    })
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| AgentError::Config {
        reason: format!("invalid value for {key}: {e}"),
    })
}
