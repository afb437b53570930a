//! Shared helpers for the CLI: tracing, configuration and LLM credentials.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agrisage_agent::{AgrisageConfig, ContextKey, LlmClientConfig, LlmSettings};

/// API key of the completion endpoint.
pub const ENV_API_KEY: &str = "AGRISAGE_API_KEY";
/// Overrides [`LlmSettings::base_url`].
pub const ENV_BASE_URL: &str = "AGRISAGE_BASE_URL";
/// Overrides [`LlmSettings::model`].
pub const ENV_MODEL: &str = "AGRISAGE_MODEL";

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
///
/// Logs go to stderr so that `--json` output on stdout stays parseable.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load the configuration file when given, then apply environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<AgrisageConfig> {
    let mut config = match path {
        Some(path) => AgrisageConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AgrisageConfig::default(),
    };

    config
        .apply_env()
        .context("invalid environment override")?;
    apply_llm_env(&mut config.llm, env_non_empty);
    config.validate().context("invalid configuration")?;

    info!(
        from_file = path.is_some(),
        model = %config.llm.model,
        "configuration loaded"
    );
    Ok(config)
}

/// Apply `AGRISAGE_BASE_URL` and `AGRISAGE_MODEL` from `lookup`.
pub fn apply_llm_env<F>(settings: &mut LlmSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_BASE_URL) {
        settings.base_url = url;
    }
    if let Some(model) = lookup(ENV_MODEL) {
        settings.model = model;
    }
}

/// Build the LLM client configuration, requiring `AGRISAGE_API_KEY`.
pub fn resolve_llm_config(settings: &LlmSettings) -> Result<LlmClientConfig> {
    let Some(key) = env_non_empty(ENV_API_KEY) else {
        bail!("no API key found: set {ENV_API_KEY} in your environment or .env file");
    };
    Ok(LlmClientConfig::from_settings(key, settings))
}

/// Read a non-empty environment variable, returning `None` if unset or empty.
pub fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Context arguments
// ---------------------------------------------------------------------------

/// Parse repeated `key=value` arguments.
///
/// Unknown keys are kept but logged; the query drops them.
pub fn parse_context(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("context entry `{pair}` is not key=value"))?;
            let key = key.trim();
            if key.is_empty() {
                bail!("context entry `{pair}` has an empty key");
            }
            if key.parse::<ContextKey>().is_err() {
                warn!(key, "context key is not recognised and will be ignored");
            }
            Ok((key.to_owned(), value.trim().to_owned()))
        })
        .collect()
}
