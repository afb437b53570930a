//! Query orchestrator.
//!
//! Wires the pipeline for one request:
//!
//! ```text
//! query ──> classify ──> select ──> reasoning loop ──> synthesis ──> result
//!             │             │             │
//!        (fallback)   (registry)   (provider, delegation)
//! ```
//!
//! Each call is independent.  The only shared state is the read-only
//! registry, the classifier tables and whatever caches the tools own, so one
//! [`Orchestrator`] can serve many concurrent queries.

use std::sync::Arc;

use tracing::info;

use agrisage_intent::{IntentClassifier, IntentFallback, ToolSelector};
use agrisage_kernel::CapabilityRegistry;

use crate::config::AgrisageConfig;
use crate::error::Result;
use crate::provider::CompletionProvider;
use crate::query::Query;
use crate::runtime::{ReasoningLoop, RunOptions};
use crate::trace::OrchestrationResult;

/// Entry point of the pipeline.
pub struct Orchestrator {
    classifier: IntentClassifier,
    selector: ToolSelector,
    registry: Arc<CapabilityRegistry>,
    runtime: ReasoningLoop,
    fallback: Option<Arc<dyn IntentFallback>>,
    config: AgrisageConfig,
}

impl Orchestrator {
    /// Build an orchestrator over `registry`.
    ///
    /// Fails when the configuration does not validate.
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        provider: Arc<dyn CompletionProvider>,
        config: AgrisageConfig,
    ) -> Result<Self> {
        config.validate()?;

        let classifier = IntentClassifier::new(config.classifier.clone())?;
        let selector = ToolSelector::new(config.selector.clone());
        let runtime = ReasoningLoop::new(provider, Arc::clone(&registry), config.loop_config()?)?;

        info!(
            tools = registry.len(),
            max_iterations = config.executor.max_iterations,
            "orchestrator ready"
        );

        Ok(Self {
            classifier,
            selector,
            registry,
            runtime,
            fallback: None,
            config,
        })
    }

    /// Consult `fallback` when keyword classification is not confident.
    pub fn with_fallback(mut self, fallback: Arc<dyn IntentFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// The capability registry.
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// The intent classifier.
    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    /// The tool selector.
    pub fn selector(&self) -> &ToolSelector {
        &self.selector
    }

    /// The active configuration.
    pub fn config(&self) -> &AgrisageConfig {
        &self.config
    }

    /// Answer `text` with an optional context map.
    ///
    /// Context keys outside the whitelist are dropped.  Never fails: every
    /// outcome, including provider failures, is an [`OrchestrationResult`].
    pub async fn orchestrate<K, V>(
        &self,
        text: &str,
        context: impl IntoIterator<Item = (K, V)>,
    ) -> OrchestrationResult
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let query = Query::with_context(text, context);
        self.orchestrate_with(&query, RunOptions::default()).await
    }

    /// Answer `query` with cancellation and step streaming.
    pub async fn orchestrate_with(&self, query: &Query, options: RunOptions) -> OrchestrationResult {
        let intents = self
            .classifier
            .classify_with_fallback(query.text(), self.fallback.as_deref())
            .await;
        let selection = self.selector.select(&intents, &self.registry, query.text());

        info!(
            intents = ?intents.iter().map(|i| i.tag.as_str()).collect::<Vec<_>>(),
            selected = ?selection.names(),
            "query routed"
        );

        let mut result = self.runtime.run(query, &selection, None, options).await;
        result.intents = intents;
        result
    }
}
