//! Tool selector.
//!
//! Scores every registered tool against the classified intents and the
//! query text, keeps the best ones and then closes the selection over
//! declared dependencies.
//!
//! ```text
//! score = Σ confidence × tag_match_weight      (intents the tool serves)
//!       + keyword_bonus                        (any keyword in the query)
//!       − irrelevance_penalty                  (no shared intent at all)
//! ```
//!
//! With the default weights a keyword alone (0.5 − 0.1) clears `min_score`,
//! an unrelated tool without one does not.
//!
//! Tools scoring below `min_score` are dropped, the rest are sorted by
//! score (ties keep registry declaration order) and capped at `max_tools`.
//! Dependencies of kept tools are then appended transitively, past the cap.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use agrisage_kernel::{CapabilityRegistry, ToolDescriptor};

use crate::classifier::{ClassifiedIntent, fold};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Scoring weights and limits for [`ToolSelector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Multiplier applied to the confidence of each shared intent.
    pub tag_match_weight: f64,

    /// Flat bonus when one of the tool's keywords appears in the query.
    pub keyword_bonus: f64,

    /// Flat penalty when the tool serves none of the query's intents.
    pub irrelevance_penalty: f64,

    /// Tools scoring below this are discarded.
    pub min_score: f64,

    /// Maximum number of scored tools kept before the dependency pass.
    pub max_tools: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            tag_match_weight: 1.0,
            keyword_bonus: 0.5,
            irrelevance_penalty: 0.1,
            min_score: 0.3,
            max_tools: 6,
        }
    }
}

// ---------------------------------------------------------------------------
// Selection types
// ---------------------------------------------------------------------------

/// Why a tool ended up in the selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InclusionReason {
    /// The tool serves at least one classified intent.
    IntentMatch,
    /// The tool was kept on its keyword bonus alone.
    KeywordMatch,
    /// The tool is required by another selected tool.
    Dependency { required_by: String },
    /// The whole registry was handed to a delegated loop.
    Scope,
}

/// A tool chosen for one query.
#[derive(Debug, Clone)]
pub struct SelectedTool {
    pub descriptor: Arc<ToolDescriptor>,
    pub score: f64,
    pub reason: InclusionReason,
}

impl SelectedTool {
    /// The tool name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// Ordered, closed set of tools the reasoning loop may call.
#[derive(Debug, Clone, Default)]
pub struct ToolSelection {
    tools: Vec<SelectedTool>,
}

impl ToolSelection {
    /// An empty selection.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every tool of `registry`, in declaration order.
    ///
    /// Used for delegated loops, which run over their whole sub-registry.
    pub fn all(registry: &CapabilityRegistry) -> Self {
        Self {
            tools: registry
                .descriptors()
                .map(|descriptor| SelectedTool {
                    descriptor: Arc::clone(descriptor),
                    score: 0.0,
                    reason: InclusionReason::Scope,
                })
                .collect(),
        }
    }

    /// Selected tools in order.
    pub fn iter(&self) -> impl Iterator<Item = &SelectedTool> {
        self.tools.iter()
    }

    /// Selected tool names in order.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.descriptor.name.clone()).collect()
    }

    /// Look up a selected tool by name.
    pub fn get(&self, name: &str) -> Option<&SelectedTool> {
        self.tools.iter().find(|t| t.descriptor.name == name)
    }

    /// Whether `name` is part of the selection.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of selected tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Relevance scorer over a [`CapabilityRegistry`].
#[derive(Debug, Clone, Default)]
pub struct ToolSelector {
    config: SelectorConfig,
}

impl ToolSelector {
    /// Create a selector with the given weights.
    #[must_use]
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Select tools for a query.
    ///
    /// Deterministic: identical inputs always produce the identical ordered
    /// selection.  A query without intents selects nothing.
    pub fn select(
        &self,
        intents: &[ClassifiedIntent],
        registry: &CapabilityRegistry,
        query_text: &str,
    ) -> ToolSelection {
        if intents.is_empty() {
            debug!("no intents, empty tool selection");
            return ToolSelection::empty();
        }

        let folded = fold(query_text);

        let mut scored: Vec<SelectedTool> = Vec::new();
        for descriptor in registry.descriptors() {
            let (score, reason) = self.score(descriptor, intents, &folded);
            if score < self.config.min_score {
                continue;
            }
            scored.push(SelectedTool {
                descriptor: Arc::clone(descriptor),
                score,
                reason,
            });
        }

        // `sort_by` is stable, so equal scores keep declaration order.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(self.config.max_tools);

        let mut selected = scored;
        let mut present: HashSet<String> =
            selected.iter().map(|t| t.descriptor.name.clone()).collect();

        // Dependency closure.  Appended entries are themselves visited, which
        // makes the pass transitive.
        let mut cursor = 0;
        while cursor < selected.len() {
            let parent = Arc::clone(&selected[cursor].descriptor);
            for dep in &parent.dependencies {
                if present.contains(dep) {
                    continue;
                }
                let Some(descriptor) = registry.get(dep) else {
                    warn!(tool = %parent.name, dependency = %dep, "skipping unknown dependency");
                    continue;
                };
                let (score, _) = self.score(&descriptor, intents, &folded);
                present.insert(dep.clone());
                selected.push(SelectedTool {
                    descriptor,
                    score,
                    reason: InclusionReason::Dependency {
                        required_by: parent.name.clone(),
                    },
                });
            }
            cursor += 1;
        }

        debug!(
            tools = ?selected.iter().map(SelectedTool::name).collect::<Vec<_>>(),
            "tools selected"
        );
        ToolSelection { tools: selected }
    }

    fn score(
        &self,
        descriptor: &ToolDescriptor,
        intents: &[ClassifiedIntent],
        folded_query: &str,
    ) -> (f64, InclusionReason) {
        let mut score = 0.0;
        let mut shared = false;
        for intent in intents {
            if descriptor.serves(intent.tag) {
                score += intent.confidence * self.config.tag_match_weight;
                shared = true;
            }
        }

        let keyword_hit = descriptor
            .keywords
            .iter()
            .map(|k| fold(k.trim()))
            .any(|k| !k.is_empty() && folded_query.contains(&k));
        if keyword_hit {
            score += self.config.keyword_bonus;
        }

        if shared {
            (score, InclusionReason::IntentMatch)
        } else {
            score -= self.config.irrelevance_penalty;
            (score, InclusionReason::KeywordMatch)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
