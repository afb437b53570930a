//! Intent classifier.
//!
//! Turns raw query text into a set of [`ClassifiedIntent`]s using a weighted
//! trigger table:
//!
//! 1. The text is lower-cased and French diacritics are folded
//!    (`"Météo"` → `"meteo"`), see [`fold`].
//! 2. Every trigger that fires adds its weight to the score of its intent.
//!    A trigger counts once per query, however often it appears.
//! 3. An intent is kept when its score is strictly above the threshold;
//!    its confidence is the score capped at `1.0`.
//!
//! Classification is pure and never fails: a query that matches nothing
//! yields an empty vector.
//!
//! An optional [`IntentFallback`] (typically backed by a completion
//! provider) can be consulted for low-confidence queries through
//! [`IntentClassifier::classify_with_fallback`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use agrisage_kernel::IntentTag;

use crate::error::{IntentError, Result};
use crate::matcher::TriggerMatcher;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An intent detected in a query, with its confidence in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedIntent {
    pub tag: IntentTag,
    pub confidence: f64,
}

impl ClassifiedIntent {
    /// Create an intent, clamping the confidence into `[0, 1]`.
    pub fn new(tag: IntentTag, confidence: f64) -> Self {
        Self {
            tag,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Tuning knobs for [`IntentClassifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Minimum score an intent must strictly exceed to be reported.
    pub threshold: f64,

    /// Below this top confidence the secondary classifier is consulted.
    pub fallback_floor: f64,

    /// Time budget for the secondary classifier, in seconds.
    pub fallback_timeout_secs: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            fallback_floor: 0.6,
            fallback_timeout_secs: 2.0,
        }
    }
}

impl ClassifierConfig {
    /// The fallback budget as a [`Duration`].
    ///
    /// Negative values mean no budget; values too large to represent
    /// saturate at [`Duration::MAX`].
    pub fn fallback_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.fallback_timeout_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// Secondary classifier consulted when keyword matching is not confident.
#[async_trait]
pub trait IntentFallback: Send + Sync {
    /// Classify `text`.  Returned confidences are clamped by the caller.
    async fn classify(&self, text: &str) -> Result<Vec<ClassifiedIntent>>;
}

/// A weighted trigger attached to one intent.
#[derive(Debug, Clone, Copy)]
struct Trigger {
    tag: IntentTag,
    weight: f64,
}

// ---------------------------------------------------------------------------
// Default trigger table
// ---------------------------------------------------------------------------

/// Phrase triggers, matched on folded text.  Stems (`"planifi"`,
/// `"sustainab"`) are deliberate and match every inflection.
const PHRASES: &[(IntentTag, &str, f64)] = &[
    // Weather
    (IntentTag::Weather, "meteo", 0.8),
    (IntentTag::Weather, "weather", 0.8),
    (IntentTag::Weather, "prevision", 0.5),
    (IntentTag::Weather, "forecast", 0.7),
    (IntentTag::Weather, "pluie", 0.6),
    (IntentTag::Weather, "pluvio", 0.6),
    (IntentTag::Weather, "temperature", 0.5),
    (IntentTag::Weather, "orage", 0.6),
    (IntentTag::Weather, "humidite", 0.4),
    (IntentTag::Weather, "secheresse", 0.5),
    // Disease
    (IntentTag::DiseaseDiagnosis, "maladie", 0.7),
    (IntentTag::DiseaseDiagnosis, "disease", 0.7),
    (IntentTag::DiseaseDiagnosis, "symptome", 0.6),
    (IntentTag::DiseaseDiagnosis, "symptom", 0.6),
    (IntentTag::DiseaseDiagnosis, "taches", 0.5),
    (IntentTag::DiseaseDiagnosis, "rouille", 0.7),
    (IntentTag::DiseaseDiagnosis, "mildiou", 0.8),
    (IntentTag::DiseaseDiagnosis, "oidium", 0.8),
    (IntentTag::DiseaseDiagnosis, "fusariose", 0.8),
    (IntentTag::DiseaseDiagnosis, "septoriose", 0.8),
    (IntentTag::DiseaseDiagnosis, "traitement", 0.5),
    (IntentTag::DiseaseDiagnosis, "treatment", 0.5),
    (IntentTag::DiseaseDiagnosis, "fongicide", 0.6),
    (IntentTag::DiseaseDiagnosis, "fungicide", 0.6),
    (IntentTag::DiseaseDiagnosis, "pourriture", 0.6),
    (IntentTag::DiseaseDiagnosis, "jaune", 0.3),
    (IntentTag::DiseaseDiagnosis, "fletri", 0.4),
    (IntentTag::DiseaseDiagnosis, "diagnos", 0.6),
    // Pests
    (IntentTag::PestId, "ravageur", 0.8),
    (IntentTag::PestId, "insecte", 0.6),
    (IntentTag::PestId, "insect", 0.6),
    (IntentTag::PestId, "puceron", 0.8),
    (IntentTag::PestId, "aphid", 0.8),
    (IntentTag::PestId, "chenille", 0.7),
    (IntentTag::PestId, "limace", 0.7),
    (IntentTag::PestId, "doryphore", 0.8),
    (IntentTag::PestId, "larve", 0.5),
    // Regulatory
    (IntentTag::RegulatoryCheck, "reglement", 0.7),
    (IntentTag::RegulatoryCheck, "regulation", 0.7),
    (IntentTag::RegulatoryCheck, "zone non traitee", 0.8),
    (IntentTag::RegulatoryCheck, "autorise", 0.5),
    (IntentTag::RegulatoryCheck, "autorisation", 0.6),
    (IntentTag::RegulatoryCheck, "interdit", 0.5),
    (IntentTag::RegulatoryCheck, "legal", 0.5),
    (IntentTag::RegulatoryCheck, "conformite", 0.6),
    (IntentTag::RegulatoryCheck, "compliance", 0.6),
    (IntentTag::RegulatoryCheck, "dose maximale", 0.5),
    (IntentTag::RegulatoryCheck, "delai avant recolte", 0.7),
    (IntentTag::RegulatoryCheck, "buffer zone", 0.8),
    // Planning
    (IntentTag::Planning, "planning", 0.7),
    (IntentTag::Planning, "planifi", 0.7),
    (IntentTag::Planning, "rotation", 0.7),
    (IntentTag::Planning, "assolement", 0.8),
    (IntentTag::Planning, "calendrier", 0.5),
    (IntentTag::Planning, "semis", 0.5),
    (IntentTag::Planning, "semer", 0.5),
    (IntentTag::Planning, "sowing", 0.6),
    (IntentTag::Planning, "itineraire technique", 0.7),
    (IntentTag::Planning, "schedule", 0.5),
    // Sustainability
    (IntentTag::Sustainability, "durable", 0.6),
    (IntentTag::Sustainability, "durabilite", 0.7),
    (IntentTag::Sustainability, "sustainab", 0.7),
    (IntentTag::Sustainability, "carbone", 0.7),
    (IntentTag::Sustainability, "carbon", 0.7),
    (IntentTag::Sustainability, "biodiversite", 0.7),
    (IntentTag::Sustainability, "biodiversity", 0.7),
    (IntentTag::Sustainability, "empreinte", 0.5),
    (IntentTag::Sustainability, "agriculture biologique", 0.7),
    (IntentTag::Sustainability, "organic", 0.5),
    (IntentTag::Sustainability, "erosion", 0.5),
    (IntentTag::Sustainability, "impact environnemental", 0.8),
    (IntentTag::Sustainability, "environmental impact", 0.8),
];

/// Regex triggers for short words that would otherwise match inside longer
/// ones (`"gel"` in `"gelifiant"`, `"amm"` in `"ammonitrate"`).
const PATTERNS: &[(IntentTag, &str, f64)] = &[
    (IntentTag::Weather, r"\b(rain|wind|frost|vents?|gel|gelee)\b", 0.6),
    (
        IntentTag::DiseaseDiagnosis,
        r"\b(blight|rust|mildew|spots?|yellow(ing)?)\b",
        0.5,
    ),
    (IntentTag::PestId, r"\bpests?\b", 0.7),
    (IntentTag::RegulatoryCheck, r"\bznt\b", 0.8),
    (IntentTag::RegulatoryCheck, r"\bamm\b", 0.6),
];

// ---------------------------------------------------------------------------
// Text normalization
// ---------------------------------------------------------------------------

/// Lower-case `text` and fold French diacritics and ligatures to ASCII.
///
/// Apostrophe variants are folded to `'`.  Other characters pass through.
pub fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        match c {
            'à' | 'â' | 'ä' | 'á' | 'ã' => out.push('a'),
            'é' | 'è' | 'ê' | 'ë' => out.push('e'),
            'î' | 'ï' | 'í' => out.push('i'),
            'ô' | 'ö' | 'ó' => out.push('o'),
            'ù' | 'û' | 'ü' | 'ú' => out.push('u'),
            'ÿ' => out.push('y'),
            'ç' => out.push('c'),
            'ñ' => out.push('n'),
            'œ' => out.push_str("oe"),
            'æ' => out.push_str("ae"),
            '\u{2019}' | '\u{2018}' | '`' => out.push('\''),
            other => out.push(other),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Keyword/pattern intent classifier.
///
/// Immutable after construction and safe to share across tasks.
#[derive(Debug)]
pub struct IntentClassifier {
    config: ClassifierConfig,
    matcher: TriggerMatcher<Trigger>,
}

impl IntentClassifier {
    /// Create a classifier loaded with the built-in agronomy trigger table.
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        let mut classifier = Self::empty(config);
        for &(tag, phrase, weight) in PHRASES {
            classifier.add_trigger(tag, phrase, weight)?;
        }
        for &(tag, pattern, weight) in PATTERNS {
            classifier.add_pattern(tag, pattern, weight)?;
        }
        debug!(
            phrases = classifier.matcher.phrase_count(),
            patterns = classifier.matcher.pattern_count(),
            "intent classifier ready"
        );
        Ok(classifier)
    }

    /// Create a classifier with no triggers at all.
    #[must_use]
    pub fn empty(config: ClassifierConfig) -> Self {
        Self {
            config,
            matcher: TriggerMatcher::new(),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Add a phrase trigger.  The phrase is folded before registration.
    pub fn add_trigger(&mut self, tag: IntentTag, phrase: &str, weight: f64) -> Result<()> {
        check_weight(phrase, weight)?;
        self.matcher.add_phrase(fold(phrase), Trigger { tag, weight });
        Ok(())
    }

    /// Add a regex trigger, matched against folded text.
    pub fn add_pattern(&mut self, tag: IntentTag, pattern: &str, weight: f64) -> Result<()> {
        check_weight(pattern, weight)?;
        self.matcher.add_pattern(pattern, Trigger { tag, weight })
    }

    /// Classify `text` using the trigger table only.
    ///
    /// The result is ordered by descending confidence, ties broken by tag
    /// declaration order.
    pub fn classify(&self, text: &str) -> Vec<ClassifiedIntent> {
        let folded = fold(text);

        let mut scores: BTreeMap<IntentTag, f64> = BTreeMap::new();
        for hit in self.matcher.find_all(&folded) {
            *scores.entry(hit.label.tag).or_insert(0.0) += hit.label.weight;
        }

        let mut intents: Vec<ClassifiedIntent> = scores
            .into_iter()
            .filter(|&(_, score)| score > self.config.threshold)
            .map(|(tag, score)| ClassifiedIntent::new(tag, score.min(1.0)))
            .collect();
        sort_intents(&mut intents);

        debug!(
            intents = ?intents.iter().map(|i| i.tag.as_str()).collect::<Vec<_>>(),
            "query classified"
        );
        intents
    }

    /// Classify `text`, consulting `fallback` when the best keyword
    /// confidence is below the configured floor.
    ///
    /// Fallback failures and timeouts are logged and the keyword result is
    /// returned unchanged.  Fallback intents are merged keeping the highest
    /// confidence per tag, and only those above the threshold are kept.
    pub async fn classify_with_fallback(
        &self,
        text: &str,
        fallback: Option<&dyn IntentFallback>,
    ) -> Vec<ClassifiedIntent> {
        let intents = self.classify(text);

        let Some(fallback) = fallback else {
            return intents;
        };
        let top = intents.first().map_or(0.0, |i| i.confidence);
        if top >= self.config.fallback_floor {
            return intents;
        }

        debug!(top_confidence = top, "consulting fallback classifier");
        let budget = self.config.fallback_timeout();
        let extra = match tokio::time::timeout(budget, fallback.classify(text)).await {
            Ok(Ok(extra)) => extra,
            Ok(Err(e)) => {
                warn!(error = %e, "fallback classifier failed");
                return intents;
            }
            Err(_elapsed) => {
                let e = IntentError::FallbackTimeout { timeout: budget };
                warn!(error = %e, "fallback classifier timed out");
                return intents;
            }
        };

        self.merge(intents, extra)
    }

    fn merge(
        &self,
        intents: Vec<ClassifiedIntent>,
        extra: Vec<ClassifiedIntent>,
    ) -> Vec<ClassifiedIntent> {
        let mut merged: BTreeMap<IntentTag, f64> =
            intents.into_iter().map(|i| (i.tag, i.confidence)).collect();

        for intent in extra {
            if !intent.confidence.is_finite() {
                continue;
            }
            let confidence = intent.confidence.clamp(0.0, 1.0);
            if confidence <= self.config.threshold {
                continue;
            }
            let slot = merged.entry(intent.tag).or_insert(0.0);
            *slot = slot.max(confidence);
        }

        let mut out: Vec<ClassifiedIntent> = merged
            .into_iter()
            .map(|(tag, confidence)| ClassifiedIntent::new(tag, confidence))
            .collect();
        sort_intents(&mut out);
        out
    }
}

fn check_weight(trigger: &str, weight: f64) -> Result<()> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(())
    } else {
        Err(IntentError::InvalidWeight {
            trigger: trigger.to_string(),
            weight,
        })
    }
}

fn sort_intents(intents: &mut [ClassifiedIntent]) {
    intents.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.tag.cmp(&b.tag))
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
