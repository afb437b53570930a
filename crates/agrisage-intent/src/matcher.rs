//! Trigger matcher.
//!
//! The matcher finds every registered trigger occurring in a text using two
//! techniques:
//!
//! | Kind | Technique | Use |
//! |------|-----------|-----|
//! | Phrase | [`aho_corasick`] automaton, leftmost-longest | Multi-word phrases and word stems |
//! | Pattern | Compiled [`regex`] | Short words that need `\b` boundaries |
//!
//! Unlike a router, which stops at the first winning route, the matcher
//! reports *all* triggers that fire.  Each distinct trigger is reported at
//! most once, however many times it occurs.
//!
//! Triggers are matched against text that the caller has already normalized
//! (see [`crate::classifier::fold`]); phrases are lower-cased on insertion.
//!
//! # Example
//!
//! ```rust
//! # use agrisage_intent::matcher::TriggerMatcher;
//! let mut matcher = TriggerMatcher::new();
//! matcher.add_phrase("zone non traitee", "regulatory");
//! matcher.add_phrase("zone", "generic");
//! matcher.add_pattern(r"\bznt\b", "regulatory").unwrap();
//!
//! let hits = matcher.find_all("respecter la zone non traitee (znt)");
//! let labels: Vec<&str> = hits.iter().map(|h| *h.label).collect();
//! assert_eq!(labels, vec!["regulatory", "regulatory"]);
//! ```

use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, MatchKind};
use regex::Regex;

use crate::error::{IntentError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One trigger that fired on a text.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerHit<'m, L> {
    /// The label attached to the trigger when it was registered.
    pub label: &'m L,
    /// The phrase or the regex source that matched.
    pub trigger: &'m str,
}

#[derive(Debug, Clone)]
struct PatternTrigger<L> {
    compiled: Regex,
    pattern: String,
    label: L,
}

// ---------------------------------------------------------------------------
// TriggerMatcher
// ---------------------------------------------------------------------------

/// Multi-trigger matcher over phrases and regex patterns.
///
/// The phrase automaton is compiled lazily on the first lookup after a
/// phrase was added, so a matcher can be filled incrementally and then
/// shared immutably.
#[derive(Debug)]
pub struct TriggerMatcher<L> {
    /// Phrases (lowercased) and their labels, in registration order.
    phrases: Vec<(String, L)>,

    /// Compiled automaton over `phrases`.  Reset whenever a phrase is added.
    automaton: OnceLock<Option<AhoCorasick>>,

    /// Regex triggers, evaluated in registration order.
    patterns: Vec<PatternTrigger<L>>,
}

impl<L> TriggerMatcher<L> {
    /// Create an empty matcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phrases: Vec::new(),
            automaton: OnceLock::new(),
            patterns: Vec::new(),
        }
    }

    /// Register a phrase trigger.  Matching is case-insensitive.
    pub fn add_phrase(&mut self, phrase: impl Into<String>, label: L) {
        let phrase = phrase.into().to_lowercase();
        tracing::trace!(phrase = %phrase, "phrase trigger added");
        self.phrases.push((phrase, label));
        self.automaton = OnceLock::new();
    }

    /// Register a regex trigger.
    ///
    /// Returns an error if the regex fails to compile.
    pub fn add_pattern(&mut self, pattern: impl Into<String>, label: L) -> Result<()> {
        let pattern = pattern.into();
        let compiled = Regex::new(&pattern).map_err(|e| IntentError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;

        tracing::trace!(pattern = %pattern, "pattern trigger added");
        self.patterns.push(PatternTrigger {
            compiled,
            pattern,
            label,
        });
        Ok(())
    }

    /// Return every distinct trigger that occurs in `text`.
    ///
    /// Phrase hits come first in order of first occurrence, then pattern
    /// hits in registration order.
    pub fn find_all(&self, text: &str) -> Vec<TriggerHit<'_, L>> {
        let lowered = text.to_lowercase();
        let mut hits = Vec::new();

        if let Some(ac) = self.automaton() {
            let mut seen = vec![false; self.phrases.len()];
            for mat in ac.find_iter(&lowered) {
                let idx = mat.pattern().as_usize();
                if !seen[idx] {
                    seen[idx] = true;
                    let (phrase, label) = &self.phrases[idx];
                    hits.push(TriggerHit {
                        label,
                        trigger: phrase.as_str(),
                    });
                }
            }
        }

        for route in &self.patterns {
            if route.compiled.is_match(&lowered) {
                hits.push(TriggerHit {
                    label: &route.label,
                    trigger: route.pattern.as_str(),
                });
            }
        }

        hits
    }

    /// Return the number of registered phrase triggers.
    pub fn phrase_count(&self) -> usize {
        self.phrases.len()
    }

    /// Return the number of registered pattern triggers.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    // -- Private helpers ----------------------------------------------------

    /// The compiled automaton, built on first use.
    fn automaton(&self) -> Option<&AhoCorasick> {
        self.automaton
            .get_or_init(|| {
                if self.phrases.is_empty() {
                    return None;
                }

                let phrases: Vec<&str> = self.phrases.iter().map(|(p, _)| p.as_str()).collect();

                // Leftmost-longest so that "zone non traitee" wins over a
                // shorter "zone" starting at the same position.
                match AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .build(&phrases)
                {
                    Ok(ac) => {
                        tracing::trace!(count = phrases.len(), "aho-corasick automaton built");
                        Some(ac)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to build aho-corasick automaton");
                        None
                    }
                }
            })
            .as_ref()
    }
}

impl<L> Default for TriggerMatcher<L> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
