//! Response synthesizer.
//!
//! Turns a finished trace into the caller-facing answer:
//!
//! - With no delegated source, the provider's draft answer is used, or the
//!   latest successful observation when the loop never produced one.
//! - With one delegated source, that answer is passed through with an
//!   attribution line.
//! - With two or more, every source gets its own section and the answers
//!   are compared claim by claim.  Disagreements are listed explicitly
//!   together with the conservative default; nothing is resolved silently.
//!   For floors (buffer zones, pre-harvest intervals) the conservative
//!   value is the highest one, for ceilings (doses, passes) the lowest.
//!
//! Budget exhaustion marks the answer as partial.  Fatal errors produce an
//! apology followed by whatever was gathered.

use regex::Regex;
use serde::{Deserialize, Serialize};

use agrisage_intent::fold;

use crate::error::{AgentError, Result};
use crate::trace::{Observation, ReasoningTrace, StepStatus, TerminatedReason};

// ---------------------------------------------------------------------------
// Fixed texts
// ---------------------------------------------------------------------------

const PARTIAL_PREFIX: &str =
    "Partial answer: the reasoning budget ran out before a conclusion was reached. \
     This is a best-effort summary of what was gathered.";

const APOLOGY: &str = "Sorry, this request could not be completed.";

const DECLINE: &str = "None of the available tools applies to this request, \
     so no reliable answer can be given.";

const NOTHING_GATHERED: &str = "No conclusive information could be gathered.";

/// Numeric claim: a value followed by a unit.  Applied to folded text.
const CLAIM_PATTERN: &str = r"(?P<value>\d+(?:[.,]\d+)?)\s*(?P<unit>l/ha|kg/ha|g/ha|ml/ha|mm|metres?|meters?|m|%|°c|jours?|days?|passages?|passes?)(?:[^\p{L}\d/]|$)";

/// Markers of a restrictive recommendation.  Checked before the permissive
/// ones because several contain a permissive word (`"n'est pas recommande"`).
const RESTRICTIVE_MARKERS: &[&str] = &[
    "ne pas",
    "n'est pas recommande",
    "pas recommande",
    "deconseille",
    "eviter",
    "evitez",
    "interdit",
    "a proscrire",
    "avoid",
    "do not",
    "don't",
    "not recommended",
    "prohibited",
    "forbidden",
];

/// Limits attached to a recommendation.  They bound it, they do not advise
/// against it, so they are blanked before looking for restrictive markers.
const LIMIT_PHRASES: &[&str] = &[
    "ne pas depasser",
    "ne pas exceder",
    "ne doit pas depasser",
    "sans depasser",
    "eviter de depasser",
    "do not exceed",
    "don't exceed",
    "not to exceed",
    "must not exceed",
    "avoid exceeding",
];

const PERMISSIVE_MARKERS: &[&str] = &[
    "recommande",
    "conseille",
    "appliquer",
    "appliquez",
    "traiter",
    "autorise",
    "recommended",
    "apply",
    "allowed",
    "permitted",
];

/// Subject words naming an upper limit.
const CEILING_WORDS: &[&str] = &[
    "max", "maximal", "maximale", "maximum", "plafond", "dose", "doses", "dosage", "passage",
    "passages", "limit", "limite", "rate",
];

/// Subject words naming a lower limit.
const FLOOR_WORDS: &[&str] = &[
    "min", "minimal", "minimale", "minimum", "znt", "zone", "buffer", "distance", "delai",
    "dar", "intervalle", "interval", "recolte", "harvest", "reentree", "reentry",
];

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "au", "aux", "be", "d", "de", "des", "du", "en", "est", "et", "for",
    "is", "l", "la", "le", "les", "of", "par", "per", "pour", "sont", "sur", "the", "to", "un",
    "une",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A delegated agent's answer as seen by the synthesizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAnswer {
    pub agent: String,
    pub answer: String,
}

/// What kind of claim two sources disagree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Different values for the same quantity.
    Numeric,
    /// One source advises against what another recommends.
    Recommendation,
}

/// One source's side of a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceClaim {
    pub agent: String,
    pub value: String,
}

/// A disagreement between delegated sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// Normalized subject, e.g. `"dose maximale (l/ha)"`.
    pub subject: String,
    /// Every source's value, in consultation order.
    pub claims: Vec<SourceClaim>,
    /// The guidance to follow until the disagreement is resolved.
    pub conservative_default: String,
}

impl Conflict {
    /// One-line human-readable description.
    pub fn describe(&self) -> String {
        let sides: Vec<String> = self
            .claims
            .iter()
            .map(|c| format!("{} says {}", c.agent, c.value))
            .collect();
        format!(
            "{}: {}. Conservative default: {}.",
            self.subject,
            sides.join(", "),
            self.conservative_default
        )
    }

    pub(crate) fn to_error(&self) -> AgentError {
        AgentError::SynthesisConflict {
            subject: self.subject.clone(),
            details: self.describe(),
        }
    }
}

/// The synthesizer's output.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAnswer {
    pub text: String,
    /// Delegated agents that contributed, in consultation order.
    pub sources: Vec<String>,
    pub conflicts: Vec<Conflict>,
    /// Whether the answer is explicitly best-effort.
    pub partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stance {
    Restrictive,
    Permissive,
}

/// Which extreme of a disputed quantity is the safe one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SafeSide {
    Highest,
    Lowest,
}

impl SafeSide {
    /// Explicit bound words win, then the unit: distances and durations
    /// are floors, everything else a ceiling.
    fn of(unit: &str, words: &[String]) -> Self {
        let has = |list: &[&str]| words.iter().any(|w| list.contains(&w.as_str()));
        if has(&["max", "maximal", "maximale", "maximum", "plafond"]) {
            Self::Lowest
        } else if has(FLOOR_WORDS) {
            Self::Highest
        } else if has(CEILING_WORDS) {
            Self::Lowest
        } else if matches!(unit, "m" | "days") {
            Self::Highest
        } else {
            Self::Lowest
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Highest => "highest value",
            Self::Lowest => "lowest value",
        }
    }
}

#[derive(Debug, Clone)]
struct NumericClaim {
    subject: Vec<String>,
    unit: String,
    value: f64,
    raw: String,
}

/// Claims about the same quantity: same unit, overlapping subject words.
#[derive(Debug)]
struct ClaimGroup {
    subject: Vec<String>,
    unit: String,
    words: Vec<String>,
    claims: Vec<(String, f64, String)>,
}

impl ClaimGroup {
    fn new(claim: &NumericClaim) -> Self {
        Self {
            subject: claim.subject.clone(),
            unit: claim.unit.clone(),
            words: Vec::new(),
            claims: Vec::new(),
        }
    }

    fn accepts(&self, claim: &NumericClaim) -> bool {
        self.unit == claim.unit && claim.subject.iter().any(|w| self.words.contains(w))
    }

    fn absorb(&mut self, agent: &str, claim: NumericClaim) {
        for word in claim.subject {
            if !self.words.contains(&word) {
                self.words.push(word);
            }
        }
        self.claims.push((agent.to_string(), claim.value, claim.raw));
    }

    fn into_conflict(self) -> Option<Conflict> {
        let first = self.claims.first()?.1;
        if self.claims.len() < 2 || self.claims.iter().all(|(_, v, _)| (v - first).abs() < 1e-9) {
            return None;
        }

        let unit = self.unit;
        let side = SafeSide::of(&unit, &self.words);
        let by_value = |a: &&(String, f64, String), b: &&(String, f64, String)| a.1.total_cmp(&b.1);
        let safest = match side {
            SafeSide::Highest => self.claims.iter().max_by(by_value),
            SafeSide::Lowest => self.claims.iter().min_by(by_value),
        }
        .map(|(_, _, raw)| raw.clone())?;

        Some(Conflict {
            kind: ConflictKind::Numeric,
            subject: format!("{} ({unit})", self.subject.join(" ")),
            claims: self
                .claims
                .into_iter()
                .map(|(agent, _, raw)| SourceClaim {
                    agent,
                    value: format!("{raw} {unit}"),
                })
                .collect(),
            conservative_default: format!("{safest} {unit} ({})", side.label()),
        })
    }
}

// ---------------------------------------------------------------------------
// Synthesizer
// ---------------------------------------------------------------------------

/// Builds final answers from reasoning traces.
#[derive(Debug, Clone)]
pub struct ResponseSynthesizer {
    claim: Regex,
}

impl ResponseSynthesizer {
    /// Create a synthesizer.
    pub fn new() -> Result<Self> {
        let claim = Regex::new(CLAIM_PATTERN)
            .map_err(|e| AgentError::Internal(format!("invalid claim pattern: {e}")))?;
        Ok(Self { claim })
    }

    /// Synthesize the answer for a finished loop.
    ///
    /// `draft` is the provider's final answer, when it gave one.
    pub fn synthesize(
        &self,
        trace: &ReasoningTrace,
        reason: TerminatedReason,
        draft: Option<&str>,
    ) -> SynthesizedAnswer {
        let draft = draft.map(str::trim).filter(|d| !d.is_empty());
        let sources = collect_sources(trace);
        let conflicts = if sources.len() >= 2 {
            self.detect_conflicts(&sources)
        } else {
            Vec::new()
        };

        let body = match sources.as_slice() {
            [] => draft
                .map(str::to_string)
                .or_else(|| trace.last_ok().map(|s| s.observation.render())),
            [only] => {
                let main = draft.unwrap_or(&only.answer);
                Some(format!("{main}\n\nSource: {}", only.agent))
            }
            many => Some(compose_sections(draft, many, &conflicts)),
        };

        let (text, partial) = match reason {
            TerminatedReason::FinalAnswer => (body.unwrap_or_else(|| NOTHING_GATHERED.into()), false),
            TerminatedReason::NoApplicableTool => (body.unwrap_or_else(|| DECLINE.into()), false),
            TerminatedReason::BudgetExceeded => {
                let body = body.unwrap_or_else(|| NOTHING_GATHERED.into());
                (format!("{PARTIAL_PREFIX}\n\n{body}"), true)
            }
            TerminatedReason::FatalError => match body {
                Some(body) => (
                    format!("{APOLOGY} Here is what was gathered before the failure:\n\n{body}"),
                    true,
                ),
                None => (APOLOGY.to_string(), false),
            },
        };

        if !conflicts.is_empty() {
            tracing::warn!(
                conflicts = conflicts.len(),
                subjects = ?conflicts.iter().map(|c| c.subject.as_str()).collect::<Vec<_>>(),
                "delegated sources disagree"
            );
        }

        SynthesizedAnswer {
            text,
            sources: sources.into_iter().map(|s| s.agent).collect(),
            conflicts,
            partial,
        }
    }

    /// Compare the sources' numeric claims and recommendation stances.
    pub fn detect_conflicts(&self, sources: &[SourceAnswer]) -> Vec<Conflict> {
        let mut conflicts = self.numeric_conflicts(sources);
        conflicts.extend(stance_conflict(sources));
        conflicts
    }

    fn numeric_conflicts(&self, sources: &[SourceAnswer]) -> Vec<Conflict> {
        let mut groups: Vec<ClaimGroup> = Vec::new();

        for source in sources {
            let mut claimed = Vec::new();
            for claim in self.extract_claims(&source.answer) {
                let position = groups.iter().position(|g| g.accepts(&claim));
                let index = match position {
                    // First claim per source and quantity.
                    Some(i) if claimed.contains(&i) => continue,
                    Some(i) => i,
                    None => {
                        groups.push(ClaimGroup::new(&claim));
                        groups.len() - 1
                    }
                };
                claimed.push(index);
                groups[index].absorb(&source.agent, claim);
            }
        }

        groups.into_iter().filter_map(ClaimGroup::into_conflict).collect()
    }

    /// Numeric claims made by one answer.
    fn extract_claims(&self, answer: &str) -> Vec<NumericClaim> {
        let folded = fold(answer);
        let mut claims = Vec::new();

        for caps in self.claim.captures_iter(&folded) {
            let (Some(value_match), Some(unit_match)) = (caps.name("value"), caps.name("unit"))
            else {
                continue;
            };
            let raw = value_match.as_str().to_string();
            let Ok(value) = raw.replace(',', ".").parse::<f64>() else {
                continue;
            };
            let Some(subject) = claim_subject(&folded[..value_match.start()]) else {
                continue;
            };
            claims.push(NumericClaim {
                subject,
                unit: normalize_unit(unit_match.as_str()),
                value,
                raw,
            });
        }
        claims
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Successful delegated answers, one per agent, latest answer wins.
pub fn collect_sources(trace: &ReasoningTrace) -> Vec<SourceAnswer> {
    let mut sources: Vec<SourceAnswer> = Vec::new();
    for step in trace.iter() {
        if step.status != StepStatus::Ok {
            continue;
        }
        let Observation::Delegated { agent, result } = &step.observation else {
            continue;
        };
        match sources.iter_mut().find(|s| &s.agent == agent) {
            Some(existing) => existing.answer = result.final_answer.clone(),
            None => sources.push(SourceAnswer {
                agent: agent.clone(),
                answer: result.final_answer.clone(),
            }),
        }
    }
    sources
}

fn compose_sections(draft: Option<&str>, sources: &[SourceAnswer], conflicts: &[Conflict]) -> String {
    let mut out = String::new();
    if let Some(draft) = draft {
        out.push_str(draft);
        out.push_str("\n\n");
    }

    for source in sources {
        out.push_str(&format!("### {}\n{}\n\n", source.agent, source.answer.trim()));
    }

    if !conflicts.is_empty() {
        out.push_str("### Discrepancies between sources\n");
        for conflict in conflicts {
            out.push_str(&format!("- {}\n", conflict.describe()));
        }
    }

    out.trim_end().to_string()
}

/// The subject of a claim: up to three content words closest before its
/// value, within the same clause.
fn claim_subject(prefix: &str) -> Option<Vec<String>> {
    let clause = prefix
        .rsplit(|c| matches!(c, '.' | ';' | ',' | '\n' | '(' | '!' | '?'))
        .next()
        .unwrap_or(prefix);

    // "Dose : 2 l/ha" names its subject before the colon, "Conseil : ZNT de
    // 5 m" after it.
    let clause = match clause.rsplit_once(':') {
        Some((before, after)) if content_words(after).is_empty() => before,
        Some((_, after)) => after,
        None => clause,
    };

    let words = content_words(clause);
    if words.is_empty() {
        return None;
    }
    let start = words.len().saturating_sub(3);
    Some(words[start..].iter().map(|w| w.to_string()).collect())
}

fn content_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOPWORDS.contains(w))
        .collect()
}

fn normalize_unit(unit: &str) -> String {
    match unit {
        "jour" | "jours" | "day" | "days" => "days".into(),
        "metre" | "metres" | "meter" | "meters" | "m" => "m".into(),
        "passage" | "passages" | "pass" | "passes" => "passes".into(),
        other => other.to_string(),
    }
}

fn stance_of(answer: &str) -> Option<Stance> {
    let mut folded = fold(answer);
    for phrase in LIMIT_PHRASES {
        folded = folded.replace(phrase, " ");
    }
    if RESTRICTIVE_MARKERS.iter().any(|m| folded.contains(m)) {
        Some(Stance::Restrictive)
    } else if PERMISSIVE_MARKERS.iter().any(|m| folded.contains(m)) {
        Some(Stance::Permissive)
    } else {
        None
    }
}

fn stance_conflict(sources: &[SourceAnswer]) -> Option<Conflict> {
    let stances: Vec<(&SourceAnswer, Stance)> = sources
        .iter()
        .filter_map(|s| stance_of(&s.answer).map(|stance| (s, stance)))
        .collect();

    let restrictive = stances.iter().any(|(_, s)| *s == Stance::Restrictive);
    let permissive = stances.iter().any(|(_, s)| *s == Stance::Permissive);
    if !(restrictive && permissive) {
        return None;
    }

    Some(Conflict {
        kind: ConflictKind::Recommendation,
        subject: "recommendation".into(),
        claims: stances
            .into_iter()
            .map(|(source, stance)| SourceClaim {
                agent: source.agent.clone(),
                value: match stance {
                    Stance::Restrictive => "advises against".into(),
                    Stance::Permissive => "recommends proceeding".into(),
                },
            })
            .collect(),
        conservative_default: "follow the restrictive advice".into(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
