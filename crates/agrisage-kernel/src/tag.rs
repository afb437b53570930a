//! Intent tags.
//!
//! The tag vocabulary is closed: every tool descriptor, every classifier rule
//! and every selection score speaks in terms of [`IntentTag`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A classified purpose a query may carry, and a capability a tool serves.
///
/// The declaration order is significant: it is the tie-break order used when
/// two intents end up with the same confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentTag {
    /// Forecasts, rainfall, frost, spraying windows.
    Weather,
    /// Crop disease symptoms and diagnosis.
    DiseaseDiagnosis,
    /// Pest and insect identification.
    PestId,
    /// Regulatory constraints: buffer zones, authorised doses, deadlines.
    RegulatoryCheck,
    /// Crop rotation, sowing calendars, treatment programmes.
    Planning,
    /// Environmental footprint, biodiversity, carbon.
    Sustainability,
}

impl IntentTag {
    /// All tags in declaration order.
    pub const ALL: [IntentTag; 6] = [
        IntentTag::Weather,
        IntentTag::DiseaseDiagnosis,
        IntentTag::PestId,
        IntentTag::RegulatoryCheck,
        IntentTag::Planning,
        IntentTag::Sustainability,
    ];

    /// The canonical wire label (e.g. `"DISEASE_DIAGNOSIS"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weather => "WEATHER",
            Self::DiseaseDiagnosis => "DISEASE_DIAGNOSIS",
            Self::PestId => "PEST_ID",
            Self::RegulatoryCheck => "REGULATORY_CHECK",
            Self::Planning => "PLANNING",
            Self::Sustainability => "SUSTAINABILITY",
        }
    }
}

impl fmt::Display for IntentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentTag {
    type Err = String;

    /// Parse a label case-insensitively; `-` and spaces are accepted in place
    /// of `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == normalized)
            .ok_or_else(|| format!("unknown intent tag: {s}"))
    }
}
