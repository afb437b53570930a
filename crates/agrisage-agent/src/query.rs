//! Query and context whitelist.
//!
//! A [`Query`] is the immutable input of one orchestration: the raw text
//! plus an optional context map.  Only the keys named by [`ContextKey`] are
//! kept; anything else a caller sends is dropped before it can reach the
//! reasoning loop or the completion provider.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Context keys accepted alongside a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKey {
    Location,
    Crop,
    ParcelId,
    GrowthStage,
    Season,
    Language,
    FarmType,
}

impl ContextKey {
    /// All accepted keys.
    pub const ALL: [ContextKey; 7] = [
        ContextKey::Location,
        ContextKey::Crop,
        ContextKey::ParcelId,
        ContextKey::GrowthStage,
        ContextKey::Season,
        ContextKey::Language,
        ContextKey::FarmType,
    ];

    /// The wire name of the key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Crop => "crop",
            Self::ParcelId => "parcel_id",
            Self::GrowthStage => "growth_stage",
            Self::Season => "season",
            Self::Language => "language",
            Self::FarmType => "farm_type",
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == key)
            .ok_or_else(|| format!("context key `{key}` is not accepted"))
    }
}

/// One user request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    text: String,
    context: BTreeMap<ContextKey, String>,
}

impl Query {
    /// A query without context.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: BTreeMap::new(),
        }
    }

    /// A query with a caller-supplied context map.
    ///
    /// Keys outside [`ContextKey`] and blank values are dropped.  Only the
    /// number of dropped entries is logged, never their content.
    pub fn with_context<K, V>(text: impl Into<String>, context: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut kept = BTreeMap::new();
        let mut dropped = 0usize;

        for (key, value) in context {
            let value = value.into();
            match key.as_ref().parse::<ContextKey>() {
                Ok(key) if !value.trim().is_empty() => {
                    kept.insert(key, value.trim().to_string());
                }
                _ => dropped += 1,
            }
        }

        if dropped > 0 {
            tracing::debug!(dropped, "context entries dropped by whitelist");
        }

        Self {
            text: text.into(),
            context: kept,
        }
    }

    /// Same context, different text.  Used for delegated sub-questions.
    pub fn derive(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: self.context.clone(),
        }
    }

    /// The raw query text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The whitelisted context.
    pub fn context(&self) -> &BTreeMap<ContextKey, String> {
        &self.context
    }

    /// One context value.
    pub fn context_value(&self, key: ContextKey) -> Option<&str> {
        self.context.get(&key).map(String::as_str)
    }
}
