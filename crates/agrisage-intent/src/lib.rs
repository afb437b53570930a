//! Intent classification and tool selection for AgriSage.
//!
//! This crate provides:
//!
//! - **Classification**: Weighted trigger matching over accent-folded text
//!   via [`classifier::IntentClassifier`], with an optional secondary
//!   classifier behind [`classifier::IntentFallback`].
//! - **Trigger matching**: Aho-Corasick phrases and word-bounded regexes via
//!   [`matcher::TriggerMatcher`].
//! - **Tool selection**: Relevance scoring, capping and dependency closure
//!   over a capability registry via [`selector::ToolSelector`].

pub mod classifier;
pub mod error;
pub mod matcher;
pub mod selector;

pub use classifier::{ClassifiedIntent, ClassifierConfig, IntentClassifier, IntentFallback, fold};
pub use error::{IntentError, Result};
pub use matcher::{TriggerHit, TriggerMatcher};
pub use selector::{InclusionReason, SelectedTool, SelectorConfig, ToolSelection, ToolSelector};
