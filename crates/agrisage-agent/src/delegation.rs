//! Delegation adapter.
//!
//! A delegatable tool is bound in the registry to a sub-registry.  When the
//! provider calls it, the reasoning loop starts a nested loop over that
//! sub-registry with its own, smaller budget.  The nested
//! [`crate::trace::OrchestrationResult`] comes back as a
//! [`crate::trace::Observation::Delegated`].
//!
//! Every delegatable tool takes the same input: a single `question`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Budget applied to nested loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationConfig {
    /// Iteration budget of each nested loop.
    pub max_iterations: u32,

    /// How many levels of delegation are allowed below the top-level loop.
    pub max_depth: u32,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            max_depth: 2,
        }
    }
}

/// Where a nested loop sits in the delegation tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationScope {
    /// The delegatable tool that started this loop.
    pub agent: String,
    /// Nesting depth, `1` for a loop started by the top-level loop.
    pub depth: u32,
    /// The sub-question handed down by the parent.
    pub question: String,
}

/// Arguments of a delegatable tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateInput {
    pub question: String,
}

impl DelegateInput {
    /// Read the input from validated tool arguments.
    pub fn from_arguments(arguments: &Value) -> Option<Self> {
        serde_json::from_value::<Self>(arguments.clone())
            .ok()
            .filter(|input| !input.question.trim().is_empty())
    }
}

/// Input schema shared by every delegatable tool.
pub fn delegate_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "question": {
                "type": "string",
                "description": "Self-contained sub-question for the specialised agent"
            }
        },
        "required": ["question"]
    })
}
