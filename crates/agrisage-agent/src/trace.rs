//! Reasoning trace and orchestration result types.
//!
//! A [`ReasoningTrace`] is the append-only record of one reasoning loop.
//! Only the loop that owns it can append; everybody else gets read-only
//! views.  The [`OrchestrationResult`] bundles the trace with the final
//! answer and the bookkeeping a caller needs to audit a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use agrisage_intent::ClassifiedIntent;
use agrisage_kernel::ToolOutput;

use crate::synthesis::Conflict;

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The tool ran and returned an observation.
    Ok,
    /// The tool failed or timed out.  The loop continues.
    ToolError,
    /// The provider's call could not be validated.  The observation holds
    /// the corrective instruction sent back to the provider.
    ParseError,
}

/// What the loop observed after acting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Observation {
    /// Free text from a tool, an error message or a corrective instruction.
    Text(String),
    /// A structured tool payload.
    Structured(Value),
    /// The full result of a delegated reasoning loop.
    Delegated {
        agent: String,
        result: Box<OrchestrationResult>,
    },
}

impl Observation {
    /// Render the observation as text for prompts and summaries.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => value.to_string(),
            Self::Delegated { result, .. } => result.final_answer.clone(),
        }
    }
}

impl From<ToolOutput> for Observation {
    fn from(output: ToolOutput) -> Self {
        match output {
            ToolOutput::Text(text) => Self::Text(text),
            ToolOutput::Structured(value) => Self::Structured(value),
        }
    }
}

/// One think/act/observe iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// Zero-based position in the trace.
    pub index: u32,
    /// The provider's stated reasoning for this step.
    pub thought: String,
    /// The tool the provider asked for.
    pub tool_name: String,
    /// The arguments exactly as the provider sent them.
    pub arguments: Value,
    pub observation: Observation,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ReasoningStep {
    /// Whether the step succeeded.
    pub fn is_ok(&self) -> bool {
        self.status == StepStatus::Ok
    }
}

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

/// Ordered, append-only list of steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReasoningTrace {
    steps: Vec<ReasoningStep>,
}

impl ReasoningTrace {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, step: ReasoningStep) {
        self.steps.push(step);
    }

    /// All steps in order.
    pub fn steps(&self) -> &[ReasoningStep] {
        &self.steps
    }

    /// Iterate steps in order.
    pub fn iter(&self) -> impl Iterator<Item = &ReasoningStep> {
        self.steps.iter()
    }

    /// The most recent step.
    pub fn last(&self) -> Option<&ReasoningStep> {
        self.steps.last()
    }

    /// The most recent successful step.
    pub fn last_ok(&self) -> Option<&ReasoningStep> {
        self.steps.iter().rev().find(|s| s.is_ok())
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the trace is empty.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Why a reasoning loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatedReason {
    /// The provider gave an explicit final answer.
    FinalAnswer,
    /// The iteration budget or the wall-clock ceiling was reached.
    BudgetExceeded,
    /// Nothing in the selection applied to the query.
    NoApplicableTool,
    /// Cancellation, repeated parse errors or a provider failure.
    FatalError,
}

impl TerminatedReason {
    /// Wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FinalAnswer => "final_answer",
            Self::BudgetExceeded => "budget_exceeded",
            Self::NoApplicableTool => "no_applicable_tool",
            Self::FatalError => "fatal_error",
        }
    }
}

/// Machine-readable cause attached to a non-final termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Cancelled,
    WallClock,
    IterationBudget,
    ParseErrors,
    Provider,
}

/// Failure detail: the cause and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub(crate) fn new(kind: FailureKind, error: &crate::error::AgentError) -> Self {
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

/// Everything one orchestration produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub task_id: Uuid,
    pub final_answer: String,
    pub trace: ReasoningTrace,
    /// Distinct tools the loop actually invoked, in first-use order.
    pub tools_invoked: Vec<String>,
    /// Number of steps appended to the trace.
    pub iteration_count: u32,
    pub terminated_reason: TerminatedReason,
    #[serde(default)]
    pub intents: Vec<ClassifiedIntent>,
    #[serde(default)]
    pub selected_tools: Vec<String>,
    /// Delegated agents whose answers fed the synthesis.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    /// Whether the answer is a best-effort partial.
    #[serde(default)]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl OrchestrationResult {
    /// Whether the run was cancelled.
    pub fn was_cancelled(&self) -> bool {
        self.failure
            .as_ref()
            .is_some_and(|f| f.kind == FailureKind::Cancelled)
    }

    /// Fail when the synthesis disclosed conflicting sources.
    ///
    /// The answer itself always lists every side of a conflict; this lets a
    /// caller that cannot show such an answer refuse it instead.
    pub fn ensure_consistent(&self) -> crate::error::Result<()> {
        match self.conflicts.first() {
            None => Ok(()),
            Some(conflict) => Err(conflict.to_error()),
        }
    }
}
