//! Reasoning loop runtime.
//!
//! Drives the **think / act / observe** cycle for one query:
//!
//! 1. THINKING: the [`CompletionProvider`] looks at the trace and decides to
//!    call a tool or to answer.
//! 2. ACTING: the call is validated against the selection and the tool's
//!    input schema, then executed under its timeout.  Delegatable tools run
//!    a nested loop over their own sub-registry.
//! 3. OBSERVING: exactly one step is appended to the trace.
//!
//! The loop ends on an explicit final answer, on budget exhaustion
//! (iterations or wall clock), on cancellation, after two consecutive
//! unparseable calls, or when the provider itself fails.  Every path ends in
//! an [`OrchestrationResult`]; nothing is raised to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use agrisage_intent::ToolSelection;
use agrisage_kernel::CapabilityRegistry;

use crate::delegation::{DelegateInput, DelegationConfig, DelegationScope};
use crate::error::{AgentError, Result};
use crate::provider::{CompletionProvider, Decision, DecisionRequest, ToolDefinition};
use crate::query::Query;
use crate::schema::ArgumentSchemas;
use crate::synthesis::ResponseSynthesizer;
use crate::trace::{
    Failure, FailureKind, Observation, OrchestrationResult, ReasoningStep, ReasoningTrace,
    StepStatus, TerminatedReason,
};

/// Consecutive parse errors after which the loop gives up.
const MAX_CONSECUTIVE_PARSE_ERRORS: u32 = 2;

/// Deadline horizon used when `loop_timeout` overflows the clock.
const MAX_LOOP_HORIZON: Duration = Duration::from_secs(7 * 24 * 3600);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Budgets of one reasoning loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Maximum number of steps appended to the trace.
    pub max_iterations: u32,

    /// Time allowed for each provider call.
    pub provider_timeout: Duration,

    /// Tool timeout when neither the descriptor nor `tool_timeouts` set one.
    pub default_tool_timeout: Duration,

    /// Per-tool timeouts, by tool name.
    pub tool_timeouts: HashMap<String, Duration>,

    /// Wall-clock ceiling of the whole loop.
    pub loop_timeout: Duration,

    /// Budget applied to delegated loops.
    pub delegation: DelegationConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            provider_timeout: Duration::from_secs(60),
            default_tool_timeout: Duration::from_secs(30),
            tool_timeouts: HashMap::new(),
            loop_timeout: Duration::from_secs(180),
            delegation: DelegationConfig::default(),
        }
    }
}

impl LoopConfig {
    /// Timeout passed to the registry for `tool`.
    ///
    /// A timeout on the descriptor itself still wins inside the registry.
    pub fn tool_timeout(&self, tool: &str) -> Duration {
        self.tool_timeouts
            .get(tool)
            .copied()
            .unwrap_or(self.default_tool_timeout)
    }
}

/// Per-run controls.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Cooperative cancellation, checked at every step boundary.
    pub cancel: CancellationToken,

    /// Receives every appended step of the top-level trace, in order.
    pub steps: Option<UnboundedSender<ReasoningStep>>,
}

impl RunOptions {
    /// Use the given cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stream appended steps to `sender`.
    pub fn with_step_stream(mut self, sender: UnboundedSender<ReasoningStep>) -> Self {
        self.steps = Some(sender);
        self
    }
}

// ---------------------------------------------------------------------------
// Loop state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LoopState {
    trace: ReasoningTrace,
    tools_invoked: Vec<String>,
    draft: Option<String>,
    consecutive_parse_errors: u32,
}

impl LoopState {
    fn record_invocation(&mut self, tool: &str) {
        if !self.tools_invoked.iter().any(|t| t == tool) {
            self.tools_invoked.push(tool.to_string());
        }
    }
}

/// How the loop ended.
type Termination = (TerminatedReason, Option<Failure>);

/// A step about to be appended.
struct PendingStep {
    thought: String,
    tool_name: String,
    arguments: Value,
    observation: Observation,
    status: StepStatus,
    started_at: chrono::DateTime<Utc>,
    started: Instant,
}

// ---------------------------------------------------------------------------
// Reasoning loop
// ---------------------------------------------------------------------------

/// Executor for the think / act / observe cycle.
///
/// Cheap to build and safe to share: all per-run state lives inside
/// [`ReasoningLoop::run`].
pub struct ReasoningLoop {
    provider: Arc<dyn CompletionProvider>,
    registry: Arc<CapabilityRegistry>,
    schemas: Arc<ArgumentSchemas>,
    config: LoopConfig,
    synthesizer: Arc<ResponseSynthesizer>,
    depth: u32,
}

impl ReasoningLoop {
    /// Create a top-level loop.
    ///
    /// Compiles the input schema of every tool reachable from `registry`;
    /// a schema that does not compile is an [`AgentError::Config`].
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        registry: Arc<CapabilityRegistry>,
        config: LoopConfig,
    ) -> Result<Self> {
        let schemas = Arc::new(ArgumentSchemas::compile(&registry)?);
        Ok(Self {
            provider,
            registry,
            schemas,
            config,
            synthesizer: Arc::new(ResponseSynthesizer::new()?),
            depth: 0,
        })
    }

    /// The active budgets.
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run the loop over `selection` until it terminates.
    ///
    /// `scope` is set when this loop answers a delegated sub-question.
    pub fn run<'a>(
        &'a self,
        query: &'a Query,
        selection: &'a ToolSelection,
        scope: Option<DelegationScope>,
        options: RunOptions,
    ) -> BoxFuture<'a, OrchestrationResult> {
        Box::pin(self.drive(query, selection, scope, options))
    }

    async fn drive(
        &self,
        query: &Query,
        selection: &ToolSelection,
        scope: Option<DelegationScope>,
        options: RunOptions,
    ) -> OrchestrationResult {
        let task_id = Uuid::now_v7();
        let now = Instant::now();
        let deadline = now
            .checked_add(self.config.loop_timeout)
            .unwrap_or_else(|| now + MAX_LOOP_HORIZON);
        let tools: Vec<ToolDefinition> = selection
            .iter()
            .map(|t| ToolDefinition::from(t.descriptor.as_ref()))
            .collect();

        tracing::info!(
            task_id = %task_id,
            depth = self.depth,
            agent = scope.as_ref().map(|s| s.agent.as_str()).unwrap_or("root"),
            tool_count = tools.len(),
            max_iterations = self.config.max_iterations,
            "reasoning loop started"
        );

        let mut state = LoopState::default();

        let (reason, failure) = loop {
            if let Some(termination) = self.check_boundary(&state, deadline, &options.cancel) {
                break termination;
            }

            let request = DecisionRequest {
                query,
                tools: &tools,
                trace: &state.trace,
                scope: scope.as_ref(),
            };
            let decision = match self.think(&request, deadline, &options.cancel).await {
                Ok(decision) => decision,
                Err(termination) => break termination,
            };

            let (thought, tool_name, arguments) = match decision {
                Decision::Final { answer, .. } => {
                    state.draft = Some(answer);
                    let reason = if selection.is_empty() {
                        TerminatedReason::NoApplicableTool
                    } else {
                        TerminatedReason::FinalAnswer
                    };
                    break (reason, None);
                }
                Decision::Invoke {
                    thought,
                    tool_name,
                    arguments,
                } => (thought, tool_name, arguments),
            };

            if selection.is_empty() {
                tracing::info!(task_id = %task_id, tool = %tool_name, "tool requested with no applicable tool");
                break (TerminatedReason::NoApplicableTool, None);
            }

            let pending = self
                .act(query, selection, &options, deadline, thought, tool_name, arguments)
                .await;
            let status = pending.status;
            match status {
                StepStatus::ParseError => state.consecutive_parse_errors += 1,
                _ => {
                    state.consecutive_parse_errors = 0;
                    state.record_invocation(&pending.tool_name);
                }
            }
            self.observe(&mut state, pending, &options);

            if state.consecutive_parse_errors >= MAX_CONSECUTIVE_PARSE_ERRORS {
                let error = AgentError::ArgumentParse {
                    tool: state
                        .trace
                        .last()
                        .map(|s| s.tool_name.clone())
                        .unwrap_or_default(),
                    reason: format!("{MAX_CONSECUTIVE_PARSE_ERRORS} consecutive invalid calls"),
                };
                break (
                    TerminatedReason::FatalError,
                    Some(Failure::new(FailureKind::ParseErrors, &error)),
                );
            }
        };

        let synthesized = self
            .synthesizer
            .synthesize(&state.trace, reason, state.draft.as_deref());

        tracing::info!(
            task_id = %task_id,
            depth = self.depth,
            terminated_reason = reason.as_str(),
            steps = state.trace.len(),
            tools_invoked = ?state.tools_invoked,
            sources = synthesized.sources.len(),
            conflicts = synthesized.conflicts.len(),
            "reasoning loop finished"
        );

        OrchestrationResult {
            task_id,
            final_answer: synthesized.text,
            iteration_count: state.trace.len() as u32,
            trace: state.trace,
            tools_invoked: state.tools_invoked,
            terminated_reason: reason,
            intents: Vec::new(),
            selected_tools: selection.names(),
            sources: synthesized.sources,
            conflicts: synthesized.conflicts,
            partial: synthesized.partial,
            failure,
        }
    }

    // -- Boundaries -----------------------------------------------------------

    fn check_boundary(
        &self,
        state: &LoopState,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Option<Termination> {
        if cancel.is_cancelled() {
            tracing::info!(steps = state.trace.len(), "reasoning loop cancelled");
            return Some((
                TerminatedReason::FatalError,
                Some(Failure::new(FailureKind::Cancelled, &AgentError::Cancelled)),
            ));
        }

        if Instant::now() >= deadline {
            return Some(self.wall_clock_exceeded());
        }

        if state.trace.len() >= self.config.max_iterations as usize {
            tracing::warn!(max_iterations = self.config.max_iterations, "iteration budget exhausted");
            let error = AgentError::IterationBudgetExceeded {
                max_iterations: self.config.max_iterations,
            };
            return Some((
                TerminatedReason::BudgetExceeded,
                Some(Failure::new(FailureKind::IterationBudget, &error)),
            ));
        }

        None
    }

    fn wall_clock_exceeded(&self) -> Termination {
        tracing::warn!(
            timeout_secs = self.config.loop_timeout.as_secs(),
            "reasoning loop wall-clock budget exhausted"
        );
        let error = AgentError::LoopTimeout {
            timeout: self.config.loop_timeout,
        };
        (
            TerminatedReason::BudgetExceeded,
            Some(Failure::new(FailureKind::WallClock, &error)),
        )
    }

    // -- Thinking -------------------------------------------------------------

    async fn think(
        &self,
        request: &DecisionRequest<'_>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> std::result::Result<Decision, Termination> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let budget = self.config.provider_timeout.min(remaining);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                return Err((
                    TerminatedReason::FatalError,
                    Some(Failure::new(FailureKind::Cancelled, &AgentError::Cancelled)),
                ));
            }
            outcome = tokio::time::timeout(budget, self.provider.decide(request)) => outcome,
        };

        match outcome {
            Ok(Ok(decision)) => Ok(decision),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "completion provider failed");
                let error = AgentError::ProviderFailed {
                    reason: e.to_string(),
                };
                Err((
                    TerminatedReason::FatalError,
                    Some(Failure::new(FailureKind::Provider, &error)),
                ))
            }
            Err(_elapsed) if budget < self.config.provider_timeout => Err(self.wall_clock_exceeded()),
            Err(_elapsed) => {
                tracing::warn!(
                    timeout_ms = budget.as_millis() as u64,
                    "completion provider timed out"
                );
                let error = AgentError::ProviderTimeout { timeout: budget };
                Err((
                    TerminatedReason::FatalError,
                    Some(Failure::new(FailureKind::Provider, &error)),
                ))
            }
        }
    }

    // -- Acting ---------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn act(
        &self,
        query: &Query,
        selection: &ToolSelection,
        options: &RunOptions,
        deadline: Instant,
        thought: String,
        tool_name: String,
        arguments: Value,
    ) -> PendingStep {
        let started_at = Utc::now();
        let started = Instant::now();

        let (observation, status) = match validate_call(selection, &self.schemas, &tool_name, &arguments) {
            Err(error) => {
                tracing::warn!(tool = %tool_name, error = %error, "invalid tool call");
                let instruction = corrective_instruction(&error, selection);
                (Observation::Text(instruction), StepStatus::ParseError)
            }
            Ok(Some(input)) => {
                self.delegate(query, options, deadline, &tool_name, input)
                    .await
            }
            Ok(None) => self.invoke(&tool_name, &arguments, deadline).await,
        };

        PendingStep {
            thought,
            tool_name,
            arguments,
            observation,
            status,
            started_at,
            started,
        }
    }

    /// Execute a plain tool, never past the loop deadline.
    async fn invoke(&self, tool_name: &str, arguments: &Value, deadline: Instant) -> (Observation, StepStatus) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let timeout = self.config.tool_timeout(tool_name).min(remaining);

        // The registry prefers a descriptor timeout over `timeout`, so the
        // deadline is enforced here as well.
        let invocation = self.registry.invoke(tool_name, arguments.clone(), timeout);
        let error = match tokio::time::timeout(remaining, invocation).await {
            Ok(Ok(output)) => return (Observation::from(output), StepStatus::Ok),
            Ok(Err(e)) => AgentError::from(e),
            Err(_elapsed) => {
                tracing::warn!(tool = %tool_name, remaining_ms = remaining.as_millis() as u64, "tool cut off at loop deadline");
                AgentError::ToolTimeout {
                    tool: tool_name.to_string(),
                    timeout: remaining,
                }
            }
        };
        (Observation::Text(format!("Error: {error}")), StepStatus::ToolError)
    }

    /// Run a nested loop for a delegatable tool.
    async fn delegate(
        &self,
        query: &Query,
        options: &RunOptions,
        deadline: Instant,
        agent: &str,
        input: DelegateInput,
    ) -> (Observation, StepStatus) {
        let max_depth = self.config.delegation.max_depth;
        if self.depth >= max_depth {
            let error = AgentError::DelegationDepth {
                agent: agent.to_string(),
                max_depth,
            };
            tracing::warn!(error = %error, "delegation refused");
            return (Observation::Text(format!("Error: {error}")), StepStatus::ToolError);
        }

        let (Some(registry), Some(schemas)) = (self.registry.delegate_scope(agent), self.schemas.scope(agent)) else {
            let error = AgentError::ToolExecution {
                tool: agent.to_string(),
                reason: "no sub-registry bound to this agent".into(),
            };
            return (Observation::Text(format!("Error: {error}")), StepStatus::ToolError);
        };

        let child = ReasoningLoop {
            provider: Arc::clone(&self.provider),
            config: LoopConfig {
                max_iterations: self.config.delegation.max_iterations,
                loop_timeout: deadline.saturating_duration_since(Instant::now()),
                ..self.config.clone()
            },
            registry,
            schemas,
            synthesizer: Arc::clone(&self.synthesizer),
            depth: self.depth + 1,
        };

        let selection = ToolSelection::all(&child.registry);
        let sub_query = query.derive(input.question.clone());
        let sub_scope = DelegationScope {
            agent: agent.to_string(),
            depth: child.depth,
            question: input.question,
        };
        let child_options = RunOptions {
            cancel: options.cancel.child_token(),
            steps: None,
        };

        tracing::debug!(agent = %agent, depth = child.depth, "delegating sub-question");
        let result = child.run(&sub_query, &selection, Some(sub_scope), child_options).await;

        let status = if result.terminated_reason == TerminatedReason::FatalError {
            StepStatus::ToolError
        } else {
            StepStatus::Ok
        };
        let observation = Observation::Delegated {
            agent: agent.to_string(),
            result: Box::new(result),
        };
        (observation, status)
    }

    // -- Observing ------------------------------------------------------------

    fn observe(&self, state: &mut LoopState, pending: PendingStep, options: &RunOptions) {
        let step = ReasoningStep {
            index: state.trace.len() as u32,
            thought: pending.thought,
            tool_name: pending.tool_name,
            arguments: pending.arguments,
            observation: pending.observation,
            status: pending.status,
            started_at: pending.started_at,
            duration_ms: pending.started.elapsed().as_millis() as u64,
        };

        tracing::debug!(
            depth = self.depth,
            index = step.index,
            tool = %step.tool_name,
            status = ?step.status,
            duration_ms = step.duration_ms,
            "step recorded"
        );

        if let Some(sender) = &options.steps {
            let _ = sender.send(step.clone());
        }
        state.trace.push(step);
    }
}

// ---------------------------------------------------------------------------
// Call validation
// ---------------------------------------------------------------------------

/// Check a call against the selection and the tool's input schema.
///
/// Returns the delegation input when the tool is delegatable.
fn validate_call(
    selection: &ToolSelection,
    schemas: &ArgumentSchemas,
    tool_name: &str,
    arguments: &Value,
) -> Result<Option<DelegateInput>> {
    let parse_error = |reason: String| AgentError::ArgumentParse {
        tool: tool_name.to_string(),
        reason,
    };

    let Some(selected) = selection.get(tool_name) else {
        return Err(parse_error("not one of the available tools".into()));
    };

    let object = match arguments {
        Value::Object(map) => map,
        Value::String(raw) => {
            return Err(parse_error(format!("arguments are not valid JSON: {raw}")));
        }
        other => {
            return Err(parse_error(format!(
                "arguments must be a JSON object, got {}",
                json_type(other)
            )));
        }
    };

    let descriptor = &selected.descriptor;
    for field in descriptor.required_arguments() {
        if object.get(field).is_none_or(Value::is_null) {
            return Err(parse_error(format!("missing required argument `{field}`")));
        }
    }

    schemas.check(tool_name, arguments).map_err(parse_error)?;

    if !descriptor.delegatable {
        return Ok(None);
    }
    DelegateInput::from_arguments(arguments)
        .map(Some)
        .ok_or_else(|| parse_error("`question` must be a non-empty string".into()))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn corrective_instruction(error: &AgentError, selection: &ToolSelection) -> String {
    format!(
        "Error: {error}. Call one of [{}] with arguments matching its input schema, \
         or give a final answer.",
        selection.names().join(", ")
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
