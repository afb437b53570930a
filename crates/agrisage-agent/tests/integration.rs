//! Integration tests for the agrisage-agent crate.
//!
//! These tests drive the orchestrator and the reasoning loop end to end with
//! scripted completion providers and stub tools, without a live LLM.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use agrisage_agent::{
    AgentError, AgrisageConfig, CompletionProvider, ConflictKind, Decision, DecisionRequest,
    DelegationConfig, FailureKind, LoopConfig, Observation, Orchestrator, Query, ReasoningLoop,
    RunOptions, StepStatus, TerminatedReason, delegate_schema,
};
use agrisage_intent::ToolSelection;
use agrisage_kernel::{
    CapabilityRegistry, FnHandler, IntentTag, RegistryBuilder, ToolDescriptor, ToolError,
    ToolHandler, ToolOutput,
};

// ---------------------------------------------------------------------------
// Scripted provider
// ---------------------------------------------------------------------------

struct ScriptedProvider<F> {
    script: F,
}

#[async_trait]
impl<F> CompletionProvider for ScriptedProvider<F>
where
    F: Fn(&DecisionRequest<'_>) -> agrisage_agent::Result<Decision> + Send + Sync,
{
    async fn decide(&self, request: &DecisionRequest<'_>) -> agrisage_agent::Result<Decision> {
        (self.script)(request)
    }
}

fn scripted<F>(script: F) -> Arc<dyn CompletionProvider>
where
    F: Fn(&DecisionRequest<'_>) -> agrisage_agent::Result<Decision> + Send + Sync + 'static,
{
    Arc::new(ScriptedProvider { script })
}

fn invoke(tool: &str, arguments: Value) -> agrisage_agent::Result<Decision> {
    Ok(Decision::Invoke {
        thought: format!("calling {tool}"),
        tool_name: tool.into(),
        arguments,
    })
}

fn answer(text: &str) -> agrisage_agent::Result<Decision> {
    Ok(Decision::Final {
        thought: String::new(),
        answer: text.into(),
    })
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

fn weather_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("get_weather_data", "Weather forecast for a location")
        .with_tags([IntentTag::Weather])
        .with_keywords(["météo", "pluie"])
        .with_schema(json!({
            "type": "object",
            "properties": {"location": {"type": "string"}},
            "required": ["location"]
        }))
}

fn stub() -> FnHandler<impl Fn(Value) -> Result<ToolOutput, String> + Send + Sync> {
    FnHandler::new(|_| Ok(ToolOutput::text("stub")))
}

fn catalog() -> CapabilityRegistry {
    RegistryBuilder::new()
        .register(
            weather_descriptor(),
            FnHandler::new(|args: Value| {
                let location = args["location"].as_str().unwrap_or("?");
                Ok(ToolOutput::Structured(json!({"location": location, "rain_mm": 12})))
            }),
        )
        .register(
            ToolDescriptor::new("diagnose_disease", "Disease diagnosis")
                .with_tags([IntentTag::DiseaseDiagnosis])
                .with_dependencies(["generate_treatment_plan"]),
            stub(),
        )
        .register(
            ToolDescriptor::new("generate_treatment_plan", "Treatment programme")
                .with_tags([IntentTag::Planning]),
            stub(),
        )
        .build()
        .unwrap()
}

/// Weather tool failing on its first call only.
struct FlakyWeather {
    calls: AtomicU32,
}

#[async_trait]
impl ToolHandler for FlakyWeather {
    async fn invoke(&self, tool: &str, _arguments: Value) -> Result<ToolOutput, ToolError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ToolError::execution(tool, "upstream returned 503"));
        }
        Ok(ToolOutput::text("12 mm expected tomorrow"))
    }
}

/// Tool that cancels the run while it is executing, then completes.
struct CancellingTool {
    cancel: CancellationToken,
}

#[async_trait]
impl ToolHandler for CancellingTool {
    async fn invoke(&self, _tool: &str, _arguments: Value) -> Result<ToolOutput, ToolError> {
        self.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(ToolOutput::text("finished despite cancellation"))
    }
}

struct SlowTool;

#[async_trait]
impl ToolHandler for SlowTool {
    async fn invoke(&self, _tool: &str, _arguments: Value) -> Result<ToolOutput, ToolError> {
        tokio::time::sleep(Duration::from_millis(80)).await;
        Ok(ToolOutput::text("slow"))
    }
}

/// Provider that never answers in time.
struct StalledProvider;

#[async_trait]
impl CompletionProvider for StalledProvider {
    async fn decide(&self, _request: &DecisionRequest<'_>) -> agrisage_agent::Result<Decision> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        answer("too late")
    }
}

struct HangingTool;

#[async_trait]
impl ToolHandler for HangingTool {
    async fn invoke(&self, _tool: &str, _arguments: Value) -> Result<ToolOutput, ToolError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(ToolOutput::text("hung"))
    }
}

fn single_tool_registry(handler: impl ToolHandler + 'static) -> Arc<CapabilityRegistry> {
    Arc::new(
        RegistryBuilder::new()
            .register(weather_descriptor(), handler)
            .build()
            .unwrap(),
    )
}

fn looping(provider: Arc<dyn CompletionProvider>, registry: &Arc<CapabilityRegistry>, config: LoopConfig) -> ReasoningLoop {
    ReasoningLoop::new(provider, Arc::clone(registry), config).unwrap()
}

fn paris() -> Value {
    json!({"location": "Paris"})
}

// ═══════════════════════════════════════════════════════════════════════
//  Orchestrator
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn immediate_final_answer_takes_no_step() {
    let provider = scripted(|_| answer("Pas de pluie prévue à Paris."));
    let orchestrator =
        Orchestrator::new(Arc::new(catalog()), provider, AgrisageConfig::default()).unwrap();

    let result = orchestrator
        .orchestrate("Quelle est la météo à Paris?", [("location", "Paris")])
        .await;

    assert_eq!(result.terminated_reason, TerminatedReason::FinalAnswer);
    assert_eq!(result.iteration_count, 0);
    assert!(result.trace.is_empty());
    assert_eq!(result.final_answer, "Pas de pluie prévue à Paris.");
    assert_eq!(result.intents[0].tag, IntentTag::Weather);
    assert_eq!(result.selected_tools, vec!["get_weather_data"]);
}

#[tokio::test]
async fn provider_sees_only_selection_and_whitelisted_context() {
    let provider = scripted(|request| {
        let names: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["diagnose_disease", "generate_treatment_plan"]);
        assert_eq!(request.query.context().len(), 1);
        answer("Septoriose probable.")
    });
    let orchestrator =
        Orchestrator::new(Arc::new(catalog()), provider, AgrisageConfig::default()).unwrap();

    let context: HashMap<String, String> = [
        ("crop".to_string(), "blé".to_string()),
        ("api_key".to_string(), "sk-secret".to_string()),
    ]
    .into_iter()
    .collect();
    let result = orchestrator
        .orchestrate("Mes plants de blé ont des taches jaunes", &context)
        .await;

    assert_eq!(result.terminated_reason, TerminatedReason::FinalAnswer);
    assert_eq!(result.final_answer, "Septoriose probable.");
}

#[tokio::test]
async fn off_topic_query_answers_without_tools() {
    let provider = scripted(|request| {
        assert!(request.tools.is_empty());
        answer("Je ne peux répondre qu'aux questions agronomiques.")
    });
    let orchestrator =
        Orchestrator::new(Arc::new(catalog()), provider, AgrisageConfig::default()).unwrap();

    let result = orchestrator
        .orchestrate("Qui a gagné le match hier soir ?", HashMap::<String, String>::new())
        .await;

    assert_eq!(result.terminated_reason, TerminatedReason::NoApplicableTool);
    assert!(result.intents.is_empty());
    assert!(result.selected_tools.is_empty());
    assert_eq!(result.iteration_count, 0);
}

#[tokio::test]
async fn tool_request_without_selection_declines() {
    let provider = scripted(|_| invoke("get_weather_data", paris()));
    let orchestrator =
        Orchestrator::new(Arc::new(catalog()), provider, AgrisageConfig::default()).unwrap();

    let result = orchestrator
        .orchestrate("Qui a gagné le match hier soir ?", HashMap::<String, String>::new())
        .await;

    assert_eq!(result.terminated_reason, TerminatedReason::NoApplicableTool);
    assert!(result.tools_invoked.is_empty());
    assert!(!result.final_answer.is_empty());
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let mut config = AgrisageConfig::default();
    config.executor.max_iterations = 0;
    let err = Orchestrator::new(Arc::new(catalog()), scripted(|_| answer("x")), config)
        .err()
        .unwrap();
    assert!(matches!(err, AgentError::Config { .. }));
}

// ═══════════════════════════════════════════════════════════════════════
//  Reasoning loop
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn tool_failure_is_recorded_and_loop_continues() {
    let registry = single_tool_registry(FlakyWeather {
        calls: AtomicU32::new(0),
    });
    let provider = scripted(|request| match request.trace.len() {
        0 | 1 => invoke("get_weather_data", paris()),
        _ => answer("12 mm de pluie attendus demain."),
    });
    let runtime = looping(provider, &registry, LoopConfig::default());
    let selection = ToolSelection::all(&registry);
    let query = Query::new("Va-t-il pleuvoir ?");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    assert_eq!(result.terminated_reason, TerminatedReason::FinalAnswer);
    assert_eq!(result.iteration_count, 2);
    let statuses: Vec<StepStatus> = result.trace.iter().map(|s| s.status).collect();
    assert_eq!(statuses, vec![StepStatus::ToolError, StepStatus::Ok]);
    assert!(result.trace.steps()[0].observation.render().contains("503"));
    assert_eq!(result.tools_invoked, vec!["get_weather_data"]);
}

#[tokio::test]
async fn iteration_budget_yields_partial_answer() {
    let registry = Arc::new(catalog());
    let provider = scripted(|_| invoke("get_weather_data", paris()));
    let config = LoopConfig {
        max_iterations: 3,
        ..LoopConfig::default()
    };
    let runtime = looping(provider, &registry, config);
    let selection = ToolSelection::all(&registry);
    let query = Query::new("météo");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    assert_eq!(result.terminated_reason, TerminatedReason::BudgetExceeded);
    assert_eq!(result.iteration_count, 3);
    assert_eq!(result.trace.len(), 3);
    assert!(result.partial);
    assert!(!result.final_answer.is_empty());
    assert!(result.final_answer.contains("rain_mm"));
    assert_eq!(result.failure.unwrap().kind, FailureKind::IterationBudget);
}

#[tokio::test]
async fn two_consecutive_parse_errors_are_fatal() {
    let registry = Arc::new(catalog());
    let provider = scripted(|request| match request.trace.len() {
        0 => invoke("get_weather_data", json!({})),
        _ => invoke("get_weather_data", Value::String("{location: Paris".into())),
    });
    let runtime = looping(provider, &registry, LoopConfig::default());
    let selection = ToolSelection::all(&registry);
    let query = Query::new("météo");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    assert_eq!(result.terminated_reason, TerminatedReason::FatalError);
    assert_eq!(result.iteration_count, 2);
    assert!(result.trace.iter().all(|s| s.status == StepStatus::ParseError));
    assert!(result.tools_invoked.is_empty());
    assert_eq!(result.failure.unwrap().kind, FailureKind::ParseErrors);
}

#[tokio::test]
async fn valid_call_resets_parse_error_count() {
    let registry = Arc::new(catalog());
    let provider = scripted(|request| match request.trace.len() {
        0 => invoke("get_weather_data", json!({"location": 75})),
        1 => invoke("get_weather_data", paris()),
        2 => invoke("get_weather_data", json!({})),
        _ => answer("Pluie modérée."),
    });
    let runtime = looping(provider, &registry, LoopConfig::default());
    let selection = ToolSelection::all(&registry);
    let query = Query::new("météo");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    assert_eq!(result.terminated_reason, TerminatedReason::FinalAnswer);
    let statuses: Vec<StepStatus> = result.trace.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::ParseError, StepStatus::Ok, StepStatus::ParseError]
    );
}

#[tokio::test]
async fn tools_outside_selection_are_refused() {
    let registry = Arc::new(catalog());
    let selection = ToolSelection::all(&single_tool_registry(stub()));
    let provider = scripted(|request| match request.trace.len() {
        0 => invoke("diagnose_disease", json!({})),
        _ => answer("ok"),
    });
    let runtime = looping(provider, &registry, LoopConfig::default());
    let query = Query::new("météo");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    let step = &result.trace.steps()[0];
    assert_eq!(step.status, StepStatus::ParseError);
    assert!(step.observation.render().contains("get_weather_data"));
    assert!(result.tools_invoked.is_empty());
}

#[tokio::test]
async fn provider_failure_is_fatal_with_apology() {
    let registry = Arc::new(catalog());
    let provider = scripted(|_| {
        Err(AgentError::LlmRequestFailed {
            reason: "connection refused".into(),
        })
    });
    let runtime = looping(provider, &registry, LoopConfig::default());
    let selection = ToolSelection::all(&registry);
    let query = Query::new("météo");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    assert_eq!(result.terminated_reason, TerminatedReason::FatalError);
    assert!(result.final_answer.starts_with("Sorry"));
    let failure = result.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Provider);
    assert!(failure.message.contains("connection refused"));
}

#[tokio::test]
async fn wall_clock_budget_ends_loop() {
    let registry = single_tool_registry(SlowTool);
    let provider = scripted(|_| invoke("get_weather_data", paris()));
    let config = LoopConfig {
        loop_timeout: Duration::from_millis(50),
        ..LoopConfig::default()
    };
    let runtime = looping(provider, &registry, config);
    let selection = ToolSelection::all(&registry);
    let query = Query::new("météo");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    assert_eq!(result.terminated_reason, TerminatedReason::BudgetExceeded);
    assert_eq!(result.iteration_count, 1);
    assert_eq!(result.failure.unwrap().kind, FailureKind::WallClock);
}

#[tokio::test]
async fn configured_tool_timeout_applies() {
    let registry = single_tool_registry(SlowTool);
    let provider = scripted(|request| match request.trace.len() {
        0 => invoke("get_weather_data", paris()),
        _ => answer("no data"),
    });
    let mut config = LoopConfig::default();
    config
        .tool_timeouts
        .insert("get_weather_data".into(), Duration::from_millis(10));
    let runtime = looping(provider, &registry, config);
    let selection = ToolSelection::all(&registry);
    let query = Query::new("météo");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    let step = &result.trace.steps()[0];
    assert_eq!(step.status, StepStatus::ToolError);
    assert!(step.observation.render().contains("timed out"));
    assert_eq!(result.terminated_reason, TerminatedReason::FinalAnswer);
}

#[tokio::test]
async fn provider_timeout_is_fatal() {
    let registry = Arc::new(catalog());
    let config = LoopConfig {
        provider_timeout: Duration::from_millis(20),
        ..LoopConfig::default()
    };
    let runtime = looping(Arc::new(StalledProvider), &registry, config);
    let selection = ToolSelection::all(&registry);
    let query = Query::new("météo");

    let started = std::time::Instant::now();
    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.terminated_reason, TerminatedReason::FatalError);
    assert!(result.trace.is_empty());
    let failure = result.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Provider);
    assert!(failure.message.contains("timed out"));
}

#[tokio::test]
async fn tool_call_is_cut_off_at_loop_deadline() {
    // The descriptor's own timeout is far longer than the loop budget.
    let registry = Arc::new(
        RegistryBuilder::new()
            .register(weather_descriptor().with_timeout(Duration::from_secs(30)), HangingTool)
            .build()
            .unwrap(),
    );
    let provider = scripted(|_| invoke("get_weather_data", paris()));
    let config = LoopConfig {
        loop_timeout: Duration::from_millis(100),
        ..LoopConfig::default()
    };
    let runtime = looping(provider, &registry, config);
    let selection = ToolSelection::all(&registry);
    let query = Query::new("météo");

    let started = std::time::Instant::now();
    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.iteration_count, 1);
    let step = &result.trace.steps()[0];
    assert_eq!(step.status, StepStatus::ToolError);
    assert!(step.observation.render().contains("timed out"));
    assert_eq!(result.terminated_reason, TerminatedReason::BudgetExceeded);
    assert_eq!(result.failure.unwrap().kind, FailureKind::WallClock);
}

#[tokio::test]
async fn schema_constraints_reject_out_of_range_arguments() {
    let registry = Arc::new(
        RegistryBuilder::new()
            .register(
                ToolDescriptor::new("get_weather_data", "Weather forecast").with_schema(json!({
                    "type": "object",
                    "properties": {
                        "location": {"type": "string"},
                        "days": {"type": "integer", "minimum": 1, "maximum": 16},
                        "unit": {"enum": ["metric", "imperial"]}
                    },
                    "required": ["location"],
                    "additionalProperties": false
                })),
                stub(),
            )
            .build()
            .unwrap(),
    );
    let provider = scripted(|request| match request.trace.len() {
        0 => invoke("get_weather_data", json!({"location": "Paris", "days": -40, "unit": "kelvin"})),
        1 => invoke("get_weather_data", json!({"location": "Paris", "bogus": true})),
        _ => answer("unreachable"),
    });
    let runtime = looping(provider, &registry, LoopConfig::default());
    let selection = ToolSelection::all(&registry);
    let query = Query::new("météo");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    assert_eq!(result.terminated_reason, TerminatedReason::FatalError);
    assert_eq!(result.failure.unwrap().kind, FailureKind::ParseErrors);
    let first = result.trace.steps()[0].observation.render();
    assert!(first.contains("/days"));
    assert!(first.contains("/unit"));
    assert!(result.trace.steps()[1].observation.render().contains("bogus"));
    assert!(result.tools_invoked.is_empty());
}

#[tokio::test]
async fn uncompilable_tool_schema_fails_construction() {
    let registry = Arc::new(
        RegistryBuilder::new()
            .register(
                ToolDescriptor::new("broken", "Broken").with_schema(json!({"type": 12})),
                stub(),
            )
            .build()
            .unwrap(),
    );
    let result = ReasoningLoop::new(scripted(|_| answer("x")), registry, LoopConfig::default());
    assert!(matches!(result, Err(AgentError::Config { .. })));
}

// ═══════════════════════════════════════════════════════════════════════
//  Cancellation and streaming
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn cancellation_before_first_step() {
    let registry = Arc::new(catalog());
    let provider = scripted(|_| invoke("get_weather_data", paris()));
    let runtime = looping(provider, &registry, LoopConfig::default());
    let selection = ToolSelection::all(&registry);
    let query = Query::new("météo");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = runtime
        .run(&query, &selection, None, RunOptions::default().with_cancel(cancel))
        .await;

    assert_eq!(result.terminated_reason, TerminatedReason::FatalError);
    assert!(result.was_cancelled());
    assert_eq!(result.iteration_count, 0);
}

#[tokio::test]
async fn cancellation_during_tool_lets_call_finish() {
    let cancel = CancellationToken::new();
    let registry = single_tool_registry(CancellingTool {
        cancel: cancel.clone(),
    });
    let provider = scripted(|_| invoke("get_weather_data", paris()));
    let runtime = looping(provider, &registry, LoopConfig::default());
    let selection = ToolSelection::all(&registry);
    let query = Query::new("météo");

    let result = runtime
        .run(&query, &selection, None, RunOptions::default().with_cancel(cancel))
        .await;

    assert!(result.was_cancelled());
    assert_eq!(result.terminated_reason, TerminatedReason::FatalError);
    assert_eq!(result.iteration_count, 1);
    let step = &result.trace.steps()[0];
    assert_eq!(step.status, StepStatus::Ok);
    assert_eq!(step.observation.render(), "finished despite cancellation");
}

#[tokio::test]
async fn streamed_steps_match_trace_order() {
    let registry = Arc::new(catalog());
    let provider = scripted(|request| match request.trace.len() {
        0 => invoke("get_weather_data", paris()),
        1 => invoke("get_weather_data", json!({})),
        2 => invoke("diagnose_disease", json!({})),
        _ => answer("done"),
    });
    let runtime = looping(provider, &registry, LoopConfig::default());
    let selection = ToolSelection::all(&registry);
    let query = Query::new("météo");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let result = runtime
        .run(&query, &selection, None, RunOptions::default().with_step_stream(tx))
        .await;

    let mut streamed = Vec::new();
    while let Ok(step) = rx.try_recv() {
        streamed.push((step.index, step.tool_name, step.status));
    }
    let traced: Vec<_> = result
        .trace
        .iter()
        .map(|s| (s.index, s.tool_name.clone(), s.status))
        .collect();
    assert_eq!(streamed, traced);
    assert_eq!(streamed.len(), 3);
}

// ═══════════════════════════════════════════════════════════════════════
//  Delegation and synthesis
// ═══════════════════════════════════════════════════════════════════════

fn agent_registry() -> Arc<CapabilityRegistry> {
    let health = RegistryBuilder::new()
        .register(
            ToolDescriptor::new("diagnose_disease", "Disease diagnosis"),
            stub(),
        )
        .build()
        .unwrap();
    let compliance = RegistryBuilder::new()
        .register(
            ToolDescriptor::new("check_regulations", "Product regulations"),
            stub(),
        )
        .build()
        .unwrap();

    Arc::new(
        RegistryBuilder::new()
            .register_delegate(
                ToolDescriptor::new("consult_crop_health_agent", "Crop health specialist")
                    .with_schema(delegate_schema()),
                health,
            )
            .register_delegate(
                ToolDescriptor::new("consult_compliance_agent", "Regulatory specialist")
                    .with_schema(delegate_schema()),
                compliance,
            )
            .build()
            .unwrap(),
    )
}

fn question(text: &str) -> Value {
    json!({ "question": text })
}

#[tokio::test]
async fn conflicting_delegated_sources_are_disclosed() {
    let registry = agent_registry();
    let provider = scripted(|request| match request.scope {
        Some(scope) if scope.agent == "consult_crop_health_agent" => {
            answer("Dose maximale : 1,5 l/ha en un seul passage.")
        }
        Some(_) => answer("La dose maximale autorisée est de 1 l/ha."),
        None => match request.trace.len() {
            0 => invoke("consult_crop_health_agent", question("Dose de fongicide ?")),
            1 => invoke("consult_compliance_agent", question("Dose maximale autorisée ?")),
            _ => answer("Voici les recommandations des deux spécialistes."),
        },
    });
    let runtime = looping(provider, &registry, LoopConfig::default());
    let selection = ToolSelection::all(&registry);
    let query = Query::with_context("Quelle dose de fongicide ?", [("crop", "blé")]);

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    assert_eq!(result.terminated_reason, TerminatedReason::FinalAnswer);
    assert_eq!(
        result.sources,
        vec!["consult_crop_health_agent", "consult_compliance_agent"]
    );
    assert!(result.final_answer.contains("1,5 l/ha"));
    assert!(result.final_answer.contains("1 l/ha"));
    assert!(result.final_answer.contains("Discrepancies"));

    let numeric = result
        .conflicts
        .iter()
        .find(|c| c.kind == ConflictKind::Numeric)
        .expect("numeric conflict");
    assert_eq!(numeric.claims.len(), 2);
    assert!(numeric.conservative_default.starts_with("1 l/ha"));
    assert!(result.ensure_consistent().is_err());
}

#[tokio::test]
async fn buffer_zone_conflict_defaults_to_widest() {
    let registry = agent_registry();
    let provider = scripted(|request| match request.scope {
        Some(scope) if scope.agent == "consult_crop_health_agent" => {
            answer("Traitement possible, ZNT : 5 m le long du fossé.")
        }
        Some(_) => answer("Pour ce produit la ZNT est de 20 m."),
        None => match request.trace.len() {
            0 => invoke("consult_crop_health_agent", question("Peut-on traiter près du fossé ?")),
            1 => invoke("consult_compliance_agent", question("Quelle ZNT ?")),
            _ => answer("Deux avis sur la zone non traitée."),
        },
    });
    let runtime = looping(provider, &registry, LoopConfig::default());
    let selection = ToolSelection::all(&registry);
    let query = Query::new("Traitement près d'un fossé");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    let numeric = result
        .conflicts
        .iter()
        .find(|c| c.kind == ConflictKind::Numeric)
        .expect("numeric conflict");
    assert_eq!(numeric.conservative_default, "20 m (highest value)");
    assert!(result.final_answer.contains("Conservative default: 20 m"));
}

#[tokio::test]
async fn single_delegated_source_is_attributed() {
    let registry = agent_registry();
    let provider = scripted(|request| match request.scope {
        Some(_) => answer("Rouille jaune probable."),
        None if request.trace.is_empty() => {
            invoke("consult_crop_health_agent", question("Quelle maladie ?"))
        }
        None => answer("Il s'agit probablement de rouille jaune."),
    });
    let runtime = looping(provider, &registry, LoopConfig::default());
    let selection = ToolSelection::all(&registry);
    let query = Query::new("Taches jaunes sur blé");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    assert!(result.conflicts.is_empty());
    assert!(result.final_answer.ends_with("Source: consult_crop_health_agent"));
    result.ensure_consistent().unwrap();

    let Observation::Delegated { agent, result: nested } = &result.trace.steps()[0].observation else {
        panic!("expected delegated observation");
    };
    assert_eq!(agent, "consult_crop_health_agent");
    assert_eq!(nested.terminated_reason, TerminatedReason::FinalAnswer);
    assert_eq!(nested.selected_tools, vec!["diagnose_disease"]);
}

#[tokio::test]
async fn delegated_budget_is_independent_of_parent() {
    let registry = agent_registry();
    let provider = scripted(|request| match request.scope {
        Some(_) => invoke("diagnose_disease", json!({})),
        None if request.trace.is_empty() => {
            invoke("consult_crop_health_agent", question("Diagnostic ?"))
        }
        None => answer("Diagnostic incomplet."),
    });
    let config = LoopConfig {
        max_iterations: 2,
        delegation: DelegationConfig {
            max_iterations: 3,
            max_depth: 2,
        },
        ..LoopConfig::default()
    };
    let runtime = looping(provider, &registry, config);
    let selection = ToolSelection::all(&registry);
    let query = Query::new("Taches sur les feuilles");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    assert_eq!(result.terminated_reason, TerminatedReason::FinalAnswer);
    assert_eq!(result.iteration_count, 1);
    let step = &result.trace.steps()[0];
    assert_eq!(step.status, StepStatus::Ok);
    let Observation::Delegated { result: nested, .. } = &step.observation else {
        panic!("expected delegated observation");
    };
    assert_eq!(nested.iteration_count, 3);
    assert_eq!(nested.terminated_reason, TerminatedReason::BudgetExceeded);
    assert!(nested.partial);
}

#[tokio::test]
async fn delegation_beyond_depth_limit_is_a_tool_error() {
    let registry = agent_registry();
    let provider = scripted(|request| match request.trace.len() {
        0 => invoke("consult_compliance_agent", question("ZNT ?")),
        _ => answer("Je n'ai pas pu consulter le spécialiste."),
    });
    let config = LoopConfig {
        delegation: DelegationConfig {
            max_iterations: 5,
            max_depth: 0,
        },
        ..LoopConfig::default()
    };
    let runtime = looping(provider, &registry, config);
    let selection = ToolSelection::all(&registry);
    let query = Query::new("ZNT ?");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    let step = &result.trace.steps()[0];
    assert_eq!(step.status, StepStatus::ToolError);
    assert!(step.observation.render().contains("depth limit"));
    assert!(result.sources.is_empty());
}

#[tokio::test]
async fn fatal_nested_loop_becomes_tool_error() {
    let registry = agent_registry();
    let provider = scripted(|request| match request.scope {
        Some(_) => Err(AgentError::ProviderFailed {
            reason: "model overloaded".into(),
        }),
        None if request.trace.is_empty() => {
            invoke("consult_compliance_agent", question("Délai avant récolte ?"))
        }
        None => answer("Le spécialiste n'a pas répondu."),
    });
    let runtime = looping(provider, &registry, LoopConfig::default());
    let selection = ToolSelection::all(&registry);
    let query = Query::new("DAR ?");

    let result = runtime.run(&query, &selection, None, RunOptions::default()).await;

    assert_eq!(result.terminated_reason, TerminatedReason::FinalAnswer);
    let step = &result.trace.steps()[0];
    assert_eq!(step.status, StepStatus::ToolError);
    assert!(matches!(step.observation, Observation::Delegated { .. }));
    assert!(result.sources.is_empty());
    assert_eq!(result.tools_invoked, vec!["consult_compliance_agent"]);
}

// ═══════════════════════════════════════════════════════════════════════
//  Configuration files
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn toml_config_file_loads_with_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[executor]
max_iterations = 4
tool_timeouts_secs = {{ diagnose_disease = 45.0 }}

[selector]
max_tools = 3
"#
    )
    .unwrap();

    let config = AgrisageConfig::load(file.path()).unwrap();
    assert_eq!(config.executor.max_iterations, 4);
    assert_eq!(config.selector.max_tools, 3);
    assert_eq!(config.executor.loop_timeout_secs, 180.0);
    assert_eq!(
        config.loop_config().unwrap().tool_timeout("diagnose_disease"),
        Duration::from_secs(45)
    );
    config.validate().unwrap();
}

#[test]
fn json_config_file_loads_by_extension() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, r#"{{"delegation": {{"max_iterations": 2, "max_depth": 1}}}}"#).unwrap();

    let config = AgrisageConfig::load(file.path()).unwrap();
    assert_eq!(config.delegation.max_iterations, 2);
    assert_eq!(config.delegation.max_depth, 1);
    assert_eq!(config.executor.max_iterations, 8);
}

#[test]
fn malformed_config_file_is_a_config_error() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(file, "executor = [").unwrap();
    assert!(matches!(
        AgrisageConfig::load(file.path()),
        Err(AgentError::Config { .. })
    ));
}
