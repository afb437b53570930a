//! LLM-backed implementations of the decision and fallback interfaces.
//!
//! - [`LlmCompletionProvider`] turns a reasoning trace into a chat history
//!   and maps the model's reply to a [`Decision`].
//! - [`LlmIntentFallback`] asks the model for intent labels when keyword
//!   matching is not confident enough.

use std::fmt::Write as _;

use async_trait::async_trait;
use serde_json::Value;

use agrisage_intent::{ClassifiedIntent, IntentError, IntentFallback};
use agrisage_kernel::IntentTag;

use crate::config::LlmSettings;
use crate::error::Result;
use crate::llm::client::LlmClient;
use crate::llm::types::{ChatRequest, LlmResponse, Message, ToolCall};
use crate::provider::{CompletionProvider, Decision, DecisionRequest};
use crate::query::Query;
use crate::trace::ReasoningTrace;

// ---------------------------------------------------------------------------
// Completion provider
// ---------------------------------------------------------------------------

/// [`CompletionProvider`] backed by an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct LlmCompletionProvider {
    client: LlmClient,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl LlmCompletionProvider {
    /// Create a provider using the model settings of the `[llm]` section.
    pub fn new(client: LlmClient, settings: &LlmSettings) -> Self {
        Self {
            client,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: Some(settings.max_tokens),
        }
    }

    /// Build the chat request for one decision.
    pub fn build_request(&self, request: &DecisionRequest<'_>) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: trace_to_messages(request),
            tools: request.tools.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            json_mode: false,
        }
    }
}

#[async_trait]
impl CompletionProvider for LlmCompletionProvider {
    async fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision> {
        let chat = self.build_request(request);
        let response = self.client.chat(&chat).await?;
        Ok(response_to_decision(response))
    }
}

/// Map a model reply to a decision.  Only the first tool call is used:
/// steps within one trace are strictly sequential.
pub fn response_to_decision(response: LlmResponse) -> Decision {
    match response {
        LlmResponse::Text(answer) => Decision::Final {
            thought: String::new(),
            answer,
        },
        LlmResponse::ToolCalls { content, calls } => {
            if calls.len() > 1 {
                tracing::debug!(
                    requested = calls.len(),
                    "model requested several tool calls, keeping the first"
                );
            }
            match calls.into_iter().next() {
                Some(call) => Decision::Invoke {
                    thought: content,
                    tool_name: call.name,
                    arguments: call.arguments,
                },
                None => Decision::Final {
                    thought: String::new(),
                    answer: content,
                },
            }
        }
    }
}

fn trace_to_messages(request: &DecisionRequest<'_>) -> Vec<Message> {
    let mut messages = vec![
        Message::system(system_prompt(request)),
        Message::user(request.query.text()),
    ];
    append_trace(&mut messages, request.trace);
    messages
}

fn system_prompt(request: &DecisionRequest<'_>) -> String {
    let mut prompt = String::from(
        "You are AgriSage, an agronomy assistant for farmers. Answer using the \
         tools provided when they help; call one tool at a time. When you have \
         enough information, answer directly in the language of the question. \
         Never invent doses, dates or regulations a tool did not return.",
    );

    if request.tools.is_empty() {
        prompt.push_str(
            "\n\nNo tool applies to this question. Answer only if you can do so \
             reliably; otherwise explain briefly that you cannot help with it.",
        );
    }

    push_context(&mut prompt, request.query);

    if let Some(scope) = request.scope {
        let _ = write!(
            prompt,
            "\n\nYou are acting as the specialised agent `{}` for another assistant. \
             Answer its sub-question concisely and state figures with their units.",
            scope.agent
        );
    }

    prompt
}

fn push_context(prompt: &mut String, query: &Query) {
    if query.context().is_empty() {
        return;
    }
    prompt.push_str("\n\n## Farm context");
    for (key, value) in query.context() {
        let _ = write!(prompt, "\n- {key}: {value}");
    }
}

fn append_trace(messages: &mut Vec<Message>, trace: &ReasoningTrace) {
    for step in trace.iter() {
        let call_id = format!("step_{}", step.index);
        messages.push(Message::assistant_tool_calls(
            step.thought.clone(),
            vec![ToolCall {
                id: call_id.clone(),
                name: step.tool_name.clone(),
                arguments: step.arguments.clone(),
            }],
        ));
        messages.push(Message::tool_result(call_id, step.observation.render()));
    }
}

// ---------------------------------------------------------------------------
// Intent fallback
// ---------------------------------------------------------------------------

/// [`IntentFallback`] that asks the model for a JSON list of intents.
#[derive(Debug, Clone)]
pub struct LlmIntentFallback {
    client: LlmClient,
    model: String,
}

impl LlmIntentFallback {
    pub fn new(client: LlmClient, settings: &LlmSettings) -> Self {
        Self {
            client,
            model: settings.model.clone(),
        }
    }

    fn system_prompt() -> String {
        let labels = IntentTag::ALL
            .iter()
            .map(|tag| tag.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Classify the farmer's question into agronomy intents.\n\
             Allowed labels: {labels}.\n\
             Respond with JSON only, in this exact structure:\n\
             {{\"intents\": [{{\"tag\": \"WEATHER\", \"confidence\": 0.8}}]}}\n\
             Use an empty list when no label applies."
        )
    }
}

#[async_trait]
impl IntentFallback for LlmIntentFallback {
    async fn classify(&self, text: &str) -> agrisage_intent::Result<Vec<ClassifiedIntent>> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::system(Self::system_prompt()), Message::user(text)],
            temperature: Some(0.0),
            max_tokens: Some(256),
            json_mode: true,
            ..ChatRequest::default()
        };

        let response = self
            .client
            .chat(&request)
            .await
            .map_err(|e| IntentError::FallbackFailed {
                reason: e.to_string(),
            })?;

        let body = match response {
            LlmResponse::Text(body) => body,
            LlmResponse::ToolCalls { .. } => {
                return Err(IntentError::FallbackFailed {
                    reason: "expected JSON text, got tool calls".into(),
                });
            }
        };
        parse_intents(&body)
    }
}

/// Parse the fallback's JSON reply.  Unknown labels are skipped.
pub fn parse_intents(text: &str) -> agrisage_intent::Result<Vec<ClassifiedIntent>> {
    let v: Value = serde_json::from_str(extract_json_block(text))?;

    let entries = v["intents"]
        .as_array()
        .ok_or_else(|| IntentError::FallbackFailed {
            reason: "response JSON missing `intents` array".into(),
        })?;

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let tag = entry["tag"].as_str()?.parse::<IntentTag>().ok()?;
            let confidence = entry["confidence"].as_f64()?;
            Some(ClassifiedIntent::new(tag, confidence))
        })
        .collect())
}

/// Extract a JSON block from text that might be wrapped in markdown code
/// fences.
fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let json_start = start + "```json".len();
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let json_start = start + 3;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    trimmed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
