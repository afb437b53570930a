//! OpenAI-compatible chat completion client.
//!
//! Talks to the **OpenAI Chat Completions API** and any compatible endpoint
//! (Ollama, vLLM, Together, Mistral...) in non-streaming mode.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::config::LlmSettings;
use crate::error::{AgentError, Result};
use crate::llm::types::{ChatRequest, LlmResponse, Message, Role, ToolCall};
use crate::provider::ToolDefinition;

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Default OpenAI API base URL.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for one completion endpoint.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Model used when a request does not name one.
    pub default_model: String,
    /// Default maximum tokens per response.
    pub max_tokens: u32,
    /// HTTP request timeout.
    pub request_timeout: Duration,
}

impl LlmClientConfig {
    /// Create a configuration for the OpenAI API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::openai_compatible(api_key, model, OPENAI_BASE_URL)
    }

    /// Create a configuration for any OpenAI-compatible API.
    pub fn openai_compatible(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            default_model: model.into(),
            max_tokens: 2048,
            request_timeout: Duration::from_secs(120),
        }
    }

    /// Create a configuration from the `[llm]` config section.
    pub fn from_settings(api_key: impl Into<String>, settings: &LlmSettings) -> Self {
        Self {
            max_tokens: settings.max_tokens,
            ..Self::openai_compatible(api_key, &settings.model, &settings.base_url)
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for an OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: Arc<LlmClientConfig>,
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a new client with the given configuration.
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AgentError::MissingApiKey {
                provider: config.base_url.clone(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    /// The model used when a request does not name one.
    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    /// Send a chat request and return the parsed response.
    pub async fn chat(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let body = self.build_request_body(request);
        let resp = self.send_request(&body).await?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to read response body: {e}"),
            })?;

        if !status.is_success() {
            return Err(AgentError::LlmRequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }

        let v: Value = serde_json::from_str(&text).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("invalid JSON response: {e}"),
        })?;

        parse_openai_response(&v)
    }

    // -- Request building -----------------------------------------------------

    /// Build the JSON body for the Chat Completions API.
    fn build_request_body(&self, request: &ChatRequest) -> Value {
        let model = if request.model.is_empty() {
            self.config.default_model.as_str()
        } else {
            request.model.as_str()
        };

        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages_to_openai(&request.messages),
        });

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        if !request.tools.is_empty() {
            body["tools"] = tools_to_openai(&request.tools);
        }

        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        body
    }

    /// Send the HTTP request to the `/chat/completions` endpoint.
    async fn send_request(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", self.config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("invalid authorization header: {e}"),
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        tracing::debug!(url = %url, model = %body["model"], "sending LLM request");

        Ok(self.http.post(&url).headers(headers).json(body).send().await?)
    }
}

// ===========================================================================
// Wire format conversion (free functions)
// ===========================================================================

/// Convert messages to the Chat Completions wire format.
///
/// System messages stay in the `messages` array, tool calls go in
/// `assistant.tool_calls`, and tool results use `role: "tool"` with a
/// `tool_call_id`.
pub fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::System => json!({"role": "system", "content": msg.content}),
            Role::User => json!({"role": "user", "content": msg.content}),
            Role::Assistant if msg.tool_calls.is_empty() => {
                json!({"role": "assistant", "content": msg.content})
            }
            Role::Assistant => {
                let tool_calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        // Raw unparseable text is sent back as it came in.
                        let arguments = match &tc.arguments {
                            Value::String(raw) => raw.clone(),
                            other => other.to_string(),
                        };
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {"name": tc.name, "arguments": arguments}
                        })
                    })
                    .collect();

                let mut m = json!({"role": "assistant", "tool_calls": tool_calls});
                if !msg.content.is_empty() {
                    m["content"] = json!(msg.content);
                }
                m
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id,
                "content": msg.content,
            }),
        })
        .collect()
}

/// Convert tool definitions into the Chat Completions format.
///
/// Each tool is wrapped in `{"type": "function", "function": {...}}`.
pub fn tools_to_openai(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect();
    json!(tool_values)
}

/// Parse a Chat Completions response into an [`LlmResponse`].
///
/// Tool-call arguments that are not valid JSON are kept verbatim as a
/// string so the reasoning loop can report them back to the model.
pub fn parse_openai_response(v: &Value) -> Result<LlmResponse> {
    let message = &v["choices"][0]["message"];

    if message.is_null() {
        return Err(AgentError::LlmParseFailed {
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    let content = message["content"].as_str().unwrap_or_default().to_owned();

    if let Some(tool_calls_arr) = message["tool_calls"].as_array()
        && !tool_calls_arr.is_empty()
    {
        let calls = tool_calls_arr
            .iter()
            .map(|tc| {
                let func = &tc["function"];
                let name = func["name"].as_str().unwrap_or_default().to_owned();
                let args_str = func["arguments"].as_str().unwrap_or("{}");
                let arguments = serde_json::from_str(args_str).unwrap_or_else(|e| {
                    tracing::warn!(tool = %name, error = %e, "tool call arguments are not valid JSON");
                    Value::String(args_str.to_owned())
                });

                ToolCall {
                    id: tc["id"].as_str().unwrap_or_default().to_owned(),
                    name,
                    arguments,
                }
            })
            .collect();

        return Ok(LlmResponse::ToolCalls { content, calls });
    }

    Ok(LlmResponse::Text(content))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_config_construction() {
        let config = LlmClientConfig::openai("sk-test-key", "gpt-4o");
        assert_eq!(config.api_key, "sk-test-key");
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.max_tokens, 2048);
    }

    #[test]
    fn compatible_config_trims_trailing_slash() {
        let config =
            LlmClientConfig::openai_compatible("local-key", "llama3", "http://localhost:11434/v1/");
        assert_eq!(config.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn settings_carry_max_tokens() {
        let settings = LlmSettings {
            max_tokens: 512,
            ..LlmSettings::default()
        };
        let config = LlmClientConfig::from_settings("key", &settings);
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.default_model, settings.model);
    }

    #[test]
    fn empty_api_key_returns_error() {
        let config = LlmClientConfig::openai("", "gpt-4o");
        assert!(matches!(
            LlmClient::new(config),
            Err(AgentError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn messages_to_openai_tool_round() {
        let messages = vec![
            Message::system("Agronomy assistant."),
            Message::user("Météo à Paris ?"),
            Message::assistant_tool_calls(
                "Checking the forecast.",
                vec![ToolCall {
                    id: "step_0".into(),
                    name: "get_weather_data".into(),
                    arguments: json!({"location": "Paris"}),
                }],
            ),
            Message::tool_result("step_0", "12 mm"),
        ];
        let wire = messages_to_openai(&messages);

        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["content"], "Checking the forecast.");

        let tc = &wire[2]["tool_calls"][0];
        assert_eq!(tc["id"], "step_0");
        assert_eq!(tc["function"]["name"], "get_weather_data");
        let args: Value = serde_json::from_str(tc["function"]["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(args["location"], "Paris");

        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "step_0");
    }

    #[test]
    fn raw_arguments_are_sent_back_verbatim() {
        let messages = vec![Message::assistant_tool_calls(
            "",
            vec![ToolCall {
                id: "step_0".into(),
                name: "x".into(),
                arguments: Value::String("{broken".into()),
            }],
        )];
        let wire = messages_to_openai(&messages);
        assert_eq!(wire[0]["tool_calls"][0]["function"]["arguments"], "{broken");
        assert!(wire[0].get("content").is_none());
    }

    #[test]
    fn tools_to_openai_format() {
        let tools = vec![ToolDefinition {
            name: "get_weather_data".into(),
            description: "Forecast for a location".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"location": {"type": "string"}},
                "required": ["location"]
            }),
        }];

        let wire = tools_to_openai(&tools);
        let arr = wire.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["type"], "function");
        assert_eq!(arr[0]["function"]["name"], "get_weather_data");
        assert_eq!(arr[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn parse_text_response() {
        let response = json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Pas de pluie prévue."},
                "finish_reason": "stop"
            }]
        });

        let result = parse_openai_response(&response).unwrap();
        assert_eq!(result, LlmResponse::Text("Pas de pluie prévue.".into()));
    }

    #[test]
    fn parse_tool_call_response() {
        let response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_xyz",
                        "type": "function",
                        "function": {
                            "name": "get_weather_data",
                            "arguments": "{\"location\":\"Paris\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });

        match parse_openai_response(&response).unwrap() {
            LlmResponse::ToolCalls { content, calls } => {
                assert!(content.is_empty());
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id, "call_xyz");
                assert_eq!(calls[0].arguments["location"], "Paris");
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn invalid_argument_json_is_kept_raw() {
        let response = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "c",
                        "function": {"name": "t", "arguments": "{location: Paris"}
                    }]
                }
            }]
        });

        match parse_openai_response(&response).unwrap() {
            LlmResponse::ToolCalls { calls, .. } => {
                assert_eq!(calls[0].arguments, Value::String("{location: Paris".into()));
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn missing_message_is_a_parse_error() {
        let err = parse_openai_response(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, AgentError::LlmParseFailed { .. }));
    }

    #[test]
    fn request_body_uses_defaults_and_json_mode() {
        let client = LlmClient::new(LlmClientConfig::openai("sk-test", "gpt-4o")).unwrap();
        let request = ChatRequest {
            messages: vec![Message::user("Hello")],
            temperature: Some(0.5),
            json_mode: true,
            ..ChatRequest::default()
        };

        let body = client.build_request_body(&request);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 2048);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert!(body.get("tools").is_none());
        let temp = body["temperature"].as_f64().unwrap();
        assert!((temp - 0.5).abs() < 1e-6);
    }
}
