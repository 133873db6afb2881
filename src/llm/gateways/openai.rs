//! OpenAI-compatible model gateway.
//!
//! Works against any server exposing the `/chat/completions` API: OpenAI itself,
//! vLLM, LM Studio, llama.cpp's server and most hosted inference providers.

use crate::error::{AgentError, Result};
use crate::llm::model::{GenerationConfig, Model};
use crate::llm::models::{ChatMessage, MessageRole, ModelResponse, TokenUsage, ToolCall};
use crate::tools::ToolDescriptor;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

/// Configuration for connecting to an OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Option<std::time::Duration>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            base_url: std::env::var("OPENAI_API_ENDPOINT")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            timeout: None,
        }
    }
}

/// Model served by an OpenAI-compatible endpoint.
///
/// The circuit-breaker service name is the endpoint's host, so every model
/// behind the same server shares one breaker.
pub struct OpenAIServerModel {
    client: Client,
    config: OpenAIConfig,
    model_id: String,
    service: String,
}

impl OpenAIServerModel {
    /// Create a model with the default configuration (environment driven).
    pub fn new(model_id: impl Into<String>) -> Result<Self> {
        Self::with_config(model_id, OpenAIConfig::default())
    }

    /// Create a model with a custom configuration.
    pub fn with_config(model_id: impl Into<String>, config: OpenAIConfig) -> Result<Self> {
        let mut client_builder = Client::builder();

        if let Some(timeout) = config.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        let client = client_builder.build()?;
        let service = service_from_url(&config.base_url);

        Ok(Self {
            client,
            config,
            model_id: model_id.into(),
            service,
        })
    }

    /// Create a model with an explicit API key and base URL.
    pub fn with_api_key_and_base_url(
        model_id: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        Self::with_config(
            model_id,
            OpenAIConfig {
                api_key: api_key.into(),
                base_url: base_url.into(),
                ..Default::default()
            },
        )
    }

    fn build_body(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
    ) -> Result<Value> {
        let mut body = json!({
            "model": self.model_id,
            "messages": adapt_messages_to_openai(messages),
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
        });

        if !config.stop_sequences.is_empty() {
            body["stop"] = json!(config.stop_sequences);
        }

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
            body["tool_choice"] = json!("auto");
        }

        Ok(body)
    }
}

/// Host portion of a base URL, or the URL itself when it does not parse.
fn service_from_url(base_url: &str) -> String {
    reqwest::Url::parse(base_url)
        .ok()
        .and_then(|url| {
            url.host_str().map(|host| match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            })
        })
        .unwrap_or_else(|| base_url.to_string())
}

/// Adapt conversation messages to the OpenAI wire format.
pub fn adapt_messages_to_openai(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            MessageRole::System => json!({"role": "system", "content": msg.text()}),
            MessageRole::User => json!({"role": "user", "content": msg.text()}),
            MessageRole::Assistant => {
                let mut value = json!({"role": "assistant", "content": msg.content});
                if !msg.tool_calls.is_empty() {
                    let calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": Value::Object(call.arguments.clone()).to_string(),
                                }
                            })
                        })
                        .collect();
                    value["tool_calls"] = Value::Array(calls);
                }
                value
            }
            MessageRole::Tool => json!({
                "role": "tool",
                "content": msg.text(),
                "tool_call_id": msg.tool_call_id.as_deref().unwrap_or_default(),
            }),
        })
        .collect()
}

/// Convert OpenAI tool calls into [`ToolCall`]s.
///
/// Arguments arrive as a JSON-encoded string. Anything that does not decode to an
/// object is kept under an `input` key so the tool still sees what the model sent.
pub fn convert_tool_calls(tool_calls: &[Value]) -> Vec<ToolCall> {
    tool_calls
        .iter()
        .filter_map(|tc| {
            let name = tc["function"]["name"].as_str()?.to_string();
            let arguments = match &tc["function"]["arguments"] {
                Value::String(raw) => decode_arguments(raw),
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };

            let mut call = ToolCall::new(name, arguments);
            if let Some(id) = tc["id"].as_str() {
                call.id = id.to_string();
            }
            Some(call)
        })
        .collect()
}

fn decode_arguments(raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            let mut map = Map::new();
            map.insert("input".to_string(), other);
            map
        }
        Err(_) => {
            let mut map = Map::new();
            map.insert("input".to_string(), Value::String(raw.to_string()));
            map
        }
    }
}

fn parse_usage(body: &Value) -> Option<TokenUsage> {
    let usage = body.get("usage")?;
    Some(TokenUsage::new(
        usage["prompt_tokens"].as_u64()?,
        usage["completion_tokens"].as_u64().unwrap_or(0),
    ))
}

#[async_trait]
impl Model for OpenAIServerModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn service_name(&self) -> &str {
        &self.service
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
    ) -> Result<ModelResponse> {
        info!(model = %self.model_id, "Delegating to OpenAI-compatible endpoint");
        debug!(message_count = messages.len(), tool_count = tools.len(), "Building request");

        let body = self.build_body(messages, tools, config)?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::ApiError {
                status: Some(status.as_u16()),
                message: format!("OpenAI API error: {}", error_text),
            });
        }

        let response_body: Value = response.json().await?;
        let message = &response_body["choices"][0]["message"];
        if message.is_null() {
            return Err(AgentError::GatewayError("Response contained no choices".to_string()));
        }

        let content = message["content"].as_str().map(String::from);
        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| convert_tool_calls(calls))
            .unwrap_or_default();

        Ok(ModelResponse {
            content,
            tool_calls,
            token_usage: parse_usage(&response_body),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/models", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .send()
            .await?;

        Ok(response.status().is_success())
    }
}
