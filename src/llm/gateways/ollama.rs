use crate::error::{AgentError, Result};
use crate::llm::model::{GenerationConfig, Model};
use crate::llm::models::{ChatMessage, MessageRole, ModelResponse, TokenUsage, ToolCall};
use crate::tools::ToolDescriptor;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info};

/// Configuration for connecting to an Ollama server
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub host: String,
    pub timeout: Option<std::time::Duration>,
    pub headers: HashMap<String, String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            timeout: None,
            headers: HashMap::new(),
        }
    }
}

/// Model served by a local Ollama instance through its native chat API
pub struct OllamaModel {
    client: Client,
    config: OllamaConfig,
    model_id: String,
}

impl OllamaModel {
    /// Create a model with default configuration
    pub fn new(model_id: impl Into<String>) -> Result<Self> {
        Self::with_config(model_id, OllamaConfig::default())
    }

    /// Create a model with custom configuration
    pub fn with_config(model_id: impl Into<String>, config: OllamaConfig) -> Result<Self> {
        let mut client_builder = Client::builder();

        if let Some(timeout) = config.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        let client = client_builder.build()?;

        Ok(Self {
            client,
            config,
            model_id: model_id.into(),
        })
    }

    /// Create a model talking to a custom host
    pub fn with_host(model_id: impl Into<String>, host: impl Into<String>) -> Result<Self> {
        Self::with_config(
            model_id,
            OllamaConfig {
                host: host.into(),
                ..Default::default()
            },
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, format!("{}{}", self.config.host, path));
        for (name, value) in &self.config.headers {
            builder = builder.header(name, value);
        }
        builder
    }
}

fn adapt_messages_to_ollama(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
                MessageRole::Tool => "tool",
            };
            let mut value = json!({"role": role, "content": msg.text()});

            if !msg.tool_calls.is_empty() {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments,
                            }
                        })
                    })
                    .collect();
                value["tool_calls"] = Value::Array(calls);
            }
            value
        })
        .collect()
}

fn extract_ollama_options(config: &GenerationConfig) -> Value {
    let mut options = json!({
        "temperature": config.temperature,
        "num_predict": config.max_tokens,
    });
    if !config.stop_sequences.is_empty() {
        options["stop"] = json!(config.stop_sequences);
    }
    options
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(calls) = message["tool_calls"].as_array() else {
        return vec![];
    };

    calls
        .iter()
        .filter_map(|call| {
            let name = call["function"]["name"].as_str()?;
            let arguments = call["function"]["arguments"].as_object().cloned().unwrap_or_default();
            Some(ToolCall::new(name, arguments))
        })
        .collect()
}

#[async_trait]
impl Model for OllamaModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn service_name(&self) -> &str {
        &self.config.host
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
    ) -> Result<ModelResponse> {
        info!(model = %self.model_id, "Delegating to Ollama for completion");
        debug!("Message count: {}", messages.len());

        let mut body = json!({
            "model": self.model_id,
            "messages": adapt_messages_to_ollama(messages),
            "options": extract_ollama_options(config),
            "stream": false
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }

        let response = self.request(reqwest::Method::POST, "/api/chat").json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::ApiError {
                status: Some(status.as_u16()),
                message: format!("Ollama API error: {}", error_text),
            });
        }

        let response_body: Value = response.json().await?;
        let message = &response_body["message"];

        let token_usage = response_body["prompt_eval_count"].as_u64().map(|input| {
            TokenUsage::new(input, response_body["eval_count"].as_u64().unwrap_or(0))
        });

        Ok(ModelResponse {
            content: message["content"].as_str().filter(|s| !s.is_empty()).map(String::from),
            tool_calls: parse_tool_calls(message),
            token_usage,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self.request(reqwest::Method::GET, "/api/tags").send().await?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_config_default_host() {
        let config = OllamaConfig {
            host: "http://example:11434".to_string(),
            ..Default::default()
        };
        let model = OllamaModel::with_config("qwen3:8b", config).unwrap();
        assert_eq!(model.model_id(), "qwen3:8b");
        assert_eq!(model.service_name(), "http://example:11434");
    }

    #[test]
    fn test_extract_options() {
        let config = GenerationConfig {
            temperature: 0.2,
            max_tokens: 256,
            stop_sequences: vec!["Observation:".to_string()],
        };
        let options = extract_ollama_options(&config);

        assert_eq!(options["num_predict"], 256);
        assert_eq!(options["stop"][0], "Observation:");
    }

    #[test]
    fn test_adapt_messages_keeps_tool_call_arguments_as_objects() {
        let mut call = ToolCall::new("search", Default::default());
        call.arguments.insert("q".to_string(), json!("ollama"));
        let messages = vec![
            ChatMessage::assistant_tool_calls(None, vec![call]),
            ChatMessage::tool("id", "result"),
        ];

        let adapted = adapt_messages_to_ollama(&messages);

        assert_eq!(adapted[0]["tool_calls"][0]["function"]["arguments"]["q"], "ollama");
        assert_eq!(adapted[1]["role"], "tool");
    }

    #[tokio::test]
    async fn test_generate_parses_tool_calls_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(
                r#"{"message":{"role":"assistant","content":"","tool_calls":[
                    {"function":{"name":"final_answer","arguments":{"answer":"42"}}}]},
                    "prompt_eval_count":20,"eval_count":5}"#,
            )
            .create_async()
            .await;

        let model = OllamaModel::with_host("qwen3:8b", server.url()).unwrap();
        let response = model
            .generate(&[ChatMessage::user("6*7?")], &[], &GenerationConfig::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(response.content.is_none());
        assert_eq!(response.tool_calls[0].name, "final_answer");
        assert_eq!(response.tool_calls[0].arguments["answer"], "42");
        assert_eq!(response.token_usage, Some(TokenUsage::new(20, 5)));
    }

    #[tokio::test]
    async fn test_generate_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(404)
            .with_body("model not found")
            .create_async()
            .await;

        let model = OllamaModel::with_host("missing", server.url()).unwrap();
        let err = model
            .generate(&[ChatMessage::user("hi")], &[], &GenerationConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::ApiError { status: Some(404), .. }));
    }
}
