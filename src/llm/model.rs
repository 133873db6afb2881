use crate::error::Result;
use crate::llm::models::{ChatMessage, ModelResponse};
use crate::tools::ToolDescriptor;
use async_trait::async_trait;

/// Configuration for a single generation request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: usize,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_tokens: 4096,
            stop_sequences: Vec::new(),
        }
    }
}

/// Abstract interface for language-model providers
#[async_trait]
pub trait Model: Send + Sync {
    /// Identifier of the model, as sent to the provider
    fn model_id(&self) -> &str;

    /// Key used to share a circuit breaker between models served by the same backend
    fn service_name(&self) -> &str {
        self.model_id()
    }

    /// Generate the next message given the conversation and the available tools
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
    ) -> Result<ModelResponse>;

    /// Check that the backend is reachable
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
