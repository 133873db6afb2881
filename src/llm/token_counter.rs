//! Token counting with tiktoken.
//!
//! Providers usually report token usage with each completion. When one does not,
//! the agent loop falls back to a [`TokenCounter`] estimate so that token budgets
//! keep working.

use crate::error::{AgentError, Result};
use crate::llm::models::{ChatMessage, ModelResponse, TokenUsage};
use tiktoken_rs::CoreBPE;

/// Per-message framing overhead used by chat-formatted prompts.
const MESSAGE_OVERHEAD: usize = 4;

/// Counts tokens for messages and responses using a tiktoken encoding.
///
/// # Examples
///
/// ```
/// use smolagents::llm::TokenCounter;
///
/// let counter = TokenCounter::cl100k().unwrap();
/// assert!(counter.count_tokens("Hello, world!") > 0);
/// ```
pub struct TokenCounter {
    tokenizer: CoreBPE,
}

impl TokenCounter {
    /// Creates a counter for the named encoding.
    ///
    /// Supported encodings are `cl100k_base`, `p50k_base` and `r50k_base`.
    pub fn new(encoding: &str) -> Result<Self> {
        let tokenizer = match encoding {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "r50k_base" => tiktoken_rs::r50k_base(),
            _ => {
                return Err(AgentError::ConfigError(format!(
                    "Unsupported encoding: {}",
                    encoding
                )))
            }
        }
        .map_err(|e| AgentError::ConfigError(format!("Failed to load {}: {}", encoding, e)))?;

        Ok(Self { tokenizer })
    }

    /// Counter for `cl100k_base`, the encoding used by most chat models.
    pub fn cl100k() -> Result<Self> {
        Self::new("cl100k_base")
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.encode_with_special_tokens(text).len()
    }

    /// Counts the prompt tokens of a conversation, tool calls included.
    pub fn count_messages(&self, messages: &[ChatMessage]) -> usize {
        messages
            .iter()
            .map(|message| {
                let calls: usize = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        self.count_tokens(&call.name)
                            + self.count_tokens(
                                &serde_json::Value::Object(call.arguments.clone()).to_string(),
                            )
                    })
                    .sum();
                MESSAGE_OVERHEAD + self.count_tokens(message.text()) + calls
            })
            .sum()
    }

    /// Estimates the usage of one model call.
    pub fn estimate_usage(&self, messages: &[ChatMessage], response: &ModelResponse) -> TokenUsage {
        let mut output = self.count_tokens(response.content.as_deref().unwrap_or(""));
        for call in &response.tool_calls {
            output += self.count_tokens(&call.name);
            output +=
                self.count_tokens(&serde_json::Value::Object(call.arguments.clone()).to_string());
        }

        tracing::debug!(messages = messages.len(), output_tokens = output, "Estimated token usage");
        TokenUsage::new(self.count_messages(messages) as u64, output as u64)
    }
}
