//! Scripted models shared by unit tests.

use crate::error::{AgentError, Result};
use crate::llm::{ChatMessage, GenerationConfig, Model, ModelResponse, TokenUsage, ToolCall};
use crate::tools::{ToolDescriptor, FINAL_ANSWER_TOOL};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

enum WhenEmpty {
    Fail,
    Respond(ModelResponse),
}

/// Model that replays a fixed script, then either fails or repeats a response
pub(crate) struct ScriptedModel {
    id: String,
    service: String,
    script: Mutex<VecDeque<Result<ModelResponse>>>,
    when_empty: WhenEmpty,
    latency: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    /// A model whose every call fails with a retryable timeout
    pub fn failing(id: &str) -> Self {
        Self {
            id: id.to_string(),
            service: id.to_string(),
            script: Mutex::new(VecDeque::new()),
            when_empty: WhenEmpty::Fail,
            latency: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A model that always returns `response`
    pub fn repeating(id: &str, response: ModelResponse) -> Self {
        Self {
            when_empty: WhenEmpty::Respond(response),
            ..Self::failing(id)
        }
    }

    pub fn then(mut self, result: Result<ModelResponse>) -> Self {
        self.script.get_mut().unwrap().push_back(result);
        self
    }

    pub fn with_service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn service_name(&self) -> &str {
        &self.service
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDescriptor],
        _config: &GenerationConfig,
    ) -> Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => match &self.when_empty {
                WhenEmpty::Fail => Err(AgentError::TimeoutError(format!("{} unavailable", self.id))),
                WhenEmpty::Respond(response) => Ok(response.clone()),
            },
        }
    }
}

pub(crate) fn tool_call(name: &str, arguments: Value) -> ToolCall {
    let arguments = arguments.as_object().cloned().unwrap_or_default();
    ToolCall::new(name, arguments)
}

pub(crate) fn call_response(calls: Vec<ToolCall>) -> ModelResponse {
    ModelResponse::tool_calls(calls).with_usage(TokenUsage::new(10, 5))
}

pub(crate) fn final_answer(answer: Value) -> ModelResponse {
    call_response(vec![tool_call(FINAL_ANSWER_TOOL, json!({ "answer": answer }))])
}
