//! Step-by-step record of an agent run.
//!
//! [`Memory`] holds the system prompt, the task and every completed
//! [`ActionStep`]. It is also the source of the conversation replayed to the
//! model at the start of each step.

use crate::error::{AgentError, Result};
use crate::llm::{ChatMessage, TokenUsage, ToolCall};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wall-clock bounds of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl Timing {
    pub fn start_now() -> Self {
        Self {
            start: Utc::now(),
            end: None,
        }
    }

    pub fn finish(&mut self) {
        self.end = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.end
            .map(|end| (end - self.start).num_milliseconds().max(0) as u64)
    }
}

/// Phase of the reasoning loop a step was in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    TaskPrep,
    Generate,
    Parse,
    Execute,
    Evaluate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub phase: LoopPhase,
    pub message: String,
}

impl StepError {
    pub fn new(phase: LoopPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }
}

/// Result of running one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

/// One think-act-observe iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub step_number: usize,
    pub timing: Timing,
    /// Model that produced the output, after any fallback
    pub model_id: Option<String>,
    pub model_output: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_outputs: Vec<ToolOutput>,
    /// Tool results rendered as text for the next prompt
    pub observations: Option<String>,
    pub error: Option<StepError>,
    pub final_output: Option<Value>,
    pub token_usage: TokenUsage,
}

impl ActionStep {
    pub fn new(step_number: usize) -> Self {
        Self {
            step_number,
            timing: Timing::start_now(),
            model_id: None,
            model_output: None,
            tool_calls: Vec::new(),
            tool_outputs: Vec::new(),
            observations: None,
            error: None,
            final_output: None,
            token_usage: TokenUsage::default(),
        }
    }

    pub fn is_final_answer(&self) -> bool {
        self.final_output.is_some()
    }

    fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::new();

        if !self.tool_calls.is_empty() {
            messages.push(ChatMessage::assistant_tool_calls(
                self.model_output.clone(),
                self.tool_calls.clone(),
            ));
            for output in &self.tool_outputs {
                messages.push(ChatMessage::tool(&output.tool_call_id, &output.content));
            }
        } else if let Some(output) = &self.model_output {
            messages.push(ChatMessage::assistant(output));
        }

        // Tool failures already travel in their tool messages
        if let Some(error) = self.error.as_ref().filter(|e| e.phase != LoopPhase::Execute) {
            messages.push(ChatMessage::user(format!(
                "Error:\n{}\nNow let's retry: take care not to repeat previous errors! \
                 Call one of the available tools, or final_answer when you are done.",
                error.message
            )));
        }

        messages
    }
}

#[derive(Debug, Clone, Default)]
pub struct Memory {
    system_prompt: String,
    task: Option<String>,
    steps: Vec<ActionStep>,
}

impl Memory {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            task: None,
            steps: Vec::new(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    /// Clear previous steps and start recording a new task
    pub fn start_task(&mut self, task: impl Into<String>) {
        self.task = Some(task.into());
        self.steps.clear();
    }

    pub fn reset(&mut self) {
        self.task = None;
        self.steps.clear();
    }

    pub fn steps(&self) -> &[ActionStep] {
        &self.steps
    }

    pub fn last_step(&self) -> Option<&ActionStep> {
        self.steps.last()
    }

    pub fn next_step_number(&self) -> usize {
        self.steps.len() + 1
    }

    /// Append a completed step. Step numbers must run 1, 2, 3, ... without gaps.
    pub fn push(&mut self, step: ActionStep) -> Result<()> {
        let expected = self.next_step_number();
        if step.step_number != expected {
            return Err(AgentError::MemoryError(format!(
                "expected step {}, got step {}",
                expected, step.step_number
            )));
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn total_token_usage(&self) -> TokenUsage {
        self.steps
            .iter()
            .fold(TokenUsage::default(), |total, step| total + step.token_usage)
    }

    /// Conversation to send to the model for the next step
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(&self.system_prompt)];

        if let Some(task) = &self.task {
            messages.push(ChatMessage::user(format!("New task:\n{}", task)));
        }

        for step in &self.steps {
            messages.extend(step.to_messages());
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageRole;
    use serde_json::{json, Map};

    fn tool_step(number: usize) -> ActionStep {
        let mut args = Map::new();
        args.insert("q".to_string(), json!("rust"));
        let call = ToolCall::new("search", args);

        let mut step = ActionStep::new(number);
        step.tool_outputs.push(ToolOutput {
            tool_call_id: call.id.clone(),
            name: "search".to_string(),
            content: "Rust is a language".to_string(),
            is_error: false,
        });
        step.tool_calls.push(call);
        step.token_usage = TokenUsage::new(10, 5);
        step.timing.finish();
        step
    }

    #[test]
    fn test_push_requires_consecutive_step_numbers() {
        let mut memory = Memory::new("sys");

        memory.push(tool_step(1)).unwrap();
        assert!(matches!(memory.push(tool_step(3)), Err(AgentError::MemoryError(_))));
        assert!(memory.push(tool_step(1)).is_err());
        memory.push(tool_step(2)).unwrap();

        assert_eq!(memory.steps().len(), 2);
        assert_eq!(memory.next_step_number(), 3);
    }

    #[test]
    fn test_total_token_usage() {
        let mut memory = Memory::new("sys");
        memory.push(tool_step(1)).unwrap();
        memory.push(tool_step(2)).unwrap();

        assert_eq!(memory.total_token_usage(), TokenUsage::new(20, 10));
    }

    #[test]
    fn test_to_messages_replays_tool_calls() {
        let mut memory = Memory::new("You are helpful");
        memory.start_task("Find facts about Rust");
        memory.push(tool_step(1)).unwrap();

        let messages = memory.to_messages();

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[1].text(), "New task:\nFind facts about Rust");
        assert_eq!(messages[2].role, MessageRole::Assistant);
        assert_eq!(messages[2].tool_calls[0].name, "search");
        assert_eq!(messages[3].role, MessageRole::Tool);
        assert_eq!(messages[3].tool_call_id, Some(messages[2].tool_calls[0].id.clone()));
    }

    #[test]
    fn test_parse_error_fed_back_as_user_message() {
        let mut memory = Memory::new("sys");
        memory.start_task("task");
        let mut step = ActionStep::new(1);
        step.model_output = Some("I think the answer is 4".to_string());
        step.error = Some(StepError::new(LoopPhase::Parse, "no tool call found"));
        memory.push(step).unwrap();

        let messages = memory.to_messages();

        assert_eq!(messages[2].text(), "I think the answer is 4");
        assert_eq!(messages[3].role, MessageRole::User);
        assert!(messages[3].text().contains("no tool call found"));
    }

    #[test]
    fn test_start_task_clears_steps() {
        let mut memory = Memory::new("sys");
        memory.start_task("first");
        memory.push(tool_step(1)).unwrap();

        memory.start_task("second");

        assert!(memory.steps().is_empty());
        assert_eq!(memory.task(), Some("second"));
    }

    #[test]
    fn test_timing_duration() {
        let mut timing = Timing::start_now();
        assert_eq!(timing.duration_ms(), None);
        timing.finish();
        assert!(timing.duration_ms().is_some());
    }
}
