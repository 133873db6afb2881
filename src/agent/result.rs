use crate::llm::TokenUsage;
use crate::memory::ActionStep;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// `final_answer` was called
    Success,
    MaxStepsReached,
    TokenBudgetExceeded,
    TimeBudgetExceeded,
    Interrupted,
    /// Every configured model failed
    Error,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }
}

/// Everything a caller needs to know about a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub task: String,
    pub outcome: RunOutcome,
    pub final_output: Option<Value>,
    pub error: Option<String>,
    pub token_usage: TokenUsage,
    pub steps: Vec<ActionStep>,
    pub duration_ms: u64,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Final output as text; strings are returned without JSON quoting
    pub fn output_text(&self) -> Option<String> {
        self.final_output.as_ref().map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(outcome: RunOutcome, final_output: Option<Value>) -> RunResult {
        RunResult {
            run_id: Uuid::new_v4(),
            task: "t".into(),
            outcome,
            final_output,
            error: None,
            token_usage: TokenUsage::default(),
            steps: vec![],
            duration_ms: 0,
        }
    }

    #[test]
    fn test_output_text() {
        assert_eq!(
            result(RunOutcome::Success, Some(json!("Paris"))).output_text().as_deref(),
            Some("Paris")
        );
        assert_eq!(
            result(RunOutcome::Success, Some(json!({"n": 1}))).output_text().as_deref(),
            Some(r#"{"n":1}"#)
        );
        assert_eq!(result(RunOutcome::MaxStepsReached, None).output_text(), None);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(result(RunOutcome::TokenBudgetExceeded, None)).unwrap();
        assert_eq!(json["outcome"], "token_budget_exceeded");
    }
}
