//! The `final_answer` tool.
//!
//! Calling this tool is how a model signals that it has finished the task. The
//! agent loop stops after the step in which it is called and reports its
//! `answer` argument as the run's final output.

use crate::error::{AgentError, Result};
use crate::tools::{Tool, ToolDescriptor};
use serde_json::{json, Map, Value};

/// Name under which the final-answer tool is registered
pub const FINAL_ANSWER_TOOL: &str = "final_answer";

#[derive(Debug, Clone, Copy, Default)]
pub struct FinalAnswerTool;

impl Tool for FinalAnswerTool {
    fn run(&self, args: &Map<String, Value>) -> Result<Value> {
        args.get("answer")
            .cloned()
            .ok_or_else(|| AgentError::ToolError("final_answer requires an 'answer' argument".into()))
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::function(
            FINAL_ANSWER_TOOL,
            "Provides a final answer to the given problem.",
            json!({
                "type": "object",
                "properties": {
                    "answer": {
                        "type": "string",
                        "description": "The final answer to the problem"
                    }
                },
                "required": ["answer"]
            }),
        )
    }
}
