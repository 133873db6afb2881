use crate::error::Result;
use serde_json::{Map, Value};

/// Descriptor for a tool, in the function-calling format models expect
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDescriptor {
    pub r#type: String,
    pub function: FunctionDescriptor,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Build a `function` descriptor
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            r#type: "function".to_string(),
            function: FunctionDescriptor {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Trait for tools an agent can call.
///
/// `run` is synchronous; the agent loop executes it on the blocking thread pool,
/// so a tool may perform blocking IO freely.
pub trait Tool: Send + Sync {
    /// Execute the tool with the arguments the model supplied
    fn run(&self, args: &Map<String, Value>) -> Result<Value>;

    /// Get tool descriptor for the model
    fn descriptor(&self) -> ToolDescriptor;

    /// Check if this tool matches the given name
    fn matches(&self, name: &str) -> bool {
        self.descriptor().function.name == name
    }
}
