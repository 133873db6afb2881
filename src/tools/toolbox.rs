use crate::error::{AgentError, Result};
use crate::tools::final_answer::FinalAnswerTool;
use crate::tools::{Tool, ToolDescriptor};
use std::collections::HashMap;
use std::sync::Arc;

/// Name-indexed set of tools available to an agent.
///
/// A toolbox always contains the `final_answer` tool. Tools keep their
/// registration order so descriptors are presented to the model consistently.
#[derive(Clone)]
pub struct ToolBox {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolBox {
    /// Create a toolbox holding only `final_answer`
    pub fn new() -> Self {
        let mut toolbox = Self {
            tools: Vec::new(),
            index: HashMap::new(),
        };
        toolbox.insert(Arc::new(FinalAnswerTool));
        toolbox
    }

    /// Create a toolbox from a list of tools.
    ///
    /// Fails if two tools share a name. A caller-supplied `final_answer` replaces
    /// the built-in one.
    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Result<Self> {
        let mut toolbox = Self::new();
        let mut seen = Vec::new();
        for tool in tools {
            let name = tool.descriptor().function.name;
            if seen.contains(&name) {
                return Err(AgentError::ConfigError(format!("Duplicate tool name: {}", name)));
            }
            seen.push(name);
            toolbox.insert(tool);
        }
        Ok(toolbox)
    }

    /// Add a tool; fails if a tool of the same name is already registered.
    pub fn add(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.descriptor().function.name;
        if self.index.contains_key(&name) {
            return Err(AgentError::ConfigError(format!("Duplicate tool name: {}", name)));
        }
        self.insert(tool);
        Ok(())
    }

    fn insert(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().function.name;
        match self.index.get(&name) {
            Some(&position) => self.tools[position] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&position| self.tools[position].clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.descriptor().function.name).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolBox {
    fn default() -> Self {
        Self::new()
    }
}
