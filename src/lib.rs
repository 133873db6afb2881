//! # smolagents
//!
//! Tool-calling ReAct agents with a resilience layer for model access.
//!
//! An agent ([`agent::ReActLoop`]) repeatedly asks a model what to do, runs
//! the tools it calls and feeds the observations back, until the model calls
//! `final_answer` or a step, token or time budget runs out. Model calls go
//! through [`resilience::ModelReliability`], which combines retry with
//! backoff, per-service circuit breakers, rate limiting and an ordered chain
//! of fallback models.
//!
//! ```ignore
//! use smolagents::prelude::*;
//! use std::sync::Arc;
//!
//! let primary = Arc::new(OpenAIServerModel::new("gpt-4o-mini")?);
//! let fallback = Arc::new(OllamaModel::new("qwen3:8b")?);
//! let reliability = ModelReliability::new(primary).with_fallback(fallback);
//!
//! let mut agent = ReActLoop::builder(reliability).max_steps(10).build()?;
//! let result = agent.run("What is 17 * 23?").await?;
//! println!("{:?}: {:?}", result.outcome, result.final_output);
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod resilience;
pub mod tools;

#[cfg(test)]
mod testing;

pub use error::{AgentError, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::agent::{InterruptHandle, ReActLoop, RunOutcome, RunResult};
    pub use crate::config::{AgentConfig, Config, ReliabilityConfig};
    pub use crate::error::{AgentError, Result};
    pub use crate::events::{AgentEvent, EventBus};
    pub use crate::llm::gateways::{OllamaConfig, OllamaModel, OpenAIConfig, OpenAIServerModel};
    pub use crate::llm::{ChatMessage, GenerationConfig, Model, ModelResponse, TokenCounter, TokenUsage};
    pub use crate::logging::init_tracing;
    pub use crate::memory::{ActionStep, Memory};
    pub use crate::resilience::{
        CircuitBreakerRegistry, ModelReliability, RateLimiter, RequestQueue, RetryPolicy,
    };
    pub use crate::tools::{Tool, ToolBox, ToolDescriptor};
}
