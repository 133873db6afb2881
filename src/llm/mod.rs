pub mod gateways;
pub mod model;
pub mod models;
pub mod token_counter;

pub use model::{GenerationConfig, Model};
pub use models::{ChatMessage, MessageRole, ModelResponse, TokenUsage, ToolCall};
pub use token_counter::TokenCounter;
