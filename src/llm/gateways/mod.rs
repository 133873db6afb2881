pub mod ollama;
pub mod openai;

pub use ollama::{OllamaConfig, OllamaModel};
pub use openai::{OpenAIConfig, OpenAIServerModel};
