pub mod ollama;
pub mod provider;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use ollama::OllamaProvider;
pub use provider::LlmProvider;
pub use types::{ChatMessage, ChatOutcome, ChatRequest, GenerateRequest, ProviderToolCall};
