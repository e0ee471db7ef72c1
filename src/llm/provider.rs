use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ChatOutcome, ChatRequest, GenerateRequest};
use crate::core::errors::ApiError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "ollama")
    fn name(&self) -> &str;

    /// check if the provider is healthy/reachable
    async fn health_check(&self) -> Result<bool, ApiError>;

    /// chat completion (non-streaming); used for classification
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, ApiError>;

    /// answer generation (streaming)
    async fn stream_generate(
        &self,
        request: GenerateRequest,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError>;

    /// generate embeddings, one vector per input
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;
}
