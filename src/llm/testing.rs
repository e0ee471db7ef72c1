//! Scripted provider double for pipeline tests.
//!
//! Chat responses are consumed in order; embeddings come from a fixture map
//! with a deterministic byte-derived fallback so every text embeds to the
//! same vector on every run.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::provider::LlmProvider;
use super::types::{ChatOutcome, ChatRequest, GenerateRequest, ProviderToolCall};
use crate::core::errors::ApiError;

const FIXTURE_DIM: usize = 4;

enum ScriptedChat {
    Content(String),
    ToolCall(String, serde_json::Value),
    Error(String),
}

enum ScriptedChunk {
    Text(String),
    Error(String),
}

#[derive(Default)]
pub struct MockProvider {
    chat_script: Mutex<VecDeque<ScriptedChat>>,
    embeddings: HashMap<String, Vec<f32>>,
    generate_script: Mutex<Vec<ScriptedChunk>>,
    fail_generate_call: bool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chat_content(self, content: impl Into<String>) -> Self {
        self.chat_script
            .lock()
            .unwrap()
            .push_back(ScriptedChat::Content(content.into()));
        self
    }

    pub fn with_chat_tool_call(
        self,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        self.chat_script
            .lock()
            .unwrap()
            .push_back(ScriptedChat::ToolCall(name.into(), arguments));
        self
    }

    pub fn with_chat_error(self, message: impl Into<String>) -> Self {
        self.chat_script
            .lock()
            .unwrap()
            .push_back(ScriptedChat::Error(message.into()));
        self
    }

    pub fn with_embedding(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.embeddings.insert(text.into(), vector);
        self
    }

    pub fn with_generate_chunks(self, chunks: &[&str]) -> Self {
        let mut script = self.generate_script.lock().unwrap();
        for chunk in chunks {
            script.push(ScriptedChunk::Text((*chunk).to_string()));
        }
        drop(script);
        self
    }

    pub fn with_generate_error(self, message: impl Into<String>) -> Self {
        self.generate_script
            .lock()
            .unwrap()
            .push(ScriptedChunk::Error(message.into()));
        self
    }

    pub fn failing_generate_call(mut self) -> Self {
        self.fail_generate_call = true;
        self
    }
}

/// Stable pseudo-embedding so texts without a fixture still compare equal to
/// themselves across runs.
pub fn fixture_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; FIXTURE_DIM];
    for (idx, byte) in text.bytes().enumerate() {
        vector[idx % FIXTURE_DIM] += f32::from(byte) / 255.0;
    }
    vector
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        Ok(true)
    }

    async fn chat(&self, _request: ChatRequest) -> Result<ChatOutcome, ApiError> {
        match self.chat_script.lock().unwrap().pop_front() {
            Some(ScriptedChat::Content(content)) => Ok(ChatOutcome {
                content,
                tool_calls: Vec::new(),
            }),
            Some(ScriptedChat::ToolCall(name, arguments)) => Ok(ChatOutcome {
                content: String::new(),
                tool_calls: vec![ProviderToolCall { name, arguments }],
            }),
            Some(ScriptedChat::Error(message)) => Err(ApiError::Upstream(message)),
            None => Ok(ChatOutcome::default()),
        }
    }

    async fn stream_generate(
        &self,
        _request: GenerateRequest,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        if self.fail_generate_call {
            return Err(ApiError::Upstream("generate unavailable".to_string()));
        }

        let chunks: Vec<Result<String, ApiError>> = self
            .generate_script
            .lock()
            .unwrap()
            .iter()
            .map(|chunk| match chunk {
                ScriptedChunk::Text(text) => Ok(text.clone()),
                ScriptedChunk::Error(message) => Err(ApiError::Upstream(message.clone())),
            })
            .collect();

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        Ok(inputs
            .iter()
            .map(|text| {
                self.embeddings
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| fixture_vector(text))
            })
            .collect())
    }
}
