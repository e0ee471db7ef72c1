use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Non-streaming chat completion request. `format_json` forces the model to
/// emit a single JSON body, which the router relies on for classification.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub format_json: bool,
    pub stop: Option<Vec<String>>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            format_json: false,
            stop: None,
        }
    }

    pub fn deterministic(mut self) -> Self {
        self.temperature = Some(0.0);
        self
    }

    pub fn json_format(mut self) -> Self {
        self.format_json = true;
        self
    }
}

/// A structured tool call as some providers return it natively instead of a
/// JSON text body.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Result of a chat completion: the text body plus any native tool calls.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    pub content: String,
    pub tool_calls: Vec<ProviderToolCall>,
}

/// Streaming generation request (prompt + system text, not chat-shaped).
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system: Option<String>,
    /// `Some(false)` asks the model to skip its thinking phase when the
    /// backend supports it.
    pub think: Option<bool>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            think: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn without_thinking(mut self) -> Self {
        self.think = Some(false);
        self
    }
}
