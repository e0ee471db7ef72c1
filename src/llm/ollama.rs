use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::LlmProvider;
use super::types::{ChatOutcome, ChatRequest, GenerateRequest, ProviderToolCall};
use crate::core::config::service::OllamaSettings;
use crate::core::errors::ApiError;

#[derive(Clone)]
pub struct OllamaProvider {
    base_url: String,
    chat_model: String,
    embedding_model: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(settings: &OllamaSettings) -> Result<Self, ApiError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(
            settings.request_timeout_secs.max(1),
        ));

        if let Some(api_key) = &settings.api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(ApiError::internal)?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            chat_model: settings.chat_model.clone(),
            embedding_model: settings.embedding_model.clone(),
            client: builder.build().map_err(ApiError::internal)?,
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        let url = format!("{}/api/version", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, ApiError> {
        let url = format!("{}/api/chat", self.base_url);

        let mut body = json!({
            "model": self.chat_model,
            "messages": request.messages,
            "stream": false,
        });

        if let Some(obj) = body.as_object_mut() {
            if request.format_json {
                obj.insert("format".to_string(), json!("json"));
            }
            let mut options = serde_json::Map::new();
            if let Some(t) = request.temperature {
                options.insert("temperature".to_string(), json!(t));
            }
            if let Some(stop) = &request.stop {
                options.insert("stop".to_string(), json!(stop));
            }
            if !options.is_empty() {
                obj.insert("options".to_string(), Value::Object(options));
            }
        }

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!("Ollama chat error: {}", text)));
        }

        let payload: Value = res.json().await.map_err(ApiError::upstream)?;
        let message = &payload["message"];

        let content = message["content"].as_str().unwrap_or_default().to_string();
        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let function = call.get("function")?;
                        Some(ProviderToolCall {
                            name: function.get("name")?.as_str()?.to_string(),
                            arguments: function
                                .get("arguments")
                                .cloned()
                                .unwrap_or(Value::Null),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ChatOutcome {
            content,
            tool_calls,
        })
    }

    async fn stream_generate(
        &self,
        request: GenerateRequest,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        let url = format!("{}/api/generate", self.base_url);

        let mut body = json!({
            "model": self.chat_model,
            "prompt": request.prompt,
            "stream": true,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(system) = &request.system {
                obj.insert("system".to_string(), json!(system));
            }
            if let Some(think) = request.think {
                obj.insert("think".to_string(), json!(think));
            }
            let mut options = serde_json::Map::new();
            if let Some(t) = request.temperature {
                options.insert("temperature".to_string(), json!(t));
            }
            if let Some(n) = request.max_tokens {
                options.insert("num_predict".to_string(), json!(n));
            }
            if !options.is_empty() {
                obj.insert("options".to_string(), Value::Object(options));
            }
        }

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "Ollama generate error: {}",
                text
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            // Lines can be split across byte chunks; carry the tail over.
            let mut carry = String::new();

            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        carry.push_str(&String::from_utf8_lossy(&bytes));

                        while let Some(newline) = carry.find('\n') {
                            let line: String = carry.drain(..=newline).collect();
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }

                            let Ok(chunk) = serde_json::from_str::<Value>(line) else {
                                continue;
                            };

                            if let Some(response) = chunk["response"].as_str() {
                                if !response.is_empty()
                                    && tx.send(Ok(response.to_string())).await.is_err()
                                {
                                    return;
                                }
                            }

                            if chunk["done"].as_bool() == Some(true) {
                                if let (Some(prompt_tokens), Some(output_tokens)) = (
                                    chunk["prompt_eval_count"].as_u64(),
                                    chunk["eval_count"].as_u64(),
                                ) {
                                    tracing::debug!(
                                        prompt_tokens,
                                        output_tokens,
                                        "generation complete"
                                    );
                                }
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::upstream(e))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let url = format!("{}/api/embed", self.base_url);

        let body = json!({
            "model": self.embedding_model,
            "input": inputs,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!("Ollama embed error: {}", text)));
        }

        let payload: Value = res.json().await.map_err(ApiError::upstream)?;

        let mut embeddings = Vec::new();
        if let Some(data) = payload["embeddings"].as_array() {
            for item in data {
                if let Some(vals) = item.as_array() {
                    let vec: Vec<f32> = vals
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect();
                    embeddings.push(vec);
                }
            }
        }

        if embeddings.len() != inputs.len() {
            return Err(ApiError::Upstream(format!(
                "Ollama embed returned {} vectors for {} inputs",
                embeddings.len(),
                inputs.len()
            )));
        }

        Ok(embeddings)
    }
}
