//! Answer composition and streaming.
//!
//! Builds the final two-message prompt from the retrieval payload and
//! streams the generation through. The returned channel always terminates:
//! provider failures and timeouts become a single trailing error chunk
//! instead of propagating.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::executor::RetrievalResult;
use crate::core::config::service::AssistantSettings;
use crate::llm::{GenerateRequest, LlmProvider};

pub struct AnswerComposer {
    provider: Arc<dyn LlmProvider>,
    settings: AssistantSettings,
}

impl AnswerComposer {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: AssistantSettings) -> Self {
        Self { provider, settings }
    }

    /// Build the grounded prompt and stream the answer. Text chunks arrive
    /// in generation order; the channel closing marks the end of the turn.
    pub async fn compose(
        &self,
        system_message: &str,
        retrieval: &RetrievalResult,
        user_message: &str,
    ) -> mpsc::Receiver<String> {
        let system = build_system_text(system_message, retrieval, &self.settings.answer_prompt);

        let mut request = GenerateRequest::new(user_message).with_system(system);
        if self.settings.suppress_thinking {
            request = request.without_thinking();
        }

        let (tx, rx) = mpsc::channel(32);
        let chunk_timeout = Duration::from_secs(self.settings.generation_timeout_secs.max(1));

        let mut upstream = match self.provider.stream_generate(request).await {
            Ok(upstream) => upstream,
            Err(err) => {
                tracing::warn!("generation call failed: {}", err);
                let _ = tx.send(format!("Error: {}", err)).await;
                return rx;
            }
        };

        tokio::spawn(async move {
            loop {
                let chunk = match tokio::time::timeout(chunk_timeout, upstream.recv()).await {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(Some(Err(err))) => {
                        tracing::warn!("generation stream failed: {}", err);
                        let _ = tx.send(format!("Error: {}", err)).await;
                        return;
                    }
                    Ok(None) => return,
                    Err(_) => {
                        tracing::warn!("generation stream timed out");
                        let _ = tx.send("Error: generation timed out".to_string()).await;
                        return;
                    }
                };

                if chunk.is_empty() {
                    continue;
                }
                if tx.send(chunk).await.is_err() {
                    // Receiver gone: the caller disconnected mid-stream.
                    // Dropping the upstream receiver abandons generation.
                    return;
                }
            }
        });

        rx
    }
}

fn build_system_text(
    system_message: &str,
    retrieval: &RetrievalResult,
    answer_prompt: &str,
) -> String {
    let context = if retrieval.data.is_null() {
        String::new()
    } else {
        serde_json::to_string_pretty(&retrieval.data).unwrap_or_default()
    };

    let mut system = String::new();
    if !system_message.trim().is_empty() {
        system.push_str(system_message.trim());
        system.push_str("\n\n");
    }

    system.push_str(retrieval.template.instruction());
    system.push_str("\n\n");

    if !context.is_empty() {
        system.push_str("CONTEXT:\n");
        system.push_str(&context);
        system.push_str("\n\n");
    }

    system.push_str(answer_prompt);
    system
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::executor::PromptTemplate;
    use crate::llm::testing::MockProvider;
    use serde_json::json;

    fn settings() -> AssistantSettings {
        AssistantSettings::from_config(&json!({
            "assistant": { "generation_timeout_secs": 1 }
        }))
    }

    fn retrieval(data: serde_json::Value) -> RetrievalResult {
        RetrievalResult {
            template: PromptTemplate::ProductDetails,
            data,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn chunks_arrive_in_generation_order() {
        let provider = MockProvider::new().with_generate_chunks(&["Das ", "Lung ", "Produkt"]);
        let composer = AnswerComposer::new(Arc::new(provider), settings());

        let rx = composer
            .compose("", &retrieval(json!({"name": "Lung"})), "Was ist Lung?")
            .await;

        assert_eq!(collect(rx).await, vec!["Das ", "Lung ", "Produkt"]);
    }

    #[tokio::test]
    async fn failed_generation_call_yields_single_error_chunk() {
        let provider = MockProvider::new().failing_generate_call();
        let composer = AnswerComposer::new(Arc::new(provider), settings());

        let rx = composer
            .compose("", &retrieval(json!({})), "Hallo")
            .await;

        let chunks = collect(rx).await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].starts_with("Error:"));
    }

    #[tokio::test]
    async fn stream_error_terminates_with_error_chunk() {
        let provider = MockProvider::new()
            .with_generate_chunks(&["Teil"])
            .with_generate_error("connection reset");
        let composer = AnswerComposer::new(Arc::new(provider), settings());

        let rx = composer.compose("", &retrieval(json!({})), "Hallo").await;

        let chunks = collect(rx).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "Teil");
        assert!(chunks[1].starts_with("Error:"));
    }

    #[tokio::test]
    async fn system_text_layers_template_and_context() {
        let result = retrieval(json!({"name": "Lung"}));
        let system = build_system_text("Du bist der Produktassistent.", &result, "Antworte knapp.");

        assert!(system.starts_with("Du bist der Produktassistent."));
        assert!(system.contains(result.template.instruction()));
        assert!(system.contains("CONTEXT:"));
        assert!(system.contains("Lung"));
        assert!(system.trim_end().ends_with("Antworte knapp."));
    }

    #[tokio::test]
    async fn null_payload_omits_context_block() {
        let result = RetrievalResult {
            template: PromptTemplate::NoContext,
            data: serde_json::Value::Null,
        };
        let system = build_system_text("", &result, "Antworte knapp.");
        assert!(!system.contains("CONTEXT:"));
    }
}
