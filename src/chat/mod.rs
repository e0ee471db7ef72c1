//! Conversational retrieval pipeline.
//!
//! One user turn runs embed → classify → retrieve → compose → stream as a
//! single sequential pass: the router picks an operation from the latest
//! messages, the executor queries the product store, the context tracker
//! carries the "current product" across turns, and the composer streams
//! the grounded answer.

pub mod catalog;
pub mod composer;
pub mod context;
pub mod executor;
pub mod router;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

pub use catalog::{ProductProperty, ToolName};
pub use composer::AnswerComposer;
pub use context::{ProductBinding, SessionContexts};
pub use executor::{PromptTemplate, RetrievalExecutor, RetrievalResult};
pub use router::{Operation, Routing, ToolRouter};

use crate::core::config::service::AssistantSettings;
use crate::llm::{ChatMessage, LlmProvider};
use crate::store::ProductStore;

/// Outcome of one turn: the routed operation (if any), the template the
/// retrieval selected, and the answer stream.
pub struct TurnOutput {
    pub operation: Option<&'static str>,
    pub template: PromptTemplate,
    pub stream: mpsc::Receiver<String>,
}

pub struct ChatPipeline {
    router: ToolRouter,
    executor: RetrievalExecutor,
    composer: AnswerComposer,
    contexts: Arc<SessionContexts>,
    settings: AssistantSettings,
}

impl ChatPipeline {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn ProductStore>,
        contexts: Arc<SessionContexts>,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            router: ToolRouter::new(provider.clone(), settings.brand_name.clone()),
            executor: RetrievalExecutor::new(store, provider.clone(), settings.clone()),
            composer: AnswerComposer::new(provider, settings.clone()),
            contexts,
            settings,
        }
    }

    /// Process one user turn for a session. Context flows in at the start
    /// and is committed back at the end; nothing cross-turn lives anywhere
    /// else.
    pub async fn run_turn(
        &self,
        session_id: &str,
        history: &[ChatMessage],
        user_message: &str,
        system_message: &str,
    ) -> TurnOutput {
        let stored = self.contexts.load(session_id);

        let binding = match history.iter().rev().find(|m| m.role == "assistant") {
            Some(previous) => stored.clone().absorbed_from_assistant_turn(&previous.content),
            None => stored.clone(),
        };
        let absorbed_rebind = binding != stored;

        let routing = self
            .router
            .select_operation(history, user_message, &binding)
            .await;

        let (retrieval, new_binding, operation) = match &routing {
            Routing::Operation(op) => match self.executor.execute(op, &binding).await {
                Ok(outcome) => (outcome.retrieval, outcome.new_binding, Some(op.label())),
                Err(err) => {
                    tracing::warn!(operation = op.label(), "retrieval failed: {}", err);
                    let retrieval = RetrievalResult {
                        template: PromptTemplate::NoContext,
                        data: json!(format!("Retrieval unavailable: {}", err)),
                    };
                    (retrieval, None, Some(op.label()))
                }
            },
            Routing::NoOperation => (RetrievalResult::no_context(), None, None),
        };

        let rebound = absorbed_rebind || new_binding.is_some();
        let final_binding = new_binding.unwrap_or(binding);
        self.contexts.commit(
            session_id,
            final_binding,
            rebound,
            self.settings.context_reset_after_turns,
        );

        let template = retrieval.template;
        let stream = self
            .composer
            .compose(system_message, &retrieval, user_message)
            .await;

        TurnOutput {
            operation,
            template,
            stream,
        }
    }
}
