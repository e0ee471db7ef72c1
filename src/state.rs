use std::sync::Arc;

use crate::chat::SessionContexts;
use crate::core::config::service::OllamaSettings;
use crate::core::config::{AppPaths, ConfigService};
use crate::core::errors::ApiError;
use crate::history::HistoryStore;
use crate::llm::{LlmProvider, OllamaProvider};
use crate::store::{ProductStore, SqliteProductStore};

/// Global application state shared across all routes and sockets.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub history: HistoryStore,
    pub provider: Arc<dyn LlmProvider>,
    pub store: Arc<dyn ProductStore>,
    pub contexts: Arc<SessionContexts>,
}

impl AppState {
    /// Wire up paths, configuration, databases and the LLM provider.
    pub async fn initialize() -> Result<Arc<Self>, ApiError> {
        let paths = Arc::new(AppPaths::new());
        let config = ConfigService::new(paths.clone());

        let history = HistoryStore::new(paths.history_db_path.clone()).await?;
        let store = Arc::new(SqliteProductStore::new(paths.as_ref()).await?);

        let loaded = config.load_config()?;
        let ollama_settings = OllamaSettings::from_config(&loaded);
        let provider = Arc::new(OllamaProvider::new(&ollama_settings)?);

        Ok(Arc::new(AppState {
            paths,
            config,
            history,
            provider,
            store,
            contexts: Arc::new(SessionContexts::new()),
        }))
    }
}
