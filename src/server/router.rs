use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{config, health, products, sessions};
use crate::server::ws::handler::ws_handler;
use crate::state::AppState;

/// Creates the main application router: health, session CRUD, product
/// ingestion/lookup, and the WebSocket chat endpoint.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state);

    Router::new()
        .route("/health", get(health::health))
        .route("/api/status", get(health::get_status))
        .route(
            "/api/config",
            get(config::get_config)
                .post(config::update_config)
                .patch(config::patch_config),
        )
        .route(
            "/api/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/api/sessions/:session_id",
            get(sessions::get_session)
                .patch(sessions::update_session)
                .delete(sessions::delete_session),
        )
        .route(
            "/api/sessions/:session_id/messages",
            get(sessions::get_session_messages),
        )
        .route("/api/products", get(products::find_by_name))
        .route("/api/products/process", post(products::process_product))
        .route("/api/qna", post(products::process_qna))
        .route("/ws/chat", get(ws_handler))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let configured: Vec<HeaderValue> = state
        .config
        .load_config()
        .ok()
        .and_then(|config| {
            config
                .get("server")
                .and_then(|s| s.get("allowed_origins"))
                .and_then(|v| v.as_array())
                .map(|origins| {
                    origins
                        .iter()
                        .filter_map(|origin| origin.as_str())
                        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                        .collect()
                })
        })
        .unwrap_or_default();

    let allow_origin = if configured.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(configured)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
}
