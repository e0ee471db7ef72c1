//! WebSocket chat surface.
//!
//! Each socket owns a current session id; every user message runs one turn
//! of the chat pipeline and streams the answer back as `chunk` frames
//! terminated by `done`. A dropped socket simply ends the forwarding loop;
//! in-flight generation is abandoned without touching the session context.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};

use super::protocol::{WsIncomingMessage, WS_APP_PROTOCOL};
use crate::chat::ChatPipeline;
use crate::core::config::service::AssistantSettings;
use crate::core::errors::ApiError;
use crate::llm::ChatMessage;
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.protocols([WS_APP_PROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut current_session_id = "default".to_string();

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };

        let Ok(incoming) = serde_json::from_str::<WsIncomingMessage>(&text) else {
            continue;
        };

        if let Err(err) =
            handle_message(&mut sender, &state, &mut current_session_id, incoming).await
        {
            let send_result = send_json(
                &mut sender,
                json!({ "type": "error", "message": err.to_string() }),
            )
            .await;
            if send_result.is_err() {
                break;
            }
        }
    }
}

async fn handle_message(
    sender: &mut SplitSink<WebSocket, Message>,
    state: &Arc<AppState>,
    current_session_id: &mut String,
    data: WsIncomingMessage,
) -> Result<(), ApiError> {
    if data.msg_type.as_deref() == Some("set_session") {
        if let Some(session_id) = data.session_id {
            *current_session_id = session_id;
            send_json(
                sender,
                json!({ "type": "session_changed", "sessionId": current_session_id }),
            )
            .await?;
        }
        return Ok(());
    }

    let Some(message_text) = data.message.filter(|m| !m.trim().is_empty()) else {
        return Ok(());
    };

    let session_id = data
        .session_id
        .unwrap_or_else(|| current_session_id.clone());
    let timestamp = Utc::now().to_rfc3339();

    state.history.ensure_session(&session_id).await?;

    // Transcript before this turn; the router and context tracker read the
    // latest entries from it.
    let history: Vec<ChatMessage> = state
        .history
        .get_history(&session_id, 20)
        .await?
        .iter()
        .map(|m| m.as_chat_message())
        .collect();

    state
        .history
        .add_message(
            &session_id,
            "user",
            &message_text,
            &json!({ "timestamp": timestamp }),
        )
        .await?;
    let _ = state.history.touch_session(&session_id).await;

    let config = state.config.load_config()?;
    let settings = AssistantSettings::from_config(&config);
    let system_prompt = settings.system_prompt.clone();

    let pipeline = ChatPipeline::new(
        state.provider.clone(),
        state.store.clone(),
        state.contexts.clone(),
        settings,
    );

    let mut output = pipeline
        .run_turn(&session_id, &history, &message_text, &system_prompt)
        .await;

    if let Some(operation) = output.operation {
        send_json(sender, json!({ "type": "routing", "operation": operation })).await?;
    }

    let mut full_response = String::new();
    while let Some(chunk) = output.stream.recv().await {
        full_response.push_str(&chunk);
        send_json(sender, json!({ "type": "chunk", "message": chunk })).await?;
    }

    send_json(sender, json!({ "type": "done" })).await?;

    state
        .history
        .add_message(
            &session_id,
            "assistant",
            &full_response,
            &json!({
                "timestamp": timestamp,
                "operation": output.operation,
            }),
        )
        .await?;

    Ok(())
}

pub async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    value: Value,
) -> Result<(), ApiError> {
    let payload = serde_json::to_string(&value).map_err(ApiError::internal)?;
    sender
        .send(Message::Text(payload))
        .await
        .map_err(ApiError::internal)
}
