//! HTTP route handlers for the chat front-end.

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::services::ServeDir;

use crate::core::errors::ChatError;
use crate::core::ids::ConversationId;
use crate::llm::collect_reply;
use crate::session::{ReplyTurn, SessionController, SessionState, TurnRequest};
use crate::store::message::Message;

use super::state::AppState;

/// Create the API router with all routes; unknown paths fall back to `static_dir`.
pub fn create_router(state: Arc<AppState>, static_dir: &Path) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .route("/api/conversations", get(session_view).post(new_chat))
        .route("/api/conversations/active", delete(delete_current))
        .route("/api/conversations/active/messages", get(active_messages))
        .route("/api/conversations/{id}/select", post(select_conversation))
        .route("/api/chat", post(chat))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
}

fn error_response(err: ChatError) -> (StatusCode, String) {
    let status = match &err {
        ChatError::UnknownConversation(_) => StatusCode::NOT_FOUND,
        ChatError::UnknownModel(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ollama-chat",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Selectable models.
async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let catalog = state.controller.catalog();
    Json(serde_json::json!({
        "models": catalog.models(),
        "default": catalog.default_model()
    }))
}

/// A conversation as listed in the sidebar.
#[derive(Debug, Serialize)]
pub struct ConversationView {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Display label.
    pub label: String,
    /// Whether the conversation has stored messages.
    pub persisted: bool,
}

/// Sidebar state: every conversation and the active one.
#[derive(Debug, Serialize)]
pub struct SessionView {
    /// Active conversation.
    pub active: ConversationId,
    /// Conversations in display order.
    pub conversations: Vec<ConversationView>,
}

impl From<&SessionState> for SessionView {
    fn from(state: &SessionState) -> Self {
        Self {
            active: state.current_id().clone(),
            conversations: state
                .conversations()
                .iter()
                .map(|entry| ConversationView {
                    id: entry.id.clone(),
                    label: entry.slot.label().to_string(),
                    persisted: entry.slot.is_persisted(),
                })
                .collect(),
        }
    }
}

/// Current sidebar state.
async fn session_view(State(state): State<Arc<AppState>>) -> Json<SessionView> {
    let session = state.session().await;
    Json(SessionView::from(&*session))
}

/// Start a new conversation.
async fn new_chat(State(state): State<Arc<AppState>>) -> Json<SessionView> {
    let mut session = state.session().await;
    state.controller.new_chat(&mut session);
    Json(SessionView::from(&*session))
}

/// Switch the active conversation.
async fn select_conversation(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let mut session = state.session().await;
    state
        .controller
        .select(&mut session, &ConversationId::from(id))
        .map_err(error_response)?;
    Ok(Json(SessionView::from(&*session)))
}

/// Delete the active conversation.
async fn delete_current(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    let mut session = state.session().await;
    state
        .controller
        .delete_current(&mut session)
        .await
        .map_err(error_response)?;
    Ok(Json(SessionView::from(&*session)))
}

/// Messages of the active conversation.
async fn active_messages(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Message>>, (StatusCode, String)> {
    let session = state.session().await;
    let messages = state
        .controller
        .display_messages(&session)
        .await
        .map_err(error_response)?;
    Ok(Json(messages))
}

/// Chat submission.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Model to use; defaults to the first catalog entry.
    #[serde(default)]
    pub model: Option<String>,
    /// Optional system message for the conversation.
    #[serde(default)]
    pub system_message: Option<String>,
    /// The user's message.
    pub message: String,
}

impl From<ChatRequest> for TurnRequest {
    fn from(request: ChatRequest) -> Self {
        Self {
            model: request.model,
            system_message: request.system_message,
            message: request.message,
        }
    }
}

/// Final event of a streamed reply.
#[derive(Debug, Serialize)]
struct DoneEvent<'a> {
    conversation_id: &'a ConversationId,
    model: &'a str,
    reply: &'a str,
}

fn json_event<T: Serialize>(name: &'static str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|_| Event::default().event("error").data("event serialization failed"))
}

/// Persist the user's message and stream the reply as server-sent events.
///
/// Events: `fragment` (JSON string) per chunk, then `done` or `error`.
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, (StatusCode, String)> {
    let turn = {
        let mut session = state.session().await;
        state
            .controller
            .begin_turn(&mut session, request.into())
            .await
            .map_err(error_response)?
    };

    let Some(turn) = turn else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(relay_reply(state.controller.clone(), turn, tx));

    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<Event, Infallible>(event), rx))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
}

/// Drain the reply to completion, forwarding fragments while the client listens.
async fn relay_reply(
    controller: SessionController,
    turn: ReplyTurn,
    tx: mpsc::UnboundedSender<Event>,
) {
    let ReplyTurn {
        conversation_id,
        model,
        fragments,
    } = turn;

    let outcome = async {
        let reply = collect_reply(fragments, |fragment| {
            // The client may be gone; the reply is still stored.
            let _ = tx.send(json_event("fragment", &fragment));
        })
        .await?;
        let stored = controller.complete_turn(&conversation_id, &reply).await?;
        Ok::<_, ChatError>((reply, stored.is_some()))
    }
    .await;

    let event = match outcome {
        Ok((reply, stored)) => {
            if stored {
                tracing::info!(
                    "Reply from {model} stored in {conversation_id} ({} chars)",
                    reply.chars().count()
                );
            }
            json_event(
                "done",
                &DoneEvent {
                    conversation_id: &conversation_id,
                    model: &model,
                    reply: &reply,
                },
            )
        }
        Err(err) => {
            tracing::error!("Reply for {conversation_id} failed: {err}");
            json_event("error", &serde_json::json!({ "error": err.to_string() }))
        }
    };
    let _ = tx.send(event);
}
