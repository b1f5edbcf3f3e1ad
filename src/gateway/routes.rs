//! HTTP route handlers for the gateway: chat creation, message submission,
//! approval resume, and the SSE relay endpoint.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{sse::Event, sse::Sse, IntoResponse},
    Json,
};
use diesel::prelude::*;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::database::{models::chat::NewChat, schema::chats::dsl as chats_dsl, DbPool};
use crate::queue::JobQueue;
use crate::relay::{RelayEnvelope, StreamRelay};
use crate::security::TokenResolver;

use super::auth::AuthenticatedCaller;

#[derive(Clone)]
pub struct GatewayState {
    pub db: DbPool,
    pub queue: Arc<JobQueue>,
    pub relay: Arc<StreamRelay>,
    pub token_resolver: Arc<dyn TokenResolver>,
}

/// Structured error body: `{code, message, request_id}`, one fresh
/// `request_id` per response so it can be correlated against server logs.
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }

    fn internal(message: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message.to_string())
    }

    fn bad_request(message: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        let body = json!({ "code": self.code, "message": self.message, "request_id": request_id });
        (self.status, Json(body)).into_response()
    }
}

// ─── Health ───────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "kiln-daemon" }))
}

// ─── Chats ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub agent_namespace: String,
    pub agent_name: String,
    #[serde(default = "default_input")]
    pub agent_input: serde_json::Value,
}

fn default_input() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Serialize)]
pub struct CreateChatResponse {
    pub chat_id: String,
}

pub async fn create_chat(
    State(state): State<GatewayState>,
    Extension(caller): Extension<AuthenticatedCaller>,
    Json(req): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chat_id = uuid::Uuid::new_v4().to_string();
    let user_id = caller.context.user_id.clone();
    let row = NewChat {
        id: chat_id.clone(),
        user_id,
        agent_namespace: req.agent_namespace,
        agent_name: req.agent_name,
        agent_input_json: serde_json::to_string(&req.agent_input)
            .map_err(ApiError::bad_request)?,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = db.get().map_err(ApiError::internal)?;
        diesel::insert_into(chats_dsl::chats)
            .values(&row)
            .execute(&mut conn)
            .map_err(ApiError::internal)
    })
    .await
    .map_err(ApiError::internal)??;

    Ok((StatusCode::CREATED, Json(CreateChatResponse { chat_id })))
}

// ─── Agent messages ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    /// Defaults to `chat_id` if omitted; callers with multiple concurrent
    /// streams on the same chat should pass a distinct id per stream.
    pub channel_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub job_id: String,
    pub channel_id: String,
}

pub async fn send_message(
    State(state): State<GatewayState>,
    Extension(caller): Extension<AuthenticatedCaller>,
    Path(chat_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel_id = req.channel_id.unwrap_or_else(|| chat_id.clone());
    let job_id = state
        .queue
        .enqueue_agent_message(
            chat_id,
            caller.context.user_id.clone(),
            caller.token.clone(),
            req.content,
            channel_id.clone(),
        )
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(SendMessageResponse { job_id, channel_id }))
}

// ─── Functions ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EnqueueFunctionRequest {
    pub namespace: String,
    pub name: String,
    #[serde(default = "default_input")]
    pub input: serde_json::Value,
}

pub async fn enqueue_function(
    State(state): State<GatewayState>,
    Extension(caller): Extension<AuthenticatedCaller>,
    Json(req): Json<EnqueueFunctionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let execution_id = uuid::Uuid::new_v4().to_string();
    let job_id = state
        .queue
        .enqueue_function(
            req.namespace,
            req.name,
            req.input,
            execution_id,
            "cli",
            "",
            caller.context.user_id.clone(),
            None,
            None,
        )
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({ "job_id": job_id })))
}

// ─── Approval resume ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub approved: bool,
    pub channel_id: String,
}

pub async fn resume_approval(
    State(state): State<GatewayState>,
    Extension(_caller): Extension<AuthenticatedCaller>,
    Path(approval_id): Path<String>,
    Json(req): Json<ResumeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = state
        .queue
        .enqueue_agent_resume(approval_id, req.approved, req.channel_id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({ "job_id": job_id })))
}

// ─── Streaming relay (SSE) ────────────────────────────────────────────────────

/// `GET /api/v1/stream/{channel_id}` — subscribes to `stream:<channel_id>`
/// and relays each envelope as an SSE `data:` line, terminating on `done`
/// or `error`.
pub async fn stream_channel(
    State(state): State<GatewayState>,
    Extension(_caller): Extension<AuthenticatedCaller>,
    Path(channel_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.relay.subscribe(&channel_id);

    // `unfold` carries (receiver, done) state across polls; `done` stops the
    // stream the call *after* a terminal envelope is yielded rather than
    // suppressing it.
    let stream = stream::unfold((rx, false), |(mut rx, done)| async move {
        if done {
            return None;
        }
        match StreamRelay::recv_next(&mut rx).await {
            Some(envelope) => {
                let is_terminal =
                    matches!(envelope, RelayEnvelope::Done | RelayEnvelope::Error { .. });
                let data = serde_json::to_string(&envelope).unwrap_or_else(|e| {
                    format!(r#"{{"type":"error","error":"serialization failure: {e}"}}"#)
                });
                Some((Ok(Event::default().data(data)), (rx, is_terminal)))
            }
            None => None,
        }
    });

    Sse::new(stream)
}
