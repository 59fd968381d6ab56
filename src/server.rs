//! HTTP surface.
//!
//! Exposes the GitLab webhook endpoint and a small bridge for the chat side:
//! - `POST /gitlab/webhook`: GitLab event deliveries
//! - `POST /chat/command`: run a chat command, reply in the body
//! - `POST /chat/presence`: a user came online
//! - `GET /health`

use crate::commands::{ChatEnvelope, CommandHandler};
use crate::config::WEBHOOK_ROUTE;
use crate::error::AppError;
use crate::services::ingest::EventIngestor;
use crate::services::reminders::PresenceEvent;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Shared state for the axum routes.
#[derive(Clone)]
pub struct ServerState {
    pub ingestor: Arc<EventIngestor>,
    pub commands: Arc<CommandHandler>,
    pub presence_tx: mpsc::Sender<PresenceEvent>,
}

/// JSON error body.
#[derive(Serialize)]
struct ApiError {
    code: String,
    message: String,
}

/// Wrapper to make AppError usable as an axum error response.
struct ApiErr(AppError);

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            AppError::InvalidInput { .. } | AppError::MalformedPayload { .. } => {
                (StatusCode::BAD_REQUEST, "INVALID_INPUT")
            }
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        (
            status,
            Json(ApiError {
                code: code.to_string(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<AppError> for ApiErr {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub user: String,
    pub channel: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct PresenceRequest {
    pub user: String,
}

/// Build the relay's router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route(WEBHOOK_ROUTE, post(gitlab_webhook))
        .route("/chat/command", post(chat_command))
        .route("/chat/presence", post(chat_presence))
        .route("/health", get(health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
}

/// Always 200 with an empty body; GitLab retries anything else.
async fn gitlab_webhook(State(state): State<ServerState>, body: Bytes) -> StatusCode {
    match state.ingestor.ingest_raw(&body).await {
        Ok(outcome) => log::debug!("[webhook] {:?}", outcome),
        Err(e) => log::error!("[webhook] Incoming gitlab webhook: {}", e),
    }
    StatusCode::OK
}

async fn chat_command(
    State(state): State<ServerState>,
    Json(request): Json<CommandRequest>,
) -> String {
    let envelope = ChatEnvelope {
        user: request.user,
        channel: request.channel,
    };
    state.commands.handle(&envelope, &request.message).await
}

async fn chat_presence(
    State(state): State<ServerState>,
    Json(request): Json<PresenceRequest>,
) -> Result<StatusCode, ApiErr> {
    if request.user.trim().is_empty() {
        return Err(AppError::invalid_input("user must not be empty").into());
    }
    state
        .presence_tx
        .send(PresenceEvent::Online { user: request.user })
        .await
        .map_err(|_| AppError::internal("Reminder task is not running"))?;
    Ok(StatusCode::ACCEPTED)
}

async fn health() -> &'static str {
    "ok"
}

/// Serve `app` on `listen_addr` until `cancel` fires.
pub async fn serve(
    listen_addr: &str,
    app: Router,
    cancel: CancellationToken,
) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| AppError::config(format!("Failed to bind to {}: {}", listen_addr, e)))?;

    log::info!("[server] Listening on http://{}", listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

    log::info!("[server] Server stopped");
    Ok(())
}
