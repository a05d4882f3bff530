//! HTTP request handlers

use super::types::{
    AckResponse, ChatRequest, ChatResponse, CheckDialogResponse, EndDialogResponse,
    ErrorResponse, StartDialogResponse, UserQuery,
};
use super::AppState;
use crate::session::SessionError;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/start_dialog", post(start_dialog))
        .route("/force_end_dialog", post(force_end_dialog))
        .route("/check_dialog", get(check_dialog))
        .route("/chat", post(chat))
        .route("/end_dialog", post(end_dialog))
        .with_state(state)
}

async fn start_dialog(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<StartDialogResponse>, AppError> {
    let dialog_id = state.sessions.start_dialog(query.user_id).await?;
    Ok(Json(StartDialogResponse { dialog_id }))
}

async fn force_end_dialog(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<AckResponse>, AppError> {
    state.sessions.force_end_dialog(query.user_id).await?;
    Ok(Json(AckResponse { ok: true }))
}

async fn check_dialog(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<CheckDialogResponse>, AppError> {
    let check = state.sessions.check_dialog(query.user_id)?;
    Ok(Json(CheckDialogResponse {
        active: check.active,
        dialog_id: check.dialog_id,
    }))
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let response = state.sessions.chat(req.user_id, &req.message).await?;
    Ok(Json(ChatResponse { response }))
}

async fn end_dialog(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<EndDialogResponse>, AppError> {
    let summary = state.sessions.end_dialog(query.user_id).await?;
    Ok(Json(EndDialogResponse { summary }))
}

// ============================================================
// Error handling
// ============================================================

enum AppError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NoActiveDialog => AppError::NotFound(e.to_string()),
            SessionError::EmptyDialog => AppError::BadRequest(e.to_string()),
            SessionError::Model(ref m) if m.kind.is_retryable() => {
                AppError::Unavailable(e.to_string())
            }
            SessionError::Model(_) => AppError::Internal(e.to_string()),
            SessionError::Storage(_) | SessionError::TurnFailed(_) => {
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
