//! API request and response types

use serde::{Deserialize, Serialize};

/// Query carrying the acting user's id
#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: i64,
}

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: i64,
    pub message: String,
}

/// Response for dialog creation
#[derive(Debug, Serialize)]
pub struct StartDialogResponse {
    pub dialog_id: i64,
}

/// Acknowledgement for force-end
#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub ok: bool,
}

/// Response for the active-dialog check
#[derive(Debug, Serialize)]
pub struct CheckDialogResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialog_id: Option<i64>,
}

/// Response for a chat turn
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

/// Response for dialog completion
#[derive(Debug, Serialize)]
pub struct EndDialogResponse {
    pub summary: String,
}

/// Structured error payload
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
