//! Request and response bodies for the session REST API.

use ptz_core::{CameraId, SessionId, SessionView};
use serde::{Deserialize, Serialize};

/// Body of `POST /sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub camera_id: CameraId,
}

/// Response to `POST /sessions`.
///
/// `created` is false when a session for the camera already existed and was
/// returned instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    pub camera_id: CameraId,
    pub ws_path: String,
    pub created: bool,
}

impl CreateSessionResponse {
    pub fn new(session_id: SessionId, camera_id: CameraId, created: bool) -> Self {
        let ws_path = ws_path(&session_id);
        Self {
            session_id,
            camera_id,
            ws_path,
            created,
        }
    }
}

/// WebSocket path for a session.
pub fn ws_path(session_id: &SessionId) -> String {
    format!("/sessions/{session_id}/ws")
}

/// Response to `GET /sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionList {
    pub sessions: Vec<SessionView>,
}

/// Response to `GET /healthz`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions: usize,
}

/// JSON error body for every non-2xx REST response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: code.to_string(),
            message: message.into(),
        }
    }
}
