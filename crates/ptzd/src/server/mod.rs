//! HTTP + WebSocket server for the PTZ daemon.
//!
//! The server:
//! - Exposes the session REST surface (create, list, status, stop)
//! - Upgrades `/sessions/:id/ws` to a per-client [`ConnectionHandler`]
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  DaemonServer   │
//! │  (axum Router)  │
//! └───────┬─────────┘
//!         │ REST                      │ WebSocket upgrade
//!         ▼                           ▼
//! ┌─────────────────┐     ┌─────────────────────┐
//! │  ManagerHandle  │     │ ConnectionHandler   │──▶ ControlSurface
//! │                 │     │   (per client)      │◀── MetadataPublisher
//! └─────────────────┘     └─────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Handler failures become JSON error bodies; the server keeps serving

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ptz_core::SessionId;
use ptz_protocol::{
    CreateSessionRequest, CreateSessionResponse, ErrorBody, HealthResponse, SessionList,
};

use crate::registry::{ManagerError, ManagerHandle};

// ============================================================================
// State
// ============================================================================

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: ManagerHandle,
    pub ws_write_timeout: Duration,
    pub cancel: CancellationToken,
}

// ============================================================================
// Errors
// ============================================================================

/// A JSON error response: `{"error": code, "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody::new(code, message),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn session_not_found(id: &SessionId) -> Self {
        Self::from(ManagerError::SessionNotFound(id.clone()))
    }
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        let status = match &err {
            ManagerError::InvalidCameraId(_) => StatusCode::BAD_REQUEST,
            ManagerError::UnknownCamera(_) | ManagerError::SessionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ManagerError::SessionLimit { .. }
            | ManagerError::Backend(_)
            | ManagerError::Domain(_)
            | ManagerError::ChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, err.code(), err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Errors that end the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("Server error: {0}")]
    Serve(String),
}

// ============================================================================
// Server
// ============================================================================

pub struct DaemonServer {
    bind: String,
    state: AppState,
}

impl DaemonServer {
    pub fn new(
        bind: impl Into<String>,
        manager: ManagerHandle,
        ws_write_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bind: bind.into(),
            state: AppState {
                manager,
                ws_write_timeout,
                cancel,
            },
        }
    }

    /// Binds the configured address and serves until cancelled.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.bind)
            .await
            .map_err(|e| ServerError::Bind {
                addr: self.bind.clone(),
                error: e.to_string(),
            })?;
        self.run_on(listener).await
    }

    /// Serves on an already-bound listener until cancelled.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Daemon server listening");
        }

        let cancel = self.state.cancel.clone();
        axum::serve(listener, router(self.state.clone()))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        info!("Daemon server stopped");
        Ok(())
    }
}

/// Routes of the daemon.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/ws", get(session_ws))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.manager.worker_count(),
    })
}

async fn create_session(
    State(state): State<AppState>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let Json(request) = body?;
    let outcome = state.manager.create_session(request.camera_id).await?;

    let session = &outcome.session;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(CreateSessionResponse::new(
            session.session_id().clone(),
            session.camera_id().clone(),
            outcome.created,
        )),
    ))
}

async fn list_sessions(State(state): State<AppState>) -> Json<SessionList> {
    Json(SessionList {
        sessions: state.manager.list_sessions().await,
    })
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ptz_core::SessionView>, ApiError> {
    let id = SessionId::new(id);
    state
        .manager
        .get_session(id.clone())
        .await
        .map(|session| Json(session.view()))
        .ok_or_else(|| ApiError::session_not_found(&id))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.manager.stop_session(SessionId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn session_ws(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let id = SessionId::new(id);
    let session = state
        .manager
        .get_session(id.clone())
        .await
        .filter(|s| s.is_running())
        .ok_or_else(|| ApiError::session_not_found(&id))?;

    debug!(session_id = %id, "WebSocket upgrade");
    let handler = ConnectionHandler::new(session, state.ws_write_timeout, state.cancel.clone());
    Ok(ws.on_upgrade(move |socket| handler.run(socket)))
}
