//! Session manager commands, errors, and events.
//!
//! - `ManagerCommand`: requests sent to the `SessionManager` actor
//! - `ManagerError`: failures of those requests
//! - `ManagerEvent`: lifecycle notifications for subscribers

use thiserror::Error;
use tokio::sync::oneshot;

use ptz_backend::BackendError;
use ptz_core::{CameraId, DomainError, SessionId, SessionView};

use crate::session::SessionHandle;

// ============================================================================
// Manager Commands
// ============================================================================

/// Result of a create request.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub session: SessionHandle,
    /// False when an existing session for the camera was returned
    pub created: bool,
}

/// Commands sent to the manager actor. Each carries a oneshot for the reply.
#[derive(Debug)]
pub enum ManagerCommand {
    /// Return the running session for a camera, starting one if needed.
    ///
    /// # Errors
    /// - `ManagerError::InvalidCameraId` for an empty or padded id
    /// - `ManagerError::UnknownCamera` if the camera may not be served
    /// - `ManagerError::SessionLimit` when `max_sessions` are already running
    Create {
        camera_id: CameraId,
        respond_to: oneshot::Sender<Result<CreateOutcome, ManagerError>>,
    },

    Get {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionHandle>>,
    },

    List {
        respond_to: oneshot::Sender<Vec<SessionView>>,
    },

    /// Remove a session and signal it to stop. The reply carries the handle
    /// so the caller can wait for the runner outside the actor.
    Stop {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<SessionHandle, ManagerError>>,
    },

    /// Sent by a session's supervisor after its runner has exited.
    RunnerExited { session_id: SessionId },

    /// Stop every session and end the actor.
    Shutdown {
        respond_to: oneshot::Sender<Vec<SessionHandle>>,
    },
}

// ============================================================================
// Manager Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("camera id '{0}' is invalid")]
    InvalidCameraId(String),

    #[error("unknown camera: {0}")]
    UnknownCamera(CameraId),

    #[error("session limit reached (max: {max} sessions)")]
    SessionLimit { max: usize },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("backend setup failed: {0}")]
    Backend(#[from] BackendError),

    #[error("invalid session configuration: {0}")]
    Domain(#[from] DomainError),

    /// The actor has shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

impl ManagerError {
    /// Stable error code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCameraId(_) => "invalid_camera_id",
            Self::UnknownCamera(_) => "unknown_camera",
            Self::SessionLimit { .. } => "session_limit",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Backend(_) => "backend_unavailable",
            Self::Domain(_) => "invalid_configuration",
            Self::ChannelClosed => "manager_unavailable",
        }
    }
}

// ============================================================================
// Manager Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    Started {
        session_id: SessionId,
        camera_id: CameraId,
    },
    Stopped {
        session_id: SessionId,
        reason: StopReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A client asked for it
    Requested,
    /// The runner exited on its own (failure)
    RunnerExited,
    /// Daemon shutdown
    Shutdown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "stop requested"),
            Self::RunnerExited => write!(f, "runner exited"),
            Self::Shutdown => write!(f, "daemon shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_error_display() {
        let err = ManagerError::SessionLimit { max: 4 };
        assert_eq!(err.to_string(), "session limit reached (max: 4 sessions)");
        assert_eq!(err.code(), "session_limit");

        let err = ManagerError::UnknownCamera(CameraId::new("lobby"));
        assert_eq!(err.to_string(), "unknown camera: lobby");

        let err = ManagerError::from(BackendError::NoProfile("x".to_string()));
        assert_eq!(err.code(), "backend_unavailable");
    }

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(StopReason::Requested.to_string(), "stop requested");
        assert_eq!(StopReason::Shutdown.to_string(), "daemon shutdown");
    }
}
