//! Session identity and the REST status view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::detection::TrackId;
use crate::tracker::TrackingPhase;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a tracking session.
///
/// Format: UUID v4 string, generated by the daemon when a session is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a SessionId from an existing string.
    ///
    /// Note: no format validation; lookups with a malformed id simply miss.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened version for log lines (first 8 characters).
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Operator-assigned camera name (e.g. `"lobby-east"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Camera ids must be non-empty and free of surrounding whitespace.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0.trim() == self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CameraId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for CameraId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Lifecycle and Health
// ============================================================================

/// Whether the session runner is still alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Running,
    Stopped,
}

/// Why a session is reported unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthReason {
    /// No control-loop tick within the watchdog timeout
    LoopStalled,
    /// The runner task exited with an error or panicked
    RunnerFailed,
}

impl fmt::Display for HealthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoopStalled => write!(f, "loop_stalled"),
            Self::RunnerFailed => write!(f, "runner_failed"),
        }
    }
}

// ============================================================================
// REST View
// ============================================================================

/// Read-only session status returned by `GET /sessions/:id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub camera_id: CameraId,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_reason: Option<HealthReason>,
    pub phase: TrackingPhase,
    pub target_id: Option<TrackId>,
    /// Completed control-loop iterations that processed a frame
    pub ticks: u64,
    pub frames_dropped: u64,
    /// Backend name (e.g. `"simulated"`, `"onvif"`)
    pub backend: String,
}
