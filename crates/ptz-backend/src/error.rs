//! Backend error types.

use thiserror::Error;

/// Errors returned by PTZ backends.
///
/// All of these are transient from the session's point of view: the runner
/// logs them and retries on a later tick.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Connection refused, DNS failure, reset, etc.
    #[error("PTZ request {action} failed: {message}")]
    Network { action: String, message: String },

    /// No response within the request timeout
    #[error("PTZ request {action} timed out after {timeout_ms}ms")]
    Timeout { action: String, timeout_ms: u64 },

    /// Non-2xx HTTP status (SOAP faults arrive this way)
    #[error("PTZ request {action} rejected with status {status}: {body}")]
    Rejected {
        action: String,
        status: u16,
        body: String,
    },

    /// The camera did not report a usable media profile
    #[error("No PTZ media profile available: {0}")]
    NoProfile(String),

    /// Backend configuration is unusable
    #[error("Invalid backend configuration: {0}")]
    InvalidConfig(String),
}

impl BackendError {
    /// Returns true if the error came from the request timing out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
