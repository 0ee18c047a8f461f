//! The actuation interface shared by every backend.

use async_trait::async_trait;
use ptz_core::{BackendPose, PtzCommand};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BackendError, BackendResult};

/// Camera actuation.
///
/// Implementations must accept any input: out-of-range values are clamped,
/// never rejected. Each session runner owns its backend exclusively, so
/// methods take `&mut self`.
#[async_trait]
pub trait PtzBackend: Send {
    /// Starts (or updates) velocity-mode motion on all three axes.
    async fn continuous_move(&mut self, cmd: PtzCommand) -> BackendResult<()>;

    /// Halts all motion.
    async fn stop(&mut self) -> BackendResult<()>;

    /// Moves zoom to an absolute level in `[0, 1]`.
    async fn set_zoom_absolute(&mut self, level: f32) -> BackendResult<()>;

    /// Moves zoom by `delta` (in `[-1, 1]`) relative to the current level.
    async fn set_zoom_relative(&mut self, delta: f32) -> BackendResult<()>;

    /// Returns the camera to its home preset.
    async fn set_home_position(&mut self) -> BackendResult<()>;

    /// Current pose, or `None` if the backend cannot report one right now.
    async fn get_position(&mut self) -> Option<BackendPose>;

    /// Short backend name for logs and status views.
    fn name(&self) -> &str;
}

/// Which backend implementation a camera uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Simulated,
    Onvif,
}

impl BackendKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Onvif => "onvif",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" | "sim" => Ok(Self::Simulated),
            "onvif" => Ok(Self::Onvif),
            other => Err(BackendError::InvalidConfig(format!(
                "unknown backend kind '{other}' (expected simulated or onvif)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("ONVIF".parse::<BackendKind>().unwrap(), BackendKind::Onvif);
        assert_eq!("sim".parse::<BackendKind>().unwrap(), BackendKind::Simulated);
        assert!("visca".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Onvif.to_string(), "onvif");
    }
}
