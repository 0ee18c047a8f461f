//! PTZ velocity commands and reported poses.

use serde::{Deserialize, Serialize};

/// Velocity-mode move request. Each axis is in `[-1, 1]`.
///
/// Signs follow ONVIF: positive pan turns right, positive tilt moves up,
/// positive zoom zooms in.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PtzCommand {
    pub pan: f32,
    pub tilt: f32,
    pub zoom: f32,
}

impl PtzCommand {
    /// The all-zero command (no motion).
    pub const STOP: Self = Self {
        pan: 0.0,
        tilt: 0.0,
        zoom: 0.0,
    };

    pub const fn new(pan: f32, tilt: f32, zoom: f32) -> Self {
        Self { pan, tilt, zoom }
    }

    /// Returns a copy with every axis clamped to `[-1, 1]`.
    ///
    /// NaN components become 0 so a bad upstream value can never reach a
    /// camera as motion.
    #[must_use]
    pub fn clamped(&self) -> Self {
        Self {
            pan: clamp_unit(self.pan),
            tilt: clamp_unit(self.tilt),
            zoom: clamp_unit(self.zoom),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.pan == 0.0 && self.tilt == 0.0 && self.zoom == 0.0
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(-1.0, 1.0)
    }
}

/// Position reported by a backend.
///
/// `pan_pos` and `tilt_pos` are in `[-1, 1]`, `zoom_level` in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BackendPose {
    pub pan_pos: f32,
    pub tilt_pos: f32,
    pub zoom_level: f32,
}
