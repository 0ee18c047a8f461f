//! Rate-limited zoom controller driven by target coverage.

use serde::{Deserialize, Serialize};

use crate::error::{ensure_at_least, ensure_positive, DomainError, DomainResult};

/// Zoom control parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    pub enabled: bool,
    /// Desired fraction of the frame covered by the target bbox
    pub target_coverage: f64,
    /// Proportional gain on the coverage error
    pub gain: f64,
    /// Maximum change of the zoom velocity per second
    pub max_rate: f64,
    /// Coverage errors inside this band produce no zoom
    pub tolerance: f64,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_coverage: 0.15,
            gain: 2.0,
            max_rate: 1.0,
            tolerance: 0.03,
        }
    }
}

impl ZoomConfig {
    pub fn validate(&self) -> DomainResult<()> {
        let target = ensure_positive("zoom.target_coverage", self.target_coverage)?;
        if target > 1.0 {
            return Err(DomainError::invalid(
                "zoom.target_coverage",
                target,
                "value in (0, 1]",
            ));
        }
        ensure_at_least("zoom.gain", self.gain, 0.0)?;
        ensure_positive("zoom.max_rate", self.max_rate)?;
        ensure_at_least("zoom.tolerance", self.tolerance, 0.0)?;
        Ok(())
    }
}

/// Produces a zoom velocity that moves the target's coverage toward
/// `target_coverage` without abrupt jumps.
#[derive(Debug, Clone)]
pub struct ZoomController {
    config: ZoomConfig,
    output: f64,
}

impl ZoomController {
    pub fn new(config: ZoomConfig) -> DomainResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            output: 0.0,
        })
    }

    pub fn config(&self) -> &ZoomConfig {
        &self.config
    }

    /// Last zoom velocity produced.
    pub fn output(&self) -> f64 {
        self.output
    }

    /// Advances the controller by `dt` seconds and returns the zoom velocity
    /// in `[-1, 1]` (positive zooms in).
    pub fn adjust(&mut self, coverage: f64, dt: f64) -> f64 {
        if !self.config.enabled || !coverage.is_finite() {
            self.output = 0.0;
            return 0.0;
        }

        let error = self.config.target_coverage - coverage;
        let desired = if error.abs() <= self.config.tolerance {
            0.0
        } else {
            (self.config.gain * error).clamp(-1.0, 1.0)
        };

        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let max_step = self.config.max_rate * dt;
        self.output = (self.output + (desired - self.output).clamp(-max_step, max_step)).clamp(-1.0, 1.0);
        self.output
    }

    pub fn reset(&mut self) {
        self.output = 0.0;
    }
}
