//! PID pan/tilt servo with anti-windup and reset discipline.
//!
//! The servo turns a normalized center error (`-1..1` on each axis, target
//! right/below of center is positive) into velocity commands in `[-1, 1]`.
//!
//! ## Reset discipline
//!
//! The integral term must never carry over between targets or tracking
//! episodes. Callers invoke [`PtzServo::reset`] whenever the phase leaves
//! `Tracking` and whenever the locked target changes. After a reset the next
//! call sees `dt == 0`, so its output is exactly `kp * error`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ensure_at_least, ensure_positive, DomainError, DomainResult};

// ============================================================================
// Gains and Presets
// ============================================================================

/// Proportional, integral and derivative gains for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl PidGains {
    pub const fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }

    fn validate(&self, axis: &str) -> DomainResult<()> {
        ensure_at_least(&format!("{axis}.kp"), self.kp, 0.0)?;
        ensure_at_least(&format!("{axis}.ki"), self.ki, 0.0)?;
        ensure_at_least(&format!("{axis}.kd"), self.kd, 0.0)?;
        Ok(())
    }
}

/// Named servo tunings.
///
/// All presets run through the same control code; they only differ in
/// parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GainPreset {
    Responsive,
    #[default]
    Balanced,
    Smooth,
}

impl GainPreset {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Responsive => "responsive",
            Self::Balanced => "balanced",
            Self::Smooth => "smooth",
        }
    }

    /// Parameter set for this preset.
    pub fn config(&self) -> ServoConfig {
        let (gains, integral_max, dead_band) = match self {
            Self::Responsive => (PidGains::new(1.2, 0.15, 0.05), 0.5, 0.02),
            Self::Balanced => (PidGains::new(0.8, 0.08, 0.1), 0.4, 0.03),
            Self::Smooth => (PidGains::new(0.5, 0.03, 0.15), 0.3, 0.05),
        };
        ServoConfig {
            pan: gains,
            tilt: gains,
            integral_max,
            max_dt: DEFAULT_MAX_DT,
            dead_band,
        }
    }
}

impl fmt::Display for GainPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for GainPreset {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "responsive" => Ok(Self::Responsive),
            "balanced" => Ok(Self::Balanced),
            "smooth" => Ok(Self::Smooth),
            other => Err(DomainError::invalid(
                "servo.preset",
                other,
                "one of responsive, balanced, smooth",
            )),
        }
    }
}

/// Largest time step fed to the PID, in seconds.
pub const DEFAULT_MAX_DT: f64 = 0.5;

// ============================================================================
// Configuration
// ============================================================================

/// Full servo parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServoConfig {
    pub pan: PidGains,
    pub tilt: PidGains,
    /// Integral clamp magnitude, independent of the output clamp
    pub integral_max: f64,
    /// Upper bound on dt between control calls (seconds)
    pub max_dt: f64,
    /// Normalized center errors below this magnitude are treated as zero
    pub dead_band: f64,
}

impl Default for ServoConfig {
    fn default() -> Self {
        GainPreset::default().config()
    }
}

impl ServoConfig {
    /// Checks every parameter; called by [`PtzServo::new`].
    pub fn validate(&self) -> DomainResult<()> {
        self.pan.validate("pan")?;
        self.tilt.validate("tilt")?;
        ensure_positive("integral_max", self.integral_max)?;
        ensure_positive("max_dt", self.max_dt)?;
        let dead_band = ensure_at_least("dead_band", self.dead_band, 0.0)?;
        if dead_band >= 1.0 {
            return Err(DomainError::invalid("dead_band", dead_band, "value in [0, 1)"));
        }
        Ok(())
    }
}

// ============================================================================
// PID State
// ============================================================================

/// Mutable PID state for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidState {
    pub integral: f64,
    pub last_error: f64,
    /// `None` until the first control call after construction or reset
    pub last_update_ts: Option<f64>,
}

impl PidState {
    fn step(&mut self, gains: &PidGains, error: f64, now: f64, cfg: &ServoConfig) -> f64 {
        let error = if error.is_finite() { error } else { 0.0 };

        let dt = match self.last_update_ts {
            Some(last) if now.is_finite() => (now - last).clamp(0.0, cfg.max_dt),
            _ => 0.0,
        };

        let derivative = if dt > 0.0 {
            self.integral = (self.integral + error * dt).clamp(-cfg.integral_max, cfg.integral_max);
            (error - self.last_error) / dt
        } else {
            0.0
        };

        self.last_error = error;
        if now.is_finite() {
            self.last_update_ts = Some(now);
        }

        let output = gains.kp * error + gains.ki * self.integral + gains.kd * derivative;
        if output.is_nan() {
            0.0
        } else {
            output.clamp(-1.0, 1.0)
        }
    }
}

/// Forces `error` to zero when its magnitude is below `threshold`.
pub fn apply_dead_band(error: f64, threshold: f64) -> f64 {
    if error.abs() < threshold {
        0.0
    } else {
        error
    }
}

// ============================================================================
// Servo
// ============================================================================

/// Two-axis PID servo.
///
/// Owned by exactly one session runner.
#[derive(Debug, Clone)]
pub struct PtzServo {
    config: ServoConfig,
    pan: PidState,
    tilt: PidState,
}

impl PtzServo {
    /// Creates a servo with zeroed state.
    ///
    /// # Errors
    ///
    /// Returns an error if any gain is negative or non-finite, if
    /// `integral_max` or `max_dt` is not positive, or if the dead-band is
    /// outside `[0, 1)`.
    pub fn new(config: ServoConfig) -> DomainResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pan: PidState::default(),
            tilt: PidState::default(),
        })
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    pub fn pan_state(&self) -> &PidState {
        &self.pan
    }

    pub fn tilt_state(&self) -> &PidState {
        &self.tilt
    }

    /// Computes `(pan, tilt)` velocities for the given center errors.
    pub fn control(&mut self, error_x: f64, error_y: f64, now: f64) -> (f64, f64) {
        let pan = self.pan.step(&self.config.pan, error_x, now, &self.config);
        let tilt = self.tilt.step(&self.config.tilt, error_y, now, &self.config);
        (pan, tilt)
    }

    /// Zeroes integral, last error and timestamps on both axes. Gains are kept.
    pub fn reset(&mut self) {
        self.pan = PidState::default();
        self.tilt = PidState::default();
    }

    /// Returns true if neither axis holds any accumulated state.
    pub fn is_reset(&self) -> bool {
        self.pan == PidState::default() && self.tilt == PidState::default()
    }
}
