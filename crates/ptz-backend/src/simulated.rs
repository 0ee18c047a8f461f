//! Kinematic PTZ simulator.
//!
//! Velocity approaches the commanded value at no more than `ramp_rate` per
//! second, then position integrates velocity scaled by `max_speed`. Positions
//! clamp at the mechanical limits (`pan`, `tilt` in `[-1, 1]`, zoom in
//! `[0, 1]`).
//!
//! In realtime mode every trait call first integrates the wall-clock time
//! since the previous call (each step clamped to `max_dt`, so a stalled
//! runner cannot teleport the camera). With `realtime = false` only
//! [`SimulatedBackend::advance`] moves time, which keeps tests deterministic.

use async_trait::async_trait;
use ptz_core::{BackendPose, PtzCommand};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::trace;

use crate::backend::PtzBackend;
use crate::error::{BackendError, BackendResult};

/// Simulator parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Maximum velocity change per second
    pub ramp_rate: f64,
    /// Position change per second at full velocity
    pub max_speed: f64,
    /// Largest wall-clock step integrated at once (seconds)
    pub max_dt: f64,
    /// Integrate wall-clock time on every call
    pub realtime: bool,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            ramp_rate: 2.0,
            max_speed: 0.5,
            max_dt: 0.2,
            realtime: true,
        }
    }
}

impl SimulatedConfig {
    pub fn validate(&self) -> BackendResult<()> {
        for (field, value) in [
            ("ramp_rate", self.ramp_rate),
            ("max_speed", self.max_speed),
            ("max_dt", self.max_dt),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(BackendError::InvalidConfig(format!(
                    "simulated.{field} must be a positive number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Axis {
    position: f64,
    velocity: f64,
    commanded: f64,
}

impl Axis {
    fn step(&mut self, dt: f64, cfg: &SimulatedConfig, min: f64, max: f64) {
        let max_dv = cfg.ramp_rate * dt;
        self.velocity += (self.commanded - self.velocity).clamp(-max_dv, max_dv);
        self.position = (self.position + self.velocity * cfg.max_speed * dt).clamp(min, max);
    }

    fn halt(&mut self) {
        self.velocity = 0.0;
        self.commanded = 0.0;
    }
}

/// Simulated camera.
#[derive(Debug)]
pub struct SimulatedBackend {
    config: SimulatedConfig,
    pan: Axis,
    tilt: Axis,
    zoom: Axis,
    last_step: Option<Instant>,
}

impl SimulatedBackend {
    /// Creates a simulator at the home pose `(0, 0, 0)`.
    ///
    /// # Errors
    ///
    /// Returns an error if any rate is not a positive finite number.
    pub fn new(config: SimulatedConfig) -> BackendResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pan: Axis::default(),
            tilt: Axis::default(),
            zoom: Axis::default(),
            last_step: None,
        })
    }

    /// A simulator that only moves when [`advance`](Self::advance) is called.
    pub fn manual(ramp_rate: f64, max_speed: f64) -> BackendResult<Self> {
        Self::new(SimulatedConfig {
            ramp_rate,
            max_speed,
            realtime: false,
            ..SimulatedConfig::default()
        })
    }

    /// Integrates `dt` seconds of motion. Negative or non-finite `dt` is ignored.
    pub fn advance(&mut self, dt: f64) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }
        let cfg = self.config;
        self.pan.step(dt, &cfg, -1.0, 1.0);
        self.tilt.step(dt, &cfg, -1.0, 1.0);
        self.zoom.step(dt, &cfg, 0.0, 1.0);
    }

    /// Current `(pan, tilt, zoom)` velocities.
    pub fn velocity(&self) -> (f64, f64, f64) {
        (self.pan.velocity, self.tilt.velocity, self.zoom.velocity)
    }

    pub fn pose(&self) -> BackendPose {
        BackendPose {
            pan_pos: self.pan.position as f32,
            tilt_pos: self.tilt.position as f32,
            zoom_level: self.zoom.position as f32,
        }
    }

    fn step_wall_clock(&mut self) {
        if !self.config.realtime {
            return;
        }
        let now = Instant::now();
        if let Some(last) = self.last_step {
            let dt = now.duration_since(last).as_secs_f64().min(self.config.max_dt);
            self.advance(dt);
        }
        self.last_step = Some(now);
    }
}

#[async_trait]
impl PtzBackend for SimulatedBackend {
    async fn continuous_move(&mut self, cmd: PtzCommand) -> BackendResult<()> {
        self.step_wall_clock();
        let cmd = cmd.clamped();
        self.pan.commanded = f64::from(cmd.pan);
        self.tilt.commanded = f64::from(cmd.tilt);
        self.zoom.commanded = f64::from(cmd.zoom);
        trace!(pan = cmd.pan, tilt = cmd.tilt, zoom = cmd.zoom, "simulated move");
        Ok(())
    }

    async fn stop(&mut self) -> BackendResult<()> {
        self.step_wall_clock();
        self.pan.halt();
        self.tilt.halt();
        self.zoom.halt();
        Ok(())
    }

    async fn set_zoom_absolute(&mut self, level: f32) -> BackendResult<()> {
        self.step_wall_clock();
        let level = if level.is_nan() { 0.0 } else { level };
        self.zoom.halt();
        self.zoom.position = f64::from(level).clamp(0.0, 1.0);
        Ok(())
    }

    async fn set_zoom_relative(&mut self, delta: f32) -> BackendResult<()> {
        self.step_wall_clock();
        let delta = if delta.is_nan() { 0.0 } else { delta.clamp(-1.0, 1.0) };
        self.zoom.halt();
        self.zoom.position = (self.zoom.position + f64::from(delta)).clamp(0.0, 1.0);
        Ok(())
    }

    async fn set_home_position(&mut self) -> BackendResult<()> {
        self.step_wall_clock();
        self.pan = Axis::default();
        self.tilt = Axis::default();
        self.zoom = Axis::default();
        Ok(())
    }

    async fn get_position(&mut self) -> Option<BackendPose> {
        self.step_wall_clock();
        Some(self.pose())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ramped_acceleration() {
        let mut sim = SimulatedBackend::manual(0.5, 1.0).unwrap();
        for _ in 0..10 {
            sim.continuous_move(PtzCommand::new(1.0, 0.0, 0.0)).await.unwrap();
            sim.advance(0.1);
        }

        let pose = sim.get_position().await.unwrap();
        // v ramps 0.05 per step: sum(0.05 * k * 0.1, k = 1..=10) = 0.275
        assert!((pose.pan_pos - 0.275).abs() < 1e-4, "pan_pos = {}", pose.pan_pos);
        assert!(pose.pan_pos < 1.0);
        assert!((sim.velocity().0 - 0.5).abs() < 1e-9);
        assert_eq!(pose.tilt_pos, 0.0);
    }

    #[tokio::test]
    async fn test_positions_clamped() {
        let mut sim = SimulatedBackend::manual(100.0, 10.0).unwrap();
        sim.continuous_move(PtzCommand::new(-5.0, 5.0, -5.0)).await.unwrap();
        for _ in 0..20 {
            sim.advance(0.1);
        }
        let pose = sim.pose();
        assert_eq!(pose.pan_pos, -1.0);
        assert_eq!(pose.tilt_pos, 1.0);
        assert_eq!(pose.zoom_level, 0.0);
    }

    #[tokio::test]
    async fn test_stop_and_home() {
        let mut sim = SimulatedBackend::manual(10.0, 1.0).unwrap();
        sim.continuous_move(PtzCommand::new(0.5, 0.5, 0.5)).await.unwrap();
        sim.advance(0.5);
        sim.stop().await.unwrap();
        let before = sim.pose();
        sim.advance(1.0);
        assert_eq!(sim.pose(), before);

        sim.set_home_position().await.unwrap();
        assert_eq!(sim.pose(), BackendPose::default());
    }

    #[tokio::test]
    async fn test_zoom_absolute_and_relative() {
        let mut sim = SimulatedBackend::manual(1.0, 1.0).unwrap();
        sim.set_zoom_absolute(0.4).await.unwrap();
        sim.set_zoom_relative(0.8).await.unwrap();
        assert_eq!(sim.pose().zoom_level, 1.0);
        sim.set_zoom_relative(-0.25).await.unwrap();
        assert!((sim.pose().zoom_level - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_advance_ignores_bad_dt() {
        let mut sim = SimulatedBackend::manual(1.0, 1.0).unwrap();
        sim.pan.commanded = 1.0;
        sim.advance(-1.0);
        sim.advance(f64::NAN);
        assert_eq!(sim.velocity().0, 0.0);
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(SimulatedBackend::manual(0.0, 1.0).is_err());
        assert!(SimulatedBackend::manual(1.0, f64::INFINITY).is_err());
    }

    #[tokio::test]
    async fn test_realtime_step_bounded_by_max_dt() {
        let mut sim = SimulatedBackend::new(SimulatedConfig {
            ramp_rate: 1000.0,
            max_speed: 1.0,
            max_dt: 0.01,
            realtime: true,
        })
        .unwrap();
        sim.continuous_move(PtzCommand::new(1.0, 0.0, 0.0)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let pose = sim.get_position().await.unwrap();
        assert!(pose.pan_pos <= 0.01 + 1e-6, "pan_pos = {}", pose.pan_pos);
        assert!(pose.pan_pos > 0.0);
    }
}
