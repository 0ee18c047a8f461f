//! Daemon configuration loaded from TOML.
//!
//! Every section is optional; missing keys take the defaults below. The whole
//! file is validated up front so a bad value fails at startup, never inside a
//! running control loop.
//!
//! ```toml
//! allow_unknown_cameras = false
//!
//! [server]
//! bind = "0.0.0.0:8787"
//!
//! [tracking]
//! loss_grace_s = 2.0
//!
//! [servo]
//! preset = "smooth"
//! kp = 0.6
//!
//! [[cameras]]
//! id = "lobby"
//! backend = "onvif"
//! onvif = { endpoint = "http://10.0.0.20:2020/onvif/device_service", username = "admin", password = "..." }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ptz_backend::{BackendKind, OnvifConfig, SimulatedConfig};
use ptz_core::{CameraId, FrameSize, GainPreset, ServoConfig, ZoomConfig, DEFAULT_CONFIRM_HITS};

/// Default HTTP bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Per-subscriber outbound queue length; a full queue disconnects the client
    pub subscriber_queue: usize,
    pub ws_write_timeout_ms: u64,
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            subscriber_queue: 32,
            ws_write_timeout_ms: 2000,
            max_sessions: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Pause after an iteration that processed a frame
    pub tick_interval_ms: u64,
    /// Pause after an iteration that found no frame
    pub idle_sleep_ms: u64,
    /// Without a new frame for this long, the target counts as not seen
    pub frame_stale_ms: u64,
    pub watchdog_timeout_ms: u64,
    pub frame_buffer_size: usize,
    /// Rate of the built-in synthetic frame source
    pub frame_rate_hz: f64,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5,
            idle_sleep_ms: 10,
            frame_stale_ms: 1000,
            watchdog_timeout_ms: 2000,
            frame_buffer_size: 4,
            frame_rate_hz: 10.0,
            frame_width: 1280,
            frame_height: 720,
        }
    }
}

impl RuntimeConfig {
    pub fn frame_size(&self) -> FrameSize {
        FrameSize::new(self.frame_width, self.frame_height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub loss_grace_s: f64,
    pub lost_home_timeout_s: f64,
    pub confirm_hits: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            loss_grace_s: 2.0,
            lost_home_timeout_s: 10.0,
            confirm_hits: DEFAULT_CONFIRM_HITS,
        }
    }
}

/// Servo preset plus optional per-parameter overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoSection {
    pub preset: GainPreset,
    pub kp: Option<f64>,
    pub ki: Option<f64>,
    pub kd: Option<f64>,
    pub integral_max: Option<f64>,
    pub max_dt: Option<f64>,
    pub dead_band: Option<f64>,
    pub invert_pan: bool,
    pub invert_tilt: bool,
}

impl ServoSection {
    /// Preset parameters with overrides applied to both axes.
    pub fn servo_config(&self) -> ServoConfig {
        let mut cfg = self.preset.config();
        for gains in [&mut cfg.pan, &mut cfg.tilt] {
            if let Some(kp) = self.kp {
                gains.kp = kp;
            }
            if let Some(ki) = self.ki {
                gains.ki = ki;
            }
            if let Some(kd) = self.kd {
                gains.kd = kd;
            }
        }
        if let Some(v) = self.integral_max {
            cfg.integral_max = v;
        }
        if let Some(v) = self.max_dt {
            cfg.max_dt = v;
        }
        if let Some(v) = self.dead_band {
            cfg.dead_band = v;
        }
        cfg
    }
}

/// Which detector feeds each session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// Reports nothing; the daemon idles until an external detector is wired in
    #[default]
    Noop,
    /// One synthetic target circling the frame
    Demo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    pub kind: DetectorKind,
}

/// Default backend for cameras without their own `backend` key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub kind: BackendKind,
    pub simulated: SimulatedConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: CameraId,
    #[serde(default)]
    pub backend: Option<BackendKind>,
    #[serde(default)]
    pub onvif: Option<OnvifConfig>,
    #[serde(default)]
    pub simulated: Option<SimulatedConfig>,
}

// ============================================================================
// Daemon Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Create sessions for camera ids not listed under `[[cameras]]`
    pub allow_unknown_cameras: bool,
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    pub tracking: TrackingConfig,
    pub servo: ServoSection,
    pub zoom: ZoomConfig,
    pub backend: BackendSection,
    pub detector: DetectorSection,
    pub cameras: Vec<CameraConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            allow_unknown_cameras: true,
            server: ServerConfig::default(),
            runtime: RuntimeConfig::default(),
            tracking: TrackingConfig::default(),
            servo: ServoSection::default(),
            zoom: ZoomConfig::default(),
            backend: BackendSection::default(),
            detector: DetectorSection::default(),
            cameras: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Loads `path` if it exists, otherwise returns validated defaults.
    ///
    /// Used for the implicit default location; an explicitly requested file
    /// should go through [`load`](Self::load) so a typo is an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Looks up a configured camera.
    pub fn camera(&self, id: &CameraId) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| &c.id == id)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.runtime.tick_interval_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.runtime.idle_sleep_ms)
    }

    pub fn frame_stale(&self) -> Duration {
        Duration::from_millis(self.runtime.frame_stale_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.watchdog_timeout_ms)
    }

    pub fn ws_write_timeout(&self) -> Duration {
        Duration::from_millis(self.server.ws_write_timeout_ms)
    }

    /// Checks every section. Fails on the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.bind.trim().is_empty() {
            return Err(ConfigError::invalid("server.bind must not be empty"));
        }
        if server.subscriber_queue == 0 {
            return Err(ConfigError::invalid("server.subscriber_queue must be >= 1"));
        }
        if server.ws_write_timeout_ms == 0 {
            return Err(ConfigError::invalid("server.ws_write_timeout_ms must be > 0"));
        }
        if server.max_sessions == 0 {
            return Err(ConfigError::invalid("server.max_sessions must be >= 1"));
        }

        let rt = &self.runtime;
        if rt.tick_interval_ms == 0 && rt.idle_sleep_ms == 0 {
            return Err(ConfigError::invalid(
                "runtime.tick_interval_ms and runtime.idle_sleep_ms cannot both be 0",
            ));
        }
        if rt.frame_stale_ms == 0 {
            return Err(ConfigError::invalid("runtime.frame_stale_ms must be > 0"));
        }
        if rt.watchdog_timeout_ms == 0 {
            return Err(ConfigError::invalid("runtime.watchdog_timeout_ms must be > 0"));
        }
        if rt.frame_buffer_size == 0 {
            return Err(ConfigError::invalid("runtime.frame_buffer_size must be >= 1"));
        }
        if !(rt.frame_rate_hz.is_finite() && rt.frame_rate_hz > 0.0) {
            return Err(ConfigError::invalid(format!(
                "runtime.frame_rate_hz must be > 0, got {}",
                rt.frame_rate_hz
            )));
        }
        if rt.frame_size().is_empty() {
            return Err(ConfigError::invalid("runtime frame size must be non-zero"));
        }

        let tracking = &self.tracking;
        for (field, value) in [
            ("tracking.loss_grace_s", tracking.loss_grace_s),
            ("tracking.lost_home_timeout_s", tracking.lost_home_timeout_s),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::invalid(format!("{field} must be >= 0, got {value}")));
            }
        }
        if tracking.confirm_hits == 0 {
            return Err(ConfigError::invalid("tracking.confirm_hits must be >= 1"));
        }

        self.servo
            .servo_config()
            .validate()
            .map_err(|e| ConfigError::invalid(format!("servo: {e}")))?;
        self.zoom
            .validate()
            .map_err(|e| ConfigError::invalid(format!("zoom: {e}")))?;
        self.backend
            .simulated
            .validate()
            .map_err(|e| ConfigError::invalid(format!("backend: {e}")))?;

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if !camera.id.is_valid() {
                return Err(ConfigError::invalid(format!(
                    "camera id '{}' must be non-empty without surrounding whitespace",
                    camera.id
                )));
            }
            if !seen.insert(&camera.id) {
                return Err(ConfigError::invalid(format!("duplicate camera id '{}'", camera.id)));
            }
            let kind = camera.backend.unwrap_or(self.backend.kind);
            match (kind, &camera.onvif) {
                (BackendKind::Onvif, None) => {
                    return Err(ConfigError::invalid(format!(
                        "camera '{}' uses the onvif backend but has no onvif section",
                        camera.id
                    )));
                }
                (_, Some(onvif)) => onvif
                    .validate()
                    .map_err(|e| ConfigError::invalid(format!("camera '{}': {e}", camera.id)))?,
                _ => {}
            }
            if let Some(sim) = &camera.simulated {
                sim.validate()
                    .map_err(|e| ConfigError::invalid(format!("camera '{}': {e}", camera.id)))?;
            }
        }

        if self.backend.kind == BackendKind::Onvif && self.allow_unknown_cameras {
            return Err(ConfigError::invalid(
                "allow_unknown_cameras requires a simulated default backend (onvif cameras need an endpoint)",
            ));
        }

        Ok(())
    }
}
