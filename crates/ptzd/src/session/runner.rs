//! The per-camera control loop.
//!
//! One iteration:
//!
//! ```text
//! drain commands ─► frame? ──no──► idle sleep (treated as "not found"
//!                     │yes              once frames are stale)
//!                     ▼
//!                 detect ─► select target ─► compute phase
//!                                              │
//!                 ┌────────── Tracking ────────┴──── otherwise ──────────┐
//!                 ▼                                                      ▼
//!        PID + zoom ─► continuous_move            reset servo/zoom, stop once,
//!                 │                               home once when lost too long
//!                 └──────────────────┬───────────────────────────────────┘
//!                                    ▼
//!                     publish MetadataTick + TrackEvents
//! ```
//!
//! PTZ failures are logged as "command not confirmed" and retried on a later
//! tick; they never end the loop. A panic inside an iteration ends the loop,
//! but the camera is still stopped before the runner returns.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use ptz_backend::PtzBackend;
use ptz_core::{
    apply_dead_band, select_by_id, CameraId, Detection, DomainResult, Frame, FrameBuffer,
    MetadataTick, PtzCommand, PtzServo, ServoConfig, SessionId, TrackLifecycle, TrackerStatus,
    TrackingPhase, ZoomConfig, ZoomController,
};
use ptz_protocol::ServerMessage;

use super::control::{apply_command, ControlContext, ControlRequest};
use super::publisher::MetadataPublisher;
use super::SessionShared;
use crate::config::DaemonConfig;
use crate::detector::Detector;

// ============================================================================
// Configuration
// ============================================================================

/// Loop parameters for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub tick_interval: Duration,
    pub idle_sleep: Duration,
    /// Age of the last frame after which the target counts as not seen
    pub frame_stale: Duration,
    pub loss_grace_s: f64,
    pub lost_home_timeout_s: f64,
    pub confirm_hits: u32,
    pub servo: ServoConfig,
    pub invert_pan: bool,
    pub invert_tilt: bool,
    pub zoom: ZoomConfig,
}

impl RunnerConfig {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            idle_sleep: config.idle_sleep(),
            frame_stale: config.frame_stale(),
            loss_grace_s: config.tracking.loss_grace_s,
            lost_home_timeout_s: config.tracking.lost_home_timeout_s,
            confirm_hits: config.tracking.confirm_hits,
            servo: config.servo.servo_config(),
            invert_pan: config.servo.invert_pan,
            invert_tilt: config.servo.invert_tilt,
            zoom: config.zoom,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from_config(&DaemonConfig::default())
    }
}

/// How [`SessionRunner::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerExit {
    Cancelled,
    /// An iteration panicked; the message is the panic payload if it was text
    Panicked(String),
}

/// External collaborators the runner drives.
pub struct RunnerIo {
    pub backend: Box<dyn PtzBackend>,
    pub detector: Box<dyn Detector>,
    pub frames: FrameBuffer<Frame>,
    pub publisher: Arc<MetadataPublisher>,
    pub commands: mpsc::Receiver<ControlRequest>,
    pub shared: Arc<SessionShared>,
}

// ============================================================================
// Session Runner
// ============================================================================

pub struct SessionRunner {
    session_id: SessionId,
    camera_id: CameraId,
    config: RunnerConfig,
    io: RunnerIo,

    status: TrackerStatus,
    servo: PtzServo,
    zoom: ZoomController,
    lifecycle: TrackLifecycle,

    clock: Instant,
    /// Last command sent to the backend (zero once a stop went through)
    last_cmd: PtzCommand,
    last_control_ts: Option<f64>,
    lost_since: Option<f64>,
    homed: bool,
    /// Monotonic time of the last frame taken from the buffer
    last_frame_ts: Option<f64>,
}

impl SessionRunner {
    /// # Errors
    ///
    /// Returns an error if any tracking, servo or zoom parameter is invalid.
    pub fn new(
        session_id: SessionId,
        camera_id: CameraId,
        config: RunnerConfig,
        io: RunnerIo,
    ) -> DomainResult<Self> {
        let status = TrackerStatus::new(config.loss_grace_s)?;
        let servo = PtzServo::new(config.servo)?;
        let zoom = ZoomController::new(config.zoom)?;
        let lifecycle = TrackLifecycle::new(config.confirm_hits)?;

        Ok(Self {
            session_id,
            camera_id,
            config,
            io,
            status,
            servo,
            zoom,
            lifecycle,
            clock: Instant::now(),
            last_cmd: PtzCommand::STOP,
            last_control_ts: None,
            lost_since: None,
            homed: false,
            last_frame_ts: None,
        })
    }

    pub fn status(&self) -> &TrackerStatus {
        &self.status
    }

    pub fn servo(&self) -> &PtzServo {
        &self.servo
    }

    /// Last command issued to the backend.
    pub fn last_command(&self) -> PtzCommand {
        self.last_cmd
    }

    /// Monotonic seconds since the runner was created.
    fn now(&self) -> f64 {
        self.clock.elapsed().as_secs_f64()
    }

    /// Runs until `cancel` fires or an iteration panics, then stops the camera.
    pub async fn run(mut self, cancel: CancellationToken) -> RunnerExit {
        info!(
            session_id = %self.session_id,
            camera_id = %self.camera_id,
            backend = self.io.backend.name(),
            "Session runner starting"
        );

        let mut exit = RunnerExit::Cancelled;
        while !cancel.is_cancelled() {
            let now = self.now();
            let processed = match AssertUnwindSafe(self.tick(now)).catch_unwind().await {
                Ok(processed) => processed,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(
                        session_id = %self.session_id,
                        panic = %message,
                        "Session iteration panicked"
                    );
                    exit = RunnerExit::Panicked(message);
                    break;
                }
            };
            self.io.shared.health.beat();

            let pause = if processed {
                self.config.tick_interval
            } else {
                self.config.idle_sleep
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.shutdown().await;
        exit
    }

    /// Performs one loop iteration at monotonic time `now` (seconds).
    ///
    /// Returns false when no frame was available and the detect/control step
    /// was skipped. Once no frame has arrived for `frame_stale`, a frameless
    /// iteration still advances the phase as "not found" and holds the camera.
    pub async fn tick(&mut self, now: f64) -> bool {
        self.drain_commands(now);

        let Some(frame) = self.io.frames.get_nowait() else {
            if self.frames_stale(now) {
                let phase = self.advance_phase(false, now);
                self.hold(phase, now).await;
                self.io.shared.set_live(phase, self.status.target_id());
            } else {
                trace!(session_id = %self.session_id, "No frame available");
            }
            return false;
        };
        self.last_frame_ts = Some(now);

        let detections = self.io.detector.detect(&frame);
        let target = select_by_id(&detections, self.status.target_id()).cloned();
        let phase = self.advance_phase(target.is_some(), now);

        match (phase, target) {
            (TrackingPhase::Tracking, Some(target)) => self.track(&target, &frame, now).await,
            _ => self.hold(phase, now).await,
        }

        self.publish(&frame, &detections);
        self.io.shared.health.record_tick();
        self.io.shared.set_live(phase, self.status.target_id());
        true
    }

    fn frames_stale(&self, now: f64) -> bool {
        now - self.last_frame_ts.unwrap_or(0.0) >= self.config.frame_stale.as_secs_f64()
    }

    fn advance_phase(&mut self, found: bool, now: f64) -> TrackingPhase {
        let previous = self.status.phase();
        let phase = self.status.compute_phase(found, now);
        if phase != previous {
            info!(
                session_id = %self.session_id,
                from = %previous,
                to = %phase,
                target_id = ?self.status.target_id(),
                "Tracking phase changed"
            );
        }
        phase
    }

    fn drain_commands(&mut self, now: f64) {
        while let Ok(request) = self.io.commands.try_recv() {
            let mut ctx = ControlContext {
                status: &mut self.status,
                servo: &mut self.servo,
                zoom: &mut self.zoom,
            };
            let ack = apply_command(&mut ctx, request.command, now);
            if ack.changed {
                self.last_control_ts = None;
                self.lost_since = None;
                self.homed = false;
                info!(
                    session_id = %self.session_id,
                    target_id = ?ack.target_id,
                    "Target changed by client"
                );
            }
            self.io.shared.set_live(self.status.phase(), self.status.target_id());
            // The requester may have gone away; the command still applies.
            let _ = request.respond_to.send(ack);
        }
    }

    /// Drives the camera toward the target.
    async fn track(&mut self, target: &Detection, frame: &Frame, now: f64) {
        self.lost_since = None;
        self.homed = false;

        let (error_x, error_y) = if frame.size.is_empty() {
            (0.0, 0.0)
        } else {
            let [x1, y1, x2, y2] = target.bbox.normalized(frame.size);
            (
                f64::from(x1 + x2) - 1.0,
                f64::from(y1 + y2) - 1.0,
            )
        };
        let dead_band = self.servo.config().dead_band;
        let (pan, tilt) = self.servo.control(
            apply_dead_band(error_x, dead_band),
            apply_dead_band(error_y, dead_band),
            now,
        );

        let dt = self.last_control_ts.map_or(0.0, |last| (now - last).max(0.0));
        self.last_control_ts = Some(now);
        let zoom = self.zoom.adjust(target.bbox.coverage(frame.size), dt);

        // Image y grows downward while positive tilt moves the camera up.
        let pan = if self.config.invert_pan { -pan } else { pan };
        let tilt = if self.config.invert_tilt { tilt } else { -tilt };
        let cmd = PtzCommand::new(pan as f32, tilt as f32, zoom as f32).clamped();

        if let Err(e) = self.io.backend.continuous_move(cmd).await {
            warn!(
                session_id = %self.session_id,
                error = %e,
                "PTZ move not confirmed"
            );
        }
        self.last_cmd = cmd;
    }

    /// Keeps the camera still while the target is not in view.
    async fn hold(&mut self, phase: TrackingPhase, now: f64) {
        self.servo.reset();
        self.zoom.reset();
        self.last_control_ts = None;

        if !self.last_cmd.is_zero() {
            match self.io.backend.stop().await {
                Ok(()) => {
                    debug!(session_id = %self.session_id, phase = %phase, "PTZ stopped");
                    self.last_cmd = PtzCommand::STOP;
                }
                Err(e) => warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "PTZ stop not confirmed, retrying next tick"
                ),
            }
        }

        if phase != TrackingPhase::Lost {
            self.lost_since = None;
            return;
        }

        let lost_since = *self.lost_since.get_or_insert(now);
        if self.homed || now - lost_since < self.config.lost_home_timeout_s {
            return;
        }

        let homed = match self.io.backend.stop().await {
            Ok(()) => self.io.backend.set_home_position().await,
            Err(e) => Err(e),
        };
        match homed {
            Ok(()) => {
                info!(
                    session_id = %self.session_id,
                    lost_for_s = now - lost_since,
                    "Target lost, camera returned home"
                );
                self.homed = true;
                self.last_cmd = PtzCommand::STOP;
            }
            Err(e) => warn!(
                session_id = %self.session_id,
                error = %e,
                "PTZ home not confirmed, retrying next tick"
            ),
        }
    }

    fn publish(&mut self, frame: &Frame, detections: &[Detection]) {
        let ts = unix_seconds();
        let tick = MetadataTick::build(
            self.session_id.clone(),
            self.camera_id.clone(),
            ts,
            frame.sequence,
            frame.size,
            detections,
            self.status.target_id(),
            self.status.phase(),
            self.last_cmd,
        );
        self.io.publisher.update(tick);

        for event in self.lifecycle.observe(detections, frame.size, ts) {
            debug!(
                session_id = %self.session_id,
                track_id = event.track_id,
                event = ?event.event,
                "Track event"
            );
            self.io.publisher.broadcast(&ServerMessage::track_event(event));
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.io.backend.stop().await {
            warn!(session_id = %self.session_id, error = %e, "PTZ stop on shutdown not confirmed");
        }
        info!(
            session_id = %self.session_id,
            ticks = self.io.shared.health.ticks(),
            "Session runner stopped"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-text panic payload".to_string())
}

fn unix_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
