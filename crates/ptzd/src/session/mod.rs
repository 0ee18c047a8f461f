//! One tracking session per camera.
//!
//! A session is four tasks sharing a cancellation token:
//!
//! ```text
//!   frame pump (blocking) ──put──▶ FrameBuffer ──get──▶ SessionRunner
//!                                                           │ beat
//!   watchdog ◀──────────────── SessionHealth ◀──────────────┘
//!
//!   supervisor: awaits the runner, records failure, closes subscribers
//! ```
//!
//! [`SessionHandle`] is the cheap-clone view the manager and the server hold.

pub mod control;
pub mod publisher;
pub mod runner;
pub mod watchdog;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ptz_backend::PtzBackend;
use ptz_core::{
    CameraId, DomainResult, Frame, FrameBuffer, SessionId, SessionState, SessionView, TrackId,
    TrackingPhase,
};

pub use control::{CommandAck, ControlError, ControlSurface};
pub use publisher::{MetadataPublisher, Payload, SubscriberId};
pub use runner::{RunnerConfig, RunnerExit, RunnerIo, SessionRunner};
pub use watchdog::SessionHealth;

use crate::detector::{spawn_frame_pump, Detector, FrameSource};

// ============================================================================
// Shared State
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct LiveStatus {
    phase: TrackingPhase,
    target_id: Option<TrackId>,
}

/// State written by the runner and read by status views.
#[derive(Debug)]
pub struct SessionShared {
    pub health: Arc<SessionHealth>,
    live: Mutex<LiveStatus>,
}

impl Default for SessionShared {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionShared {
    pub fn new() -> Self {
        Self {
            health: Arc::new(SessionHealth::new()),
            live: Mutex::new(LiveStatus {
                phase: TrackingPhase::Idle,
                target_id: None,
            }),
        }
    }

    pub fn set_live(&self, phase: TrackingPhase, target_id: Option<TrackId>) {
        let mut live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        live.phase = phase;
        live.target_id = target_id;
    }

    /// Current phase and locked target.
    pub fn live(&self) -> (TrackingPhase, Option<TrackId>) {
        let live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        (live.phase, live.target_id)
    }
}

// ============================================================================
// Spawning
// ============================================================================

/// Everything needed to start one session.
pub struct SessionSpec {
    pub session_id: SessionId,
    pub camera_id: CameraId,
    pub backend: Box<dyn PtzBackend>,
    pub detector: Box<dyn Detector>,
    pub source: Box<dyn FrameSource>,
    pub runner: RunnerConfig,
    pub frame_buffer_size: usize,
    pub subscriber_queue: usize,
    pub watchdog_timeout: Duration,
}

/// Cheap-clone handle to a running (or finished) session.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    camera_id: CameraId,
    created_at: DateTime<Utc>,
    backend: String,
    publisher: Arc<MetadataPublisher>,
    control: ControlSurface,
    shared: Arc<SessionShared>,
    frames: FrameBuffer<Frame>,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("camera_id", &self.camera_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Starts the runner, watchdog, frame pump and supervisor for one camera.
///
/// `on_exit` runs once, after the runner has finished and every subscriber
/// has been disconnected, and before the handle reports `Stopped`.
///
/// # Errors
///
/// Returns an error if the runner configuration or buffer size is invalid.
/// Nothing is spawned in that case.
pub fn spawn_session<F>(spec: SessionSpec, on_exit: F) -> DomainResult<SessionHandle>
where
    F: FnOnce(SessionId) + Send + 'static,
{
    let SessionSpec {
        session_id,
        camera_id,
        backend,
        detector,
        source,
        runner,
        frame_buffer_size,
        subscriber_queue,
        watchdog_timeout,
    } = spec;

    let frames = FrameBuffer::new(frame_buffer_size)?;
    let publisher = Arc::new(MetadataPublisher::new(session_id.clone(), subscriber_queue));
    let shared = Arc::new(SessionShared::new());
    let (control, commands) = ControlSurface::channel();
    let backend_name = backend.name().to_string();

    let runner = SessionRunner::new(
        session_id.clone(),
        camera_id.clone(),
        runner,
        RunnerIo {
            backend,
            detector,
            frames: frames.clone(),
            publisher: Arc::clone(&publisher),
            commands,
            shared: Arc::clone(&shared),
        },
    )?;

    let cancel = CancellationToken::new();
    let (state_tx, state_rx) = watch::channel(SessionState::Running);

    shared.health.beat();
    let runner_task = tokio::spawn(runner.run(cancel.clone()));
    watchdog::spawn_watchdog(
        session_id.clone(),
        Arc::clone(&shared.health),
        watchdog_timeout,
        cancel.clone(),
    );
    spawn_frame_pump(source, frames.clone(), cancel.clone());

    {
        let session_id = session_id.clone();
        let shared = Arc::clone(&shared);
        let publisher = Arc::clone(&publisher);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match runner_task.await {
                Ok(RunnerExit::Cancelled) => {}
                Ok(RunnerExit::Panicked(message)) => {
                    error!(
                        session_id = %session_id,
                        panic = %message,
                        "Session runner failed, camera stopped"
                    );
                    shared.health.mark_failed();
                }
                Err(e) => {
                    error!(
                        session_id = %session_id,
                        error = %e,
                        panicked = e.is_panic(),
                        "Session runner failed"
                    );
                    shared.health.mark_failed();
                }
            }
            cancel.cancel();
            publisher.close_all();
            info!(session_id = %session_id, "Session exited");
            on_exit(session_id);
            state_tx.send_replace(SessionState::Stopped);
        });
    }

    info!(
        session_id = %session_id,
        camera_id = %camera_id,
        backend = %backend_name,
        "Session started"
    );

    Ok(SessionHandle {
        session_id,
        camera_id,
        created_at: Utc::now(),
        backend: backend_name,
        publisher,
        control,
        shared,
        frames,
        cancel,
        state: state_rx,
    })
}

impl SessionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    pub fn publisher(&self) -> &Arc<MetadataPublisher> {
        &self.publisher
    }

    pub fn control(&self) -> &ControlSurface {
        &self.control
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Status snapshot for the REST surface.
    pub fn view(&self) -> SessionView {
        let (phase, target_id) = self.shared.live();
        SessionView {
            session_id: self.session_id.clone(),
            camera_id: self.camera_id.clone(),
            created_at: self.created_at,
            state: self.state(),
            healthy: self.shared.health.is_healthy(),
            health_reason: self.shared.health.reason(),
            phase,
            target_id,
            ticks: self.shared.health.ticks(),
            frames_dropped: self.frames.stats().dropped_count,
            backend: self.backend.clone(),
        }
    }

    /// Requests the session to stop. Returns immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Waits until the runner has exited and subscribers are closed.
    pub async fn wait_stopped(&self) {
        let mut state = self.state.clone();
        // A dropped sender means the supervisor is gone, which also means stopped.
        let _ = state.wait_for(|s| *s == SessionState::Stopped).await;
    }
}
