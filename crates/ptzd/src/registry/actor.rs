//! Session manager actor - owns the camera → session map.
//!
//! All create/get/stop requests go through this single task, so the map
//! needs no lock and creation is naturally idempotent per camera.
//!
//! A stopped session keeps its camera reserved until its runner has sent the
//! final PTZ stop. A create for that camera in the meantime is parked on a
//! helper task and re-queued once the old runner is gone, so two workers never
//! drive the same camera.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply send failures are ignored (the requester went away)

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use ptz_core::{CameraId, SessionId, SessionView};

use super::commands::{CreateOutcome, ManagerCommand, ManagerError, ManagerEvent, StopReason};
use super::ManagerConfig;
use crate::factory::SessionFactory;
use crate::session::{spawn_session, SessionHandle, SessionSpec};

pub struct SessionManager {
    receiver: mpsc::Receiver<ManagerCommand>,
    /// Used by session supervisors to report runner exit
    self_sender: mpsc::WeakSender<ManagerCommand>,
    events: broadcast::Sender<ManagerEvent>,
    config: ManagerConfig,
    factory: Arc<dyn SessionFactory>,
    workers: Arc<AtomicUsize>,

    sessions: HashMap<SessionId, SessionHandle>,
    by_camera: HashMap<CameraId, SessionId>,
    /// Sessions told to stop whose runner may still be talking to the camera
    stopping: HashMap<CameraId, SessionHandle>,
}

impl SessionManager {
    pub fn new(
        receiver: mpsc::Receiver<ManagerCommand>,
        self_sender: mpsc::WeakSender<ManagerCommand>,
        events: broadcast::Sender<ManagerEvent>,
        config: ManagerConfig,
        factory: Arc<dyn SessionFactory>,
        workers: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            receiver,
            self_sender,
            events,
            config,
            factory,
            workers,
            sessions: HashMap::new(),
            by_camera: HashMap::new(),
            stopping: HashMap::new(),
        }
    }

    /// Processes commands until shutdown or until every sender is dropped.
    pub async fn run(mut self) {
        info!(max_sessions = self.config.max_sessions, "Session manager starting");

        while let Some(cmd) = self.receiver.recv().await {
            if !self.handle_command(cmd) {
                break;
            }
        }

        info!(sessions = self.sessions.len(), "Session manager stopped");
    }

    /// Returns false once the actor should exit.
    fn handle_command(&mut self, cmd: ManagerCommand) -> bool {
        match cmd {
            ManagerCommand::Create {
                camera_id,
                respond_to,
            } => {
                if let Some((camera_id, respond_to)) = self.defer_while_stopping(camera_id, respond_to) {
                    let _ = respond_to.send(self.handle_create(camera_id));
                }
            }
            ManagerCommand::Get {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.sessions.get(&session_id).cloned());
            }
            ManagerCommand::List { respond_to } => {
                let _ = respond_to.send(self.handle_list());
            }
            ManagerCommand::Stop {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_stop(&session_id));
            }
            ManagerCommand::RunnerExited { session_id } => {
                self.handle_runner_exited(session_id);
            }
            ManagerCommand::Shutdown { respond_to } => {
                let _ = respond_to.send(self.handle_shutdown());
                return false;
            }
        }
        true
    }

    fn running_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_running()).count()
    }

    /// Parks a create while the previous session for the camera winds down.
    ///
    /// Returns the request back when it can be served now.
    fn defer_while_stopping(
        &mut self,
        camera_id: CameraId,
        respond_to: oneshot::Sender<Result<CreateOutcome, ManagerError>>,
    ) -> Option<(CameraId, oneshot::Sender<Result<CreateOutcome, ManagerError>>)> {
        let old = match self.stopping.get(&camera_id) {
            Some(old) if old.is_running() => old.clone(),
            Some(_) => {
                self.stopping.remove(&camera_id);
                return Some((camera_id, respond_to));
            }
            None => return Some((camera_id, respond_to)),
        };

        let Some(sender) = self.self_sender.upgrade() else {
            let _ = respond_to.send(Err(ManagerError::ChannelClosed));
            return None;
        };
        debug!(
            session_id = %old.session_id(),
            camera_id = %camera_id,
            "Create waits for the stopping session"
        );
        tokio::spawn(async move {
            old.wait_stopped().await;
            // A closed actor drops `respond_to`, which the caller sees as
            // ChannelClosed.
            let _ = sender
                .send(ManagerCommand::Create {
                    camera_id,
                    respond_to,
                })
                .await;
        });
        None
    }

    fn handle_create(&mut self, camera_id: CameraId) -> Result<CreateOutcome, ManagerError> {
        if !camera_id.is_valid() {
            return Err(ManagerError::InvalidCameraId(camera_id.to_string()));
        }

        if let Some(existing) = self.by_camera.get(&camera_id).and_then(|id| self.sessions.get(id)) {
            if existing.is_running() {
                debug!(
                    session_id = %existing.session_id(),
                    camera_id = %camera_id,
                    "Returning existing session"
                );
                return Ok(CreateOutcome {
                    session: existing.clone(),
                    created: false,
                });
            }
        }
        // A stopped session for this camera is replaced.
        if let Some(old) = self.by_camera.remove(&camera_id) {
            self.sessions.remove(&old);
        }

        if self.running_count() >= self.config.max_sessions {
            warn!(
                camera_id = %camera_id,
                max = self.config.max_sessions,
                "Session limit reached"
            );
            return Err(ManagerError::SessionLimit {
                max: self.config.max_sessions,
            });
        }

        let parts = self.factory.build(&camera_id)?;
        let session_id = SessionId::generate();

        let spec = SessionSpec {
            session_id: session_id.clone(),
            camera_id: camera_id.clone(),
            backend: parts.backend,
            detector: parts.detector,
            source: parts.source,
            runner: self.config.runner.clone(),
            frame_buffer_size: self.config.frame_buffer_size,
            subscriber_queue: self.config.subscriber_queue,
            watchdog_timeout: self.config.watchdog_timeout,
        };

        let notify = self.self_sender.clone();
        let workers = Arc::clone(&self.workers);
        // Counted before spawning; the exit hook decrements.
        self.workers.fetch_add(1, Ordering::AcqRel);
        let handle = spawn_session(spec, move |session_id| {
            workers.fetch_sub(1, Ordering::AcqRel);
            if let Some(sender) = notify.upgrade() {
                tokio::spawn(async move {
                    let _ = sender.send(ManagerCommand::RunnerExited { session_id }).await;
                });
            }
        })
        .inspect_err(|_| {
            self.workers.fetch_sub(1, Ordering::AcqRel);
        })?;

        info!(
            session_id = %session_id,
            camera_id = %camera_id,
            sessions = self.sessions.len() + 1,
            "Session created"
        );

        self.sessions.insert(session_id.clone(), handle.clone());
        self.by_camera.insert(camera_id.clone(), session_id.clone());
        let _ = self.events.send(ManagerEvent::Started {
            session_id,
            camera_id,
        });

        Ok(CreateOutcome {
            session: handle,
            created: true,
        })
    }

    fn handle_list(&self) -> Vec<SessionView> {
        let mut views: Vec<SessionView> = self.sessions.values().map(SessionHandle::view).collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        views
    }

    fn handle_stop(&mut self, session_id: &SessionId) -> Result<SessionHandle, ManagerError> {
        let handle = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| ManagerError::SessionNotFound(session_id.clone()))?;

        if self.by_camera.get(handle.camera_id()) == Some(session_id) {
            self.by_camera.remove(handle.camera_id());
        }
        handle.stop();
        if handle.is_running() {
            self.stopping.insert(handle.camera_id().clone(), handle.clone());
        }

        info!(
            session_id = %session_id,
            camera_id = %handle.camera_id(),
            "Session stop requested"
        );
        let _ = self.events.send(ManagerEvent::Stopped {
            session_id: session_id.clone(),
            reason: StopReason::Requested,
        });
        Ok(handle)
    }

    fn handle_runner_exited(&mut self, session_id: SessionId) {
        self.stopping.retain(|_, h| h.session_id() != &session_id);

        // Explicitly stopped sessions are already gone from the map.
        if let Some(handle) = self.sessions.get(&session_id) {
            warn!(
                session_id = %session_id,
                camera_id = %handle.camera_id(),
                health_reason = ?handle.view().health_reason,
                "Session runner exited without a stop request"
            );
            let _ = self.events.send(ManagerEvent::Stopped {
                session_id,
                reason: StopReason::RunnerExited,
            });
        }
    }

    fn handle_shutdown(&mut self) -> Vec<SessionHandle> {
        let handles: Vec<SessionHandle> = self.sessions.drain().map(|(_, h)| h).collect();
        self.by_camera.clear();
        let stopping: Vec<SessionHandle> = self.stopping.drain().map(|(_, h)| h).collect();

        for handle in &handles {
            handle.stop();
            let _ = self.events.send(ManagerEvent::Stopped {
                session_id: handle.session_id().clone(),
                reason: StopReason::Shutdown,
            });
        }
        info!(sessions = handles.len(), "Stopping all sessions");
        handles.into_iter().chain(stopping).collect()
    }
}
