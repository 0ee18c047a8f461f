//! Client interface for the `SessionManager` actor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `ManagerError::ChannelClosed`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use ptz_core::{CameraId, SessionId, SessionView};

use super::commands::{CreateOutcome, ManagerCommand, ManagerError, ManagerEvent};
use crate::session::SessionHandle;

/// Cheap-to-clone handle to the session manager.
#[derive(Clone)]
pub struct ManagerHandle {
    sender: mpsc::Sender<ManagerCommand>,
    events: broadcast::Sender<ManagerEvent>,
    workers: Arc<AtomicUsize>,
}

impl ManagerHandle {
    pub fn new(
        sender: mpsc::Sender<ManagerCommand>,
        events: broadcast::Sender<ManagerEvent>,
        workers: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            sender,
            events,
            workers,
        }
    }

    /// Returns the session for `camera_id`, starting one if none is running.
    ///
    /// # Errors
    ///
    /// - `ManagerError::InvalidCameraId`, `UnknownCamera`, `SessionLimit`,
    ///   `Backend` or `Domain` when a new session cannot be started
    /// - `ManagerError::ChannelClosed` if the actor has shut down
    pub async fn create_session(&self, camera_id: CameraId) -> Result<CreateOutcome, ManagerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(ManagerCommand::Create {
                camera_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| ManagerError::ChannelClosed)?;

        rx.await.map_err(|_| ManagerError::ChannelClosed)?
    }

    /// Looks up a session. Returns `None` if unknown or the actor is gone.
    pub async fn get_session(&self, session_id: SessionId) -> Option<SessionHandle> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(ManagerCommand::Get {
                session_id,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok().flatten()
    }

    /// Status of every known session, oldest first.
    pub async fn list_sessions(&self) -> Vec<SessionView> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(ManagerCommand::List { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Stops a session and waits until its runner has exited and its
    /// subscribers are closed.
    ///
    /// # Errors
    ///
    /// - `ManagerError::SessionNotFound` if the session doesn't exist
    /// - `ManagerError::ChannelClosed` if the actor has shut down
    pub async fn stop_session(&self, session_id: SessionId) -> Result<(), ManagerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(ManagerCommand::Stop {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| ManagerError::ChannelClosed)?;

        let handle = rx.await.map_err(|_| ManagerError::ChannelClosed)??;
        handle.wait_stopped().await;
        Ok(())
    }

    /// Stops every session, waits for them, and ends the actor.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(ManagerCommand::Shutdown { respond_to: tx })
            .await
            .is_err()
        {
            return;
        }

        if let Ok(handles) = rx.await {
            for handle in handles {
                handle.wait_stopped().await;
            }
        }
    }

    /// Number of session runners currently alive.
    pub fn worker_count(&self) -> usize {
        self.workers.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }
}
