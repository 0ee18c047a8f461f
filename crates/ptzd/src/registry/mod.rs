//! Session manager using the actor pattern.
//!
//! The manager is the single owner of the camera → session map. Requests
//! arrive over an mpsc channel and are handled one at a time, so at most one
//! live session exists per camera.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │  HTTP handlers  │────▶│ SessionManager  │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                       │
//!         │   ManagerCommand      │   spawn_session       │  ManagerEvent
//!         │   (mpsc channel)      │                       │  (broadcast)
//!         ▼                       ▼                       ▼
//!   create/get/stop        HashMap<CameraId,        log / test observers
//!                          SessionId>
//!                                 ▲
//!                                 └── RunnerExited (session supervisor)
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::SessionManager;
pub use commands::{CreateOutcome, ManagerCommand, ManagerError, ManagerEvent, StopReason};
pub use handle::ManagerHandle;

use crate::config::DaemonConfig;
use crate::factory::SessionFactory;
use crate::session::RunnerConfig;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Per-session settings the manager hands to every new session.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub max_sessions: usize,
    pub runner: RunnerConfig,
    pub frame_buffer_size: usize,
    pub subscriber_queue: usize,
    pub watchdog_timeout: Duration,
}

impl ManagerConfig {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            max_sessions: config.server.max_sessions,
            runner: RunnerConfig::from_config(config),
            frame_buffer_size: config.runtime.frame_buffer_size,
            subscriber_queue: config.server.subscriber_queue,
            watchdog_timeout: config.watchdog_timeout(),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from_config(&DaemonConfig::default())
    }
}

/// Spawns the manager actor and returns a handle to it.
///
/// Must be called from within a tokio runtime.
pub fn spawn_manager(config: ManagerConfig, factory: Arc<dyn SessionFactory>) -> ManagerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let workers = Arc::new(AtomicUsize::new(0));

    let actor = SessionManager::new(
        cmd_rx,
        cmd_tx.downgrade(),
        event_tx.clone(),
        config,
        factory,
        Arc::clone(&workers),
    );
    tokio::spawn(actor.run());

    ManagerHandle::new(cmd_tx, event_tx, workers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptz_core::{CameraId, SessionId, SessionState};

    use crate::config::DaemonConfig;
    use crate::factory::ConfigSessionFactory;

    fn manager(max_sessions: usize) -> ManagerHandle {
        let mut config = DaemonConfig::default();
        config.server.max_sessions = max_sessions;
        config.runtime.frame_rate_hz = 50.0;
        let config = Arc::new(config);
        spawn_manager(
            ManagerConfig::from_config(&config),
            Arc::new(ConfigSessionFactory::new(config)),
        )
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let handle = manager(4);
        let mut events = handle.subscribe();

        let first = handle.create_session(CameraId::new("cam-1")).await.unwrap();
        let second = handle.create_session(CameraId::new("cam-1")).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.session.session_id(), second.session.session_id());
        assert_eq!(handle.worker_count(), 1);
        assert_eq!(handle.list_sessions().await.len(), 1);

        match events.recv().await.unwrap() {
            ManagerEvent::Started { camera_id, .. } => assert_eq!(camera_id.as_str(), "cam-1"),
            other => panic!("Expected Started, got {other:?}"),
        }

        handle.shutdown().await;
        assert_eq!(handle.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_camera_id() {
        let handle = manager(4);
        let err = handle.create_session(CameraId::new(" ")).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidCameraId(_)));
        assert_eq!(handle.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_session_limit() {
        let handle = manager(1);
        handle.create_session(CameraId::new("a")).await.unwrap();
        let err = handle.create_session(CameraId::new("b")).await.unwrap_err();
        assert!(matches!(err, ManagerError::SessionLimit { max: 1 }));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_then_recreate() {
        let handle = manager(4);
        let first = handle.create_session(CameraId::new("cam")).await.unwrap();
        let id = first.session.session_id().clone();

        handle.stop_session(id.clone()).await.unwrap();
        assert_eq!(first.session.state(), SessionState::Stopped);
        assert!(handle.get_session(id.clone()).await.is_none());
        assert_eq!(handle.worker_count(), 0);

        let second = handle.create_session(CameraId::new("cam")).await.unwrap();
        assert!(second.created);
        assert_ne!(second.session.session_id(), &id);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_unknown_session() {
        let handle = manager(4);
        let err = handle.stop_session(SessionId::new("nope")).await.unwrap_err();
        assert!(matches!(err, ManagerError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_closed_after_shutdown() {
        let handle = manager(4);
        handle.shutdown().await;
        // The actor has exited; give it a moment to drop the receiver.
        tokio::task::yield_now().await;
        let err = handle.create_session(CameraId::new("x")).await.unwrap_err();
        assert!(matches!(err, ManagerError::ChannelClosed));
        assert!(handle.list_sessions().await.is_empty());
    }

    mod slow_stop {
        use std::sync::{Arc, Mutex};
        use std::time::Duration;

        use ptz_backend::{BackendResult, PtzBackend};
        use ptz_core::{BackendPose, CameraId, FrameSize, PtzCommand};

        use crate::detector::{NoopDetector, SyntheticFrameSource};
        use crate::factory::{SessionFactory, SessionParts};
        use crate::registry::ManagerError;

        pub type Log = Arc<Mutex<Vec<String>>>;

        /// Backend whose stop takes a while, like a camera on a slow link.
        struct SlowStopBackend {
            index: usize,
            log: Log,
        }

        #[async_trait::async_trait]
        impl PtzBackend for SlowStopBackend {
            async fn continuous_move(&mut self, _cmd: PtzCommand) -> BackendResult<()> {
                Ok(())
            }
            async fn stop(&mut self) -> BackendResult<()> {
                tokio::time::sleep(Duration::from_millis(150)).await;
                self.log.lock().unwrap().push(format!("stopped:{}", self.index));
                Ok(())
            }
            async fn set_zoom_absolute(&mut self, _level: f32) -> BackendResult<()> {
                Ok(())
            }
            async fn set_zoom_relative(&mut self, _delta: f32) -> BackendResult<()> {
                Ok(())
            }
            async fn set_home_position(&mut self) -> BackendResult<()> {
                Ok(())
            }
            async fn get_position(&mut self) -> Option<BackendPose> {
                None
            }
            fn name(&self) -> &str {
                "slow-stop"
            }
        }

        #[derive(Default)]
        pub struct SlowStopFactory {
            pub log: Log,
        }

        impl SessionFactory for SlowStopFactory {
            fn build(&self, _camera_id: &CameraId) -> Result<SessionParts, ManagerError> {
                let mut log = self.log.lock().unwrap();
                let index = log.iter().filter(|e| e.starts_with("built")).count();
                log.push(format!("built:{index}"));
                Ok(SessionParts {
                    backend: Box::new(SlowStopBackend {
                        index,
                        log: Arc::clone(&self.log),
                    }),
                    detector: Box::new(NoopDetector),
                    source: Box::new(SyntheticFrameSource::new(FrameSize::new(16, 16), 50.0)),
                })
            }
        }
    }

    #[tokio::test]
    async fn test_recreate_waits_for_old_runner() {
        let factory = Arc::new(slow_stop::SlowStopFactory::default());
        let log = Arc::clone(&factory.log);
        let handle = spawn_manager(ManagerConfig::default(), factory);

        let first = handle.create_session(CameraId::new("cam")).await.unwrap().session;
        let id = first.session_id().clone();

        // Stop without waiting, then ask for the camera again right away.
        let stopper = {
            let handle = handle.clone();
            let id = id.clone();
            tokio::spawn(async move { handle.stop_session(id).await })
        };
        while handle.get_session(id.clone()).await.is_some() {
            tokio::task::yield_now().await;
        }
        let second = handle.create_session(CameraId::new("cam")).await.unwrap();

        assert!(second.created);
        assert_ne!(second.session.session_id(), &id);
        assert_eq!(first.state(), SessionState::Stopped);
        assert_eq!(handle.worker_count(), 1);
        assert_eq!(
            log.lock().unwrap().clone(),
            vec!["built:0".to_string(), "stopped:0".to_string(), "built:1".to_string()]
        );

        stopper.await.unwrap().unwrap();
        handle.shutdown().await;
    }
}
