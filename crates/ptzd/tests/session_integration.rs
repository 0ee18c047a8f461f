//! Integration tests for the session manager and session runtime.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use ptz_backend::SimulatedBackend;
use ptz_core::{CameraId, Frame, FrameSize, HealthReason, SessionState};
use ptzd::config::DaemonConfig;
use ptzd::detector::{Detector, NoopDetector, SyntheticFrameSource};
use ptzd::factory::{SessionFactory, SessionParts};
use ptzd::registry::{spawn_manager, ManagerConfig, ManagerError, ManagerEvent, ManagerHandle, StopReason};

// ============================================================================
// Test Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(3);

/// Panics on the first frame it sees.
struct ExplodingDetector;

impl Detector for ExplodingDetector {
    fn detect(&mut self, _frame: &Frame) -> Vec<ptz_core::Detection> {
        panic!("detector blew up");
    }
}

/// Cameras named `bad-*` get a detector that panics.
struct TestFactory;

impl SessionFactory for TestFactory {
    fn build(&self, camera_id: &CameraId) -> Result<SessionParts, ManagerError> {
        let detector: Box<dyn Detector> = if camera_id.as_str().starts_with("bad") {
            Box::new(ExplodingDetector)
        } else {
            Box::new(NoopDetector)
        };
        Ok(SessionParts {
            backend: Box::new(SimulatedBackend::manual(2.0, 0.5)?),
            detector,
            source: Box::new(SyntheticFrameSource::new(FrameSize::new(64, 48), 100.0)),
        })
    }
}

fn manager_with(configure: impl FnOnce(&mut DaemonConfig)) -> ManagerHandle {
    let mut config = DaemonConfig::default();
    configure(&mut config);
    spawn_manager(ManagerConfig::from_config(&config), Arc::new(TestFactory))
}

fn manager() -> ManagerHandle {
    manager_with(|_| {})
}

// ============================================================================
// Singleton Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_share_one_session() {
    let handle = manager();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.create_session(CameraId::new("cam-1")).await })
        })
        .collect();

    let mut ids = Vec::new();
    let mut created = 0;
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        if outcome.created {
            created += 1;
        }
        ids.push(outcome.session.session_id().clone());
    }

    assert_eq!(created, 1);
    ids.dedup();
    assert_eq!(ids.len(), 1, "all creates must return the same session");
    assert_eq!(handle.worker_count(), 1);

    handle.shutdown().await;
    assert_eq!(handle.worker_count(), 0);
}

#[tokio::test]
async fn test_distinct_cameras_get_distinct_sessions() {
    let handle = manager();
    let a = handle.create_session(CameraId::new("a")).await.unwrap();
    let b = handle.create_session(CameraId::new("b")).await.unwrap();

    assert_ne!(a.session.session_id(), b.session.session_id());
    assert_eq!(handle.worker_count(), 2);
    assert_eq!(handle.list_sessions().await.len(), 2);

    handle.shutdown().await;
}

// ============================================================================
// Fault Isolation Tests
// ============================================================================

#[tokio::test]
async fn test_panicking_runner_is_isolated() {
    let handle = manager();
    let mut events = handle.subscribe();

    let good = handle.create_session(CameraId::new("good")).await.unwrap().session;
    let bad = handle.create_session(CameraId::new("bad-1")).await.unwrap().session;
    let (_, mut bad_rx) = bad.publisher().subscribe();

    timeout(WAIT, bad.wait_stopped()).await.expect("bad session should stop");

    let view = bad.view();
    assert_eq!(view.state, SessionState::Stopped);
    assert!(!view.healthy);
    assert_eq!(view.health_reason, Some(HealthReason::RunnerFailed));
    assert!(bad_rx.recv().await.is_none(), "subscribers are closed");

    // The manager reports the exit and keeps serving.
    let stopped = timeout(WAIT, async {
        loop {
            if let ManagerEvent::Stopped { session_id, reason } = events.recv().await.unwrap() {
                return (session_id, reason);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(&stopped.0, bad.session_id());
    assert_eq!(stopped.1, StopReason::RunnerExited);

    assert!(good.is_running());
    assert_eq!(handle.worker_count(), 1);

    // A stopped session is replaced on the next create.
    let again = handle.create_session(CameraId::new("bad-1")).await.unwrap();
    assert!(again.created);
    assert_ne!(again.session.session_id(), bad.session_id());

    handle.shutdown().await;
}

// ============================================================================
// Publisher Tests
// ============================================================================

#[tokio::test]
async fn test_slow_subscriber_is_disconnected() {
    let handle = manager_with(|c| c.server.subscriber_queue = 2);
    let session = handle.create_session(CameraId::new("cam")).await.unwrap().session;

    let (_, mut slow) = session.publisher().subscribe();
    let (_, mut fast) = session.publisher().subscribe();

    // Keep the fast one drained for a while, never touch the slow one.
    let drained = timeout(WAIT, async {
        let mut n = 0;
        while n < 10 {
            fast.recv().await.expect("fast subscriber stays connected");
            n += 1;
        }
        n
    })
    .await
    .unwrap();
    assert_eq!(drained, 10);

    assert_eq!(session.publisher().subscriber_count(), 1);
    assert!(slow.recv().await.is_some());
    assert!(slow.recv().await.is_some());
    assert!(slow.recv().await.is_none());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_status_reflects_progress() {
    let handle = manager();
    let session = handle.create_session(CameraId::new("cam")).await.unwrap().session;

    sleep(Duration::from_millis(200)).await;
    let view = session.view();
    assert!(view.ticks > 0);
    assert!(view.healthy);
    assert_eq!(view.health_reason, None);

    handle.stop_session(session.session_id().clone()).await.unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(session.publisher().is_closed());
}
