//! Per-session liveness watchdog.
//!
//! The runner beats once per loop iteration; the watchdog task polls the
//! heartbeat age and flips the session between healthy and `loop_stalled`.
//! A `runner_failed` verdict from the supervisor is final and is never
//! cleared by later beats.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ptz_core::{HealthReason, SessionId};

const REASON_NONE: u8 = 0;
const REASON_STALLED: u8 = 1;
const REASON_FAILED: u8 = 2;

/// Shortest watchdog poll period.
const MIN_POLL: Duration = Duration::from_millis(10);

/// Result of one watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Stalled,
    Recovered,
}

/// Lock-free health counters shared by runner, watchdog and status views.
#[derive(Debug)]
pub struct SessionHealth {
    started: Instant,
    last_beat_ms: AtomicU64,
    ticks: AtomicU64,
    healthy: AtomicBool,
    reason: AtomicU8,
}

impl Default for SessionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHealth {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_beat_ms: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
            reason: AtomicU8::new(REASON_NONE),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Records that the loop is alive.
    pub fn beat(&self) {
        self.last_beat_ms.store(self.elapsed_ms(), Ordering::Relaxed);
    }

    /// Records a completed tick (also a heartbeat).
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.beat();
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Time since the last heartbeat (or since creation).
    pub fn since_last_beat(&self) -> Duration {
        let last = self.last_beat_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<HealthReason> {
        match self.reason.load(Ordering::Acquire) {
            REASON_STALLED => Some(HealthReason::LoopStalled),
            REASON_FAILED => Some(HealthReason::RunnerFailed),
            _ => None,
        }
    }

    /// Marks the runner as failed. Sticky.
    pub fn mark_failed(&self) {
        self.reason.store(REASON_FAILED, Ordering::Release);
        self.healthy.store(false, Ordering::Release);
    }

    /// Compares the heartbeat age against `timeout` and updates the flags.
    ///
    /// Returns the transition, if one happened.
    pub fn check(&self, timeout: Duration) -> Option<HealthTransition> {
        if self.reason.load(Ordering::Acquire) == REASON_FAILED {
            return None;
        }

        let stale = self.since_last_beat() > timeout;
        if stale && self.is_healthy() {
            self.reason.store(REASON_STALLED, Ordering::Release);
            self.healthy.store(false, Ordering::Release);
            Some(HealthTransition::Stalled)
        } else if !stale && !self.is_healthy() {
            self.reason.store(REASON_NONE, Ordering::Release);
            self.healthy.store(true, Ordering::Release);
            Some(HealthTransition::Recovered)
        } else {
            None
        }
    }
}

/// Spawns the watchdog for one session. Exits when `cancel` fires.
pub fn spawn_watchdog(
    session_id: SessionId,
    health: Arc<SessionHealth>,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval((timeout / 4).max(MIN_POLL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match health.check(timeout) {
                Some(HealthTransition::Stalled) => warn!(
                    session_id = %session_id,
                    stalled_ms = health.since_last_beat().as_millis() as u64,
                    "Session loop stalled"
                ),
                Some(HealthTransition::Recovered) => {
                    info!(session_id = %session_id, "Session loop recovered")
                }
                None => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_stall_and_recover() {
        let health = SessionHealth::new();
        health.beat();
        assert_eq!(health.check(Duration::from_millis(100)), None);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(health.check(Duration::from_millis(100)), Some(HealthTransition::Stalled));
        assert!(!health.is_healthy());
        assert_eq!(health.reason(), Some(HealthReason::LoopStalled));
        assert_eq!(health.check(Duration::from_millis(100)), None);

        health.record_tick();
        assert_eq!(health.check(Duration::from_millis(100)), Some(HealthTransition::Recovered));
        assert!(health.is_healthy());
        assert_eq!(health.reason(), None);
        assert_eq!(health.ticks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_sticky() {
        let health = SessionHealth::new();
        health.mark_failed();
        health.beat();
        assert_eq!(health.check(Duration::from_millis(100)), None);
        assert!(!health.is_healthy());
        assert_eq!(health.reason(), Some(HealthReason::RunnerFailed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_task_flags_stall() {
        let health = Arc::new(SessionHealth::new());
        health.beat();
        let cancel = CancellationToken::new();
        let task = spawn_watchdog(
            SessionId::new("s"),
            Arc::clone(&health),
            Duration::from_millis(100),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!health.is_healthy());

        cancel.cancel();
        task.await.unwrap();
    }
}
