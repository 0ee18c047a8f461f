//! Tracking-phase state machine over a single locked target.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::detection::TrackId;
use crate::error::{ensure_at_least, DomainResult};

// ============================================================================
// Tracking Phase
// ============================================================================

/// Visibility state of the locked target.
///
/// - **Idle**: no target is locked
/// - **Tracking**: the target was seen this tick
/// - **Searching**: the target is missing but still inside the grace window
/// - **Lost**: the target has been missing longer than the grace window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingPhase {
    #[default]
    Idle,
    Searching,
    Tracking,
    Lost,
}

impl TrackingPhase {
    /// Returns the wire label for this phase.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Tracking => "tracking",
            Self::Lost => "lost",
        }
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        matches!(self, Self::Tracking)
    }
}

impl fmt::Display for TrackingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Tracker Status
// ============================================================================

/// Phase machine for one session.
///
/// Owned by exactly one session runner. Every transition is a pure function
/// of `(target_id, last_seen_ts, loss_grace_s, now, found)`; timestamps are
/// monotonic seconds supplied by the caller.
///
/// Invariants:
/// - `target_id == None` implies `phase == Idle`
/// - `phase == Tracking` implies a target is locked and was seen this tick
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerStatus {
    phase: TrackingPhase,
    target_id: Option<TrackId>,
    last_seen_ts: f64,
    loss_grace_s: f64,
}

impl TrackerStatus {
    /// Creates an idle tracker.
    ///
    /// # Errors
    ///
    /// Rejects a negative or non-finite grace window.
    pub fn new(loss_grace_s: f64) -> DomainResult<Self> {
        let loss_grace_s = ensure_at_least("loss_grace_s", loss_grace_s, 0.0)?;
        Ok(Self {
            phase: TrackingPhase::Idle,
            target_id: None,
            last_seen_ts: 0.0,
            loss_grace_s,
        })
    }

    pub fn phase(&self) -> TrackingPhase {
        self.phase
    }

    pub fn target_id(&self) -> Option<TrackId> {
        self.target_id
    }

    pub fn last_seen_ts(&self) -> f64 {
        self.last_seen_ts
    }

    pub fn loss_grace_s(&self) -> f64 {
        self.loss_grace_s
    }

    /// Locks onto `target` (or releases the lock with `None`).
    ///
    /// A new id is treated as a fresh acquisition: the grace window restarts
    /// at `now`, so a target that never shows up goes `Searching` then `Lost`.
    /// Re-selecting the current id changes nothing.
    ///
    /// Returns true if the locked target changed.
    pub fn set_target(&mut self, target: Option<TrackId>, now: f64) -> bool {
        if target == self.target_id {
            return false;
        }

        debug!(from = ?self.target_id, to = ?target, "Target lock changed");
        self.target_id = target;
        match target {
            None => {
                self.phase = TrackingPhase::Idle;
                self.last_seen_ts = 0.0;
            }
            Some(_) => {
                self.phase = TrackingPhase::Searching;
                self.last_seen_ts = now;
            }
        }
        true
    }

    /// Advances the phase for this tick. Call exactly once per tick.
    ///
    /// `found` is whether the locked id appeared in this tick's detections.
    pub fn compute_phase(&mut self, found: bool, now: f64) -> TrackingPhase {
        self.phase = if self.target_id.is_none() {
            TrackingPhase::Idle
        } else if found {
            self.last_seen_ts = now;
            TrackingPhase::Tracking
        } else if now - self.last_seen_ts <= self.loss_grace_s {
            TrackingPhase::Searching
        } else {
            TrackingPhase::Lost
        };
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GRACE: f64 = 2.0;

    fn locked(target: TrackId, now: f64) -> TrackerStatus {
        let mut status = TrackerStatus::new(GRACE).unwrap();
        status.set_target(Some(target), now);
        status
    }

    #[test]
    fn test_rejects_invalid_grace() {
        assert!(TrackerStatus::new(-0.5).is_err());
        assert!(TrackerStatus::new(f64::NAN).is_err());
        assert!(TrackerStatus::new(0.0).is_ok());
    }

    #[test]
    fn test_no_target_is_idle() {
        let mut status = TrackerStatus::new(GRACE).unwrap();
        assert_eq!(status.compute_phase(true, 1.0), TrackingPhase::Idle);
        assert_eq!(status.compute_phase(false, 100.0), TrackingPhase::Idle);
        assert_eq!(status.last_seen_ts(), 0.0);
    }

    #[test]
    fn test_found_updates_last_seen() {
        let mut status = locked(5, 0.0);
        assert_eq!(status.compute_phase(true, 1.5), TrackingPhase::Tracking);
        assert_eq!(status.last_seen_ts(), 1.5);
    }

    #[test]
    fn test_clear_forces_idle() {
        let mut status = locked(5, 0.0);
        status.compute_phase(true, 1.0);
        assert!(status.set_target(None, 2.0));
        assert_eq!(status.phase(), TrackingPhase::Idle);
        assert_eq!(status.target_id(), None);
        assert_eq!(status.last_seen_ts(), 0.0);
    }

    #[test]
    fn test_same_target_is_noop() {
        let mut status = locked(5, 0.0);
        status.compute_phase(true, 1.0);
        assert!(!status.set_target(Some(5), 10.0));
        assert_eq!(status.last_seen_ts(), 1.0);
        assert_eq!(status.phase(), TrackingPhase::Tracking);
    }

    #[test]
    fn test_new_target_restarts_grace_window() {
        let mut status = locked(5, 0.0);
        status.compute_phase(true, 1.0);
        assert!(status.set_target(Some(6), 10.0));
        assert_eq!(status.last_seen_ts(), 10.0);
        assert_eq!(status.compute_phase(false, 11.0), TrackingPhase::Searching);
        assert_eq!(status.compute_phase(false, 12.5), TrackingPhase::Lost);
    }

    #[test]
    fn test_lost_target_can_be_reacquired() {
        let mut status = locked(5, 0.0);
        assert_eq!(status.compute_phase(false, 5.0), TrackingPhase::Lost);
        assert_eq!(status.compute_phase(true, 5.1), TrackingPhase::Tracking);
    }

    #[test]
    fn test_scenario_present_then_absent_at_10hz() {
        let mut status = locked(5, 0.0);
        let mut phase = TrackingPhase::Idle;

        for tick in 0..=30 {
            let now = tick as f64 * 0.1;
            let found = tick <= 9;
            phase = status.compute_phase(found, now);

            if tick == 14 {
                assert_eq!(phase, TrackingPhase::Searching);
            }
        }

        assert_eq!(phase, TrackingPhase::Lost);
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(TrackingPhase::Searching.to_string(), "searching");
        assert_eq!(
            serde_json::to_string(&TrackingPhase::Lost).unwrap(),
            "\"lost\""
        );
    }

    proptest! {
        #[test]
        fn phase_table_matches(
            has_target in any::<bool>(),
            found in any::<bool>(),
            elapsed in 0.0f64..(3.0 * GRACE),
        ) {
            let seen_at = 100.0;
            let mut status = TrackerStatus::new(GRACE).unwrap();
            if has_target {
                status.set_target(Some(7), seen_at);
                status.compute_phase(true, seen_at);
            }

            let now = seen_at + elapsed;
            let phase = status.compute_phase(found, now);

            let expected = match (has_target, found) {
                (false, _) => TrackingPhase::Idle,
                (true, true) => TrackingPhase::Tracking,
                (true, false) if now - seen_at <= GRACE => TrackingPhase::Searching,
                (true, false) => TrackingPhase::Lost,
            };
            prop_assert_eq!(phase, expected);

            if phase == TrackingPhase::Idle {
                prop_assert!(status.target_id().is_none());
            }
            if phase == TrackingPhase::Tracking {
                prop_assert!(status.target_id().is_some());
                prop_assert_eq!(status.last_seen_ts(), now);
            }
        }
    }
}
