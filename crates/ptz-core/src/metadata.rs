//! Per-tick metadata snapshots and track lifecycle events.
//!
//! ```text
//! detections ──► MetadataTick (every tick, latest-state semantics)
//!            └─► TrackLifecycle ──► TrackEvent (only on changes)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::command::PtzCommand;
use crate::detection::{Detection, FrameSize, TrackId};
use crate::error::{DomainError, DomainResult};
use crate::selector::available_ids;
use crate::session::{CameraId, SessionId};
use crate::tracker::TrackingPhase;

/// Observations required before a track counts as confirmed.
pub const DEFAULT_CONFIRM_HITS: u32 = 3;

// ============================================================================
// Metadata Tick
// ============================================================================

/// One detection as sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: TrackId,
    pub label: String,
    pub confidence: f32,
    /// Normalized `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
}

impl TrackSummary {
    pub fn from_detection(det: &Detection, frame: FrameSize) -> Self {
        Self {
            id: det.id,
            label: det.label.clone(),
            confidence: det.confidence,
            bbox: det.bbox.normalized(frame),
        }
    }
}

/// Full state of one session after one control-loop tick.
///
/// Subscribers only ever need the most recent tick; older ones are
/// superseded, never queued for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataTick {
    pub session_id: SessionId,
    pub camera_id: CameraId,
    /// Wall-clock unix seconds
    pub ts: f64,
    pub frame_seq: u64,
    pub frame_size: FrameSize,
    pub tracks: Vec<TrackSummary>,
    pub available_ids: Vec<TrackId>,
    pub selected_target_id: Option<TrackId>,
    pub tracking_phase: TrackingPhase,
    pub ptz_cmd: PtzCommand,
}

impl MetadataTick {
    /// Assembles a tick from the loop's per-iteration values.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        session_id: SessionId,
        camera_id: CameraId,
        ts: f64,
        frame_seq: u64,
        frame_size: FrameSize,
        detections: &[Detection],
        selected_target_id: Option<TrackId>,
        tracking_phase: TrackingPhase,
        ptz_cmd: PtzCommand,
    ) -> Self {
        Self {
            session_id,
            camera_id,
            ts,
            frame_seq,
            frame_size,
            tracks: detections
                .iter()
                .map(|d| TrackSummary::from_detection(d, frame_size))
                .collect(),
            available_ids: available_ids(detections).into_iter().collect(),
            selected_target_id,
            tracking_phase,
            ptz_cmd,
        }
    }
}

// ============================================================================
// Track Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackEventKind {
    New,
    Update,
    End,
}

/// A change in a track's `(confirmed, presence)` state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEvent {
    pub event: TrackEventKind,
    pub track_id: TrackId,
    pub label: String,
    pub top_confidence: f32,
    pub confirmed: bool,
    /// Normalized bbox at the highest-confidence observation
    pub best_bbox: [f32; 4],
    pub start_ts: f64,
    pub end_ts: Option<f64>,
}

#[derive(Debug, Clone)]
struct TrackRecord {
    label: String,
    hits: u32,
    top_confidence: f32,
    best_bbox: [f32; 4],
    start_ts: f64,
    confirmed: bool,
}

impl TrackRecord {
    fn event(&self, kind: TrackEventKind, track_id: TrackId, end_ts: Option<f64>) -> TrackEvent {
        TrackEvent {
            event: kind,
            track_id,
            label: self.label.clone(),
            top_confidence: self.top_confidence,
            confirmed: self.confirmed,
            best_bbox: self.best_bbox,
            start_ts: self.start_ts,
            end_ts,
        }
    }
}

/// Follows every detected track across ticks and reports lifecycle changes.
#[derive(Debug, Clone)]
pub struct TrackLifecycle {
    confirm_hits: u32,
    tracks: BTreeMap<TrackId, TrackRecord>,
}

impl TrackLifecycle {
    /// # Errors
    ///
    /// Returns an error if `confirm_hits` is zero.
    pub fn new(confirm_hits: u32) -> DomainResult<Self> {
        if confirm_hits == 0 {
            return Err(DomainError::invalid("confirm_hits", confirm_hits, "value >= 1"));
        }
        Ok(Self {
            confirm_hits,
            tracks: BTreeMap::new(),
        })
    }

    /// Number of tracks currently present.
    pub fn active_count(&self) -> usize {
        self.tracks.len()
    }

    /// Feeds one tick's detections and returns the resulting events.
    ///
    /// A track appearing for the first time yields `new`; a track crossing
    /// the confirmation threshold yields `update`; a known track missing
    /// from this tick yields `end`. Unchanged tracks yield nothing.
    pub fn observe(&mut self, detections: &[Detection], frame: FrameSize, ts: f64) -> Vec<TrackEvent> {
        let mut events = Vec::new();
        let mut seen = std::collections::BTreeSet::new();

        for det in detections {
            // Duplicate ids within one tick count as a single observation.
            if !seen.insert(det.id) {
                continue;
            }
            let bbox = det.bbox.normalized(frame);

            match self.tracks.get_mut(&det.id) {
                Some(record) => {
                    record.hits = record.hits.saturating_add(1);
                    if det.confidence > record.top_confidence {
                        record.top_confidence = det.confidence;
                        record.best_bbox = bbox;
                    }
                    if !record.confirmed && record.hits >= self.confirm_hits {
                        record.confirmed = true;
                        events.push(record.event(TrackEventKind::Update, det.id, None));
                    }
                }
                None => {
                    let record = TrackRecord {
                        label: det.label.clone(),
                        hits: 1,
                        top_confidence: det.confidence,
                        best_bbox: bbox,
                        start_ts: ts,
                        confirmed: self.confirm_hits <= 1,
                    };
                    events.push(record.event(TrackEventKind::New, det.id, None));
                    self.tracks.insert(det.id, record);
                }
            }
        }

        let ended: Vec<TrackId> = self
            .tracks
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        for id in ended {
            if let Some(record) = self.tracks.remove(&id) {
                events.push(record.event(TrackEventKind::End, id, Some(ts)));
            }
        }

        events
    }
}
