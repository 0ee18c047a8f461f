//! Detector and frame-source seams.
//!
//! The object detector and the frame ingestion are external collaborators;
//! the daemon only defines the interfaces it drives them through and ships
//! stubs for tests, demos and camera-less bring-up.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ptz_core::{BBox, Detection, Frame, FrameBuffer, FrameSize};

// ============================================================================
// Detector
// ============================================================================

/// Runs object detection and tracking on one frame.
///
/// Implementations never fail: a detector error is reported as an empty list
/// so the control loop treats it as "nothing seen" and keeps going.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Vec<Detection>;
}

/// Detector that never reports anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDetector;

impl Detector for NoopDetector {
    fn detect(&mut self, _frame: &Frame) -> Vec<Detection> {
        Vec::new()
    }
}

/// Replays a fixed sequence of per-frame detection lists.
///
/// Each `detect` call consumes the next entry. After the script runs out the
/// detector either starts over (`cycle`) or reports nothing.
#[derive(Debug, Clone)]
pub struct ScriptedDetector {
    script: Vec<Vec<Detection>>,
    cursor: usize,
    cycle: bool,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script,
            cursor: 0,
            cycle: false,
        }
    }

    /// Replays the script forever.
    pub fn cycling(script: Vec<Vec<Detection>>) -> Self {
        Self {
            cycle: true,
            ..Self::new(script)
        }
    }

    /// A single `person` track (id 1) circling the frame center once every
    /// `steps` frames.
    pub fn orbit(frame: FrameSize, steps: usize) -> Self {
        let steps = steps.max(1);
        let w = frame.width as f32;
        let h = frame.height as f32;
        let (box_w, box_h) = (w * 0.12, h * 0.3);

        let script = (0..steps)
            .map(|i| {
                let angle = std::f32::consts::TAU * i as f32 / steps as f32;
                let cx = w * 0.5 + angle.cos() * w * 0.3;
                let cy = h * 0.5 + angle.sin() * h * 0.2;
                vec![Detection::new(
                    1,
                    "person",
                    0.9,
                    BBox::new(cx - box_w / 2.0, cy - box_h / 2.0, cx + box_w / 2.0, cy + box_h / 2.0),
                )]
            })
            .collect();
        Self::cycling(script)
    }

    /// Number of `detect` calls served so far (wrapping when cycling).
    pub fn position(&self) -> usize {
        self.cursor
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, _frame: &Frame) -> Vec<Detection> {
        if self.cycle && self.cursor >= self.script.len() {
            self.cursor = 0;
        }
        let detections = self.script.get(self.cursor).cloned().unwrap_or_default();
        self.cursor = self.cursor.saturating_add(1);
        detections
    }
}

// ============================================================================
// Frame Source
// ============================================================================

/// Produces raw frames. `next_frame` may block; it runs on a blocking thread.
///
/// Returning `None` ends the stream.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Option<Frame>;
}

/// Blank frames at a fixed rate, optionally a fixed number of them.
#[derive(Debug, Clone)]
pub struct SyntheticFrameSource {
    size: FrameSize,
    interval: Duration,
    sequence: u64,
    limit: Option<u64>,
}

impl SyntheticFrameSource {
    /// `rate_hz` is clamped to at least 0.1 Hz.
    pub fn new(size: FrameSize, rate_hz: f64) -> Self {
        let rate_hz = if rate_hz.is_finite() { rate_hz.max(0.1) } else { 10.0 };
        Self {
            size,
            interval: Duration::from_secs_f64(1.0 / rate_hz),
            sequence: 0,
            limit: None,
        }
    }

    /// Stops after `count` frames.
    pub fn with_limit(mut self, count: u64) -> Self {
        self.limit = Some(count);
        self
    }
}

impl FrameSource for SyntheticFrameSource {
    fn next_frame(&mut self) -> Option<Frame> {
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            return None;
        }
        std::thread::sleep(self.interval);
        let frame = Frame::blank(self.sequence, self.size);
        self.sequence += 1;
        Some(frame)
    }
}

/// Pumps `source` into `buffer` on a blocking thread until the source ends
/// or `cancel` fires.
pub fn spawn_frame_pump(
    mut source: Box<dyn FrameSource>,
    buffer: FrameBuffer<Frame>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut pumped: u64 = 0;
        while !cancel.is_cancelled() {
            match source.next_frame() {
                Some(frame) => {
                    buffer.put(frame);
                    pumped += 1;
                }
                None => {
                    info!(frames = pumped, "Frame source ended");
                    return;
                }
            }
        }
        debug!(frames = pumped, "Frame pump cancelled");
    })
}
