//! Detector output and frame value types.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Tracker-assigned identity of a detected object.
///
/// Stable only within one session; the detector owns the numbering.
pub type TrackId = i64;

// ============================================================================
// Geometry
// ============================================================================

/// Pixel dimensions of a source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Frame area in square pixels.
    pub fn area(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }

    /// Returns true if either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Axis-aligned bounding box in source-frame pixels (`x1,y1` top-left,
/// `x2,y2` bottom-right).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Center point `(cx, cy)` in pixels.
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) * 0.5, (self.y1 + self.y2) * 0.5)
    }

    /// Area in square pixels (zero for degenerate boxes).
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Fraction of the frame covered by this box, clamped to `[0, 1]`.
    pub fn coverage(&self, frame: FrameSize) -> f64 {
        if frame.is_empty() {
            return 0.0;
        }
        (f64::from(self.area()) / frame.area()).clamp(0.0, 1.0)
    }

    /// Normalized `[x1, y1, x2, y2]` in `[0, 1]`, top-left origin.
    pub fn normalized(&self, frame: FrameSize) -> [f32; 4] {
        if frame.is_empty() {
            return [0.0; 4];
        }
        let w = frame.width as f32;
        let h = frame.height as f32;
        [
            (self.x1 / w).clamp(0.0, 1.0),
            (self.y1 / h).clamp(0.0, 1.0),
            (self.x2 / w).clamp(0.0, 1.0),
            (self.y2 / h).clamp(0.0, 1.0),
        ]
    }
}

// ============================================================================
// Detection
// ============================================================================

/// A single object reported by the external detector/tracker for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: TrackId,
    pub label: String,
    /// Detector confidence in `[0, 1]`
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    pub fn new(id: TrackId, label: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            id,
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A raw frame handed from ingestion to the control loop.
///
/// The pixel payload is opaque to the core; only the detector looks at it.
/// Cloning is cheap (the payload is reference counted).
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic sequence number assigned by the frame source
    pub sequence: u64,
    pub size: FrameSize,
    pub pixels: Arc<[u8]>,
}

impl Frame {
    pub fn new(sequence: u64, size: FrameSize, pixels: impl Into<Arc<[u8]>>) -> Self {
        Self {
            sequence,
            size,
            pixels: pixels.into(),
        }
    }

    /// A frame with no pixel payload, for sources that only carry geometry.
    pub fn blank(sequence: u64, size: FrameSize) -> Self {
        Self::new(sequence, size, Vec::new())
    }
}
