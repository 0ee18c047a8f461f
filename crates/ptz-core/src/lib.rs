//! PTZ Core - Shared types for detector-driven PTZ tracking
//!
//! This crate provides the domain types and pure control algorithms shared
//! between the backends (ptz-backend), the wire protocol (ptz-protocol) and
//! the daemon (ptzd):
//! - `tracker` - tracking-phase state machine over one locked target
//! - `selector` - picking the locked target out of a detection list
//! - `servo` / `zoom` - PID pan/tilt servo and rate-limited zoom controller
//! - `frame_buffer` - bounded drop-oldest hand-off between ingestion and loop
//! - `metadata` - latest-state snapshots and track lifecycle events
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod command;
pub mod detection;
pub mod error;
pub mod frame_buffer;
pub mod metadata;
pub mod selector;
pub mod servo;
pub mod session;
pub mod tracker;
pub mod zoom;

// Re-exports for convenience
pub use command::{BackendPose, PtzCommand};
pub use detection::{BBox, Detection, Frame, FrameSize, TrackId};
pub use error::{DomainError, DomainResult};
pub use frame_buffer::{FrameBuffer, FrameBufferStats};
pub use metadata::{
    MetadataTick, TrackEvent, TrackEventKind, TrackLifecycle, TrackSummary, DEFAULT_CONFIRM_HITS,
};
pub use selector::{available_ids, select_by_id};
pub use servo::{apply_dead_band, GainPreset, PidGains, PidState, PtzServo, ServoConfig};
pub use session::{CameraId, HealthReason, SessionId, SessionState, SessionView};
pub use tracker::{TrackerStatus, TrackingPhase};
pub use zoom::{ZoomConfig, ZoomController};
