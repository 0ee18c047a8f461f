//! WebSocket message types.

use ptz_core::{CameraId, MetadataTick, SessionId, TrackEvent, TrackId};
use serde::{Deserialize, Serialize};

use crate::parse::CommandError;

/// Protocol version announced in the `hello` message.
///
/// Major bumps are breaking; clients should refuse an unknown major.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Commands a client may send over the session WebSocket.
///
/// This is the complete control surface: there is no manual PTZ override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Lock the tracker onto a detector track id
    SetTargetId { target_id: TrackId },

    /// Release the locked target
    ClearTarget,
}

impl ClientCommand {
    /// Wire name of the command, echoed back in `ack`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetTargetId { .. } => "set_target_id",
            Self::ClearTarget => "clear_target",
        }
    }

    /// Creates a set-target command.
    pub fn set_target_id(target_id: TrackId) -> Self {
        Self::SetTargetId { target_id }
    }

    /// Creates a clear-target command.
    pub fn clear_target() -> Self {
        Self::ClearTarget
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on every connection
    Hello {
        protocol_version: String,
        session_id: SessionId,
        camera_id: CameraId,
    },

    /// Latest-state snapshot, sent once per control-loop tick
    MetadataTick(Box<MetadataTick>),

    /// Track lifecycle change
    TrackEvent(Box<TrackEvent>),

    /// Command applied
    Ack { command: String },

    /// Command rejected; no state changed
    Error { error: String, message: String },
}

impl ServerMessage {
    /// Creates a hello message with the current protocol version.
    pub fn hello(session_id: SessionId, camera_id: CameraId) -> Self {
        Self::Hello {
            protocol_version: PROTOCOL_VERSION.to_string(),
            session_id,
            camera_id,
        }
    }

    pub fn metadata_tick(tick: MetadataTick) -> Self {
        Self::MetadataTick(Box::new(tick))
    }

    pub fn track_event(event: TrackEvent) -> Self {
        Self::TrackEvent(Box::new(event))
    }

    /// Creates an ack for the given command.
    pub fn ack(command: &ClientCommand) -> Self {
        Self::Ack {
            command: command.name().to_string(),
        }
    }

    /// Creates an error response with an explicit code.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            error: code.to_string(),
            message: message.into(),
        }
    }

    /// Creates an error response for a rejected command.
    pub fn command_error(err: &CommandError) -> Self {
        Self::error(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptz_core::{FrameSize, PtzCommand, TrackingPhase};

    #[test]
    fn test_hello_serialization() {
        let msg = ServerMessage::hello(SessionId::new("abc"), CameraId::new("cam-1"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "hello");
        assert_eq!(json["protocol_version"], PROTOCOL_VERSION);
        assert_eq!(json["session_id"], "abc");
        assert_eq!(json["camera_id"], "cam-1");
    }

    #[test]
    fn test_metadata_tick_is_flat() {
        let tick = MetadataTick::build(
            SessionId::new("s"),
            CameraId::new("c"),
            1.0,
            3,
            FrameSize::new(640, 480),
            &[],
            None,
            TrackingPhase::Idle,
            PtzCommand::STOP,
        );
        let json = serde_json::to_value(ServerMessage::metadata_tick(tick.clone())).unwrap();
        assert_eq!(json["type"], "metadata_tick");
        assert_eq!(json["frame_seq"], 3);
        assert_eq!(json["tracking_phase"], "idle");

        let parsed: ServerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, ServerMessage::metadata_tick(tick));
    }

    #[test]
    fn test_ack_and_error() {
        let ack = serde_json::to_string(&ServerMessage::ack(&ClientCommand::clear_target())).unwrap();
        assert_eq!(ack, r#"{"type":"ack","command":"clear_target"}"#);

        let err = ServerMessage::command_error(&CommandError::MissingTargetId);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"], "missing_target_id");
    }

    #[test]
    fn test_client_command_serialization() {
        let json = serde_json::to_string(&ClientCommand::set_target_id(7)).unwrap();
        assert_eq!(json, r#"{"type":"set_target_id","target_id":7}"#);
        assert_eq!(ClientCommand::set_target_id(7).name(), "set_target_id");
    }
}
