//! Control surface: the only way clients change tracking state.
//!
//! Commands are queued to the session runner and applied at the start of its
//! next iteration, before the phase computation. The caller gets the outcome
//! back on a oneshot channel, so an acked command is guaranteed to be visible
//! to the next tick.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use ptz_core::{PtzServo, TrackId, TrackerStatus, ZoomController};
use ptz_protocol::ClientCommand;

/// Queue depth for pending commands per session.
pub const COMMAND_BUFFER: usize = 32;

/// Outcome of an applied command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAck {
    pub command: ClientCommand,
    /// Locked target after the command
    pub target_id: Option<TrackId>,
    /// Whether the locked target actually changed
    pub changed: bool,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    /// The runner has exited; nothing is listening for commands
    #[error("session is not running")]
    SessionStopped,
}

impl ControlError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionStopped => "session_stopped",
        }
    }
}

/// A queued command with its reply channel.
#[derive(Debug)]
pub struct ControlRequest {
    pub command: ClientCommand,
    pub respond_to: oneshot::Sender<CommandAck>,
}

/// Mutable tracking state a command may touch.
pub struct ControlContext<'a> {
    pub status: &'a mut TrackerStatus,
    pub servo: &'a mut PtzServo,
    pub zoom: &'a mut ZoomController,
}

/// Applies one command synchronously.
///
/// Changing or clearing the target resets the servo and zoom controller so
/// no integral or zoom velocity carries over to the next target.
pub fn apply_command(ctx: &mut ControlContext<'_>, command: ClientCommand, now: f64) -> CommandAck {
    let target = match command {
        ClientCommand::SetTargetId { target_id } => Some(target_id),
        ClientCommand::ClearTarget => None,
    };

    let changed = ctx.status.set_target(target, now);
    if changed {
        ctx.servo.reset();
        ctx.zoom.reset();
    }

    CommandAck {
        command,
        target_id: ctx.status.target_id(),
        changed,
    }
}

/// Cloneable client side of a session's command queue.
#[derive(Debug, Clone)]
pub struct ControlSurface {
    sender: mpsc::Sender<ControlRequest>,
}

impl ControlSurface {
    /// Creates the surface and the receiver the runner drains.
    pub fn channel() -> (Self, mpsc::Receiver<ControlRequest>) {
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
        (Self { sender }, receiver)
    }

    /// Queues `command` and waits for the runner to apply it.
    ///
    /// # Errors
    ///
    /// `ControlError::SessionStopped` if the runner exited before applying it.
    pub async fn submit(&self, command: ClientCommand) -> Result<CommandAck, ControlError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(ControlRequest {
                command,
                respond_to: tx,
            })
            .await
            .map_err(|_| ControlError::SessionStopped)?;

        rx.await.map_err(|_| ControlError::SessionStopped)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptz_core::{ServoConfig, TrackingPhase, ZoomConfig};

    struct Parts {
        status: TrackerStatus,
        servo: PtzServo,
        zoom: ZoomController,
    }

    impl Parts {
        fn new() -> Self {
            Self {
                status: TrackerStatus::new(2.0).unwrap(),
                servo: PtzServo::new(ServoConfig::default()).unwrap(),
                zoom: ZoomController::new(ZoomConfig::default()).unwrap(),
            }
        }

        fn apply(&mut self, command: ClientCommand, now: f64) -> CommandAck {
            let mut ctx = ControlContext {
                status: &mut self.status,
                servo: &mut self.servo,
                zoom: &mut self.zoom,
            };
            apply_command(&mut ctx, command, now)
        }
    }

    #[test]
    fn test_set_then_clear_returns_to_idle() {
        let mut parts = Parts::new();
        parts.apply(ClientCommand::set_target_id(7), 0.0);
        let ack = parts.apply(ClientCommand::clear_target(), 0.0);

        assert!(ack.changed);
        assert_eq!(ack.target_id, None);
        assert_eq!(parts.status.phase(), TrackingPhase::Idle);
        assert_eq!(parts.servo.pan_state().integral, 0.0);
        assert_eq!(parts.servo.tilt_state().integral, 0.0);
    }

    #[test]
    fn test_target_change_resets_servo() {
        let mut parts = Parts::new();
        parts.apply(ClientCommand::set_target_id(1), 0.0);
        for i in 0..10 {
            parts.servo.control(0.5, 0.5, f64::from(i) * 0.1);
        }
        parts.zoom.adjust(0.0, 1.0);
        assert!(!parts.servo.is_reset());

        let ack = parts.apply(ClientCommand::set_target_id(2), 1.0);
        assert!(ack.changed);
        assert_eq!(ack.target_id, Some(2));
        assert!(parts.servo.is_reset());
        assert_eq!(parts.zoom.output(), 0.0);
    }

    #[test]
    fn test_same_target_keeps_servo_state() {
        let mut parts = Parts::new();
        parts.apply(ClientCommand::set_target_id(1), 0.0);
        parts.servo.control(0.5, 0.5, 0.0);
        parts.servo.control(0.5, 0.5, 0.1);

        let ack = parts.apply(ClientCommand::set_target_id(1), 0.2);
        assert!(!ack.changed);
        assert!(!parts.servo.is_reset());
    }

    #[tokio::test]
    async fn test_submit_round_trip() {
        let (surface, mut rx) = ControlSurface::channel();
        tokio::spawn(async move {
            let mut parts = Parts::new();
            while let Some(req) = rx.recv().await {
                let ack = parts.apply(req.command, 0.0);
                let _ = req.respond_to.send(ack);
            }
        });

        let ack = surface.submit(ClientCommand::set_target_id(4)).await.unwrap();
        assert_eq!(ack.target_id, Some(4));
    }

    #[tokio::test]
    async fn test_submit_to_stopped_session() {
        let (surface, rx) = ControlSurface::channel();
        drop(rx);
        assert_eq!(
            surface.submit(ClientCommand::clear_target()).await,
            Err(ControlError::SessionStopped)
        );
        assert!(surface.is_closed());
    }
}
