//! Validation of inbound client commands.
//!
//! Commands arrive as untrusted JSON text. Parsing goes through
//! `serde_json::Value` first so every rejection maps to a specific error code
//! the client can act on, rather than a generic deserialization message.

use serde_json::Value;
use thiserror::Error;

use crate::message::ClientCommand;

/// Why a client command was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command is not a valid JSON object: {0}")]
    InvalidJson(String),

    #[error("Command has no string \"type\" field")]
    MissingType,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("set_target_id requires a \"target_id\" field")]
    MissingTargetId,

    #[error("target_id must be a non-negative integer, got {0}")]
    InvalidTargetId(String),
}

impl CommandError {
    /// Stable machine-readable code sent in `error` messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::MissingType => "missing_type",
            Self::UnknownCommand(_) => "unknown_command",
            Self::MissingTargetId => "missing_target_id",
            Self::InvalidTargetId(_) => "invalid_target_id",
        }
    }
}

/// Parses and validates one client command.
pub fn parse_command(text: &str) -> Result<ClientCommand, CommandError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| CommandError::InvalidJson(e.to_string()))?;

    let obj = value
        .as_object()
        .ok_or_else(|| CommandError::InvalidJson("expected an object".to_string()))?;

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CommandError::MissingType)?;

    match kind {
        "set_target_id" => {
            let raw = match obj.get("target_id") {
                None | Some(Value::Null) => return Err(CommandError::MissingTargetId),
                Some(raw) => raw,
            };
            let target_id = raw
                .as_i64()
                .filter(|id| *id >= 0)
                .ok_or_else(|| CommandError::InvalidTargetId(raw.to_string()))?;
            Ok(ClientCommand::SetTargetId { target_id })
        }
        "clear_target" => Ok(ClientCommand::ClearTarget),
        other => Err(CommandError::UnknownCommand(other.to_string())),
    }
}
