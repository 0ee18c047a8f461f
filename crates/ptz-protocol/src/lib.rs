//! PTZ Protocol - Wire protocol for tracking clients
//!
//! This crate provides the message types exchanged between the daemon and
//! its remote clients:
//! - `message` - WebSocket server/client messages (JSON text frames)
//! - `parse` - validation of inbound client commands into typed errors
//! - `rest` - request/response bodies for the session REST API

pub mod message;
pub mod parse;
pub mod rest;

pub use message::{ClientCommand, ServerMessage, PROTOCOL_VERSION};
pub use parse::{parse_command, CommandError};
pub use rest::{CreateSessionRequest, CreateSessionResponse, ErrorBody, HealthResponse, SessionList};
