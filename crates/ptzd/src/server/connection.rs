//! Per-client WebSocket handler.
//!
//! On open the client gets `hello`, then the latest `metadata_tick` if the
//! session has produced one. After that the handler multiplexes:
//! - publisher payloads → client (each send bounded by the write timeout)
//! - client text frames → `parse_command` → ControlSurface → `ack` / `error`
//!
//! The subscription is taken before `hello` is sent, so no tick published
//! after the handshake is missed.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ptz_protocol::{parse_command, ServerMessage};

use crate::session::{Payload, SessionHandle};

/// Close code sent when the session ends or the client fell behind.
const CLOSE_GOING_AWAY: u16 = 1001;

type WsSink = SplitSink<WebSocket, Message>;

pub struct ConnectionHandler {
    session: SessionHandle,
    write_timeout: Duration,
    cancel: CancellationToken,
}

impl ConnectionHandler {
    pub fn new(session: SessionHandle, write_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            session,
            write_timeout,
            cancel,
        }
    }

    /// Serves one client until it disconnects, the session ends, or the
    /// daemon shuts down.
    pub async fn run(self, socket: WebSocket) {
        let publisher = Arc::clone(self.session.publisher());
        let (subscriber, updates) = publisher.subscribe();
        let session_id = self.session.session_id().clone();
        info!(session_id = %session_id, subscriber, "Client connected");

        if let Err(e) = self.serve(socket, updates).await {
            debug!(session_id = %session_id, subscriber, error = %e, "Connection ended with error");
        }

        publisher.unsubscribe(subscriber);
        info!(session_id = %session_id, subscriber, "Client disconnected");
    }

    async fn serve(
        &self,
        socket: WebSocket,
        mut updates: mpsc::Receiver<Payload>,
    ) -> Result<(), ConnectionError> {
        let (mut sink, mut stream) = socket.split();

        let hello = ServerMessage::hello(
            self.session.session_id().clone(),
            self.session.camera_id().clone(),
        );
        self.send_message(&mut sink, &hello).await?;
        if let Some(tick) = self.session.publisher().latest() {
            self.send_message(&mut sink, &ServerMessage::metadata_tick(tick)).await?;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.close(&mut sink, "daemon shutting down").await;
                    return Ok(());
                }

                payload = updates.recv() => match payload {
                    Some(payload) => self.send_text(&mut sink, payload.to_string()).await?,
                    None => {
                        // Session stopped, or this client was too slow.
                        self.close(&mut sink, "stream ended").await;
                        return Ok(());
                    }
                },

                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = self.handle_command(&text).await;
                        self.send_message(&mut sink, &reply).await?;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = ServerMessage::error("invalid_json", "binary frames are not supported");
                        self.send_message(&mut sink, &reply).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    // Ping/pong are answered by the WebSocket layer.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ConnectionError::Socket(e.to_string())),
                },
            }
        }
    }

    /// Validates and applies one client command, returning the reply.
    async fn handle_command(&self, text: &str) -> ServerMessage {
        let command = match parse_command(text) {
            Ok(command) => command,
            Err(e) => {
                debug!(session_id = %self.session.session_id(), error = %e, "Rejected command");
                return ServerMessage::command_error(&e);
            }
        };

        match self.session.control().submit(command).await {
            Ok(ack) => {
                debug!(
                    session_id = %self.session.session_id(),
                    command = ack.command.name(),
                    target_id = ?ack.target_id,
                    "Command applied"
                );
                ServerMessage::ack(&ack.command)
            }
            Err(e) => ServerMessage::error(e.code(), e.to_string()),
        }
    }

    async fn send_message(&self, sink: &mut WsSink, msg: &ServerMessage) -> Result<(), ConnectionError> {
        let json = serde_json::to_string(msg).map_err(|e| ConnectionError::Serialize(e.to_string()))?;
        self.send_text(sink, json).await
    }

    async fn send_text(&self, sink: &mut WsSink, text: String) -> Result<(), ConnectionError> {
        match timeout(self.write_timeout, sink.send(Message::Text(text))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Socket(e.to_string())),
            Err(_) => {
                warn!(
                    session_id = %self.session.session_id(),
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "WebSocket write timed out, disconnecting client"
                );
                Err(ConnectionError::WriteTimeout)
            }
        }
    }

    async fn close(&self, sink: &mut WsSink, reason: &'static str) {
        let frame = Message::Close(Some(CloseFrame {
            code: CLOSE_GOING_AWAY,
            reason: reason.into(),
        }));
        let _ = timeout(self.write_timeout, sink.send(frame)).await;
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Serialization error: {0}")]
    Serialize(String),
}
