//! PTZ Daemon - tracking sessions, control loop and client server
//!
//! This crate provides the runtime of the PTZ tracking daemon:
//! - `registry` - SessionManager actor owning every camera session
//! - `session` - per-camera control loop, metadata publisher, control surface
//!   and watchdog
//! - `detector` - detector and frame-source seams plus the shipped stubs
//! - `factory` - builds backend/detector/frame source for a camera
//! - `server` - HTTP REST + WebSocket surface
//! - `config` - TOML configuration
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            ptzd                                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  ManagerCommand  ┌────────────────────────┐    │
//! │  │ HTTP server  │─────────────────▶│   SessionManager actor │    │
//! │  │ (axum)       │                  │   camera → session     │    │
//! │  └──────┬───────┘                  └───────────┬────────────┘    │
//! │         │ WebSocket                            │ spawn           │
//! │         ▼                                      ▼                 │
//! │  ┌──────────────┐  ControlRequest  ┌────────────────────────┐    │
//! │  │ connection   │─────────────────▶│   SessionRunner        │    │
//! │  │ (per client) │◀─────────────────│ frames → detect → PID  │    │
//! │  └──────────────┘ MetadataPublisher│ → PtzBackend           │    │
//! │                                    └────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod detector;
pub mod factory;
pub mod registry;
pub mod server;
pub mod session;
