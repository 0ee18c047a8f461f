//! PTZ Backend - camera actuation behind one trait
//!
//! The session runner drives every camera through [`PtzBackend`] and never
//! knows which implementation it holds:
//! - [`SimulatedBackend`] - kinematic model with ramped velocity, for tests
//!   and camera-less development
//! - [`OnvifBackend`] - ONVIF PTZ over SOAP/HTTP with WS-Security digest auth
//!
//! PTZ failures are values ([`BackendError`], `Option<BackendPose>`); none of
//! them is fatal to a session.

pub mod backend;
pub mod error;
pub mod onvif;
pub mod simulated;

pub use backend::{BackendKind, PtzBackend};
pub use error::{BackendError, BackendResult};
pub use onvif::{OnvifBackend, OnvifConfig};
pub use simulated::{SimulatedBackend, SimulatedConfig};
