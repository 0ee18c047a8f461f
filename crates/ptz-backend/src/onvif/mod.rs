//! ONVIF PTZ hardware backend.
//!
//! Talks SOAP 1.2 over HTTP to the camera's PTZ and media services with
//! WS-Security `UsernameToken` digest authentication.
//!
//! ## Session state
//!
//! The media profile token is either configured or resolved lazily with
//! `GetProfiles` on first use. A resolved token is forgotten after any
//! failed request so a camera that rebooted with new profiles recovers on
//! the next tick.
//!
//! Every request is bounded by `request_timeout_ms`; the control loop never
//! waits longer than that on a camera.

mod soap;

use async_trait::async_trait;
use ptz_core::{BackendPose, PtzCommand};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::PtzBackend;
use crate::error::{BackendError, BackendResult};
use soap::Request;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 1500;

/// Longest response body kept in error messages.
const MAX_ERROR_BODY: usize = 256;

/// Connection settings for one ONVIF camera.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnvifConfig {
    /// Device service URL, e.g. `http://192.168.1.20:2020/onvif/device_service`
    pub endpoint: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Media profile token; resolved with `GetProfiles` when absent
    #[serde(default)]
    pub profile_token: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl OnvifConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: String::new(),
            password: String::new(),
            profile_token: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    pub fn validate(&self) -> BackendResult<()> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(BackendError::InvalidConfig(format!(
                "onvif endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(BackendError::InvalidConfig(
                "onvif request_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// Keeps the password out of logs.
impl fmt::Debug for OnvifConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnvifConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("profile_token", &self.profile_token)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

/// ONVIF camera backend.
pub struct OnvifBackend {
    config: OnvifConfig,
    client: Client,
    ptz_url: String,
    media_url: String,
    resolved_token: Option<String>,
}

impl OnvifBackend {
    /// Creates the backend. No network traffic happens until the first call.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: OnvifConfig) -> BackendResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| BackendError::InvalidConfig(format!("http client: {e}")))?;

        let ptz_url = soap::service_url(&config.endpoint, "ptz_service");
        let media_url = soap::service_url(&config.endpoint, "media_service");

        Ok(Self {
            config,
            client,
            ptz_url,
            media_url,
            resolved_token: None,
        })
    }

    pub fn config(&self) -> &OnvifConfig {
        &self.config
    }

    /// Returns the profile token, resolving it on first use.
    async fn profile_token(&mut self) -> BackendResult<String> {
        if let Some(token) = self.config.profile_token.as_ref().or(self.resolved_token.as_ref()) {
            return Ok(token.clone());
        }

        let body = self.send(&Request::GetProfiles).await?;
        let token = soap::parse_profile_token(&body).ok_or_else(|| {
            BackendError::NoProfile("GetProfiles response listed no profile token".to_string())
        })?;

        info!(endpoint = %self.config.endpoint, token = %token, "Resolved ONVIF media profile");
        self.resolved_token = Some(token.clone());
        Ok(token)
    }

    /// Resolves the token, runs a PTZ request built from it, and forgets the
    /// resolved token if anything fails.
    async fn call<F>(&mut self, build: F) -> BackendResult<String>
    where
        F: for<'t> FnOnce(&'t str) -> Request<'t> + Send,
    {
        let result = match self.profile_token().await {
            Ok(token) => {
                let request = build(&token);
                self.send(&request).await
            }
            Err(e) => Err(e),
        };

        if result.is_err() && self.resolved_token.take().is_some() {
            debug!(endpoint = %self.config.endpoint, "Dropped cached ONVIF profile token after failure");
        }
        result
    }

    async fn send(&self, request: &Request<'_>) -> BackendResult<String> {
        let action = request.action();
        let url = if request.is_media() {
            &self.media_url
        } else {
            &self.ptz_url
        };

        debug!(url = %url, action = %action, "Sending ONVIF request");

        let response = self
            .client
            .post(url)
            .header(
                "Content-Type",
                format!(
                    "application/soap+xml; charset=utf-8; action=\"{}\"",
                    request.action_uri()
                ),
            )
            .body(request.render(&self.config.username, &self.config.password))
            .send()
            .await
            .map_err(|e| self.transport_error(action, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(action, &e))?;

        if !status.is_success() {
            warn!(action = %action, status = %status, "ONVIF request rejected");
            return Err(BackendError::Rejected {
                action: action.to_string(),
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        Ok(body)
    }

    fn transport_error(&self, action: &str, e: &reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout {
                action: action.to_string(),
                timeout_ms: self.config.request_timeout_ms,
            }
        } else {
            BackendError::Network {
                action: action.to_string(),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl PtzBackend for OnvifBackend {
    async fn continuous_move(&mut self, cmd: PtzCommand) -> BackendResult<()> {
        let cmd = cmd.clamped();
        self.call(|token| Request::ContinuousMove { token, cmd }).await?;
        Ok(())
    }

    async fn stop(&mut self) -> BackendResult<()> {
        self.call(|token| Request::Stop { token }).await?;
        Ok(())
    }

    async fn set_zoom_absolute(&mut self, level: f32) -> BackendResult<()> {
        let level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
        self.call(|token| Request::AbsoluteZoom { token, level }).await?;
        Ok(())
    }

    async fn set_zoom_relative(&mut self, delta: f32) -> BackendResult<()> {
        let delta = if delta.is_nan() { 0.0 } else { delta.clamp(-1.0, 1.0) };
        self.call(|token| Request::RelativeZoom { token, delta }).await?;
        Ok(())
    }

    async fn set_home_position(&mut self) -> BackendResult<()> {
        self.call(|token| Request::GotoHomePosition { token }).await?;
        Ok(())
    }

    async fn get_position(&mut self) -> Option<BackendPose> {
        match self.call(|token| Request::GetStatus { token }).await {
            Ok(body) => soap::parse_status(&body),
            Err(e) => {
                debug!(error = %e, "ONVIF GetStatus failed");
                None
            }
        }
    }

    fn name(&self) -> &str {
        "onvif"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, routing::post, Router};
    use std::sync::{Arc, Mutex};

    const PROFILES: &str = r#"<s:Envelope><s:Body><trt:GetProfilesResponse><trt:Profiles token="main_profile" fixed="true"/></trt:GetProfilesResponse></s:Body></s:Envelope>"#;
    const STATUS: &str = r#"<s:Envelope><s:Body><tptz:GetStatusResponse><tptz:PTZStatus><tt:Position><tt:PanTilt x="0.5" y="0.25"/><tt:Zoom x="0.75"/></tt:Position></tptz:PTZStatus></tptz:GetStatusResponse></s:Body></s:Envelope>"#;
    const OK: &str = r#"<s:Envelope><s:Body/></s:Envelope>"#;

    #[derive(Clone, Default)]
    struct Camera {
        requests: Arc<Mutex<Vec<String>>>,
        fail_ptz: Arc<Mutex<bool>>,
    }

    async fn media(State(cam): State<Camera>, body: String) -> String {
        if let Ok(mut reqs) = cam.requests.lock() {
            reqs.push(body);
        }
        PROFILES.to_string()
    }

    async fn ptz(State(cam): State<Camera>, body: String) -> (axum::http::StatusCode, String) {
        let is_status = body.contains("GetStatus");
        if let Ok(mut reqs) = cam.requests.lock() {
            reqs.push(body);
        }
        if cam.fail_ptz.lock().map(|f| *f).unwrap_or(false) {
            return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "fault".to_string());
        }
        let reply = if is_status { STATUS } else { OK };
        (axum::http::StatusCode::OK, reply.to_string())
    }

    async fn spawn_camera() -> (String, Camera) {
        let cam = Camera::default();
        let app = Router::new()
            .route("/onvif/media_service", post(media))
            .route("/onvif/ptz_service", post(ptz))
            .with_state(cam.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/onvif/device_service"), cam)
    }

    fn requests(cam: &Camera) -> Vec<String> {
        cam.requests.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_profile_resolved_lazily_once() {
        let (endpoint, cam) = spawn_camera().await;
        let mut backend = OnvifBackend::new(OnvifConfig {
            username: "admin".to_string(),
            password: "pw".to_string(),
            ..OnvifConfig::new(endpoint)
        })
        .unwrap();
        assert!(requests(&cam).is_empty());

        backend.continuous_move(PtzCommand::new(0.5, 0.0, 0.0)).await.unwrap();
        backend.stop().await.unwrap();

        let reqs = requests(&cam);
        assert_eq!(reqs.len(), 3);
        assert!(reqs[0].contains("GetProfiles"));
        assert!(reqs[1].contains("ContinuousMove"));
        assert!(reqs[1].contains("<tptz:ProfileToken>main_profile</tptz:ProfileToken>"));
        assert!(reqs[1].contains("PasswordDigest"));
        assert!(reqs[2].contains("<tptz:Stop>"));
    }

    #[tokio::test]
    async fn test_configured_token_skips_get_profiles() {
        let (endpoint, cam) = spawn_camera().await;
        let mut backend = OnvifBackend::new(OnvifConfig {
            profile_token: Some("fixed".to_string()),
            ..OnvifConfig::new(endpoint)
        })
        .unwrap();

        backend.set_home_position().await.unwrap();
        let reqs = requests(&cam);
        assert_eq!(reqs.len(), 1);
        assert!(reqs[0].contains("GotoHomePosition"));
        assert!(!reqs[0].contains("Security"));
    }

    #[tokio::test]
    async fn test_get_position_parses_status() {
        let (endpoint, _cam) = spawn_camera().await;
        let mut backend = OnvifBackend::new(OnvifConfig::new(endpoint)).unwrap();
        let pose = backend.get_position().await.unwrap();
        assert_eq!(pose.pan_pos, 0.5);
        assert_eq!(pose.tilt_pos, 0.25);
        assert_eq!(pose.zoom_level, 0.75);
    }

    #[tokio::test]
    async fn test_failure_forgets_token() {
        let (endpoint, cam) = spawn_camera().await;
        let mut backend = OnvifBackend::new(OnvifConfig::new(endpoint)).unwrap();
        backend.stop().await.unwrap();

        *cam.fail_ptz.lock().unwrap() = true;
        let err = backend.stop().await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected { status: 500, .. }));
        assert!(backend.get_position().await.is_none());

        *cam.fail_ptz.lock().unwrap() = false;
        backend.stop().await.unwrap();

        let profiles = requests(&cam).iter().filter(|r| r.contains("GetProfiles")).count();
        assert_eq!(profiles, 3);
    }

    #[tokio::test]
    async fn test_unreachable_camera_is_error() {
        let mut backend = OnvifBackend::new(OnvifConfig {
            request_timeout_ms: 200,
            profile_token: Some("p".to_string()),
            ..OnvifConfig::new("http://127.0.0.1:1/onvif/device_service")
        })
        .unwrap();
        assert!(backend.stop().await.is_err());
        assert!(backend.get_position().await.is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(OnvifBackend::new(OnvifConfig::new("rtsp://cam")).is_err());
        let zero = OnvifConfig {
            request_timeout_ms: 0,
            ..OnvifConfig::new("http://cam")
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let cfg = OnvifConfig {
            password: "hunter2".to_string(),
            ..OnvifConfig::new("http://cam")
        };
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }
}
