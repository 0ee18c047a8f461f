//! Builds the external collaborators of a session from configuration.

use std::sync::Arc;

use tracing::debug;

use ptz_backend::{
    BackendError, BackendKind, OnvifBackend, PtzBackend, SimulatedBackend,
};
use ptz_core::CameraId;

use crate::config::{DaemonConfig, DetectorKind};
use crate::detector::{Detector, FrameSource, NoopDetector, ScriptedDetector, SyntheticFrameSource};
use crate::registry::ManagerError;

/// Steps in one orbit of the demo detector.
const DEMO_ORBIT_STEPS: usize = 200;

/// Backend, detector and frame source for one camera.
pub struct SessionParts {
    pub backend: Box<dyn PtzBackend>,
    pub detector: Box<dyn Detector>,
    pub source: Box<dyn FrameSource>,
}

/// Creates the per-camera collaborators when the manager starts a session.
pub trait SessionFactory: Send + Sync {
    /// # Errors
    ///
    /// `ManagerError::UnknownCamera` for cameras that may not be served, or
    /// `ManagerError::Backend` when the PTZ backend cannot be set up.
    fn build(&self, camera_id: &CameraId) -> Result<SessionParts, ManagerError>;
}

/// Factory driven by [`DaemonConfig`].
#[derive(Debug, Clone)]
pub struct ConfigSessionFactory {
    config: Arc<DaemonConfig>,
}

impl ConfigSessionFactory {
    pub fn new(config: Arc<DaemonConfig>) -> Self {
        Self { config }
    }

    fn backend(&self, camera_id: &CameraId) -> Result<Box<dyn PtzBackend>, ManagerError> {
        let camera = self.config.camera(camera_id);
        if camera.is_none() && !self.config.allow_unknown_cameras {
            return Err(ManagerError::UnknownCamera(camera_id.clone()));
        }

        let kind = camera
            .and_then(|c| c.backend)
            .unwrap_or(self.config.backend.kind);
        debug!(camera_id = %camera_id, backend = %kind, "Building PTZ backend");

        match kind {
            BackendKind::Simulated => {
                let sim = camera
                    .and_then(|c| c.simulated)
                    .unwrap_or(self.config.backend.simulated);
                Ok(Box::new(SimulatedBackend::new(sim)?))
            }
            BackendKind::Onvif => {
                let onvif = camera.and_then(|c| c.onvif.clone()).ok_or_else(|| {
                    BackendError::InvalidConfig(format!(
                        "camera '{camera_id}' has no onvif section"
                    ))
                })?;
                Ok(Box::new(OnvifBackend::new(onvif)?))
            }
        }
    }
}

impl SessionFactory for ConfigSessionFactory {
    fn build(&self, camera_id: &CameraId) -> Result<SessionParts, ManagerError> {
        let backend = self.backend(camera_id)?;

        let runtime = &self.config.runtime;
        let detector: Box<dyn Detector> = match self.config.detector.kind {
            DetectorKind::Noop => Box::new(NoopDetector),
            DetectorKind::Demo => Box::new(ScriptedDetector::orbit(
                runtime.frame_size(),
                DEMO_ORBIT_STEPS,
            )),
        };
        let source = Box::new(SyntheticFrameSource::new(
            runtime.frame_size(),
            runtime.frame_rate_hz,
        ));

        Ok(SessionParts {
            backend,
            detector,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptz_backend::OnvifConfig;

    use crate::config::CameraConfig;

    fn config(allow_unknown: bool, cameras: Vec<CameraConfig>) -> Arc<DaemonConfig> {
        Arc::new(DaemonConfig {
            allow_unknown_cameras: allow_unknown,
            cameras,
            ..DaemonConfig::default()
        })
    }

    fn camera(id: &str, backend: Option<BackendKind>, onvif: Option<OnvifConfig>) -> CameraConfig {
        CameraConfig {
            id: CameraId::new(id),
            backend,
            onvif,
            simulated: None,
        }
    }

    #[test]
    fn test_unknown_camera_allowed_uses_default() {
        let factory = ConfigSessionFactory::new(config(true, vec![]));
        let parts = factory.build(&CameraId::new("anything")).unwrap();
        assert_eq!(parts.backend.name(), "simulated");
    }

    #[test]
    fn test_unknown_camera_rejected() {
        let factory = ConfigSessionFactory::new(config(false, vec![camera("lobby", None, None)]));
        assert!(factory.build(&CameraId::new("lobby")).is_ok());
        match factory.build(&CameraId::new("garage")) {
            Err(ManagerError::UnknownCamera(id)) => assert_eq!(id.as_str(), "garage"),
            Err(other) => panic!("Expected UnknownCamera, got {other:?}"),
            Ok(_) => panic!("Expected UnknownCamera, got a session"),
        }
    }

    #[test]
    fn test_onvif_camera() {
        let onvif = OnvifConfig::new("http://192.0.2.10");
        let factory = ConfigSessionFactory::new(config(
            false,
            vec![camera("dome", Some(BackendKind::Onvif), Some(onvif))],
        ));
        let parts = factory.build(&CameraId::new("dome")).unwrap();
        assert_eq!(parts.backend.name(), "onvif");
    }

    #[test]
    fn test_onvif_without_section_fails() {
        let factory = ConfigSessionFactory::new(config(
            false,
            vec![camera("dome", Some(BackendKind::Onvif), None)],
        ));
        assert!(matches!(
            factory.build(&CameraId::new("dome")),
            Err(ManagerError::Backend(_))
        ));
    }
}
