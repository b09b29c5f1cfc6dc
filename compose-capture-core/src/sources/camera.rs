use std::sync::Arc;
use std::time::Duration;

use super::pacer::PacedSlot;
use crate::models::error::CaptureError;
use crate::models::geometry::Size;
use crate::models::source::{RecordingSource, SourceKind};
use crate::traits::capture_source::{CaptureSource, DeviceContext, SourceFrame};
use crate::traits::source_backend::SourceBackend;

/// Captures a camera in the format selected by `format_index`.
#[derive(Default)]
pub struct CameraSource {
    backend: Option<Arc<dyn SourceBackend>>,
    paced: PacedSlot,
}

impl CameraSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureSource for CameraSource {
    fn initialize(&mut self, context: &DeviceContext) -> Result<(), CaptureError> {
        self.backend = Some(context.backend.clone());
        Ok(())
    }

    fn start_capture(&mut self, source: &RecordingSource) -> Result<(), CaptureError> {
        let SourceKind::Camera { device_id } = &source.kind else {
            return Err(CaptureError::ConfigurationFailed(format!(
                "camera source cannot capture a {}",
                source.kind.label()
            )));
        };
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| CaptureError::ConfigurationFailed("camera source not initialized".into()))?;
        let provider = backend.open_camera(device_id, source.format_index)?;
        log::debug!(
            "camera {} opened at {:?} fps",
            device_id,
            provider.frame_rate()
        );
        self.paced.start("camera", provider)
    }

    fn acquire_next_frame(&mut self, timeout: Duration) -> Result<Option<SourceFrame>, CaptureError> {
        self.paced.recv(timeout)
    }

    fn native_size(&self, _source: &RecordingSource) -> Result<Size, CaptureError> {
        self.paced.native_size()
    }

    fn stop_capture(&mut self) {
        self.paced.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeBackend, FakeFeed};

    #[test]
    fn delivers_paced_frames() {
        let backend = FakeBackend::new().with_camera("cam0", FakeFeed::new(Size::new(32, 24)));
        let mut camera = CameraSource::new();
        camera.initialize(&DeviceContext::new(Arc::new(backend))).unwrap();

        let source = RecordingSource::new(SourceKind::Camera {
            device_id: "cam0".into(),
        });
        camera.start_capture(&source).unwrap();
        assert_eq!(camera.native_size(&source).unwrap(), Size::new(32, 24));

        let frame = camera.acquire_next_frame(Duration::from_secs(5)).unwrap();
        assert!(frame.is_some());
        camera.stop_capture();
    }

    #[test]
    fn missing_camera_fails_to_start() {
        let mut camera = CameraSource::new();
        camera.initialize(&DeviceContext::new(Arc::new(FakeBackend::new()))).unwrap();
        let source = RecordingSource::new(SourceKind::Camera {
            device_id: "nope".into(),
        });
        assert!(matches!(
            camera.start_capture(&source),
            Err(CaptureError::DeviceNotAvailable(_))
        ));
    }
}
