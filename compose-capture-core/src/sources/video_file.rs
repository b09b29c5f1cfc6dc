use std::sync::Arc;
use std::time::Duration;

use super::pacer::PacedSlot;
use crate::models::error::CaptureError;
use crate::models::geometry::Size;
use crate::models::source::{RecordingSource, SourceKind};
use crate::traits::capture_source::{CaptureSource, DeviceContext, SourceFrame};
use crate::traits::source_backend::SourceBackend;

/// Plays a video file at its native frame rate, looping when the decoder can seek.
#[derive(Default)]
pub struct VideoFileSource {
    backend: Option<Arc<dyn SourceBackend>>,
    paced: PacedSlot,
}

impl VideoFileSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureSource for VideoFileSource {
    fn initialize(&mut self, context: &DeviceContext) -> Result<(), CaptureError> {
        self.backend = Some(context.backend.clone());
        Ok(())
    }

    fn start_capture(&mut self, source: &RecordingSource) -> Result<(), CaptureError> {
        let SourceKind::VideoFile { path } = &source.kind else {
            return Err(CaptureError::ConfigurationFailed(format!(
                "video source cannot play a {}",
                source.kind.label()
            )));
        };
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| CaptureError::ConfigurationFailed("video source not initialized".into()))?;
        let provider = backend.open_video(path)?;
        self.paced.start("video", provider)
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
