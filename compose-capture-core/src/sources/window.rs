use std::sync::Arc;
use std::time::Duration;

use crate::models::error::CaptureError;
use crate::models::geometry::Size;
use crate::models::source::{RecordingSource, SourceKind};
use crate::traits::capture_source::{CaptureSource, DeviceContext, SourceFrame};
use crate::traits::source_backend::{FrameProvider, SourceBackend};

/// Captures the client area of one top-level window.
#[derive(Default)]
pub struct WindowSource {
    backend: Option<Arc<dyn SourceBackend>>,
    provider: Option<Box<dyn FrameProvider>>,
    capture_cursor: bool,
}

impl WindowSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureSource for WindowSource {
    fn initialize(&mut self, context: &DeviceContext) -> Result<(), CaptureError> {
        self.backend = Some(context.backend.clone());
        Ok(())
    }

    fn start_capture(&mut self, source: &RecordingSource) -> Result<(), CaptureError> {
        let SourceKind::Window { handle } = source.kind else {
            return Err(CaptureError::ConfigurationFailed(format!(
                "window source cannot capture a {}",
                source.kind.label()
            )));
        };
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| CaptureError::ConfigurationFailed("window source not initialized".into()))?;
        self.provider = Some(backend.open_window(handle)?);
        self.capture_cursor = source.capture_cursor;
        Ok(())
    }

    fn acquire_next_frame(&mut self, timeout: Duration) -> Result<Option<SourceFrame>, CaptureError> {
        let provider = self
            .provider
            .as_mut()
            .ok_or_else(|| CaptureError::ConfigurationFailed("window source not started".into()))?;
        Ok(provider.next_frame(timeout)?.map(|raw| {
            let mut frame = SourceFrame::from(raw);
            if !self.capture_cursor {
                frame.pointer = None;
            }
            frame
        }))
    }

    fn native_size(&self, _source: &RecordingSource) -> Result<Size, CaptureError> {
        self.provider
            .as_ref()
            .map(|p| p.native_size())
            .ok_or_else(|| CaptureError::ConfigurationFailed("window source not started".into()))
    }

    fn stop_capture(&mut self) {
        self.provider = None;
    }
}
