use std::sync::Arc;
use std::time::Duration;

use crate::models::error::CaptureError;
use crate::models::geometry::{Point, Rotation, Size};
use crate::models::source::{RecordingSource, SourceKind};
use crate::traits::capture_source::{CaptureSource, DeviceContext, SourceFrame};
use crate::traits::source_backend::{FrameProvider, SourceBackend};

/// Captures one display output.
///
/// No pacer: the provider sets the cadence, either by waiting for the
/// desktop to change or by polling at a fixed rate.
#[derive(Default)]
pub struct ScreenSource {
    backend: Option<Arc<dyn SourceBackend>>,
    provider: Option<Box<dyn FrameProvider>>,
    rotation: Rotation,
    capture_cursor: bool,
}

impl ScreenSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureSource for ScreenSource {
    fn initialize(&mut self, context: &DeviceContext) -> Result<(), CaptureError> {
        self.backend = Some(context.backend.clone());
        Ok(())
    }

    fn start_capture(&mut self, source: &RecordingSource) -> Result<(), CaptureError> {
        let SourceKind::Display { device_name } = &source.kind else {
            return Err(CaptureError::ConfigurationFailed(format!(
                "screen source cannot capture a {}",
                source.kind.label()
            )));
        };
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| CaptureError::ConfigurationFailed("screen source not initialized".into()))?;

        let displays = backend.displays()?;
        let display = displays
            .iter()
            .find(|d| if device_name.is_empty() { d.primary } else { &d.device_name == device_name })
            .ok_or_else(|| CaptureError::DeviceNotAvailable(format!("display '{}'", device_name)))?;

        self.rotation = display.rotation;
        self.provider = Some(backend.open_display(&display.device_name)?);
        self.capture_cursor = source.capture_cursor;
        log::debug!("screen source started on {} ({:?})", display.device_name, display.bounds);
        Ok(())
    }

    fn acquire_next_frame(&mut self, timeout: Duration) -> Result<Option<SourceFrame>, CaptureError> {
        let provider = self
            .provider
            .as_mut()
            .ok_or_else(|| CaptureError::ConfigurationFailed("screen source not started".into()))?;
        let Some(raw) = provider.next_frame(timeout)? else {
            return Ok(None);
        };
        let mut frame = SourceFrame::from(raw);
        if !self.capture_cursor {
            frame.pointer = None;
        }
        Ok(Some(frame))
    }

    fn native_size(&self, _source: &RecordingSource) -> Result<Size, CaptureError> {
        self.provider
            .as_ref()
            .map(|p| self.rotation.apply_to_size(p.native_size()))
            .ok_or_else(|| CaptureError::ConfigurationFailed("screen source not started".into()))
    }

    fn native_origin(&self) -> Point {
        self.provider.as_ref().map(|p| p.origin()).unwrap_or_default()
    }

    fn stop_capture(&mut self) {
        self.provider = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeBackend, FakeFeed};

    fn context(backend: FakeBackend) -> DeviceContext {
        DeviceContext::new(Arc::new(backend))
    }

    #[test]
    fn empty_name_selects_primary_display() {
        let backend = FakeBackend::new()
            .with_display("DISPLAY1", FakeFeed::new(Size::new(64, 32)))
            .with_display("DISPLAY2", FakeFeed::new(Size::new(16, 16)).with_origin(Point::new(64, 0)));
        let mut screen = ScreenSource::new();
        screen.initialize(&context(backend)).unwrap();

        let source = RecordingSource::display("");
        screen.start_capture(&source).unwrap();
        assert_eq!(screen.native_size(&source).unwrap(), Size::new(64, 32));
        assert_eq!(screen.native_origin(), Point::new(0, 0));
    }

    #[test]
    fn rotated_display_reports_upright_size() {
        let backend = FakeBackend::new()
            .with_display("PORTRAIT", FakeFeed::new(Size::new(40, 20)).with_rotation(Rotation::Rotate90));
        let mut screen = ScreenSource::new();
        screen.initialize(&context(backend)).unwrap();

        let source = RecordingSource::display("PORTRAIT");
        screen.start_capture(&source).unwrap();
        assert_eq!(screen.native_size(&source).unwrap(), Size::new(20, 40));
    }

    #[test]
    fn unknown_display_is_unavailable() {
        let backend = FakeBackend::new().with_display("DISPLAY1", FakeFeed::new(Size::new(8, 8)));
        let mut screen = ScreenSource::new();
        screen.initialize(&context(backend)).unwrap();

        let err = screen.start_capture(&RecordingSource::display("DISPLAY9")).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceNotAvailable(_)));
    }

    #[test]
    fn cursor_is_dropped_when_disabled() {
        let pointer = crate::models::frame::PointerUpdate {
            visible: true,
            position: Point::new(3, 3),
            shape: None,
        };
        let backend =
            FakeBackend::new().with_display("DISPLAY1", FakeFeed::new(Size::new(8, 8)).with_pointer(pointer));
        let mut screen = ScreenSource::new();
        screen.initialize(&context(backend)).unwrap();

        let mut source = RecordingSource::display("DISPLAY1");
        source.capture_cursor = false;
        screen.start_capture(&source).unwrap();

        let frame = screen.acquire_next_frame(Duration::from_secs(1)).unwrap().unwrap();
        assert!(frame.pointer.is_none());
        assert_eq!(frame.texture.size(), Size::new(8, 8));
    }
}
