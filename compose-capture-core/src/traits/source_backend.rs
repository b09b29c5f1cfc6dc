use std::path::Path;
use std::time::Duration;

use crate::models::error::CaptureError;
use crate::models::frame::{PointerUpdate, Texture};
use crate::models::geometry::{Point, Rect, Rotation, Size};

/// One frame as delivered by a platform provider, before any compositing.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub texture: Texture,
    /// Rotation of the output the frame was scanned from. The worker undoes it.
    pub rotation: Rotation,
    pub pointer: Option<PointerUpdate>,
    /// How long this frame should stay on screen, for animated media.
    pub duration: Option<Duration>,
}

impl RawFrame {
    pub fn new(texture: Texture) -> Self {
        Self {
            texture,
            rotation: Rotation::None,
            pointer: None,
            duration: None,
        }
    }
}

/// A display output known to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayInfo {
    pub device_name: String,
    /// Bounds in virtual desktop coordinates.
    pub bounds: Rect,
    pub primary: bool,
    pub rotation: Rotation,
}

/// Platform producer of frames for a single opened device or file.
///
/// Implemented by:
/// - GDI display and window providers (Windows)
/// - `AnimatedImage` (decoded image files)
/// - Test fakes
pub trait FrameProvider: Send {
    /// Frame size as delivered, before rotation is undone.
    fn native_size(&self) -> Size;

    /// Position in desktop coordinates. Only displays have a non-zero origin.
    fn origin(&self) -> Point {
        Point::default()
    }

    /// Native cadence in frames per second, when the media has one.
    fn frame_rate(&self) -> Option<f64> {
        None
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// `Ok(None)` means nothing new arrived in time. File-backed providers
    /// return `CaptureError::EndOfStream` once exhausted.
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CaptureError>;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported("rewind".into()))
    }
}

/// Entry point to the platform's capture devices and decoders.
///
/// Held by every capture source through the shared `DeviceContext`.
pub trait SourceBackend: Send + Sync {
    fn displays(&self) -> Result<Vec<DisplayInfo>, CaptureError>;

    /// Open a display by device name; an empty name selects the primary display.
    fn open_display(&self, device_name: &str) -> Result<Box<dyn FrameProvider>, CaptureError>;

    fn open_window(&self, handle: u64) -> Result<Box<dyn FrameProvider>, CaptureError>;

    fn open_camera(
        &self,
        device_id: &str,
        format_index: Option<usize>,
    ) -> Result<Box<dyn FrameProvider>, CaptureError>;

    fn open_video(&self, path: &Path) -> Result<Box<dyn FrameProvider>, CaptureError>;
}
