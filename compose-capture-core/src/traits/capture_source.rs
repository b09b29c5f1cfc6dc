use std::sync::Arc;
use std::time::Duration;

use crate::models::error::CaptureError;
use crate::models::frame::{PointerUpdate, Texture};
use crate::models::geometry::{Point, Rotation, Size};
use crate::models::source::RecordingSource;
use crate::traits::source_backend::{RawFrame, SourceBackend};

/// Shared handles every capture source is initialized with.
///
/// Cheap to clone; one instance lives for the whole capture session.
#[derive(Clone)]
pub struct DeviceContext {
    pub backend: Arc<dyn SourceBackend>,
}

impl DeviceContext {
    pub fn new(backend: Arc<dyn SourceBackend>) -> Self {
        Self { backend }
    }
}

/// A frame handed from a capture source to its worker.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub texture: Texture,
    pub rotation: Rotation,
    pub pointer: Option<PointerUpdate>,
}

impl From<RawFrame> for SourceFrame {
    fn from(raw: RawFrame) -> Self {
        Self {
            texture: raw.texture,
            rotation: raw.rotation,
            pointer: raw.pointer,
        }
    }
}

/// A single capture unit driven by one worker thread.
///
/// Implemented by:
/// - `ScreenSource`
/// - `WindowSource`
/// - `CameraSource`
/// - `VideoFileSource`
/// - `ImageFileSource`
///
/// Call order is `initialize`, `start_capture`, then any number of
/// `acquire_next_frame` calls. All calls happen on the owning worker thread.
pub trait CaptureSource: Send {
    fn initialize(&mut self, context: &DeviceContext) -> Result<(), CaptureError>;

    fn start_capture(&mut self, source: &RecordingSource) -> Result<(), CaptureError>;

    /// Wait up to `timeout` for a new frame. `Ok(None)` is a timeout.
    fn acquire_next_frame(&mut self, timeout: Duration) -> Result<Option<SourceFrame>, CaptureError>;

    /// Size of the frames this source delivers once rotation is undone.
    fn native_size(&self, source: &RecordingSource) -> Result<Size, CaptureError>;

    /// Desktop position of the captured area. Used when a source has no
    /// explicit placement position.
    fn native_origin(&self) -> Point {
        Point::default()
    }

    fn stop_capture(&mut self) {}
}
