//! Capture source variants and the factory that builds them.

pub mod camera;
pub mod image_file;
pub mod pacer;
pub mod screen;
pub mod video_file;
pub mod window;

use crate::models::source::SourceKind;
use crate::traits::capture_source::CaptureSource;

pub use camera::CameraSource;
pub use image_file::{AnimatedImage, ImageFileSource};
pub use pacer::FramePacer;
pub use screen::ScreenSource;
pub use video_file::VideoFileSource;
pub use window::WindowSource;

/// Build an unstarted capture source for `kind`.
pub fn create_source(kind: &SourceKind) -> Box<dyn CaptureSource> {
    match kind {
        SourceKind::Display { .. } => Box::new(ScreenSource::new()),
        SourceKind::Window { .. } => Box::new(WindowSource::new()),
        SourceKind::Camera { .. } => Box::new(CameraSource::new()),
        SourceKind::VideoFile { .. } => Box::new(VideoFileSource::new()),
        SourceKind::ImageFile { .. } => Box::new(ImageFileSource::new()),
    }
}
