use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ImageFormat, RgbaImage};

use super::pacer::PacedSlot;
use crate::models::error::CaptureError;
use crate::models::frame::Texture;
use crate::models::geometry::Size;
use crate::models::source::{RecordingSource, SourceKind};
use crate::traits::capture_source::{CaptureSource, DeviceContext, SourceFrame};
use crate::traits::source_backend::{FrameProvider, RawFrame};

/// GIF frames with delays at or below this play at `SLOW_GIF_DELAY`, as browsers do.
const MIN_GIF_DELAY: Duration = Duration::from_millis(10);
const SLOW_GIF_DELAY: Duration = Duration::from_millis(100);

/// Decoded still or animated image.
///
/// Animated images loop; a still image is delivered once and then held.
pub struct AnimatedImage {
    frames: Vec<(Texture, Duration)>,
    next: usize,
}

impl AnimatedImage {
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let decode_err = |e: image::ImageError| CaptureError::Decode(format!("{}: {}", path.display(), e));

        if ImageFormat::from_path(path).ok() == Some(ImageFormat::Gif) {
            let file = File::open(path).map_err(|e| CaptureError::DeviceNotAvailable(format!("{}: {}", path.display(), e)))?;
            let decoder = GifDecoder::new(BufReader::new(file)).map_err(decode_err)?;
            let frames = decoder.into_frames().collect_frames().map_err(decode_err)?;
            let frames = frames
                .into_iter()
                .map(|frame| {
                    let (numer, denom) = frame.delay().numer_denom_ms();
                    let delay = Duration::from_millis((numer / denom.max(1)) as u64);
                    let delay = if delay <= MIN_GIF_DELAY { SLOW_GIF_DELAY } else { delay };
                    to_texture(frame.into_buffer()).map(|texture| (texture, delay))
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| CaptureError::Decode(format!("{}: malformed frame", path.display())))?;
            return Self::from_frames(frames);
        }

        let image = image::open(path).map_err(decode_err)?.to_rgba8();
        let texture =
            to_texture(image).ok_or_else(|| CaptureError::Decode(format!("{}: malformed image", path.display())))?;
        Self::from_frames(vec![(texture, Duration::ZERO)])
    }

    pub fn from_frames(frames: Vec<(Texture, Duration)>) -> Result<Self, CaptureError> {
        if frames.is_empty() {
            return Err(CaptureError::Decode("image has no frames".into()));
        }
        Ok(Self { frames, next: 0 })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl FrameProvider for AnimatedImage {
    fn native_size(&self) -> Size {
        self.frames[0].0.size()
    }

    fn next_frame(&mut self, _timeout: Duration) -> Result<Option<RawFrame>, CaptureError> {
        let Some((texture, delay)) = self.frames.get(self.next) else {
            return Err(CaptureError::EndOfStream);
        };
        let mut frame = RawFrame::new(texture.clone());
        frame.duration = (!delay.is_zero()).then_some(*delay);
        self.next += 1;
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<(), CaptureError> {
        if self.frames.len() < 2 {
            return Err(CaptureError::Unsupported("still image".into()));
        }
        self.next = 0;
        Ok(())
    }
}

fn to_texture(image: RgbaImage) -> Option<Texture> {
    let size = Size::new(image.width(), image.height());
    Texture::from_rgba(size, image.into_raw())
}

/// Shows a still or animated image file.
#[derive(Default)]
pub struct ImageFileSource {
    paced: PacedSlot,
}

impl ImageFileSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureSource for ImageFileSource {
    fn initialize(&mut self, _context: &DeviceContext) -> Result<(), CaptureError> {
        Ok(())
    }

    fn start_capture(&mut self, source: &RecordingSource) -> Result<(), CaptureError> {
        let SourceKind::ImageFile { path } = &source.kind else {
            return Err(CaptureError::ConfigurationFailed(format!(
                "image source cannot show a {}",
                source.kind.label()
            )));
        };
        let image = AnimatedImage::open(path)?;
        log::debug!("image {} decoded, {} frame(s)", path.display(), image.frame_count());
        self.paced.start("image", Box::new(image))
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
