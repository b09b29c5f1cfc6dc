use std::time::Instant;

use super::geometry::{Point, Rect, Size};

/// Bytes per BGRA pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// A 32-bit BGRA pixel buffer with straight (non-premultiplied) alpha.
///
/// This is the unit every source produces and the compositor consumes.
/// Rows are tightly packed: stride is always `width * 4`.
#[derive(Clone, PartialEq, Eq)]
pub struct Texture {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl Texture {
    /// A fully transparent texture.
    pub fn new(size: Size) -> Self {
        Self {
            width: size.width,
            height: size.height,
            data: vec![0; size.pixel_count() * BYTES_PER_PIXEL],
        }
    }

    pub fn filled(size: Size, bgra: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(size.pixel_count() * BYTES_PER_PIXEL);
        for _ in 0..size.pixel_count() {
            data.extend_from_slice(&bgra);
        }
        Self {
            width: size.width,
            height: size.height,
            data,
        }
    }

    /// Wrap raw BGRA bytes. Returns `None` when the length doesn't match the size.
    pub fn from_bgra(size: Size, data: Vec<u8>) -> Option<Self> {
        if data.len() != size.pixel_count() * BYTES_PER_PIXEL {
            return None;
        }
        Some(Self {
            width: size.width,
            height: size.height,
            data,
        })
    }

    /// Convert tightly packed RGBA bytes (as decoders produce) into BGRA.
    pub fn from_rgba(size: Size, mut data: Vec<u8>) -> Option<Self> {
        if data.len() != size.pixel_count() * BYTES_PER_PIXEL {
            return None;
        }
        for px in data.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.swap(0, 2);
        }
        Some(Self {
            width: size.width,
            height: size.height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_origin_size(Point::default(), self.size())
    }

    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = self.index(x, y);
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2], self.data[idx + 3]])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, bgra: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = self.index(x, y);
        self.data[idx..idx + BYTES_PER_PIXEL].copy_from_slice(&bgra);
    }

    /// Overwrite `rect` (clipped to bounds) with a single color.
    pub fn fill_rect(&mut self, rect: Rect, bgra: [u8; 4]) {
        let Some(clipped) = rect.intersect(&self.bounds()) else {
            return;
        };
        let row_bytes = clipped.width() as usize * BYTES_PER_PIXEL;
        let first = self.index(clipped.left as u32, clipped.top as u32);
        for px in self.data[first..first + row_bytes].chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&bgra);
        }
        for y in clipped.top + 1..clipped.bottom {
            let start = self.index(clipped.left as u32, y as u32);
            self.data.copy_within(first..first + row_bytes, start);
        }
    }

    /// Copy every pixel of `other` when the sizes match. Avoids reallocating.
    pub fn copy_from(&mut self, other: &Texture) -> bool {
        if self.size() != other.size() {
            return false;
        }
        self.data.copy_from_slice(&other.data);
        true
    }

    pub(crate) fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerShapeKind {
    Monochrome,
    Color,
    MaskedColor,
}

/// Cursor bitmap as reported by the capture backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerShape {
    pub kind: PointerShapeKind,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub hot_spot: Point,
    pub buffer: Vec<u8>,
}

/// Pointer report attached to a single captured frame, in native frame pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerUpdate {
    pub visible: bool,
    pub position: Point,
    /// New shape, when it changed since the previous report.
    pub shape: Option<PointerShape>,
}

/// Cursor state shared by all source workers, expressed in canvas coordinates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointerState {
    pub visible: bool,
    pub position: Point,
    pub shape: Option<PointerShape>,
    /// Destination rectangle of the source that last updated the pointer.
    pub last_writer: Option<Rect>,
    pub last_update: Option<Instant>,
}

/// Frames written by one source or overlay since the previous successful pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUpdate {
    pub id: String,
    pub frames: u64,
}

/// One composed output frame handed to the encoder.
#[derive(Debug, Clone)]
pub struct ComposedFrame {
    pub texture: Texture,
    pub pointer: PointerState,
    pub source_updates: Vec<SourceUpdate>,
    pub overlay_updates: Vec<SourceUpdate>,
    pub captured_at: Instant,
}

impl ComposedFrame {
    pub fn total_source_updates(&self) -> u64 {
        self.source_updates.iter().map(|u| u.frames).sum()
    }
}

/// One encoder-facing unit: the frame and the mixed audio for the same tick.
///
/// Timestamps and durations are in 100-nanosecond units.
#[derive(Debug, Clone)]
pub struct FrameWriteModel {
    pub start_time_hns: i64,
    pub duration_hns: u64,
    pub frame: Option<ComposedFrame>,
    pub audio: Vec<u8>,
}

impl FrameWriteModel {
    pub fn new(start_time_hns: i64, duration_hns: u64) -> Self {
        Self {
            start_time_hns,
            duration_hns,
            frame: None,
            audio: Vec::new(),
        }
    }

    pub fn with_frame(mut self, frame: ComposedFrame) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn with_audio(mut self, audio: Vec<u8>) -> Self {
        self.audio = audio;
        self
    }

    pub fn end_time_hns(&self) -> i64 {
        self.start_time_hns + self.duration_hns as i64
    }
}
