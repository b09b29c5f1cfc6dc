use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::geometry::{Anchor, Point, Rect, Size, StretchMode};

/// What a recording source or overlay captures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// A display output. An empty device name selects the primary display.
    Display { device_name: String },
    /// A top-level window, identified by its native handle.
    Window { handle: u64 },
    /// A camera by device id.
    Camera { device_id: String },
    VideoFile { path: PathBuf },
    ImageFile { path: PathBuf },
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Display { .. } => "display",
            Self::Window { .. } => "window",
            Self::Camera { .. } => "camera",
            Self::VideoFile { .. } => "video",
            Self::ImageFile { .. } => "image",
        }
    }
}

/// Where and how a source lands in the composed canvas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Placement {
    /// Top-left position in canvas space. `None` uses the source's native
    /// origin (desktop coordinates for displays, `(0, 0)` otherwise).
    pub position: Option<Point>,
    /// Output size. `None` uses the crop size, or the native size when uncropped.
    pub output_size: Option<Size>,
    pub anchor: Anchor,
    pub stretch: StretchMode,
    /// Sub-rectangle of the native frame to keep, in native pixels.
    pub source_rect: Option<Rect>,
}

/// One configured video source. Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingSource {
    pub id: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default = "default_true")]
    pub capture_video: bool,
    #[serde(default = "default_true")]
    pub capture_cursor: bool,
    /// Index into the device's native format list (cameras with several modes).
    #[serde(default)]
    pub format_index: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl RecordingSource {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            placement: Placement::default(),
            capture_video: true,
            capture_cursor: true,
            format_index: None,
        }
    }

    pub fn display(device_name: impl Into<String>) -> Self {
        Self::new(SourceKind::Display {
            device_name: device_name.into(),
        })
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }
}

/// One overlay, composited over the sources in configuration order.
///
/// Overlays are positioned relative to the canvas via `placement.anchor`;
/// `offset` pushes them inward from the anchored edge(s).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingOverlay {
    pub id: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub offset: Point,
    #[serde(default)]
    pub format_index: Option<usize>,
}

impl RecordingOverlay {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            placement: Placement::default(),
            offset: Point::default(),
            format_index: None,
        }
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_offset(mut self, offset: Point) -> Self {
        self.offset = offset;
        self
    }

    /// View this overlay as a source description so it can drive a capture
    /// source of the same kind.
    pub fn as_source(&self) -> RecordingSource {
        RecordingSource {
            id: self.id.clone(),
            kind: self.kind.clone(),
            placement: self.placement,
            capture_video: true,
            capture_cursor: false,
            format_index: self.format_index,
        }
    }
}
