use thiserror::Error;

/// How a capture failure affects the worker that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Device briefly inaccessible (secure desktop, mode change, minimized window).
    /// The worker keeps running and its region is blanked for that tick.
    Recoverable,
    /// The device context itself is gone. The whole session must be torn down
    /// and recreated by the caller.
    DeviceInvalidated,
    /// Anything else. The worker exits and raises the shared error signal.
    Fatal,
}

/// Errors produced by the video capture side of the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("source temporarily unavailable: {0}")]
    Transient(String),

    #[error("graphics device invalidated: {0}")]
    DeviceInvalidated(String),

    #[error("device not available: {0}")]
    DeviceNotAvailable(String),

    #[error("unsupported source: {0}")]
    Unsupported(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("surface allocation failed: {0}")]
    SurfaceAllocation(String),

    #[error("worker failed to start: {0}")]
    WorkerStart(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("end of stream")]
    EndOfStream,

    #[error("source failed: {0}")]
    SourceFailed(String),

    #[error("timeout")]
    Timeout,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CaptureError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient(_) | Self::Timeout => ErrorClass::Recoverable,
            Self::DeviceInvalidated(_) => ErrorClass::DeviceInvalidated,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Recoverable
    }
}

/// Non-frame outcomes of `CaptureOrchestrator::acquire_next_frame`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// No source has written anything new since the last successful pull,
    /// or not every source has produced its first frame yet.
    #[error("no new frame available")]
    Busy,

    /// The consumer side of the surface lock could not be taken in time.
    #[error("timed out waiting for the composition surface")]
    Timeout,

    #[error("capture failed: {0}")]
    Fatal(CaptureError),
}

/// Errors produced by the audio capture side of the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("audio device not available: {0}")]
    DeviceNotAvailable(String),

    /// The endpoint disappeared or was reset while streaming.
    #[error("audio device invalidated: {0}")]
    DeviceInvalidated(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl AudioError {
    /// Whether this error means the endpoint itself went away (as opposed to a
    /// bad request), so the capture should go offline and wait for the device.
    pub fn is_device_loss(&self) -> bool {
        matches!(self, Self::DeviceNotAvailable(_) | Self::DeviceInvalidated(_))
    }
}
