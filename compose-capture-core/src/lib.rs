//! # compose-capture-core
//!
//! Platform-agnostic capture-and-compose engine.
//!
//! Every video source (display, window, camera, video file, image) runs on
//! its own worker thread and writes into one shared composition surface
//! guarded by a two-state lock. The consumer pulls composed frames on its own
//! schedule. Audio endpoints (loopback and input) are drained, resampled and
//! mixed alongside. Platform backends implement `SourceBackend` and
//! `DeviceDirectory` and plug into the generic orchestrator and manager.
//!
//! ## Architecture
//!
//! ```text
//! compose-capture-core (this crate)
//! ├── traits/       ← TwoStateLock, CaptureSource, SourceBackend, DeviceDirectory
//! ├── models/       ← CaptureError, geometry, Texture, RecordingSource, configs
//! ├── processing/   ← TextureCompositor, AudioResampler, PCM mixing
//! ├── sources/      ← source variants, FramePacer, create_source
//! ├── capture/      ← CaptureOrchestrator, workers, shared surface, KeyedMutex
//! ├── audio/        ← AudioDeviceCapture, AudioManager, reconnect backoff
//! └── session/      ← FrameAssembler (frame + audio per tick)
//! ```

pub mod audio;
pub mod capture;
pub mod models;
pub mod processing;
pub mod session;
pub mod sources;
pub mod traits;

#[cfg(test)]
mod test_support;

// Re-export key types at crate root for convenience.
pub use audio::device_capture::{AudioDeviceCapture, EndpointRole};
pub use audio::manager::AudioManager;
pub use capture::error_signal::ErrorSignal;
pub use capture::keyed_mutex::KeyedMutex;
pub use capture::orchestrator::{CanvasLayout, CaptureOrchestrator, LockFactory};
pub use models::audio_format::{AudioFormat, SampleKind};
pub use models::audio_options::{AudioOptions, AudioSettings};
pub use models::config::{AudioCaptureConfig, EngineConfiguration, ReconnectPolicy};
pub use models::error::{AcquireError, AudioError, CaptureError, ErrorClass};
pub use models::frame::{ComposedFrame, FrameWriteModel, PointerState, Texture};
pub use models::geometry::{Anchor, Point, Rect, Rotation, Size, StretchMode};
pub use models::source::{Placement, RecordingOverlay, RecordingSource, SourceKind};
pub use models::state::{AudioCaptureState, CaptureThreadState, StartOutcome};
pub use processing::compositor::TextureCompositor;
pub use processing::resampler::AudioResampler;
pub use session::assembler::FrameAssembler;
pub use sources::create_source;
pub use traits::capture_source::{CaptureSource, DeviceContext};
pub use traits::device_directory::{AudioDeviceInfo, AudioEndpoint, DataFlow, DeviceDirectory, DeviceEvent, DeviceState};
pub use traits::source_backend::{DisplayInfo, FrameProvider, RawFrame, SourceBackend};
pub use traits::two_state_lock::{LockState, TwoStateLock};
