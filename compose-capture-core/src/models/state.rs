use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::error::CaptureError;

/// Audio device capture state machine.
///
/// State transitions:
/// ```text
/// idle → capturing ⇄ offline
///   ↑        │          │
///   └────────┴──────────┘  (stop)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AudioCaptureState {
    Idle = 0,
    Capturing = 1,
    /// The device disappeared or was disabled. No bytes are produced until it
    /// returns and a restart succeeds.
    Offline = 2,
}

impl AudioCaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline)
    }
}

/// `AudioCaptureState` readable without taking the capture's control lock.
#[derive(Debug)]
pub(crate) struct AtomicCaptureState(AtomicU8);

impl AtomicCaptureState {
    pub(crate) fn new(state: AudioCaptureState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> AudioCaptureState {
        match self.0.load(Ordering::Acquire) {
            1 => AudioCaptureState::Capturing,
            2 => AudioCaptureState::Offline,
            _ => AudioCaptureState::Idle,
        }
    }

    pub(crate) fn store(&self, state: AudioCaptureState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Result of `AudioDeviceCapture::start_capture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyCapturing,
}

/// Per-worker progress counters.
///
/// Written only by the owning worker; the orchestrator reads them without
/// taking a lock and treats them as liveness signals. The one exception is
/// `take_pending`, which the orchestrator calls while it holds the consumer
/// side of the surface lock.
#[derive(Debug)]
pub struct CaptureThreadState {
    epoch: Instant,
    last_update_nanos: AtomicU64,
    total_frames: AtomicU64,
    pending_frames: AtomicU64,
    last_error: Mutex<Option<CaptureError>>,
}

impl CaptureThreadState {
    pub fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            last_update_nanos: AtomicU64::new(0),
            total_frames: AtomicU64::new(0),
            pending_frames: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub(crate) fn record_frame(&self) {
        let nanos = self.epoch.elapsed().as_nanos() as u64;
        self.last_update_nanos.store(nanos, Ordering::Release);
        self.total_frames.fetch_add(1, Ordering::AcqRel);
        self.pending_frames.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_error(&self, error: CaptureError) {
        *self.last_error.lock() = Some(error);
    }

    /// Read and reset the frames written since the previous call.
    pub(crate) fn take_pending(&self) -> u64 {
        self.pending_frames.swap(0, Ordering::AcqRel)
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Acquire)
    }

    pub fn pending_frames(&self) -> u64 {
        self.pending_frames.load(Ordering::Acquire)
    }

    pub fn has_produced(&self) -> bool {
        self.total_frames() > 0
    }

    /// Time of the most recent write, or `None` before the first frame.
    pub fn last_update(&self) -> Option<Instant> {
        if !self.has_produced() {
            return None;
        }
        let nanos = self.last_update_nanos.load(Ordering::Acquire);
        Some(self.epoch + Duration::from_nanos(nanos))
    }

    pub fn last_error(&self) -> Option<CaptureError> {
        self.last_error.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_state_predicates() {
        assert!(AudioCaptureState::Idle.is_idle());
        assert!(AudioCaptureState::Capturing.is_capturing());
        assert!(AudioCaptureState::Offline.is_offline());
    }

    #[test]
    fn atomic_audio_state_round_trips_every_state() {
        let cell = AtomicCaptureState::new(AudioCaptureState::Idle);
        for state in [AudioCaptureState::Capturing, AudioCaptureState::Offline, AudioCaptureState::Idle] {
            cell.store(state);
            assert_eq!(cell.load(), state);
        }
    }

    #[test]
    fn pending_resets_but_total_does_not() {
        let state = CaptureThreadState::new(Instant::now());
        assert!(state.last_update().is_none());

        state.record_frame();
        state.record_frame();
        assert_eq!(state.take_pending(), 2);
        assert_eq!(state.take_pending(), 0);

        state.record_frame();
        assert_eq!(state.total_frames(), 3);
        assert_eq!(state.pending_frames(), 1);
        assert!(state.last_update().is_some());
    }

    #[test]
    fn keeps_last_error() {
        let state = CaptureThreadState::new(Instant::now());
        state.record_error(CaptureError::Transient("mode change".into()));
        assert_eq!(state.last_error(), Some(CaptureError::Transient("mode change".into())));
    }
}
