use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Snapshot of the live audio configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Capture the loopback mix of a render device.
    pub output_enabled: bool,
    /// Capture an input device (microphone).
    pub input_enabled: bool,
    /// Render device to loop back. `None` follows the system default.
    pub output_device_id: Option<String>,
    /// Input device. `None` follows the system default.
    pub input_device_id: Option<String>,
    /// Channels in the mixed output.
    pub channels: u16,
    /// Encoder bitrate in bits per second; passed through to the encoder.
    pub bitrate: u32,
    pub output_volume: f32,
    pub input_volume: f32,
    /// Replicate one input channel across all output channels.
    pub input_mono_downmix: bool,
    /// Channel copied when downmixing the input.
    pub downmix_source_channel: u16,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            output_enabled: true,
            input_enabled: false,
            output_device_id: None,
            input_device_id: None,
            channels: 2,
            bitrate: 192_000,
            output_volume: 1.0,
            input_volume: 1.0,
            input_mono_downmix: false,
            downmix_source_channel: 0,
        }
    }
}

impl AudioSettings {
    pub fn validate(&self) -> Result<(), String> {
        if ![1, 2].contains(&self.channels) {
            return Err(format!("unsupported channel count: {}", self.channels));
        }
        if self.bitrate == 0 {
            return Err("bitrate must be positive".into());
        }
        if self.input_mono_downmix && self.downmix_source_channel >= self.channels.max(2) {
            return Err(format!(
                "downmix source channel {} out of range",
                self.downmix_source_channel
            ));
        }
        Ok(())
    }

    /// Whether switching from `self` to `next` requires recreating the loopback capture.
    pub fn output_capture_changed(&self, next: &AudioSettings) -> bool {
        self.output_enabled != next.output_enabled
            || self.output_device_id != next.output_device_id
            || self.channels != next.channels
            || self.bitrate != next.bitrate
    }

    /// Whether switching from `self` to `next` requires recreating the input capture.
    pub fn input_capture_changed(&self, next: &AudioSettings) -> bool {
        self.input_enabled != next.input_enabled
            || self.input_device_id != next.input_device_id
            || self.channels != next.channels
            || self.bitrate != next.bitrate
    }
}

/// Live-mutable audio options with change notification.
///
/// One writer (the host), any number of readers. Readers call `subscribe()`
/// and re-fetch the full `snapshot()` whenever a notification arrives.
pub struct AudioOptions {
    settings: RwLock<AudioSettings>,
    version: AtomicU64,
    subscribers: Mutex<Vec<Sender<u64>>>,
}

impl AudioOptions {
    pub fn new(settings: AudioSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            version: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> AudioSettings {
        self.settings.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Apply a change and notify subscribers. Volumes are clamped to `0.0..=1.0`.
    pub fn update(&self, change: impl FnOnce(&mut AudioSettings)) {
        {
            let mut settings = self.settings.write();
            change(&mut settings);
            settings.output_volume = settings.output_volume.clamp(0.0, 1.0);
            settings.input_volume = settings.input_volume.clamp(0.0, 1.0);
        }
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        self.notify(version);
    }

    /// Receive the new version number after every `update`.
    pub fn subscribe(&self) -> Receiver<u64> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn notify(&self, version: u64) {
        self.subscribers.lock().retain(|tx| tx.send(version).is_ok());
    }
}

impl Default for AudioOptions {
    fn default() -> Self {
        Self::new(AudioSettings::default())
    }
}
