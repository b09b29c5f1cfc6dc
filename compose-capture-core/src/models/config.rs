use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Tuning for the video capture engine.
///
/// Every field has a default; hosts that keep settings as JSON can load a
/// partial document with `from_json_str`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfiguration {
    /// How long a worker waits on its source per poll (default: 10 ms).
    pub source_poll_timeout_ms: u64,

    /// Producer-side wait for the surface lock per attempt (default: 10 ms).
    pub producer_lock_timeout_ms: u64,

    /// Producer attempts before the frame is dropped (default: 5).
    pub producer_lock_attempts: u32,

    /// How long `start_capture` waits for each worker to report ready (default: 5 s).
    pub worker_start_timeout_ms: u64,

    /// Fill color for regions of sources that are temporarily unavailable (BGRA).
    pub blank_color: [u8; 4],

    pub audio: AudioCaptureConfig,
}

impl EngineConfiguration {
    pub fn from_json_str(json: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("invalid configuration: {}", e)))?;
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.source_poll_timeout_ms == 0 {
            return Err("source poll timeout must be positive".into());
        }
        if self.producer_lock_timeout_ms == 0 {
            return Err("producer lock timeout must be positive".into());
        }
        if self.producer_lock_attempts == 0 {
            return Err("producer lock attempts must be positive".into());
        }
        if self.worker_start_timeout_ms == 0 {
            return Err("worker start timeout must be positive".into());
        }
        self.audio.validate()
    }

    pub fn source_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.source_poll_timeout_ms)
    }

    pub fn producer_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.producer_lock_timeout_ms)
    }

    pub fn worker_start_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_start_timeout_ms)
    }
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self {
            source_poll_timeout_ms: 10,
            producer_lock_timeout_ms: 10,
            producer_lock_attempts: 5,
            worker_start_timeout_ms: 5_000,
            blank_color: [0, 0, 0, 255],
            audio: AudioCaptureConfig::default(),
        }
    }
}

/// Tuning for audio device capture and mixing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioCaptureConfig {
    /// Output sample rate in Hz (default: 48000).
    pub sample_rate: u32,

    /// Pad loopback streams with silence while nothing is playing (default: true).
    pub loopback_silence_fill: bool,

    /// Longest tail deferred during length reconciliation before the shorter
    /// stream is padded with silence instead (default: 1000 ms).
    pub max_deferred_ms: u64,

    /// Amplitude offset applied to replicated channels on mono downmix (default: 1).
    pub decorrelation_delta: i16,

    pub reconnect: ReconnectPolicy,
}

impl AudioCaptureConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(format!("unsupported sample rate: {}", self.sample_rate));
        }
        self.reconnect.validate()
    }
}

impl Default for AudioCaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            loopback_silence_fill: true,
            max_deferred_ms: 1_000,
            decorrelation_delta: 1,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// A run of reconnect attempts sharing the same delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffBand {
    pub attempts: u32,
    pub delay_ms: u64,
}

/// Banded backoff for audio reconnects.
///
/// Attempts walk through `bands` in order; once they are exhausted every
/// further attempt waits `max_delay_ms`. A gap longer than `quiet_period_ms`
/// between attempts starts over at the first band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub bands: Vec<BackoffBand>,
    pub max_delay_ms: u64,
    pub quiet_period_ms: u64,
}

impl ReconnectPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_delay_ms == 0 {
            return Err("reconnect max delay must be positive".into());
        }
        if self.bands.iter().any(|b| b.delay_ms > self.max_delay_ms) {
            return Err("reconnect band delay exceeds max delay".into());
        }
        Ok(())
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            bands: vec![
                BackoffBand {
                    attempts: 3,
                    delay_ms: 10,
                },
                BackoffBand {
                    attempts: 5,
                    delay_ms: 250,
                },
                BackoffBand {
                    attempts: 10,
                    delay_ms: 1_000,
                },
            ],
            max_delay_ms: 5_000,
            quiet_period_ms: 30_000,
        }
    }
}
