use serde::{Deserialize, Serialize};

/// 100-nanosecond units per second (the time base used across the engine).
pub const HNS_PER_SECOND: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Int,
    Float,
}

/// PCM layout of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub channels: u16,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
    pub valid_bits: u16,
    pub sample_kind: SampleKind,
}

impl AudioFormat {
    /// Interleaved signed 16-bit PCM: the mixer's working format.
    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            channels,
            bits_per_sample: 16,
            sample_rate,
            valid_bits: 16,
            sample_kind: SampleKind::Int,
        }
    }

    /// Interleaved 32-bit float, the usual shared-mode mix format.
    pub fn float32(sample_rate: u32, channels: u16) -> Self {
        Self {
            channels,
            bits_per_sample: 32,
            sample_rate,
            valid_bits: 32,
            sample_kind: SampleKind::Float,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    /// Bytes per interleaved frame (one sample per channel).
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.bytes_per_sample()
    }

    pub fn is_pcm16(&self) -> bool {
        self.sample_kind == SampleKind::Int && self.bits_per_sample == 16
    }

    /// Frames covering `duration_hns`, rounded down.
    pub fn frames_for_duration(&self, duration_hns: u64) -> u64 {
        (duration_hns as u128 * self.sample_rate as u128 / HNS_PER_SECOND as u128) as u64
    }

    /// Bytes covering `duration_hns`, always a whole number of frames.
    pub fn bytes_for_duration(&self, duration_hns: u64) -> usize {
        self.frames_for_duration(duration_hns) as usize * self.block_align()
    }

    /// Whether data in this format has to pass through the resampler to
    /// become `target`.
    pub fn requires_conversion_to(&self, target: &AudioFormat) -> bool {
        self.sample_rate != target.sample_rate
            || self.channels != target.channels
            || self.sample_kind != target.sample_kind
            || self.bits_per_sample != target.bits_per_sample
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.channels == 0 {
            return Err("channel count must be positive".into());
        }
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        let supported = match self.sample_kind {
            SampleKind::Int => [16, 24, 32].contains(&self.bits_per_sample),
            SampleKind::Float => self.bits_per_sample == 32,
        };
        if !supported {
            return Err(format!(
                "unsupported sample layout: {} bits {:?}",
                self.bits_per_sample, self.sample_kind
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}-bit {:?}",
            self.sample_rate, self.channels, self.bits_per_sample, self.sample_kind
        )
    }
}
