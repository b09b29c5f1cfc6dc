//! Pure PCM mixing helpers.
//!
//! All buffers are interleaved signed 16-bit little-endian PCM.

/// Output of `mix_pcm16`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixResult {
    pub bytes: Vec<u8>,
    /// At least one mixed sample exceeded the 16-bit range and was clamped.
    pub clipped: bool,
}

/// The tail cut from the longer of two streams during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leftover {
    None,
    First(Vec<u8>),
    Second(Vec<u8>),
}

impl Leftover {
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::First(tail) | Self::Second(tail) => tail.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trim the longer buffer to the shorter one's length and return the cut tail.
///
/// The tail starts exactly where the kept bytes end, so re-queuing it ahead
/// of newer audio keeps the stream gapless.
pub fn reconcile_lengths(first: &mut Vec<u8>, second: &mut Vec<u8>) -> Leftover {
    use std::cmp::Ordering;

    match first.len().cmp(&second.len()) {
        Ordering::Equal => Leftover::None,
        Ordering::Greater => Leftover::First(first.split_off(second.len())),
        Ordering::Less => Leftover::Second(second.split_off(first.len())),
    }
}

/// Extend `buffer` with silence up to `len` bytes.
pub fn pad_with_silence(buffer: &mut Vec<u8>, len: usize) {
    if buffer.len() < len {
        buffer.resize(len, 0);
    }
}

/// Sum two streams sample by sample with independent volume weights.
///
/// Samples are mixed as floats, rounded, and clamped to the 16-bit range. When
/// the lengths differ the extra samples of the longer stream are scaled and
/// copied through.
pub fn mix_pcm16(first: &[u8], first_volume: f32, second: &[u8], second_volume: f32) -> MixResult {
    let samples = first.len().max(second.len()) / 2;
    let mut bytes = Vec::with_capacity(samples * 2);
    let mut clipped = false;

    for i in 0..samples {
        let a = read_sample(first, i) as f32 * first_volume;
        let b = read_sample(second, i) as f32 * second_volume;
        let sum = (a + b).round();
        if sum > i16::MAX as f32 || sum < i16::MIN as f32 {
            clipped = true;
        }
        let value = sum.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    if clipped {
        log::debug!("audio mix clipped ({} samples)", samples);
    }
    MixResult { bytes, clipped }
}

/// Copy `source_channel` into every channel of each frame.
///
/// Channel 0 receives the sample unchanged; the other channels are offset
/// by `delta` so no two channels are bit-identical. Near the top of the
/// range the offset is subtracted instead of added.
pub fn downmix_to_mono_replicated(buffer: &mut [u8], channels: u16, source_channel: u16, delta: i16) {
    let channels = channels as usize;
    if channels < 2 {
        return;
    }
    let source = (source_channel as usize).min(channels - 1);
    for frame in buffer.chunks_exact_mut(channels * 2) {
        let offset = source * 2;
        let value = i16::from_le_bytes([frame[offset], frame[offset + 1]]);
        let shifted = value.checked_add(delta).unwrap_or_else(|| value.wrapping_sub(delta));
        for ch in 0..channels {
            let sample = if ch == 0 { value } else { shifted };
            frame[ch * 2..ch * 2 + 2].copy_from_slice(&sample.to_le_bytes());
        }
    }
}

fn read_sample(buffer: &[u8], index: usize) -> i16 {
    let at = index * 2;
    if at + 1 < buffer.len() {
        i16::from_le_bytes([buffer[at], buffer[at + 1]])
    } else {
        0
    }
}
