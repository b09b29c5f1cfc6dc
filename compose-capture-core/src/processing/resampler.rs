use crate::models::audio_format::{AudioFormat, SampleKind};
use crate::models::error::AudioError;

/// Streaming sample-rate and channel-count converter.
///
/// Decodes any supported device format, maps channels, resamples by linear
/// interpolation, and emits interleaved 16-bit PCM in the output format.
/// State carries across calls so chunk boundaries leave no clicks: the last
/// input frame of each call is kept and interpolated against the next call.
///
/// Byte and frame counters are cumulative for the lifetime of the resampler.
#[derive(Debug)]
pub struct AudioResampler {
    input: AudioFormat,
    output: AudioFormat,
    /// Input frames advanced per output frame, in units of 1/output rate.
    step: u64,
    /// Position of the next output frame in units of 1/output rate, relative
    /// to `previous`, or to the first frame of the next chunk when there is none.
    position: u64,
    previous: Option<Vec<f32>>,
    /// Bytes of an incomplete input frame held for the next call.
    partial: Vec<u8>,
    input_frames: u64,
    output_frames: u64,
    input_bytes: u64,
    output_bytes: u64,
}

impl AudioResampler {
    pub fn new(input: AudioFormat, output: AudioFormat) -> Result<Self, AudioError> {
        input.validate().map_err(AudioError::UnsupportedFormat)?;
        output.validate().map_err(AudioError::UnsupportedFormat)?;
        if !output.is_pcm16() {
            return Err(AudioError::UnsupportedFormat(format!("output must be 16-bit PCM, got {}", output)));
        }
        Ok(Self {
            input,
            output,
            step: input.sample_rate as u64,
            position: 0,
            previous: None,
            partial: Vec::new(),
            input_frames: 0,
            output_frames: 0,
            input_bytes: 0,
            output_bytes: 0,
        })
    }

    pub fn input_format(&self) -> AudioFormat {
        self.input
    }

    pub fn output_format(&self) -> AudioFormat {
        self.output
    }

    pub fn input_frames(&self) -> u64 {
        self.input_frames
    }

    pub fn output_frames(&self) -> u64 {
        self.output_frames
    }

    pub fn input_bytes(&self) -> u64 {
        self.input_bytes
    }

    pub fn output_bytes(&self) -> u64 {
        self.output_bytes
    }

    /// Convert a chunk of input-format bytes.
    ///
    /// Returns whole output frames only. Up to one input frame of latency is
    /// held back until the next call or `flush`.
    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        self.input_bytes += data.len() as u64;

        let align = self.input.block_align();
        let mut bytes = std::mem::take(&mut self.partial);
        bytes.extend_from_slice(data);
        let whole = bytes.len() / align * align;
        self.partial = bytes.split_off(whole);

        let mut frames: Vec<Vec<f32>> = Vec::with_capacity(whole / align + 1);
        if let Some(previous) = self.previous.take() {
            frames.push(previous);
        }
        for chunk in bytes.chunks_exact(align) {
            frames.push(self.map_channels(&self.decode_frame(chunk)));
            self.input_frames += 1;
        }
        if frames.is_empty() {
            return Vec::new();
        }

        let denominator = self.output.sample_rate as u64;
        let mut out = Vec::new();
        let last = frames.len() - 1;
        loop {
            let index = (self.position / denominator) as usize;
            if index >= last {
                break;
            }
            let fraction = (self.position % denominator) as f32 / denominator as f32;
            let (a, b) = (&frames[index], &frames[index + 1]);
            for ch in 0..a.len() {
                self.push_sample(&mut out, a[ch] + (b[ch] - a[ch]) * fraction);
            }
            self.output_frames += 1;
            self.position += self.step;
        }

        self.position -= last as u64 * denominator;
        self.previous = frames.pop();
        self.output_bytes += out.len() as u64;
        out
    }

    /// Emit what is still held back and reset the interpolation state.
    ///
    /// Frames past the final input frame are clamped to it. An incomplete
    /// trailing input frame is dropped.
    pub fn flush(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(previous) = self.previous.take() {
            while self.position < self.output.sample_rate as u64 {
                for &sample in &previous {
                    self.push_sample(&mut out, sample);
                }
                self.output_frames += 1;
                self.position += self.step;
            }
        }
        self.position = 0;
        self.partial.clear();
        self.output_bytes += out.len() as u64;
        out
    }

    fn decode_frame(&self, frame: &[u8]) -> Vec<f32> {
        let width = self.input.bytes_per_sample();
        frame
            .chunks_exact(width)
            .map(|s| match (self.input.sample_kind, width) {
                (SampleKind::Float, _) => f32::from_le_bytes([s[0], s[1], s[2], s[3]]),
                (SampleKind::Int, 2) => i16::from_le_bytes([s[0], s[1]]) as f32 / 32_768.0,
                (SampleKind::Int, 3) => {
                    let value = i32::from_le_bytes([0, s[0], s[1], s[2]]) >> 8;
                    value as f32 / 8_388_608.0
                }
                (SampleKind::Int, _) => i32::from_le_bytes([s[0], s[1], s[2], s[3]]) as f32 / 2_147_483_648.0,
            })
            .collect()
    }

    fn map_channels(&self, samples: &[f32]) -> Vec<f32> {
        let out_channels = self.output.channels as usize;
        let in_channels = samples.len();
        if in_channels == out_channels {
            return samples.to_vec();
        }
        if out_channels == 1 {
            let sum: f32 = samples.iter().sum();
            return vec![sum / in_channels as f32];
        }
        (0..out_channels).map(|c| samples[c % in_channels]).collect()
    }

    fn push_sample(&self, out: &mut Vec<u8>, sample: f32) {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
}
