use std::time::Duration;

use crate::audio::manager::AudioManager;
use crate::capture::orchestrator::CaptureOrchestrator;
use crate::models::audio_format::HNS_PER_SECOND;
use crate::models::error::{AcquireError, CaptureError};
use crate::models::frame::FrameWriteModel;

/// Builds one `FrameWriteModel` per output tick.
///
/// Tick `n` starts at `n / fps` seconds, computed from the tick count rather
/// than by summing rounded durations, so the timeline never drifts from wall
/// time. Audio is sized the same way: each tick asks for the output frames
/// between its own boundaries, and the per-tick lengths add up to exactly the
/// recording's duration. A tick without a new composed frame carries
/// `frame: None`; the encoder repeats the previous picture.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    frames_per_second: u32,
    ticks: u64,
}

impl FrameAssembler {
    pub fn new(frames_per_second: u32) -> Result<Self, CaptureError> {
        if frames_per_second == 0 || frames_per_second > 240 {
            return Err(CaptureError::ConfigurationFailed(format!(
                "unsupported frame rate: {}",
                frames_per_second
            )));
        }
        Ok(Self {
            frames_per_second,
            ticks: 0,
        })
    }

    /// Nominal tick length, rounded down. Individual ticks may be one unit longer.
    pub fn frame_duration_hns(&self) -> u64 {
        HNS_PER_SECOND / self.frames_per_second as u64
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_nanos(self.frame_duration_hns() * 100)
    }

    /// Ticks assembled so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Where tick `tick` starts, in `units_per_second` units, rounded down.
    fn boundary(&self, tick: u64, units_per_second: u64) -> u64 {
        (tick as u128 * units_per_second as u128 / self.frames_per_second as u128) as u64
    }

    /// Pull the next frame and the matching audio.
    ///
    /// Only a fatal capture error is returned; `Busy` and `Timeout` become a
    /// tick without a frame.
    pub fn next(
        &mut self,
        orchestrator: &mut CaptureOrchestrator,
        audio: Option<&AudioManager>,
        timeout: Duration,
    ) -> Result<FrameWriteModel, CaptureError> {
        let start = self.boundary(self.ticks, HNS_PER_SECOND);
        let end = self.boundary(self.ticks + 1, HNS_PER_SECOND);
        let mut model = FrameWriteModel::new(start as i64, end - start);
        match orchestrator.acquire_next_frame(timeout) {
            Ok(frame) => model = model.with_frame(frame),
            Err(AcquireError::Busy) | Err(AcquireError::Timeout) => {}
            Err(AcquireError::Fatal(e)) => return Err(e),
        }
        if let Some(audio) = audio {
            let rate = audio.output_format().sample_rate as u64;
            let frames = self.boundary(self.ticks + 1, rate) - self.boundary(self.ticks, rate);
            model = model.with_audio(audio.grab_audio_frames(frames));
        }

        self.ticks += 1;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::capture::error_signal::ErrorSignal;
    use crate::models::audio_format::AudioFormat;
    use crate::models::audio_options::{AudioOptions, AudioSettings};
    use crate::models::config::{AudioCaptureConfig, EngineConfiguration};
    use crate::models::geometry::Size;
    use crate::models::source::RecordingSource;
    use crate::test_support::{pcm16, samples, wait_until, FakeBackend, FakeDirectory, FakeFeed};
    use crate::traits::device_directory::DataFlow;

    #[test]
    fn rejects_bad_frame_rates() {
        assert!(FrameAssembler::new(0).is_err());
        assert!(FrameAssembler::new(1_000).is_err());
        assert_eq!(FrameAssembler::new(30).unwrap().frame_duration_hns(), 333_333);
    }

    #[test]
    fn ticks_are_contiguous_and_carry_audio() {
        let backend = FakeBackend::new().with_display("A", FakeFeed::new(Size::new(32, 32)));
        let mut orchestrator = CaptureOrchestrator::new(Arc::new(backend), EngineConfiguration::default());
        orchestrator
            .start_capture(&[RecordingSource::display("A")], &[], Arc::new(ErrorSignal::new()))
            .unwrap();

        let directory = FakeDirectory::new();
        let mic = directory.add_device("mic", DataFlow::Capture, AudioFormat::pcm16(48_000, 2));
        let audio = AudioManager::new(
            directory,
            Arc::new(AudioOptions::new(AudioSettings {
                output_enabled: false,
                input_enabled: true,
                ..AudioSettings::default()
            })),
            AudioCaptureConfig::default(),
        )
        .unwrap();
        mic.push_bytes(pcm16(&[7; 64]));
        assert!(wait_until(Duration::from_secs(5), || mic.pending() == 0));
        std::thread::sleep(Duration::from_millis(20));

        let mut assembler = FrameAssembler::new(25).unwrap();
        let mut models = Vec::new();
        for _ in 0..20 {
            models.push(
                assembler
                    .next(&mut orchestrator, Some(&audio), Duration::from_millis(40))
                    .unwrap(),
            );
        }

        for pair in models.windows(2) {
            assert_eq!(pair[0].end_time_hns(), pair[1].start_time_hns);
        }
        assert_eq!(models[0].start_time_hns, 0);
        assert_eq!(assembler.ticks(), 20);
        assert!(models.iter().any(|m| m.frame.is_some()));
        assert_eq!(samples(&models[0].audio), vec![7; 64]);
        orchestrator.stop_capture();
    }

    #[test]
    fn thirty_ticks_cover_exactly_one_second() {
        let backend = FakeBackend::new().with_display("A", FakeFeed::new(Size::new(16, 16)));
        let mut orchestrator = CaptureOrchestrator::new(Arc::new(backend), EngineConfiguration::default());
        orchestrator
            .start_capture(&[RecordingSource::display("A")], &[], Arc::new(ErrorSignal::new()))
            .unwrap();

        let directory = FakeDirectory::new();
        let mic = directory.add_device("mic", DataFlow::Capture, AudioFormat::pcm16(48_000, 2));
        let audio = AudioManager::new(
            directory,
            Arc::new(AudioOptions::new(AudioSettings {
                output_enabled: false,
                input_enabled: true,
                ..AudioSettings::default()
            })),
            AudioCaptureConfig::default(),
        )
        .unwrap();
        // one second of stereo audio, plus a little to spare
        mic.push_bytes(pcm16(&vec![3; 97_000]));
        assert!(wait_until(Duration::from_secs(5), || mic.pending() == 0));
        std::thread::sleep(Duration::from_millis(20));

        let mut assembler = FrameAssembler::new(30).unwrap();
        let mut last_end = 0;
        let mut audio_bytes = 0;
        for _ in 0..30 {
            let model = assembler
                .next(&mut orchestrator, Some(&audio), Duration::from_millis(5))
                .unwrap();
            assert_eq!(model.start_time_hns, last_end);
            assert!(model.duration_hns == 333_333 || model.duration_hns == 333_334);
            last_end = model.end_time_hns();
            audio_bytes += model.audio.len();
        }

        assert_eq!(last_end, HNS_PER_SECOND as i64);
        assert_eq!(audio_bytes, 192_000);
        orchestrator.stop_capture();
    }

    #[test]
    fn fatal_errors_end_the_recording() {
        let feed = FakeFeed::new(Size::new(8, 8));
        let backend = FakeBackend::new().with_display("A", feed.clone());
        let mut orchestrator = CaptureOrchestrator::new(Arc::new(backend), EngineConfiguration::default());
        let signal = Arc::new(ErrorSignal::new());
        orchestrator
            .start_capture(&[RecordingSource::display("A")], &[], signal.clone())
            .unwrap();
        feed.push_error(CaptureError::DeviceInvalidated("adapter reset".into()));
        assert!(signal.wait(Duration::from_secs(5)).is_some());

        let mut assembler = FrameAssembler::new(30).unwrap();
        assert_eq!(
            assembler.next(&mut orchestrator, None, Duration::from_millis(5)).unwrap_err(),
            CaptureError::DeviceInvalidated("adapter reset".into())
        );
        assert_eq!(assembler.ticks(), 0);
    }
}
