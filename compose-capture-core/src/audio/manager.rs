use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{never, select, Receiver, Sender};
use parking_lot::Mutex;

use super::device_capture::{AudioDeviceCapture, EndpointRole};
use crate::models::audio_format::AudioFormat;
use crate::models::audio_options::{AudioOptions, AudioSettings};
use crate::models::config::AudioCaptureConfig;
use crate::models::error::AudioError;
use crate::models::state::AudioCaptureState;
use crate::processing::audio_mixer::{
    downmix_to_mono_replicated, mix_pcm16, pad_with_silence, reconcile_lengths, Leftover,
};
use crate::traits::device_directory::{DeviceDirectory, DeviceEvent};

/// The live captures. The lock around this only guards swapping them; no
/// device is opened or closed while it is held.
#[derive(Default, Clone)]
struct Captures {
    loopback: Option<Arc<AudioDeviceCapture>>,
    input: Option<Arc<AudioDeviceCapture>>,
}

impl Captures {
    fn get(&self, role: EndpointRole) -> Option<&AudioDeviceCapture> {
        match role {
            EndpointRole::Loopback => self.loopback.as_deref(),
            EndpointRole::Input => self.input.as_deref(),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<AudioDeviceCapture>> {
        self.loopback.iter().chain(self.input.iter())
    }
}

struct ManagerInner {
    directory: Arc<dyn DeviceDirectory>,
    options: Arc<AudioOptions>,
    config: AudioCaptureConfig,
    applied: Mutex<Option<AudioSettings>>,
    captures: Mutex<Captures>,
}

impl ManagerInner {
    /// Recreate the captures whose settings changed.
    ///
    /// Runs on one thread at a time (construction, then the event thread).
    /// Replacements are opened before the swap and the retired captures are
    /// stopped after it, so `grab_audio_frame` only ever waits for the swap.
    fn apply(&self, next: AudioSettings) {
        if let Err(e) = next.validate() {
            log::warn!("ignoring invalid audio settings: {}", e);
            return;
        }
        let previous = self.applied.lock().clone();
        let output_changed = previous.as_ref().map_or(true, |prev| prev.output_capture_changed(&next));
        let input_changed = previous.as_ref().map_or(true, |prev| prev.input_capture_changed(&next));

        let loopback = (output_changed && next.output_enabled)
            .then(|| self.open(EndpointRole::Loopback, next.output_device_id.clone(), next.channels));
        let input = (input_changed && next.input_enabled)
            .then(|| self.open(EndpointRole::Input, next.input_device_id.clone(), next.channels));

        let mut retired = Vec::new();
        {
            let mut captures = self.captures.lock();
            if output_changed {
                retired.extend(std::mem::replace(&mut captures.loopback, loopback));
            }
            if input_changed {
                retired.extend(std::mem::replace(&mut captures.input, input));
            }
        }
        *self.applied.lock() = Some(next);

        for capture in retired {
            capture.stop_capture();
        }
    }

    fn open(&self, role: EndpointRole, device_id: Option<String>, channels: u16) -> Arc<AudioDeviceCapture> {
        let capture = AudioDeviceCapture::new(self.directory.clone(), role, device_id, channels, self.config.clone());
        if let Err(e) = capture.start_capture() {
            log::warn!("{} capture not started: {}", role, e);
        }
        Arc::new(capture)
    }

    fn on_device_event(&self, event: &DeviceEvent) {
        let arrival = match event {
            DeviceEvent::Added { .. } | DeviceEvent::DefaultChanged { .. } => true,
            DeviceEvent::StateChanged { state, .. } => state.is_active(),
            DeviceEvent::Removed { .. } => false,
        };
        let captures = self.captures.lock().clone();
        for capture in captures.iter() {
            if capture.state().is_idle() {
                // never started; a device showing up is a chance to
                if arrival {
                    if let Err(e) = capture.start_capture() {
                        log::debug!("{} capture still unavailable: {}", capture.role(), e);
                    }
                }
            } else {
                capture.handle_device_event(event);
            }
        }
    }
}

/// Owns the loopback and input captures and mixes them into one stream.
///
/// Reacts to device notifications and live option changes on a background
/// `audio-events` thread. Each capture fails and reconnects on its own; the
/// mix carries on with whichever side is capturing.
pub struct AudioManager {
    inner: Arc<ManagerInner>,
    events: Option<(Sender<()>, JoinHandle<()>)>,
}

impl AudioManager {
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        options: Arc<AudioOptions>,
        config: AudioCaptureConfig,
    ) -> Result<Self, AudioError> {
        config.validate().map_err(AudioError::ConfigurationFailed)?;

        let device_events = directory.subscribe();
        let option_changes = options.subscribe();
        let inner = Arc::new(ManagerInner {
            directory,
            options,
            config,
            applied: Mutex::new(None),
            captures: Mutex::new(Captures::default()),
        });
        inner.apply(inner.options.snapshot());

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        let thread_inner = inner.clone();
        let handle = thread::Builder::new()
            .name("audio-events".into())
            .spawn(move || event_loop(thread_inner, device_events, option_changes, stop_rx))
            .map_err(|e| AudioError::Unknown(format!("failed to spawn audio event thread: {}", e)))?;

        Ok(Self {
            inner,
            events: Some((stop_tx, handle)),
        })
    }

    /// Format of the bytes returned by `grab_audio_frame`.
    pub fn output_format(&self) -> AudioFormat {
        let channels = self
            .inner
            .applied
            .lock()
            .as_ref()
            .map_or(AudioSettings::default().channels, |s| s.channels);
        AudioFormat::pcm16(self.inner.config.sample_rate, channels)
    }

    /// State of one capture, or `None` when that side is disabled.
    pub fn capture_state(&self, role: EndpointRole) -> Option<AudioCaptureState> {
        self.inner.captures.lock().get(role).map(AudioDeviceCapture::state)
    }

    pub fn set_output_volume(&self, volume: f32) {
        self.inner.options.update(|s| s.output_volume = volume);
    }

    pub fn set_input_volume(&self, volume: f32) {
        self.inner.options.update(|s| s.input_volume = volume);
    }

    /// Mix up to `duration_hns` of audio from every capturing endpoint.
    ///
    /// When both sides are capturing, the longer stream is trimmed to the
    /// shorter and the tail goes back to its capture for the next call. If
    /// that would hold back more than the configured maximum, the shorter
    /// stream is padded with silence instead. Empty when nothing is enabled.
    pub fn grab_audio_frame(&self, duration_hns: u64) -> Vec<u8> {
        let frames = self.output_format().frames_for_duration(duration_hns);
        self.grab_audio_frames(frames)
    }

    /// Like `grab_audio_frame`, sized in output frames so callers can carry
    /// rounding remainders from one call to the next.
    pub fn grab_audio_frames(&self, frames: u64) -> Vec<u8> {
        let settings = self.inner.options.snapshot();
        let captures = self.inner.captures.lock().clone();
        let loopback = captures.loopback.as_deref().filter(|c| c.state().is_capturing());
        let input = captures.input.as_deref().filter(|c| c.state().is_capturing());

        let mut output = loopback.map(|c| c.get_recorded_frames(frames)).unwrap_or_default();
        let mut mic = input.map(|c| c.get_recorded_frames(frames)).unwrap_or_default();

        if let (Some(loopback), Some(input)) = (loopback, input) {
            let format = loopback.output_format();
            let cap = format.bytes_for_duration(self.inner.config.max_deferred_ms * 10_000);
            match reconcile_lengths(&mut output, &mut mic) {
                Leftover::None => {}
                Leftover::First(tail) => {
                    if tail.len() + loopback.buffered_bytes() > cap {
                        log::debug!("input lagging by more than {} ms, padding", self.inner.config.max_deferred_ms);
                        output.extend_from_slice(&tail);
                        pad_with_silence(&mut mic, output.len());
                    } else {
                        loopback.return_audio_bytes_to_buffer(&tail);
                    }
                }
                Leftover::Second(tail) => {
                    if tail.len() + input.buffered_bytes() > cap {
                        log::debug!("loopback lagging by more than {} ms, padding", self.inner.config.max_deferred_ms);
                        mic.extend_from_slice(&tail);
                        pad_with_silence(&mut output, mic.len());
                    } else {
                        input.return_audio_bytes_to_buffer(&tail);
                    }
                }
            }
        }

        if output.is_empty() && mic.is_empty() {
            return Vec::new();
        }
        if settings.input_mono_downmix {
            downmix_to_mono_replicated(
                &mut mic,
                settings.channels,
                settings.downmix_source_channel,
                self.inner.config.decorrelation_delta,
            );
        }
        mix_pcm16(&output, settings.output_volume, &mic, settings.input_volume).bytes
    }

    /// Stop the event thread and both captures.
    pub fn stop(&mut self) {
        if let Some((stop, handle)) = self.events.take() {
            drop(stop);
            if handle.join().is_err() {
                log::error!("audio event thread panicked");
            }
        }
        let retired = std::mem::take(&mut *self.inner.captures.lock());
        for capture in retired.iter() {
            capture.stop_capture();
        }
    }
}

impl Drop for AudioManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn event_loop(
    inner: Arc<ManagerInner>,
    mut device_events: Receiver<DeviceEvent>,
    mut option_changes: Receiver<u64>,
    stop: Receiver<()>,
) {
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(device_events) -> event => match event {
                Ok(event) => {
                    log::debug!("audio device event: {:?}", event);
                    inner.on_device_event(&event);
                }
                Err(_) => device_events = never(),
            },
            recv(option_changes) -> version => match version {
                Ok(version) => {
                    log::debug!("audio options changed (version {})", version);
                    inner.apply(inner.options.snapshot());
                }
                Err(_) => option_changes = never(),
            },
        }
    }
}
