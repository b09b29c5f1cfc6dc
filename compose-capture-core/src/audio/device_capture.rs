use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::reconnect::ReconnectBackoff;
use crate::models::audio_format::{AudioFormat, HNS_PER_SECOND};
use crate::models::config::AudioCaptureConfig;
use crate::models::error::AudioError;
use crate::models::state::{AtomicCaptureState, AudioCaptureState, StartOutcome};
use crate::processing::resampler::AudioResampler;
use crate::traits::device_directory::{AudioEndpoint, DataFlow, DeviceDirectory, DeviceEvent};

/// Which side of the audio mix a capture feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    /// Loopback of a render device (what the speakers play).
    Loopback,
    /// A recording device.
    Input,
}

impl EndpointRole {
    pub fn flow(self) -> DataFlow {
        match self {
            Self::Loopback => DataFlow::Render,
            Self::Input => DataFlow::Capture,
        }
    }

    fn is_loopback(self) -> bool {
        matches!(self, Self::Loopback)
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loopback => f.write_str("loopback"),
            Self::Input => f.write_str("input"),
        }
    }
}

/// A background thread stopped by disconnecting its channel.
struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn finish(self) {
        let Worker { stop, handle } = self;
        drop(stop);
        if handle.join().is_err() {
            log::error!("audio worker thread panicked");
        }
    }
}

/// Serializes state transitions. Device I/O never happens while it is held.
struct Control {
    /// Bumped whenever the running drain worker is replaced or retired, so
    /// stale workers can tell their reports apart from current ones.
    generation: u64,
    /// The device went away on purpose (removed or disabled); wait for it to
    /// come back instead of polling.
    suppressed: bool,
    device: Option<String>,
    drain: Option<Worker>,
    reconnect: Option<Worker>,
    backoff: ReconnectBackoff,
}

/// Captured audio waiting for the consumer.
///
/// Device bytes land in `raw` in the endpoint's native format and are
/// converted to the output format on demand. `ready` holds output-format
/// bytes; bytes handed back by the consumer go to its front.
#[derive(Default)]
struct AudioBuffer {
    generation: u64,
    native: Option<AudioFormat>,
    converter: Option<AudioResampler>,
    raw: Vec<u8>,
    ready: VecDeque<u8>,
}

impl AudioBuffer {
    fn append(&mut self, generation: u64, bytes: &[u8]) {
        if generation == self.generation {
            self.raw.extend_from_slice(bytes);
        }
    }

    fn convert_pending(&mut self) {
        if self.raw.is_empty() {
            return;
        }
        let raw = std::mem::take(&mut self.raw);
        match self.converter.as_mut() {
            Some(converter) => self.ready.extend(converter.process(&raw)),
            None => self.ready.extend(raw),
        }
    }

    /// Route bytes from a new drain worker. A format change flushes the old
    /// converter first so nothing already captured is lost.
    fn switch(&mut self, generation: u64, native: AudioFormat, converter: Option<AudioResampler>) {
        self.convert_pending();
        if self.native != Some(native) {
            self.flush_converter();
            self.converter = converter;
            self.native = Some(native);
        }
        self.generation = generation;
    }

    fn flush_converter(&mut self) {
        if let Some(mut converter) = self.converter.take() {
            self.ready.extend(converter.flush());
        }
        self.native = None;
    }

    fn take(&mut self, max: Option<usize>, block_align: usize) -> Vec<u8> {
        self.convert_pending();
        let available = self.ready.len();
        let len = max.map_or(available, |max| max.min(available));
        let len = len - len % block_align.max(1);
        self.ready.drain(..len).collect()
    }

    fn give_back(&mut self, bytes: &[u8]) {
        for &byte in bytes.iter().rev() {
            self.ready.push_front(byte);
        }
    }

    fn clear(&mut self) {
        self.raw.clear();
        self.ready.clear();
    }
}

struct Shared {
    role: EndpointRole,
    /// Fixed device, or `None` to follow the system default.
    device_id: Option<String>,
    directory: Arc<dyn DeviceDirectory>,
    config: AudioCaptureConfig,
    output: AudioFormat,
    /// Written under `control`, read anywhere.
    state: AtomicCaptureState,
    control: Mutex<Control>,
    buffer: Mutex<AudioBuffer>,
}

/// A started endpoint not yet handed to a drain worker.
struct OpenedDevice {
    id: String,
    endpoint: Box<dyn AudioEndpoint>,
    native: AudioFormat,
    converter: Option<AudioResampler>,
}

enum Launch {
    /// Workers replaced by the new drain worker; finish them outside `control`.
    Started(Vec<Worker>),
    /// The capture was stopped, retired or relaunched while the device opened.
    Superseded,
}

impl Shared {
    fn resolve_device(&self) -> Result<String, AudioError> {
        let flow = self.role.flow();
        match &self.device_id {
            Some(id) => {
                let devices = self.directory.list_devices(flow)?;
                match devices.iter().find(|d| &d.id == id) {
                    Some(device) if device.state.is_active() => Ok(id.clone()),
                    Some(device) => Err(AudioError::DeviceNotAvailable(format!("{} is {:?}", id, device.state))),
                    None => Err(AudioError::DeviceNotAvailable(id.clone())),
                }
            }
            None => Ok(self.directory.default_device(flow)?.id),
        }
    }

    fn open_device(&self) -> Result<OpenedDevice, AudioError> {
        let id = self.resolve_device()?;
        let mut endpoint = self.directory.open(&id, self.role.flow(), self.role.is_loopback())?;
        let native = endpoint.native_format();
        let converter = if native.requires_conversion_to(&self.output) {
            Some(AudioResampler::new(native, self.output)?)
        } else {
            None
        };
        endpoint.start()?;
        Ok(OpenedDevice {
            id,
            endpoint,
            native,
            converter,
        })
    }

    /// Open the device without holding `control`, then start a drain worker
    /// on it if `generation` is still current.
    ///
    /// `retire_reconnect` also hands back the reconnect worker; the reconnect
    /// worker itself passes false.
    fn launch(self: &Arc<Self>, generation: u64, retire_reconnect: bool) -> Result<Launch, AudioError> {
        let opened = self.open_device()?;

        let mut control = self.control.lock();
        if control.generation != generation {
            drop(control);
            let OpenedDevice { id, mut endpoint, .. } = opened;
            log::debug!("{} capture moved on while {} opened; closing it", self.role, id);
            let _ = endpoint.stop();
            return Ok(Launch::Superseded);
        }

        let generation = generation + 1;
        let OpenedDevice {
            id,
            endpoint,
            native,
            converter,
        } = opened;
        self.buffer.lock().switch(generation, native, converter);

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        let shared = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("audio-drain-{}", self.role))
            .spawn(move || drain_loop(shared, endpoint, generation, stop_rx))
            .map_err(|e| AudioError::Unknown(format!("failed to spawn drain thread: {}", e)))?;

        control.generation = generation;
        self.state.store(AudioCaptureState::Capturing);
        control.suppressed = false;
        log::info!("{} capture started on {} ({})", self.role, id, native);
        control.device = Some(id);

        let mut stale: Vec<Worker> = control.drain.replace(Worker { stop: stop_tx, handle }).into_iter().collect();
        if retire_reconnect {
            stale.extend(control.reconnect.take());
        }
        Ok(Launch::Started(stale))
    }

    /// Called from the drain worker when the endpoint fails.
    fn device_lost(self: &Arc<Self>, generation: u64, error: AudioError) {
        let mut control = self.control.lock();
        if control.generation != generation || !self.state.load().is_capturing() {
            return;
        }
        log::warn!("{} capture went offline: {}", self.role, error);
        self.state.store(AudioCaptureState::Offline);
        // the caller is this worker; dropping the handle detaches it
        control.drain = None;
        if !control.suppressed {
            self.spawn_reconnect(&mut control);
        }
    }

    fn spawn_reconnect(self: &Arc<Self>, control: &mut Control) {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        let shared = Arc::clone(self);
        let generation = control.generation;
        let spawned = thread::Builder::new()
            .name(format!("audio-reconnect-{}", self.role))
            .spawn(move || reconnect_loop(shared, generation, stop_rx));
        match spawned {
            Ok(handle) => control.reconnect = Some(Worker { stop: stop_tx, handle }),
            Err(e) => log::error!("failed to spawn {} reconnect thread: {}", self.role, e),
        }
    }

    fn is_current_device(&self, control: &Control, id: &str) -> bool {
        control.device.as_deref() == Some(id) || self.device_id.as_deref() == Some(id)
    }

    fn go_offline(&self, control: &mut Control, stale: &mut Vec<Worker>, reason: &str) {
        log::info!("{} capture offline: device {}", self.role, reason);
        self.state.store(AudioCaptureState::Offline);
        control.suppressed = true;
        control.generation += 1;
        stale.extend(control.drain.take());
        stale.extend(control.reconnect.take());
    }

    fn relaunch(self: &Arc<Self>, generation: u64) {
        match self.launch(generation, true) {
            Ok(Launch::Started(stale)) => stale.into_iter().for_each(Worker::finish),
            Ok(Launch::Superseded) => {}
            Err(e) => log::debug!("{} capture restart failed: {}", self.role, e),
        }
    }
}

/// Captures one audio endpoint into a byte buffer in the output format.
///
/// ```text
/// Idle ──start──▶ Capturing ──device lost──▶ Offline
///   ▲                 ▲                         │
///   │                 └────device returns───────┘
///   └───────────────────stop (any state)
/// ```
///
/// A drain thread wakes once per device period and moves every available
/// packet into the buffer. When the device fails, a reconnect thread retries
/// with banded backoff until it comes back or the capture is stopped.
pub struct AudioDeviceCapture {
    shared: Arc<Shared>,
}

impl AudioDeviceCapture {
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        role: EndpointRole,
        device_id: Option<String>,
        channels: u16,
        config: AudioCaptureConfig,
    ) -> Self {
        let output = AudioFormat::pcm16(config.sample_rate, channels);
        let backoff = ReconnectBackoff::new(config.reconnect.clone());
        Self {
            shared: Arc::new(Shared {
                role,
                device_id,
                directory,
                config,
                output,
                state: AtomicCaptureState::new(AudioCaptureState::Idle),
                control: Mutex::new(Control {
                    generation: 0,
                    suppressed: false,
                    device: None,
                    drain: None,
                    reconnect: None,
                    backoff,
                }),
                buffer: Mutex::new(AudioBuffer::default()),
            }),
        }
    }

    pub fn role(&self) -> EndpointRole {
        self.shared.role
    }

    /// Current state. Never waits on a device being opened.
    pub fn state(&self) -> AudioCaptureState {
        self.shared.state.load()
    }

    /// Device currently (or most recently) captured.
    pub fn device_id(&self) -> Option<String> {
        self.shared.control.lock().device.clone()
    }

    /// Format of the bytes returned by `get_recorded_bytes`.
    pub fn output_format(&self) -> AudioFormat {
        self.shared.output
    }

    /// Output-format bytes waiting to be read.
    pub fn buffered_bytes(&self) -> usize {
        let mut buffer = self.shared.buffer.lock();
        buffer.convert_pending();
        buffer.ready.len()
    }

    /// Open the device and start draining it.
    ///
    /// Returns `AlreadyCapturing` without touching the running capture. From
    /// `Offline` this is an immediate reconnect attempt. A stop that lands
    /// while the device is opening wins and yields `Cancelled`.
    pub fn start_capture(&self) -> Result<StartOutcome, AudioError> {
        let generation = {
            let mut control = self.shared.control.lock();
            let state = self.shared.state.load();
            if state.is_capturing() {
                return Ok(StartOutcome::AlreadyCapturing);
            }
            if state.is_idle() {
                self.shared.buffer.lock().clear();
                control.backoff.reset();
            }
            control.generation
        };
        match self.shared.launch(generation, true)? {
            Launch::Started(stale) => {
                stale.into_iter().for_each(Worker::finish);
                Ok(StartOutcome::Started)
            }
            Launch::Superseded if self.state().is_capturing() => Ok(StartOutcome::AlreadyCapturing),
            Launch::Superseded => Err(AudioError::Cancelled),
        }
    }

    /// Stop draining and close the device. Buffered audio stays readable.
    pub fn stop_capture(&self) {
        let stale = {
            let mut control = self.shared.control.lock();
            // also cancels a start whose device is still opening
            control.generation += 1;
            if self.shared.state.load().is_idle() && control.drain.is_none() && control.reconnect.is_none() {
                return;
            }
            self.shared.state.store(AudioCaptureState::Idle);
            control.suppressed = false;
            [control.drain.take(), control.reconnect.take()]
        };
        stale.into_iter().flatten().for_each(Worker::finish);

        let mut buffer = self.shared.buffer.lock();
        buffer.convert_pending();
        buffer.flush_converter();
        log::info!("{} capture stopped", self.shared.role);
    }

    /// Take up to `duration_hns` of audio (everything when `None`) in the
    /// output format. Always a whole number of frames; may be shorter than
    /// asked, or empty.
    pub fn get_recorded_bytes(&self, duration_hns: Option<u64>) -> Vec<u8> {
        let output = self.shared.output;
        let max = duration_hns.map(|d| output.bytes_for_duration(d));
        self.shared.buffer.lock().take(max, output.block_align())
    }

    /// Take up to `frames` output frames.
    pub fn get_recorded_frames(&self, frames: u64) -> Vec<u8> {
        let align = self.shared.output.block_align();
        self.shared.buffer.lock().take(Some(frames as usize * align), align)
    }

    /// Put bytes from `get_recorded_bytes` back, ahead of everything still
    /// buffered.
    pub fn return_audio_bytes_to_buffer(&self, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.shared.buffer.lock().give_back(bytes);
        }
    }

    /// React to a device topology change.
    ///
    /// Restarts open the new device after the control lock is released.
    pub fn handle_device_event(&self, event: &DeviceEvent) {
        let shared = &self.shared;
        let mut stale = Vec::new();
        let relaunch = {
            let mut control = shared.control.lock();
            let state = shared.state.load();
            if state.is_idle() {
                return;
            }
            match event {
                DeviceEvent::Removed { id } => {
                    if shared.is_current_device(&control, id) {
                        shared.go_offline(&mut control, &mut stale, "removed");
                    }
                    None
                }
                DeviceEvent::StateChanged { id, state } if !state.is_active() => {
                    if shared.is_current_device(&control, id) {
                        shared.go_offline(&mut control, &mut stale, "disabled");
                    }
                    None
                }
                DeviceEvent::Added { id } | DeviceEvent::StateChanged { id, .. } => {
                    let ours = shared.device_id.as_ref().map_or(true, |own| own == id);
                    (state.is_offline() && ours).then_some(control.generation)
                }
                DeviceEvent::DefaultChanged { flow, id } => {
                    let follows_default = shared.device_id.is_none() && *flow == shared.role.flow();
                    if follows_default && control.device.as_deref() != Some(id.as_str()) {
                        log::info!("{} capture following new default device {}", shared.role, id);
                        Some(control.generation)
                    } else {
                        None
                    }
                }
            }
        };
        stale.into_iter().for_each(Worker::finish);
        if let Some(generation) = relaunch {
            shared.relaunch(generation);
        }
    }
}

impl Drop for AudioDeviceCapture {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

/// Reads every packet currently queued on an endpoint.
struct PacketReader {
    format: AudioFormat,
    next_position: Option<u64>,
}

impl PacketReader {
    fn new(format: AudioFormat) -> Self {
        Self {
            format,
            next_position: None,
        }
    }

    fn drain(&mut self, endpoint: &mut dyn AudioEndpoint) -> Result<Vec<u8>, AudioError> {
        let align = self.format.block_align();
        let max_gap = self.format.sample_rate as u64;
        let mut out = Vec::new();
        while let Some(packet) = endpoint.read_packet()? {
            let frames = packet.frames as u64;
            if packet.discontinuity {
                let gap = match (packet.position, self.next_position) {
                    (Some(position), Some(expected)) if position > expected => position - expected,
                    _ => frames,
                }
                .min(max_gap);
                log::debug!("audio discontinuity, padding {} frames of silence", gap);
                out.resize(out.len() + gap as usize * align, 0);
            }

            let start = out.len();
            let len = frames as usize * align;
            if !packet.silent {
                out.extend_from_slice(&packet.data[..len.min(packet.data.len())]);
            }
            out.resize(start + len, 0);
            self.next_position = packet.position.map(|p| p + frames);
        }
        Ok(out)
    }
}

/// Keeps a loopback stream level with wall-clock time while the device
/// delivers nothing.
struct SilenceFill {
    started: Instant,
    frames: u64,
    sample_rate: u64,
    slack: u64,
}

impl SilenceFill {
    fn new(format: AudioFormat, period: Duration) -> Self {
        Self {
            started: Instant::now(),
            frames: 0,
            sample_rate: format.sample_rate as u64,
            slack: format.frames_for_duration(period.as_nanos() as u64 / 100),
        }
    }

    /// Account for `delivered` frames and return how many silent frames to add.
    fn advance(&mut self, delivered: u64, now: Instant) -> u64 {
        self.frames += delivered;
        if delivered > 0 {
            return 0;
        }
        let elapsed = now.saturating_duration_since(self.started).as_nanos() as u64 / 100;
        let expected = (elapsed as u128 * self.sample_rate as u128 / HNS_PER_SECOND as u128) as u64;
        if expected <= self.frames + self.slack {
            return 0;
        }
        let pad = expected - self.frames;
        self.frames = expected;
        pad
    }
}

fn drain_loop(shared: Arc<Shared>, mut endpoint: Box<dyn AudioEndpoint>, generation: u64, stop: Receiver<()>) {
    let format = endpoint.native_format();
    let align = format.block_align();
    let period = Duration::from_nanos(endpoint.device_period_hns().saturating_mul(100)).max(Duration::from_millis(1));
    let ticker = crossbeam_channel::tick(period);
    let mut reader = PacketReader::new(format);
    let mut fill = (shared.role.is_loopback() && shared.config.loopback_silence_fill)
        .then(|| SilenceFill::new(format, period));

    loop {
        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => {}
        }
        match reader.drain(endpoint.as_mut()) {
            Ok(mut bytes) => {
                if let Some(fill) = fill.as_mut() {
                    let pad = fill.advance((bytes.len() / align) as u64, Instant::now());
                    bytes.resize(bytes.len() + pad as usize * align, 0);
                }
                if !bytes.is_empty() {
                    shared.buffer.lock().append(generation, &bytes);
                }
            }
            Err(error) => {
                let _ = endpoint.stop();
                shared.device_lost(generation, error);
                return;
            }
        }
    }

    if let Err(e) = endpoint.stop() {
        log::debug!("{} endpoint stop failed: {}", shared.role, e);
    }
}

fn reconnect_loop(shared: Arc<Shared>, generation: u64, stop: Receiver<()>) {
    loop {
        let delay = shared.control.lock().backoff.next_delay(Instant::now());
        match stop.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => return,
        }

        let attempts = {
            let control = shared.control.lock();
            if control.generation != generation || !shared.state.load().is_offline() || control.suppressed {
                return;
            }
            control.backoff.attempts()
        };
        match shared.launch(generation, false) {
            Ok(Launch::Started(stale)) => {
                stale.into_iter().for_each(Worker::finish);
                log::info!("{} capture reconnected after {} attempt(s)", shared.role, attempts);
                return;
            }
            Ok(Launch::Superseded) => return,
            Err(e) => log::debug!("{} reconnect attempt failed: {}", shared.role, e),
        }
    }
}
