//! Fakes shared by the unit tests: frame providers, a source backend, an
//! instrumented surface lock, and an audio device directory.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::capture::keyed_mutex::KeyedMutex;
use crate::models::audio_format::AudioFormat;
use crate::models::error::{AudioError, CaptureError};
use crate::models::frame::{PointerUpdate, Texture};
use crate::models::geometry::{Point, Rect, Rotation, Size};
use crate::traits::device_directory::{
    AudioDeviceInfo, AudioEndpoint, AudioPacket, DataFlow, DeviceDirectory, DeviceEvent, DeviceState,
};
use crate::traits::source_backend::{DisplayInfo, FrameProvider, RawFrame, SourceBackend};
use crate::traits::two_state_lock::{LockState, TwoStateLock};

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// Finite provider whose frame `i` is filled with blue value `i`.
pub struct ScriptedProvider {
    size: Size,
    count: usize,
    next: usize,
    frame_rate: Option<f64>,
    duration: Option<Duration>,
    rewindable: bool,
}

impl ScriptedProvider {
    pub fn counting(size: Size, count: usize) -> Self {
        Self {
            size,
            count,
            next: 0,
            frame_rate: None,
            duration: None,
            rewindable: false,
        }
    }

    pub fn with_frame_rate(mut self, rate: f64) -> Self {
        self.frame_rate = Some(rate);
        self
    }

    pub fn with_frame_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn rewindable(mut self) -> Self {
        self.rewindable = true;
        self
    }
}

impl FrameProvider for ScriptedProvider {
    fn native_size(&self) -> Size {
        self.size
    }

    fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }

    fn next_frame(&mut self, _timeout: Duration) -> Result<Option<RawFrame>, CaptureError> {
        if self.next >= self.count {
            return Err(CaptureError::EndOfStream);
        }
        let mut frame = RawFrame::new(Texture::filled(self.size, [self.next as u8, 0, 0, 255]));
        frame.duration = self.duration;
        self.next += 1;
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<(), CaptureError> {
        if !self.rewindable {
            return Err(CaptureError::Unsupported("rewind".into()));
        }
        self.next = 0;
        Ok(())
    }
}

/// Configuration for an endless fake device feed.
#[derive(Clone)]
pub struct FakeFeed {
    pub size: Size,
    pub origin: Point,
    pub interval: Duration,
    pub rotation: Rotation,
    pub color: [u8; 4],
    pub pointer: Option<PointerUpdate>,
    /// While `false` the feed times out instead of producing.
    pub gate: Option<Arc<AtomicBool>>,
    /// Errors returned (one per call) before frames resume.
    pub errors: Arc<Mutex<VecDeque<CaptureError>>>,
}

impl FakeFeed {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            origin: Point::default(),
            interval: Duration::from_millis(5),
            rotation: Rotation::None,
            color: [40, 80, 120, 255],
            pointer: None,
            gate: None,
            errors: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn with_origin(mut self, origin: Point) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    pub fn with_pointer(mut self, pointer: PointerUpdate) -> Self {
        self.pointer = Some(pointer);
        self
    }

    pub fn gated(mut self, gate: Arc<AtomicBool>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn push_error(&self, error: CaptureError) {
        self.errors.lock().push_back(error);
    }
}

pub struct LiveProvider {
    feed: FakeFeed,
    template: Texture,
    last: Option<Instant>,
}

impl LiveProvider {
    pub fn new(feed: FakeFeed) -> Self {
        let template = Texture::filled(feed.size, feed.color);
        Self {
            feed,
            template,
            last: None,
        }
    }
}

impl FrameProvider for LiveProvider {
    fn native_size(&self) -> Size {
        self.feed.size
    }

    fn origin(&self) -> Point {
        self.feed.origin
    }

    fn frame_rate(&self) -> Option<f64> {
        Some(1.0 / self.feed.interval.as_secs_f64())
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CaptureError> {
        if let Some(error) = self.feed.errors.lock().pop_front() {
            thread::sleep(Duration::from_millis(1));
            return Err(error);
        }
        if let Some(gate) = &self.feed.gate {
            if !gate.load(Ordering::Acquire) {
                thread::sleep(timeout.min(self.feed.interval));
                return Ok(None);
            }
        }
        let now = Instant::now();
        let due = self.last.map(|last| last + self.feed.interval).unwrap_or(now);
        if due > now + timeout {
            thread::sleep(timeout);
            return Ok(None);
        }
        if due > now {
            thread::sleep(due - now);
        }
        self.last = Some(Instant::now());
        Ok(Some(RawFrame {
            texture: self.template.clone(),
            rotation: self.feed.rotation,
            pointer: self.feed.pointer.clone(),
            duration: None,
        }))
    }
}

/// Backend whose devices are `FakeFeed`s keyed by kind and identifier.
#[derive(Default)]
pub struct FakeBackend {
    displays: Vec<DisplayInfo>,
    feeds: HashMap<String, FakeFeed>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_display(mut self, name: &str, feed: FakeFeed) -> Self {
        let bounds = Rect::from_origin_size(feed.origin, feed.rotation.apply_to_size(feed.size));
        self.displays.push(DisplayInfo {
            device_name: name.to_string(),
            bounds,
            primary: self.displays.is_empty(),
            rotation: feed.rotation,
        });
        self.feeds.insert(format!("display:{}", name), feed);
        self
    }

    pub fn with_window(mut self, handle: u64, feed: FakeFeed) -> Self {
        self.feeds.insert(format!("window:{}", handle), feed);
        self
    }

    pub fn with_camera(mut self, id: &str, feed: FakeFeed) -> Self {
        self.feeds.insert(format!("camera:{}", id), feed);
        self
    }

    pub fn with_video(mut self, path: &str, feed: FakeFeed) -> Self {
        self.feeds.insert(format!("video:{}", path), feed);
        self
    }

    fn open(&self, key: String) -> Result<Box<dyn FrameProvider>, CaptureError> {
        self.feeds
            .get(&key)
            .cloned()
            .map(|feed| Box::new(LiveProvider::new(feed)) as Box<dyn FrameProvider>)
            .ok_or(CaptureError::DeviceNotAvailable(key))
    }
}

impl SourceBackend for FakeBackend {
    fn displays(&self) -> Result<Vec<DisplayInfo>, CaptureError> {
        Ok(self.displays.clone())
    }

    fn open_display(&self, device_name: &str) -> Result<Box<dyn FrameProvider>, CaptureError> {
        let name = if device_name.is_empty() {
            self.displays
                .iter()
                .find(|d| d.primary)
                .map(|d| d.device_name.clone())
                .unwrap_or_default()
        } else {
            device_name.to_string()
        };
        self.open(format!("display:{}", name))
    }

    fn open_window(&self, handle: u64) -> Result<Box<dyn FrameProvider>, CaptureError> {
        self.open(format!("window:{}", handle))
    }

    fn open_camera(&self, device_id: &str, _format_index: Option<usize>) -> Result<Box<dyn FrameProvider>, CaptureError> {
        self.open(format!("camera:{}", device_id))
    }

    fn open_video(&self, path: &Path) -> Result<Box<dyn FrameProvider>, CaptureError> {
        self.open(format!("video:{}", path.display()))
    }
}

/// Surface lock that records how many holders overlap.
#[derive(Default)]
pub struct CountingLock {
    inner: KeyedMutex,
    producers: AtomicUsize,
    consumers: AtomicUsize,
    pub overlaps: AtomicUsize,
    pub producer_acquisitions: AtomicUsize,
    pub consumer_acquisitions: AtomicUsize,
}

impl CountingLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holders(&self) -> usize {
        self.producers.load(Ordering::SeqCst) + self.consumers.load(Ordering::SeqCst)
    }
}

impl TwoStateLock for CountingLock {
    fn acquire(&self, state: LockState, timeout: Duration) -> bool {
        if !self.inner.acquire(state, timeout) {
            return false;
        }
        let (mine, other, count) = match state {
            LockState::ProducerWritable => (&self.producers, &self.consumers, &self.producer_acquisitions),
            LockState::ConsumerReadable => (&self.consumers, &self.producers, &self.consumer_acquisitions),
        };
        count.fetch_add(1, Ordering::SeqCst);
        if mine.fetch_add(1, Ordering::SeqCst) > 0 || other.load(Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        true
    }

    fn release(&self, state: LockState) {
        match state {
            LockState::ProducerWritable => self.producers.fetch_sub(1, Ordering::SeqCst),
            LockState::ConsumerReadable => self.consumers.fetch_sub(1, Ordering::SeqCst),
        };
        self.inner.release(state);
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// Shared script and observations for one fake endpoint.
pub struct EndpointScript {
    pub format: AudioFormat,
    pub packets: Mutex<VecDeque<Result<AudioPacket, AudioError>>>,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub fail_start: AtomicBool,
}

impl EndpointScript {
    pub fn new(format: AudioFormat) -> Arc<Self> {
        Arc::new(Self {
            format,
            packets: Mutex::new(VecDeque::new()),
            started: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
            fail_start: AtomicBool::new(false),
        })
    }

    pub fn push_bytes(&self, data: Vec<u8>) {
        let frames = (data.len() / self.format.block_align()) as u32;
        self.push(Ok(AudioPacket {
            data,
            frames,
            discontinuity: false,
            silent: false,
            position: None,
        }));
    }

    pub fn push(&self, packet: Result<AudioPacket, AudioError>) {
        self.packets.lock().push_back(packet);
    }

    pub fn pending(&self) -> usize {
        self.packets.lock().len()
    }
}

pub struct FakeEndpoint {
    script: Arc<EndpointScript>,
}

impl AudioEndpoint for FakeEndpoint {
    fn native_format(&self) -> AudioFormat {
        self.script.format
    }

    fn device_period_hns(&self) -> u64 {
        20_000
    }

    fn start(&mut self) -> Result<(), AudioError> {
        if self.script.fail_start.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceNotAvailable("scripted start failure".into()));
        }
        self.script.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.script.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Option<AudioPacket>, AudioError> {
        self.script.packets.lock().pop_front().transpose()
    }
}

/// Device directory over scripted endpoints.
pub struct FakeDirectory {
    devices: Mutex<Vec<AudioDeviceInfo>>,
    scripts: Mutex<HashMap<String, Arc<EndpointScript>>>,
    subscribers: Mutex<Vec<Sender<DeviceEvent>>>,
    open_delay: Mutex<Duration>,
    pub opens: AtomicUsize,
}

impl FakeDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            open_delay: Mutex::new(Duration::ZERO),
            opens: AtomicUsize::new(0),
        })
    }

    /// Register a device. The first device per flow becomes the default.
    pub fn add_device(&self, id: &str, flow: DataFlow, format: AudioFormat) -> Arc<EndpointScript> {
        let mut devices = self.devices.lock();
        let is_default = !devices.iter().any(|d| d.flow == flow && d.is_default);
        devices.push(AudioDeviceInfo {
            id: id.to_string(),
            name: format!("Fake {}", id),
            flow,
            state: DeviceState::Active,
            is_default,
        });
        let script = EndpointScript::new(format);
        self.scripts.lock().insert(id.to_string(), script.clone());
        script
    }

    pub fn set_state(&self, id: &str, state: DeviceState) {
        if let Some(device) = self.devices.lock().iter_mut().find(|d| d.id == id) {
            device.state = state;
        }
    }

    pub fn set_default(&self, id: &str) {
        let mut devices = self.devices.lock();
        let Some(flow) = devices.iter().find(|d| d.id == id).map(|d| d.flow) else {
            return;
        };
        for device in devices.iter_mut().filter(|d| d.flow == flow) {
            device.is_default = device.id == id;
        }
    }

    /// Make every `open` take this long, like a slow driver activation.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = delay;
    }

    pub fn emit(&self, event: DeviceEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl DeviceDirectory for FakeDirectory {
    fn list_devices(&self, flow: DataFlow) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        Ok(self.devices.lock().iter().filter(|d| d.flow == flow).cloned().collect())
    }

    fn default_device(&self, flow: DataFlow) -> Result<AudioDeviceInfo, AudioError> {
        self.devices
            .lock()
            .iter()
            .find(|d| d.flow == flow && d.is_default)
            .cloned()
            .ok_or_else(|| AudioError::DeviceNotAvailable(format!("no default {:?} device", flow)))
    }

    fn open(&self, id: &str, _flow: DataFlow, _loopback: bool) -> Result<Box<dyn AudioEndpoint>, AudioError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let delay = *self.open_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let active = self.devices.lock().iter().any(|d| d.id == id && d.state.is_active());
        if !active {
            return Err(AudioError::DeviceNotAvailable(id.to_string()));
        }
        let script = self
            .scripts
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| AudioError::DeviceNotAvailable(id.to_string()))?;
        Ok(Box::new(FakeEndpoint { script }))
    }

    fn subscribe(&self) -> Receiver<DeviceEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub fn pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub fn samples(bytes: &[u8]) -> Vec<i16> {
    bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
}
