use crossbeam_channel::Receiver;

use crate::models::audio_format::AudioFormat;
use crate::models::error::AudioError;

/// Direction of an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFlow {
    /// Playback device; captured through loopback.
    Render,
    /// Recording device (microphone, line-in).
    Capture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Active,
    Disabled,
    NotPresent,
    Unplugged,
}

impl DeviceState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub flow: DataFlow,
    pub state: DeviceState,
    pub is_default: bool,
}

/// Device topology changes, delivered over the channel from `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Added { id: String },
    Removed { id: String },
    StateChanged { id: String, state: DeviceState },
    DefaultChanged { flow: DataFlow, id: String },
}

impl DeviceEvent {
    pub fn device_id(&self) -> &str {
        match self {
            Self::Added { id }
            | Self::Removed { id }
            | Self::StateChanged { id, .. }
            | Self::DefaultChanged { id, .. } => id,
        }
    }
}

/// One packet read from an endpoint's capture buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    /// Interleaved samples in the endpoint's native format.
    pub data: Vec<u8>,
    pub frames: u32,
    /// Data was lost between the previous packet and this one.
    pub discontinuity: bool,
    /// The packet is silence; `data` may be garbage and must be zeroed.
    pub silent: bool,
    /// Device position of the first frame, in frames.
    pub position: Option<u64>,
}

/// An opened audio endpoint.
///
/// Implemented by:
/// - `WasapiEndpoint` (Windows shared-mode capture and loopback)
/// - Test fakes
pub trait AudioEndpoint: Send {
    fn native_format(&self) -> AudioFormat;

    /// Default device period in 100-ns units.
    fn device_period_hns(&self) -> u64;

    fn start(&mut self) -> Result<(), AudioError>;

    fn stop(&mut self) -> Result<(), AudioError>;

    /// Next packet from the device buffer, or `None` when it is empty.
    fn read_packet(&mut self) -> Result<Option<AudioPacket>, AudioError>;
}

/// Injectable view of the system's audio devices.
///
/// Implemented by:
/// - `WasapiDeviceDirectory` (Windows)
/// - Test fakes
pub trait DeviceDirectory: Send + Sync {
    fn list_devices(&self, flow: DataFlow) -> Result<Vec<AudioDeviceInfo>, AudioError>;

    fn default_device(&self, flow: DataFlow) -> Result<AudioDeviceInfo, AudioError>;

    /// Open `id` for capture. `loopback` captures the mix of a render device.
    fn open(&self, id: &str, flow: DataFlow, loopback: bool) -> Result<Box<dyn AudioEndpoint>, AudioError>;

    /// Receive device topology changes from now on.
    fn subscribe(&self) -> Receiver<DeviceEvent>;
}
