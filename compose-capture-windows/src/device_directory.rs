//! Windows audio device directory via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list capture and render endpoints with
//! friendly names and states, open them as WASAPI streams, and deliver
//! endpoint notifications over channels.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use windows::core::HSTRING;
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::StructuredStorage::PropVariantClear;
use windows::Win32::System::Com::*;
use windows::Win32::System::Variant::VT_LPWSTR;

use compose_capture_core::models::error::AudioError;
use compose_capture_core::traits::device_directory::{
    AudioDeviceInfo, AudioEndpoint, DataFlow, DeviceDirectory, DeviceEvent,
};

use crate::com::{audio_error, ensure_mta, take_pwstr};
use crate::notification_client::{map_state, NotificationClient, Subscribers};
use crate::wasapi_endpoint::WasapiEndpoint;

/// Audio device directory backed by `IMMDeviceEnumerator`.
pub struct WasapiDeviceDirectory {
    enumerator: IMMDeviceEnumerator,
    subscribers: Subscribers,
    client: Mutex<Option<IMMNotificationClient>>,
}

// SAFETY: the enumerator and notification client live in the multithreaded
// apartment; every method joins the MTA before touching them.
unsafe impl Send for WasapiDeviceDirectory {}
unsafe impl Sync for WasapiDeviceDirectory {}

impl WasapiDeviceDirectory {
    pub fn new() -> Result<Self, AudioError> {
        ensure_mta();
        let enumerator: IMMDeviceEnumerator = unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
            .map_err(|e| audio_error("failed to create device enumerator", e))?;
        Ok(Self {
            enumerator,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            client: Mutex::new(None),
        })
    }

    fn data_flow(flow: DataFlow) -> EDataFlow {
        match flow {
            DataFlow::Render => eRender,
            DataFlow::Capture => eCapture,
        }
    }

    fn default_id(&self, flow: DataFlow) -> Option<String> {
        unsafe {
            self.enumerator
                .GetDefaultAudioEndpoint(Self::data_flow(flow), eConsole)
                .ok()
                .and_then(|d| d.GetId().ok())
                .map(|id| take_pwstr(id))
        }
    }

    fn describe(device: &IMMDevice, flow: DataFlow, default_id: Option<&str>) -> Option<AudioDeviceInfo> {
        unsafe {
            let id = take_pwstr(device.GetId().ok()?);
            let state = device.GetState().map(map_state).ok()?;
            let name = Self::friendly_name(device).unwrap_or_else(|| id.clone());
            Some(AudioDeviceInfo {
                is_default: default_id == Some(id.as_str()),
                id,
                name,
                flow,
                state,
            })
        }
    }

    /// Read the PKEY_Device_FriendlyName property from a device.
    fn friendly_name(device: &IMMDevice) -> Option<String> {
        unsafe {
            let store = device.OpenPropertyStore(STGM_READ).ok()?;
            let mut value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;

            let name = if value.Anonymous.Anonymous.vt == VT_LPWSTR {
                let pwsz = value.Anonymous.Anonymous.Anonymous.pwszVal;
                (!pwsz.is_null()).then(|| pwsz.to_string().unwrap_or_default())
            } else {
                None
            };

            PropVariantClear(&mut value).ok();
            name
        }
    }

    /// Register the notification client on first subscription.
    fn ensure_notifications(&self) {
        let mut client = self.client.lock();
        if client.is_some() {
            return;
        }
        let callback: IMMNotificationClient = NotificationClient::new(self.subscribers.clone()).into();
        match unsafe { self.enumerator.RegisterEndpointNotificationCallback(&callback) } {
            Ok(()) => *client = Some(callback),
            Err(e) => log::warn!("endpoint notifications unavailable: {}", e),
        }
    }
}

impl DeviceDirectory for WasapiDeviceDirectory {
    fn list_devices(&self, flow: DataFlow) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        ensure_mta();
        let default_id = self.default_id(flow);
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(Self::data_flow(flow), DEVICE_STATEMASK_ALL)
                .map_err(|e| audio_error("EnumAudioEndpoints", e))?;
            let count = collection.GetCount().map_err(|e| audio_error("GetCount", e))?;

            Ok((0..count)
                .filter_map(|i| collection.Item(i).ok())
                .filter_map(|device| Self::describe(&device, flow, default_id.as_deref()))
                .collect())
        }
    }

    fn default_device(&self, flow: DataFlow) -> Result<AudioDeviceInfo, AudioError> {
        ensure_mta();
        let device = unsafe { self.enumerator.GetDefaultAudioEndpoint(Self::data_flow(flow), eConsole) }
            .map_err(|_| AudioError::DeviceNotAvailable(format!("no default {:?} device", flow)))?;
        let mut info = Self::describe(&device, flow, None)
            .ok_or_else(|| AudioError::DeviceNotAvailable(format!("default {:?} device unreadable", flow)))?;
        info.is_default = true;
        Ok(info)
    }

    fn open(&self, id: &str, _flow: DataFlow, loopback: bool) -> Result<Box<dyn AudioEndpoint>, AudioError> {
        ensure_mta();
        let device = unsafe { self.enumerator.GetDevice(&HSTRING::from(id)) }
            .map_err(|_| AudioError::DeviceNotAvailable(id.to_string()))?;
        let endpoint = WasapiEndpoint::open(&device, loopback)?;
        log::debug!("opened {} ({}, loopback: {})", id, endpoint.native_format(), loopback);
        Ok(Box::new(endpoint))
    }

    fn subscribe(&self) -> Receiver<DeviceEvent> {
        ensure_mta();
        self.ensure_notifications();
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }
}

impl Drop for WasapiDeviceDirectory {
    fn drop(&mut self) {
        ensure_mta();
        if let Some(client) = self.client.lock().take() {
            let _ = unsafe { self.enumerator.UnregisterEndpointNotificationCallback(&client) };
        }
    }
}
