//! `IMMNotificationClient` that forwards endpoint changes as `DeviceEvent`s.

use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use windows::core::{Result as WinResult, PCWSTR};
use windows::Win32::Foundation::PROPERTYKEY;
use windows::Win32::Media::Audio::*;
use windows_core::implement;

use compose_capture_core::traits::device_directory::{DataFlow, DeviceEvent, DeviceState};

/// Subscribers that receive every device event. Closed receivers are pruned
/// on the next send.
pub type Subscribers = Arc<Mutex<Vec<Sender<DeviceEvent>>>>;

#[implement(IMMNotificationClient)]
pub struct NotificationClient {
    subscribers: Subscribers,
}

impl NotificationClient {
    pub fn new(subscribers: Subscribers) -> Self {
        Self { subscribers }
    }

    fn publish(&self, event: DeviceEvent) {
        log::debug!("endpoint notification: {:?}", event);
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }
}

pub fn map_state(state: DEVICE_STATE) -> DeviceState {
    if state == DEVICE_STATE_ACTIVE {
        DeviceState::Active
    } else if state == DEVICE_STATE_DISABLED {
        DeviceState::Disabled
    } else if state == DEVICE_STATE_UNPLUGGED {
        DeviceState::Unplugged
    } else {
        DeviceState::NotPresent
    }
}

pub fn map_flow(flow: EDataFlow) -> Option<DataFlow> {
    if flow == eRender {
        Some(DataFlow::Render)
    } else if flow == eCapture {
        Some(DataFlow::Capture)
    } else {
        None
    }
}

fn device_id(id: &PCWSTR) -> String {
    if id.is_null() {
        return String::new();
    }
    unsafe { id.to_string() }.unwrap_or_default()
}

impl IMMNotificationClient_Impl for NotificationClient_Impl {
    fn OnDeviceStateChanged(&self, pwstrdeviceid: &PCWSTR, dwnewstate: DEVICE_STATE) -> WinResult<()> {
        self.publish(DeviceEvent::StateChanged {
            id: device_id(pwstrdeviceid),
            state: map_state(dwnewstate),
        });
        Ok(())
    }

    fn OnDeviceAdded(&self, pwstrdeviceid: &PCWSTR) -> WinResult<()> {
        self.publish(DeviceEvent::Added {
            id: device_id(pwstrdeviceid),
        });
        Ok(())
    }

    fn OnDeviceRemoved(&self, pwstrdeviceid: &PCWSTR) -> WinResult<()> {
        self.publish(DeviceEvent::Removed {
            id: device_id(pwstrdeviceid),
        });
        Ok(())
    }

    fn OnDefaultDeviceChanged(&self, flow: EDataFlow, role: ERole, pwstrdefaultdeviceid: &PCWSTR) -> WinResult<()> {
        // console is the role captures follow; multimedia and communications
        // fire alongside it
        if role != eConsole {
            return Ok(());
        }
        if let Some(flow) = map_flow(flow) {
            self.publish(DeviceEvent::DefaultChanged {
                flow,
                id: device_id(pwstrdefaultdeviceid),
            });
        }
        Ok(())
    }

    fn OnPropertyValueChanged(&self, _pwstrdeviceid: &PCWSTR, _key: &PROPERTYKEY) -> WinResult<()> {
        Ok(())
    }
}
