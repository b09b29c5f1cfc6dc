//! COM apartment setup and error mapping shared by the WASAPI types.

use windows::core::{Error, PWSTR};
use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Media::Audio::{AUDCLNT_E_DEVICE_INVALIDATED, AUDCLNT_E_DEVICE_IN_USE};
use windows::Win32::System::Com::{CoInitializeEx, CoTaskMemFree, CoUninitialize, COINIT_MULTITHREADED};

use compose_capture_core::models::error::AudioError;

/// Balances one successful `CoInitializeEx` on this thread.
struct ComApartment {
    initialized: bool,
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        if self.initialized {
            unsafe { CoUninitialize() };
        }
    }
}

thread_local! {
    static APARTMENT: ComApartment = ComApartment {
        initialized: unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }.is_ok(),
    };
}

/// Join the multithreaded apartment on the calling thread, once per thread.
///
/// The engine calls into WASAPI from its own drain and event threads, so
/// every entry point calls this first. The apartment is left when the thread
/// exits.
pub fn ensure_mta() {
    APARTMENT.with(|_| {});
}

/// Classify a WASAPI failure.
pub fn audio_error(context: &str, error: Error) -> AudioError {
    let code = error.code();
    if code == AUDCLNT_E_DEVICE_INVALIDATED {
        AudioError::DeviceInvalidated(format!("{}: {}", context, error))
    } else if code == E_ACCESSDENIED {
        AudioError::PermissionDenied
    } else if code == AUDCLNT_E_DEVICE_IN_USE {
        AudioError::DeviceNotAvailable(format!("{}: device in use", context))
    } else {
        AudioError::Unknown(format!("{}: {}", context, error))
    }
}

/// Copy a COM-allocated wide string and free it.
pub unsafe fn take_pwstr(value: PWSTR) -> String {
    if value.is_null() {
        return String::new();
    }
    let text = value.to_string().unwrap_or_default();
    CoTaskMemFree(Some(value.0 as *const _));
    text
}
