//! # compose-capture-windows
//!
//! Windows backends for compose-capture-core.
//!
//! Provides:
//! - `WasapiDeviceDirectory`: endpoint listing, WASAPI streams and device
//!   notifications through the MMDevice API
//! - `GdiBackend`: display and window capture through GDI
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use compose_capture_core::{AudioManager, AudioOptions, CaptureOrchestrator};
//! use compose_capture_windows::{GdiBackend, WasapiDeviceDirectory};
//!
//! let mut orchestrator = CaptureOrchestrator::new(Arc::new(GdiBackend::new()), Default::default());
//! let directory = Arc::new(WasapiDeviceDirectory::new()?);
//! let audio = AudioManager::new(directory, Arc::new(AudioOptions::default()), Default::default())?;
//! ```

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_directory;
#[cfg(target_os = "windows")]
pub mod gdi_display;
#[cfg(target_os = "windows")]
mod notification_client;
#[cfg(target_os = "windows")]
mod wasapi_endpoint;

#[cfg(target_os = "windows")]
pub use device_directory::WasapiDeviceDirectory;
#[cfg(target_os = "windows")]
pub use gdi_display::GdiBackend;
