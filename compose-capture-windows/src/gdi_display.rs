//! GDI screen and window capture.
//!
//! Displays are read with `BitBlt` from the screen DC, windows with
//! `PrintWindow`. Both copy into a top-down 32-bit DIB section and hand the
//! pixels over as a BGRA `Texture`. GDI always sees the desktop in its
//! presented orientation, so frames never need rotating.

use std::ffi::c_void;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use windows::core::BOOL;
use windows::Win32::Foundation::{HWND, LPARAM, POINT, RECT};
use windows::Win32::Graphics::Gdi::*;
use windows::Win32::Storage::Xps::{PrintWindow, PRINT_WINDOW_FLAGS};
use windows::Win32::UI::WindowsAndMessaging::{
    GetCursorInfo, GetWindowRect, IsWindow, CURSORINFO, CURSOR_SHOWING,
};

use compose_capture_core::models::error::CaptureError;
use compose_capture_core::models::frame::{PointerUpdate, Texture};
use compose_capture_core::models::geometry::{Point, Rect, Rotation, Size};
use compose_capture_core::traits::source_backend::{
    DisplayInfo, FrameProvider, RawFrame, SourceBackend,
};

/// Poll interval for GDI providers, which have no change notification.
const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

/// Include layered and DirectComposition content.
const PW_RENDERFULLCONTENT: PRINT_WINDOW_FLAGS = PRINT_WINDOW_FLAGS(2);

/// `SourceBackend` for Windows desktops using GDI.
///
/// Cameras and video files are not available through GDI.
#[derive(Debug, Default, Clone, Copy)]
pub struct GdiBackend;

impl GdiBackend {
    pub fn new() -> Self {
        Self
    }
}

impl SourceBackend for GdiBackend {
    fn displays(&self) -> Result<Vec<DisplayInfo>, CaptureError> {
        let mut monitors: Vec<HMONITOR> = Vec::new();
        let ok = unsafe {
            EnumDisplayMonitors(
                None,
                None,
                Some(collect_monitor),
                LPARAM(&mut monitors as *mut Vec<HMONITOR> as isize),
            )
        };
        if !ok.as_bool() {
            return Err(CaptureError::DeviceNotAvailable("EnumDisplayMonitors failed".into()));
        }

        Ok(monitors.into_iter().filter_map(describe_monitor).collect())
    }

    fn open_display(&self, device_name: &str) -> Result<Box<dyn FrameProvider>, CaptureError> {
        let displays = self.displays()?;
        let display = displays
            .into_iter()
            .find(|d| if device_name.is_empty() { d.primary } else { d.device_name == device_name })
            .ok_or_else(|| CaptureError::DeviceNotAvailable(format!("display '{}'", device_name)))?;

        log::debug!("opening display {} at {:?}", display.device_name, display.bounds);
        Ok(Box::new(DisplayProvider {
            bounds: display.bounds,
            pacer: Pacer::new(),
        }))
    }

    fn open_window(&self, handle: u64) -> Result<Box<dyn FrameProvider>, CaptureError> {
        let hwnd = hwnd_from(handle);
        if !unsafe { IsWindow(Some(hwnd)) }.as_bool() {
            return Err(CaptureError::DeviceNotAvailable(format!("window {:#x}", handle)));
        }
        let rect = window_rect(hwnd)?;
        if rect.is_empty() {
            return Err(CaptureError::ConfigurationFailed(format!("window {:#x} has no area", handle)));
        }

        Ok(Box::new(WindowProvider {
            handle,
            size: rect.size(),
            pacer: Pacer::new(),
        }))
    }

    fn open_camera(&self, device_id: &str, _format_index: Option<usize>) -> Result<Box<dyn FrameProvider>, CaptureError> {
        Err(CaptureError::Unsupported(format!("camera '{}' via GDI", device_id)))
    }

    fn open_video(&self, path: &Path) -> Result<Box<dyn FrameProvider>, CaptureError> {
        Err(CaptureError::Unsupported(format!("video '{}' via GDI", path.display())))
    }
}

unsafe extern "system" fn collect_monitor(monitor: HMONITOR, _hdc: HDC, _clip: *mut RECT, data: LPARAM) -> BOOL {
    let monitors = &mut *(data.0 as *mut Vec<HMONITOR>);
    monitors.push(monitor);
    BOOL(1)
}

fn describe_monitor(monitor: HMONITOR) -> Option<DisplayInfo> {
    let mut info = MONITORINFOEXW::default();
    info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;
    let ok = unsafe { GetMonitorInfoW(monitor, &mut info.monitorInfo) };
    if !ok.as_bool() {
        return None;
    }

    let len = info.szDevice.iter().position(|&c| c == 0).unwrap_or(info.szDevice.len());
    Some(DisplayInfo {
        device_name: String::from_utf16_lossy(&info.szDevice[..len]),
        bounds: to_rect(info.monitorInfo.rcMonitor),
        primary: info.monitorInfo.dwFlags & MONITORINFOF_PRIMARY != 0,
        rotation: Rotation::None,
    })
}

fn hwnd_from(handle: u64) -> HWND {
    HWND(handle as usize as *mut c_void)
}

fn to_rect(r: RECT) -> Rect {
    Rect::new(r.left, r.top, r.right, r.bottom)
}

fn window_rect(hwnd: HWND) -> Result<Rect, CaptureError> {
    let mut rect = RECT::default();
    unsafe { GetWindowRect(hwnd, &mut rect) }
        .map_err(|e| CaptureError::DeviceInvalidated(format!("GetWindowRect: {}", e)))?;
    Ok(to_rect(rect))
}

/// Cursor state relative to `origin`, or `None` when it can't be read.
fn pointer_relative_to(origin: Point) -> Option<PointerUpdate> {
    let mut info = CURSORINFO {
        cbSize: std::mem::size_of::<CURSORINFO>() as u32,
        ..Default::default()
    };
    unsafe { GetCursorInfo(&mut info) }.ok()?;
    let POINT { x, y } = info.ptScreenPos;
    Some(PointerUpdate {
        visible: info.flags == CURSOR_SHOWING,
        position: Point::new(x - origin.x, y - origin.y),
        shape: None,
    })
}

/// Fixed-cadence polling for providers without change notification.
struct Pacer {
    next_due: Instant,
}

impl Pacer {
    fn new() -> Self {
        Self { next_due: Instant::now() }
    }

    /// Sleep until the next frame is due. Returns false when that is beyond `timeout`.
    fn wait(&mut self, timeout: Duration) -> bool {
        let now = Instant::now();
        if self.next_due > now + timeout {
            thread::sleep(timeout);
            return false;
        }
        if self.next_due > now {
            thread::sleep(self.next_due - now);
        }
        self.next_due = Instant::now().max(self.next_due) + FRAME_INTERVAL;
        true
    }
}

/// A memory DC with a selected top-down BGRA DIB section. Released on drop.
struct DibCanvas {
    dc: HDC,
    bitmap: HBITMAP,
    previous: HGDIOBJ,
    bits: *mut c_void,
    size: Size,
}

impl DibCanvas {
    fn new(reference: HDC, size: Size) -> Result<Self, CaptureError> {
        unsafe {
            let dc = CreateCompatibleDC(Some(reference));
            if dc.is_invalid() {
                return Err(CaptureError::SurfaceAllocation("CreateCompatibleDC failed".into()));
            }

            let info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: size.width as i32,
                    // negative height selects a top-down bitmap
                    biHeight: -(size.height as i32),
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let mut bits: *mut c_void = std::ptr::null_mut();
            let bitmap = match CreateDIBSection(Some(reference), &info, DIB_RGB_COLORS, &mut bits, None, 0) {
                Ok(bitmap) if !bits.is_null() => bitmap,
                Ok(bitmap) => {
                    let _ = DeleteObject(bitmap.into());
                    let _ = DeleteDC(dc);
                    return Err(CaptureError::SurfaceAllocation("DIB section has no bits".into()));
                }
                Err(e) => {
                    let _ = DeleteDC(dc);
                    return Err(CaptureError::SurfaceAllocation(format!("CreateDIBSection: {}", e)));
                }
            };
            let previous = SelectObject(dc, bitmap.into());

            Ok(Self {
                dc,
                bitmap,
                previous,
                bits,
                size,
            })
        }
    }

    /// Copy the pixels out. GDI leaves alpha undefined, so it is forced opaque.
    fn to_texture(&self) -> Result<Texture, CaptureError> {
        let len = self.size.pixel_count() * 4;
        let mut data = unsafe { std::slice::from_raw_parts(self.bits as *const u8, len) }.to_vec();
        for px in data.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Texture::from_bgra(self.size, data)
            .ok_or_else(|| CaptureError::SurfaceAllocation("DIB size mismatch".into()))
    }
}

impl Drop for DibCanvas {
    fn drop(&mut self) {
        unsafe {
            SelectObject(self.dc, self.previous);
            let _ = DeleteObject(self.bitmap.into());
            let _ = DeleteDC(self.dc);
        }
    }
}

/// Screen DC for the whole virtual desktop. Released on drop.
struct ScreenDc(HDC);

impl ScreenDc {
    fn get() -> Result<Self, CaptureError> {
        let dc = unsafe { GetDC(None) };
        if dc.is_invalid() {
            return Err(CaptureError::Transient("GetDC failed".into()));
        }
        Ok(Self(dc))
    }
}

impl Drop for ScreenDc {
    fn drop(&mut self) {
        unsafe { ReleaseDC(None, self.0) };
    }
}

/// Captures one monitor's rectangle of the desktop.
struct DisplayProvider {
    bounds: Rect,
    pacer: Pacer,
}

impl DisplayProvider {
    fn grab(&self) -> Result<Texture, CaptureError> {
        let screen = ScreenDc::get()?;
        let size = self.bounds.size();
        let canvas = DibCanvas::new(screen.0, size)?;
        unsafe {
            BitBlt(
                canvas.dc,
                0,
                0,
                size.width as i32,
                size.height as i32,
                Some(screen.0),
                self.bounds.left,
                self.bounds.top,
                SRCCOPY | CAPTUREBLT,
            )
        }
        .map_err(|e| CaptureError::Transient(format!("BitBlt: {}", e)))?;
        canvas.to_texture()
    }
}

impl FrameProvider for DisplayProvider {
    fn native_size(&self) -> Size {
        self.bounds.size()
    }

    fn origin(&self) -> Point {
        self.bounds.origin()
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CaptureError> {
        if !self.pacer.wait(timeout) {
            return Ok(None);
        }
        let mut frame = RawFrame::new(self.grab()?);
        frame.pointer = pointer_relative_to(self.bounds.origin());
        Ok(Some(frame))
    }
}

/// Captures a single top-level window, clipped to its size at open.
struct WindowProvider {
    handle: u64,
    size: Size,
    pacer: Pacer,
}

impl WindowProvider {
    fn grab(&self, hwnd: HWND) -> Result<Texture, CaptureError> {
        let screen = ScreenDc::get()?;
        let canvas = DibCanvas::new(screen.0, self.size)?;
        let ok = unsafe { PrintWindow(hwnd, canvas.dc, PW_RENDERFULLCONTENT) };
        if !ok.as_bool() {
            return Err(CaptureError::Transient(format!("PrintWindow {:#x} failed", self.handle)));
        }
        canvas.to_texture()
    }
}

impl FrameProvider for WindowProvider {
    fn native_size(&self) -> Size {
        self.size
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CaptureError> {
        if !self.pacer.wait(timeout) {
            return Ok(None);
        }
        let hwnd = hwnd_from(self.handle);
        if !unsafe { IsWindow(Some(hwnd)) }.as_bool() {
            return Err(CaptureError::DeviceInvalidated(format!("window {:#x} closed", self.handle)));
        }
        let rect = window_rect(hwnd)?;
        let mut frame = RawFrame::new(self.grab(hwnd)?);
        frame.pointer = pointer_relative_to(rect.origin());
        Ok(Some(frame))
    }
}
