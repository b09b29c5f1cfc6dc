//! WASAPI shared-mode capture endpoint.
//!
//! Opens either a capture endpoint (microphone) or a render endpoint with
//! `AUDCLNT_STREAMFLAGS_LOOPBACK` (what the speakers play). Loopback needs
//! no special permission; DRM-protected audio arrives as silence.

use windows::core::GUID;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::{CoTaskMemFree, CLSCTX_ALL};

use compose_capture_core::models::audio_format::{AudioFormat, SampleKind};
use compose_capture_core::models::error::AudioError;
use compose_capture_core::traits::device_directory::{AudioEndpoint, AudioPacket};

use crate::com::{audio_error, ensure_mta};

const WAVE_FORMAT_PCM_TAG: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT_TAG: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE_TAG: u16 = 0xFFFE;
const SUBTYPE_IEEE_FLOAT: GUID = GUID::from_u128(0x00000003_0000_0010_8000_00aa00389b71);

/// Requested shared-mode buffer: 100 ms in 100-ns units.
const BUFFER_DURATION_HNS: i64 = 1_000_000;

/// One initialized WASAPI stream.
pub struct WasapiEndpoint {
    audio_client: IAudioClient,
    capture_client: IAudioCaptureClient,
    format: AudioFormat,
    period_hns: u64,
}

// SAFETY: both interfaces are created in the multithreaded apartment, which
// makes them callable from any MTA thread. Every method joins the MTA first.
unsafe impl Send for WasapiEndpoint {}

impl WasapiEndpoint {
    /// Activate and initialize a stream on `device`.
    ///
    /// Sequence:
    /// 1. Activate IAudioClient
    /// 2. Read the shared-mode mix format
    /// 3. Initialize in shared mode (with LOOPBACK for render devices)
    /// 4. Get the IAudioCaptureClient service
    pub fn open(device: &IMMDevice, loopback: bool) -> Result<Self, AudioError> {
        ensure_mta();
        unsafe {
            let audio_client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| audio_error("Activate", e))?;

            let mix_format_ptr = audio_client
                .GetMixFormat()
                .map_err(|e| audio_error("GetMixFormat", e))?;
            let format = describe_format(mix_format_ptr);

            let mut flags = AUDCLNT_STREAMFLAGS_NOPERSIST;
            if loopback {
                flags |= AUDCLNT_STREAMFLAGS_LOOPBACK;
            }
            let initialized = audio_client.Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                flags,
                BUFFER_DURATION_HNS,
                0,
                mix_format_ptr,
                None,
            );
            CoTaskMemFree(Some(mix_format_ptr as *const _));
            initialized.map_err(|e| audio_error("IAudioClient::Initialize", e))?;
            let format = format?;

            let mut default_period: i64 = 0;
            audio_client
                .GetDevicePeriod(Some(&mut default_period), None)
                .map_err(|e| audio_error("GetDevicePeriod", e))?;

            let capture_client: IAudioCaptureClient = audio_client
                .GetService()
                .map_err(|e| audio_error("GetService", e))?;

            Ok(Self {
                audio_client,
                capture_client,
                format,
                period_hns: default_period.max(1) as u64,
            })
        }
    }
}

impl AudioEndpoint for WasapiEndpoint {
    fn native_format(&self) -> AudioFormat {
        self.format
    }

    fn device_period_hns(&self) -> u64 {
        self.period_hns
    }

    fn start(&mut self) -> Result<(), AudioError> {
        ensure_mta();
        unsafe { self.audio_client.Start() }.map_err(|e| audio_error("IAudioClient::Start", e))
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        ensure_mta();
        unsafe { self.audio_client.Stop() }.map_err(|e| audio_error("IAudioClient::Stop", e))
    }

    fn read_packet(&mut self) -> Result<Option<AudioPacket>, AudioError> {
        ensure_mta();
        unsafe {
            let pending = self
                .capture_client
                .GetNextPacketSize()
                .map_err(|e| audio_error("GetNextPacketSize", e))?;
            if pending == 0 {
                return Ok(None);
            }

            let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
            let mut num_frames: u32 = 0;
            let mut flags: u32 = 0;
            let mut position: u64 = 0;
            self.capture_client
                .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, Some(&mut position), None)
                .map_err(|e| audio_error("GetBuffer", e))?;

            let silent = flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0;
            let len = num_frames as usize * self.format.block_align();
            let data = if silent || buffer_ptr.is_null() || len == 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(buffer_ptr, len).to_vec()
            };

            self.capture_client
                .ReleaseBuffer(num_frames)
                .map_err(|e| audio_error("ReleaseBuffer", e))?;

            Ok(Some(AudioPacket {
                data,
                frames: num_frames,
                discontinuity: flags & (AUDCLNT_BUFFERFLAGS_DATA_DISCONTINUITY.0 as u32) != 0,
                silent,
                position: Some(position),
            }))
        }
    }
}

impl Drop for WasapiEndpoint {
    fn drop(&mut self) {
        ensure_mta();
        let _ = unsafe { self.audio_client.Stop() };
    }
}

/// Translate a WAVEFORMATEX (possibly extensible) into an `AudioFormat`.
unsafe fn describe_format(format: *const WAVEFORMATEX) -> Result<AudioFormat, AudioError> {
    let base = &*format;
    let (sample_kind, valid_bits) = match base.wFormatTag {
        WAVE_FORMAT_IEEE_FLOAT_TAG => (SampleKind::Float, base.wBitsPerSample),
        WAVE_FORMAT_PCM_TAG => (SampleKind::Int, base.wBitsPerSample),
        WAVE_FORMAT_EXTENSIBLE_TAG => {
            let extensible = &*(format as *const WAVEFORMATEXTENSIBLE);
            let sub_format = extensible.SubFormat;
            let valid_bits = extensible.Samples.wValidBitsPerSample;
            let kind = if sub_format == SUBTYPE_IEEE_FLOAT {
                SampleKind::Float
            } else {
                SampleKind::Int
            };
            (kind, valid_bits)
        }
        tag => {
            return Err(AudioError::UnsupportedFormat(format!("wave format tag {:#06x}", tag)));
        }
    };

    let described = AudioFormat {
        channels: base.nChannels,
        bits_per_sample: base.wBitsPerSample,
        sample_rate: base.nSamplesPerSec,
        valid_bits,
        sample_kind,
    };
    described.validate().map_err(AudioError::UnsupportedFormat)?;
    Ok(described)
}
