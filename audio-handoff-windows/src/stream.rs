//! Shared-mode WASAPI capture stream used by both sources.
//!
//! WASAPI delivers Float32 in shared mode. The stream keeps the first
//! `channels` channels of each device frame and hands them on as
//! native-endian `f32` bytes.

use windows::Win32::Foundation::HANDLE;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use audio_handoff_core::{CaptureConfiguration, CaptureError, SourceInfo};

use crate::device_enumerator::probe_endpoint;
use crate::error::{WasapiError, WasapiResultExt};

const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// 100ms in 100-nanosecond units.
const BUFFER_DURATION: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MixFormat {
    pub(crate) sample_rate: u32,
    pub(crate) channels: u16,
}

impl MixFormat {
    fn from_waveformat(format: &WAVEFORMATEX) -> Result<Self, WasapiError> {
        let tag = format.wFormatTag;
        let bits = format.wBitsPerSample;
        if bits != 32 || (tag != WAVE_FORMAT_IEEE_FLOAT && tag != WAVE_FORMAT_EXTENSIBLE) {
            return Err(WasapiError::UnsupportedFormat(format!(
                "format tag {:#06x}, {} bits per sample",
                tag, bits
            )));
        }
        Ok(Self {
            sample_rate: format.nSamplesPerSec,
            channels: format.nChannels,
        })
    }
}

/// The endpoint selected by `open`.
///
/// `open` initializes a trial stream on the caller's thread, so a busy or
/// unsupported endpoint fails there. The stream that is read is created
/// again on the thread that reads it.
#[derive(Debug, Clone)]
pub(crate) struct OpenedEndpoint {
    pub(crate) info: SourceInfo,
    pub(crate) sample_rate: u32,
    pub(crate) channels: u16,
    pub(crate) queue_frames: usize,
}

impl OpenedEndpoint {
    pub(crate) fn open(requested: Option<&str>, config: &CaptureConfiguration) -> Result<Self, CaptureError> {
        let wanted = requested.or(config.device_name.as_deref());
        let (info, mix) = probe_endpoint(wanted, config.channel_count).map_err(WasapiError::into_open_error)?;
        let channels = config.channel_count.min(mix.channels);
        log::info!(
            "Opened WASAPI endpoint {} ({} Hz, {} of {} channels)",
            info.name,
            mix.sample_rate,
            channels,
            mix.channels
        );
        Ok(Self {
            info,
            sample_rate: mix.sample_rate,
            channels,
            queue_frames: config.queue_capacity_frames,
        })
    }
}

pub(crate) struct CaptureStream {
    client: IAudioClient,
    capture: IAudioCaptureClient,
    mix: MixFormat,
    device_channels: usize,
    channels: usize,
}

impl CaptureStream {
    /// Initialize a shared-mode capture stream on `device`.
    ///
    /// With `event`, WASAPI signals the handle whenever a buffer is ready.
    pub(crate) fn open(device: &IMMDevice, channels: u16, event: Option<HANDLE>) -> Result<Self, WasapiError> {
        unsafe {
            let client: IAudioClient = device.Activate(CLSCTX_ALL, None).call("IMMDevice::Activate")?;
            let format_ptr = client.GetMixFormat().call("IAudioClient::GetMixFormat")?;

            let mut flags = AUDCLNT_STREAMFLAGS_NOPERSIST;
            if event.is_some() {
                flags |= AUDCLNT_STREAMFLAGS_EVENTCALLBACK;
            }
            let initialized = MixFormat::from_waveformat(&*format_ptr).and_then(|mix| {
                client
                    .Initialize(AUDCLNT_SHAREMODE_SHARED, flags, BUFFER_DURATION, 0, format_ptr, None)
                    .call("IAudioClient::Initialize")?;
                Ok(mix)
            });
            CoTaskMemFree(Some(format_ptr as *const _));
            let mix = initialized?;

            if let Some(event) = event {
                client.SetEventHandle(event).call("IAudioClient::SetEventHandle")?;
            }
            let capture: IAudioCaptureClient = client.GetService().call("IAudioClient::GetService")?;

            Ok(Self {
                client,
                capture,
                mix,
                device_channels: mix.channels as usize,
                channels: (channels as usize).min(mix.channels as usize),
            })
        }
    }

    pub(crate) fn mix(&self) -> MixFormat {
        self.mix
    }

    pub(crate) fn bytes_per_frame(&self) -> usize {
        self.channels * std::mem::size_of::<f32>()
    }

    /// Endpoint buffer size in frames; no read returns more than this.
    pub(crate) fn buffer_frames(&self) -> Result<u32, WasapiError> {
        unsafe { self.client.GetBufferSize().call("IAudioClient::GetBufferSize") }
    }

    pub(crate) fn start(&self) -> Result<(), WasapiError> {
        unsafe { self.client.Start().call("IAudioClient::Start") }
    }

    pub(crate) fn stop(&self) {
        unsafe {
            let _ = self.client.Stop();
        }
    }

    /// Read every queued packet, passing each one to `sink` as interleaved
    /// frame bytes. `scratch` is reused; give it `buffer_frames()` frames of
    /// capacity up front and it never grows. Returns the frames read.
    pub(crate) fn read_packets<F>(&self, scratch: &mut Vec<u8>, mut sink: F) -> Result<usize, WasapiError>
    where
        F: FnMut(&[u8]),
    {
        let mut total = 0;
        unsafe {
            let mut packet_length = self
                .capture
                .GetNextPacketSize()
                .call("IAudioCaptureClient::GetNextPacketSize")?;

            while packet_length > 0 {
                let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;

                self.capture
                    .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                    .call("IAudioCaptureClient::GetBuffer")?;

                let frames = num_frames as usize;
                if frames > 0 && !buffer_ptr.is_null() {
                    scratch.clear();
                    if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                        scratch.resize(frames * self.bytes_per_frame(), 0);
                    } else {
                        let samples =
                            std::slice::from_raw_parts(buffer_ptr as *const f32, frames * self.device_channels);
                        for frame in samples.chunks_exact(self.device_channels) {
                            for sample in &frame[..self.channels] {
                                scratch.extend_from_slice(&sample.to_ne_bytes());
                            }
                        }
                    }
                    sink(scratch);
                    total += frames;
                }

                self.capture
                    .ReleaseBuffer(num_frames)
                    .call("IAudioCaptureClient::ReleaseBuffer")?;

                packet_length = self
                    .capture
                    .GetNextPacketSize()
                    .call("IAudioCaptureClient::GetNextPacketSize")?;
            }
        }
        Ok(total)
    }
}
