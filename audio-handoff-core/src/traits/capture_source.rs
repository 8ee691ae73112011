use crate::models::config::CaptureConfiguration;
use crate::models::error::CaptureError;
use crate::models::sample_format::SampleFormat;
use crate::session::producer::FrameProducer;

/// An audio endpoint a session can capture from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Connection to the audio subsystem, common to both capture modes.
///
/// Implemented by:
/// - `WasapiEventSource` / `WasapiPollSource` (Windows)
pub trait CaptureSource: Send {
    /// Open the device named by `config.device_name` (or the default).
    ///
    /// Fails with [`CaptureError::DeviceUnavailable`] when the device cannot
    /// be opened. No retry is attempted by the session.
    fn open(&mut self, config: &CaptureConfiguration) -> Result<(), CaptureError>;

    /// Close the device. Must be idempotent.
    fn close(&mut self) -> Result<(), CaptureError>;

    /// Channels per frame delivered by the opened device.
    fn channel_count(&self) -> u16;

    /// Sample rate of the opened device in Hz.
    fn sample_rate(&self) -> u32;

    /// Encoding of the raw bytes the source delivers.
    fn sample_format(&self) -> SampleFormat;

    /// Information about the device backing this source.
    fn device_info(&self) -> SourceInfo;
}

/// A source whose driver invokes the producer on its own real-time thread.
///
/// Setup order used by the session: `open` → `register` → `activate` →
/// `connect_ports`. The producer stays gated off until the session opens it,
/// so a source may start calling it as soon as it is registered.
pub trait CallbackSource: CaptureSource {
    /// Hand the producer to the driver. It must be invoked at most once per
    /// driver period, from one thread at a time, and never retained past `close`.
    fn register(&mut self, producer: FrameProducer) -> Result<(), CaptureError>;

    /// Start the driver's periodic callbacks.
    fn activate(&mut self) -> Result<(), CaptureError>;

    /// Connect named source ports to this source's inputs, one per channel.
    ///
    /// Sources without addressable ports accept only an empty list.
    fn connect_ports(&mut self, ports: &[String]) -> Result<(), CaptureError> {
        if ports.is_empty() {
            Ok(())
        } else {
            Err(CaptureError::device(format!(
                "{} does not support port connections",
                self.device_info().name
            )))
        }
    }
}

/// A source that a worker thread drains on its own schedule.
pub trait PollSource: CaptureSource {
    /// Start streaming. Called on the draining thread before the first poll.
    fn start(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    /// Frames available to drain right now.
    fn poll(&mut self) -> Result<usize, CaptureError>;

    /// Copy up to `into.len() / bytes_per_frame` whole frames of interleaved
    /// raw samples into `into`. Returns the number of frames copied.
    fn drain(&mut self, into: &mut [u8]) -> Result<usize, CaptureError>;

    /// Frames the source has dropped since `start` because its own bounded
    /// buffer was full. Reported as the session's overruns in poll mode.
    fn overruns(&self) -> u64 {
        0
    }

    /// Stop streaming. Called on the draining thread after the last drain.
    fn stop(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }
}
