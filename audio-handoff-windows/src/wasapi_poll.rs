//! Polled WASAPI capture source.
//!
//! The session's consumer thread owns the stream: it starts it, polls it on
//! the configured interval and stops it again. WASAPI packets must be
//! released whole, so packets are copied into a bounded backlog sized by
//! `queue_capacity_frames` and drained from there.

use audio_handoff_core::{CaptureConfiguration, CaptureError, CaptureSource, PollSource, SampleFormat, SourceInfo};

use crate::backlog::PacketBacklog;
use crate::com::ComGuard;
use crate::device_enumerator::DeviceEnumerator;
use crate::error::WasapiError;
use crate::stream::{CaptureStream, OpenedEndpoint};

struct ActiveStream {
    stream: CaptureStream,
    // Dropped last so the stream is released while COM is still initialized.
    _com: ComGuard,
}

/// WASAPI capture drained by polling.
pub struct WasapiPollSource {
    requested: Option<String>,
    endpoint: Option<OpenedEndpoint>,
    active: Option<ActiveStream>,
    backlog: Option<PacketBacklog>,
    dropped: u64,
    scratch: Vec<u8>,
}

// SAFETY: the COM objects in `active` are created in `start` and released in
// `stop`, both on the consumer thread that also polls them. Between `open`
// and `start` the source holds only plain data.
unsafe impl Send for WasapiPollSource {}

impl WasapiPollSource {
    /// Capture from the configured device, or the default endpoint.
    pub fn new() -> Self {
        Self {
            requested: None,
            endpoint: None,
            active: None,
            backlog: None,
            dropped: 0,
            scratch: Vec::new(),
        }
    }

    /// Capture from a specific endpoint by id or friendly name, overriding
    /// `CaptureConfiguration::device_name`.
    pub fn with_device(name_or_id: impl Into<String>) -> Self {
        Self {
            requested: Some(name_or_id.into()),
            ..Self::new()
        }
    }

    fn endpoint(&self) -> Result<&OpenedEndpoint, CaptureError> {
        self.endpoint
            .as_ref()
            .ok_or_else(|| CaptureError::invalid_state("WASAPI poll source is not open"))
    }
}

fn open_stream(endpoint: &OpenedEndpoint) -> Result<ActiveStream, WasapiError> {
    let com = ComGuard::init()?;
    let enumerator = DeviceEnumerator::new()?;
    let (device, _) = enumerator.resolve(Some(&endpoint.info.id))?;
    let stream = CaptureStream::open(&device, endpoint.channels, None)?;
    Ok(ActiveStream { stream, _com: com })
}

impl Default for WasapiPollSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for WasapiPollSource {
    fn open(&mut self, config: &CaptureConfiguration) -> Result<(), CaptureError> {
        self.endpoint = Some(OpenedEndpoint::open(self.requested.as_deref(), config)?);
        Ok(())
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        if self.active.is_some() {
            log::warn!("WASAPI poll source closed while streaming");
            PollSource::stop(self)?;
        }
        self.endpoint = None;
        Ok(())
    }

    fn channel_count(&self) -> u16 {
        self.endpoint.as_ref().map(|e| e.channels).unwrap_or(0)
    }

    fn sample_rate(&self) -> u32 {
        self.endpoint.as_ref().map(|e| e.sample_rate).unwrap_or(0)
    }

    fn sample_format(&self) -> SampleFormat {
        SampleFormat::F32
    }

    fn device_info(&self) -> SourceInfo {
        match &self.endpoint {
            Some(endpoint) => endpoint.info.clone(),
            None => SourceInfo {
                id: self.requested.clone().unwrap_or_default(),
                name: self.requested.clone().unwrap_or_else(|| "Default capture device".into()),
                is_default: self.requested.is_none(),
            },
        }
    }
}

impl PollSource for WasapiPollSource {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Ok(());
        }
        let endpoint = self.endpoint()?.clone();

        // The endpoint passed a trial initialization in `open`, so a failure
        // here means it was taken or removed since.
        let active = open_stream(&endpoint).map_err(WasapiError::into_open_error)?;
        let bytes_per_frame = active.stream.bytes_per_frame();
        let packet_bytes = active.stream.buffer_frames()? as usize * bytes_per_frame;

        self.scratch = Vec::with_capacity(packet_bytes);
        self.backlog = Some(PacketBacklog::new(endpoint.queue_frames, bytes_per_frame)?);
        self.dropped = 0;
        active.stream.start().map_err(WasapiError::into_open_error)?;
        log::info!("WASAPI polled capture started on {}", endpoint.info.name);
        self.active = Some(active);
        Ok(())
    }

    fn poll(&mut self) -> Result<usize, CaptureError> {
        let (Some(active), Some(backlog)) = (&self.active, &mut self.backlog) else {
            return Err(CaptureError::invalid_state("WASAPI poll source is not started"));
        };
        active.stream.read_packets(&mut self.scratch, |bytes| {
            backlog.push(bytes);
        })?;
        self.dropped = backlog.dropped();
        Ok(backlog.frames())
    }

    fn drain(&mut self, into: &mut [u8]) -> Result<usize, CaptureError> {
        match &mut self.backlog {
            Some(backlog) => backlog.drain(into),
            None => Ok(0),
        }
    }

    fn overruns(&self) -> u64 {
        self.dropped
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(active) = self.active.take() {
            active.stream.stop();
            log::info!("WASAPI polled capture stopped");
        }
        if self.dropped > 0 {
            log::warn!("WASAPI poll backlog dropped {} frames", self.dropped);
        }
        self.backlog = None;
        Ok(())
    }
}
