//! Event-driven WASAPI capture source.
//!
//! A dedicated thread registered with MMCSS waits on the stream's event
//! handle and pushes every packet into the session's [`FrameProducer`]. The
//! thread does no allocation or locking once capture is running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::System::Threading::{
    AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW, CreateEventW, WaitForSingleObject,
};

use audio_handoff_core::{
    CallbackSource, CaptureConfiguration, CaptureError, CaptureSource, FrameProducer, SampleFormat, SourceInfo,
};

use crate::com::ComGuard;
use crate::device_enumerator::DeviceEnumerator;
use crate::error::{WasapiError, WasapiResultExt};
use crate::stream::{CaptureStream, OpenedEndpoint};

/// How long the capture thread blocks on the event before rechecking `running`.
const EVENT_WAIT_MS: u32 = 100;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// WASAPI capture driven by the endpoint's buffer-ready event.
pub struct WasapiEventSource {
    requested: Option<String>,
    endpoint: Option<OpenedEndpoint>,
    producer: Option<FrameProducer>,
    running: Arc<AtomicBool>,
    capture_thread: Option<thread::JoinHandle<()>>,
}

impl WasapiEventSource {
    /// Capture from the configured device, or the default endpoint.
    pub fn new() -> Self {
        Self {
            requested: None,
            endpoint: None,
            producer: None,
            running: Arc::new(AtomicBool::new(false)),
            capture_thread: None,
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

    fn shutdown_thread(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_thread.take() {
            if handle.join().is_err() {
                log::error!("WASAPI capture thread panicked");
            }
        }
    }
}

impl Default for WasapiEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for WasapiEventSource {
    fn open(&mut self, config: &CaptureConfiguration) -> Result<(), CaptureError> {
        self.endpoint = Some(OpenedEndpoint::open(self.requested.as_deref(), config)?);
        Ok(())
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        self.shutdown_thread();
        self.producer = None;
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

impl CallbackSource for WasapiEventSource {
    fn register(&mut self, producer: FrameProducer) -> Result<(), CaptureError> {
        if self.capture_thread.is_some() {
            return Err(CaptureError::invalid_state("WASAPI event source is already active"));
        }
        self.producer = Some(producer);
        Ok(())
    }

    fn activate(&mut self) -> Result<(), CaptureError> {
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| CaptureError::invalid_state("WASAPI event source is not open"))?;
        let producer = self
            .producer
            .take()
            .ok_or_else(|| CaptureError::invalid_state("no producer registered"))?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let (ready_tx, ready_rx) = bounded(1);

        let handle = thread::Builder::new()
            .name("wasapi-event-capture".into())
            .spawn(move || capture_thread(endpoint, producer, running, ready_tx))
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn capture thread: {}", e)))?;
        self.capture_thread = Some(handle);

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.shutdown_thread();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.shutdown_thread();
                Err(CaptureError::device("WASAPI capture thread did not start in time"))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.shutdown_thread();
                Err(CaptureError::Unknown("WASAPI capture thread exited during startup".into()))
            }
        }
    }
}

impl Drop for WasapiEventSource {
    fn drop(&mut self) {
        self.shutdown_thread();
    }
}

/// Auto-reset event signalled by WASAPI when a buffer is ready.
struct EventHandle(HANDLE);

impl EventHandle {
    fn new() -> Result<Self, WasapiError> {
        unsafe { CreateEventW(None, false, false, PCWSTR::null()).call("CreateEventW").map(Self) }
    }
}

impl Drop for EventHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// MMCSS "Pro Audio" registration for the current thread.
struct MmcssGuard(Option<HANDLE>);

impl MmcssGuard {
    fn register() -> Self {
        let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
        let mut task_index: u32 = 0;
        match unsafe { AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index) } {
            Ok(handle) => Self(Some(handle)),
            Err(e) => {
                log::warn!("MMCSS registration failed, capturing at normal priority: {}", e);
                Self(None)
            }
        }
    }
}

impl Drop for MmcssGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            unsafe {
                let _ = AvRevertMmThreadCharacteristics(handle);
            }
        }
    }
}

fn capture_thread(
    endpoint: OpenedEndpoint,
    mut producer: FrameProducer,
    running: Arc<AtomicBool>,
    ready: Sender<Result<(), CaptureError>>,
) {
    // Everything COM-related is declared after the guard and dropped before it.
    let _com = match ComGuard::init() {
        Ok(guard) => guard,
        Err(e) => {
            let _ = ready.send(Err(e.into_open_error()));
            return;
        }
    };
    let (stream, event, mut scratch) = match prepare_stream(&endpoint) {
        Ok(prepared) => prepared,
        Err(e) => {
            let _ = ready.send(Err(e.into_open_error()));
            return;
        }
    };
    let _mmcss = MmcssGuard::register();
    if let Err(e) = stream.start() {
        let _ = ready.send(Err(e.into_open_error()));
        return;
    }
    let _ = ready.send(Ok(()));
    log::info!("WASAPI event capture started on {}", endpoint.info.name);

    while running.load(Ordering::SeqCst) {
        let signalled = unsafe { WaitForSingleObject(event.0, EVENT_WAIT_MS) };
        if signalled != WAIT_OBJECT_0 {
            continue;
        }
        // Every packet queued since the last event belongs to one cycle.
        let read = stream.read_packets(&mut scratch, |bytes| {
            producer.enqueue_interleaved(bytes);
        });
        producer.finish_cycle();
        if let Err(e) = read {
            log::error!("WASAPI capture failed: {}", e);
            producer.report_device_lost();
            break;
        }
    }

    stream.stop();
    log::info!("WASAPI event capture stopped");
}

fn prepare_stream(endpoint: &OpenedEndpoint) -> Result<(CaptureStream, EventHandle, Vec<u8>), WasapiError> {
    let enumerator = DeviceEnumerator::new()?;
    let (device, _) = enumerator.resolve(Some(&endpoint.info.id))?;
    let event = EventHandle::new()?;
    let stream = CaptureStream::open(&device, endpoint.channels, Some(event.0))?;
    let scratch = Vec::with_capacity(stream.buffer_frames()? as usize * stream.bytes_per_frame());
    Ok((stream, event, scratch))
}
