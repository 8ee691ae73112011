use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::capture_report::{CaptureMode, CaptureReport};
use crate::models::config::CaptureConfiguration;
use crate::models::diagnostics::HandoffDiagnostics;
use crate::models::error::CaptureError;
use crate::models::state::CaptureState;
use crate::processing::accumulator::WindowAccumulator;
use crate::processing::byte_queue::{BoundedByteQueue, QueueReader};
use crate::processing::handoff::HandoffCoordinator;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::capture_source::{CallbackSource, CaptureSource, PollSource};

use super::consumer::{ConsumerContext, ConsumerHandle, ConsumerInput, ConsumerOutcome};
use super::producer::{CaptureGates, FrameProducer, ProducerCounters};

/// State shared between the session and its consumer thread.
pub(crate) struct SessionStatus {
    state: Mutex<CaptureState>,
    delegate: Mutex<Option<Arc<dyn CaptureDelegate>>>,
}

impl SessionStatus {
    fn new() -> Self {
        Self {
            state: Mutex::new(CaptureState::Idle),
            delegate: Mutex::new(None),
        }
    }

    pub(crate) fn get(&self) -> CaptureState {
        *self.state.lock()
    }

    /// Move to `next` if the state machine allows it. Repeating the current
    /// state is a silent no-op.
    pub(crate) fn transition(&self, next: CaptureState) -> bool {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if previous == next {
                return false;
            }
            if !previous.can_transition_to(next) {
                log::warn!("Ignoring capture state change {:?} -> {:?}", previous, next);
                return false;
            }
            *state = next;
            previous
        };

        log::info!("Capture state: {:?} -> {:?}", previous, next);
        if let Some(delegate) = self.delegate() {
            delegate.on_state_changed(&next);
        }
        true
    }

    fn delegate(&self) -> Option<Arc<dyn CaptureDelegate>> {
        self.delegate.lock().clone()
    }
}

enum Binding {
    Unbound,
    Callback {
        source: Box<dyn CallbackSource>,
        reader: Option<QueueReader>,
    },
    Poll {
        source: Option<Box<dyn PollSource>>,
    },
    Released,
}

/// Requests a stop from any thread without waiting for it.
#[derive(Debug, Clone)]
pub struct StopHandle {
    gates: Arc<CaptureGates>,
    coordinator: Arc<HandoffCoordinator>,
}

impl StopHandle {
    /// Close the capture gate and nudge the consumer. Never blocks; the
    /// consumer notices within one wake timeout at worst.
    pub fn request_stop(&self) {
        self.gates.request_shutdown();
        self.coordinator.try_notify();
    }
}

/// One capture run: a bound source, the queue between the driver thread and
/// the consumer thread, and the accumulator feeding the window callback.
///
/// ```text
/// Callback mode:
///   [driver thread] → FrameProducer → BoundedByteQueue → [consumer] → WindowAccumulator → on_window
///                         └── try_notify ──→ HandoffCoordinator ──→ wait_for_data ──┘
/// Poll mode:
///   [consumer] → PollSource::drain → WindowAccumulator → on_window
/// ```
///
/// Lifecycle: `new` → `bind_callback`/`bind_poll` → `start` → `arm` →
/// `wait`/`stop`. A session captures once; create a new one to capture again.
pub struct CaptureSession {
    id: String,
    config: CaptureConfiguration,
    status: Arc<SessionStatus>,
    gates: Arc<CaptureGates>,
    counters: Arc<ProducerCounters>,
    coordinator: Arc<HandoffCoordinator>,
    binding: Binding,
    consumer: Option<ConsumerHandle>,
    device_rate: u32,
    started: Option<(DateTime<Utc>, Instant)>,
    report: Option<CaptureReport>,
}

impl CaptureSession {
    pub fn new(config: CaptureConfiguration) -> Result<Self, CaptureError> {
        config.validate()?;
        let device_rate = config.sample_rate;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            status: Arc::new(SessionStatus::new()),
            gates: Arc::new(CaptureGates::default()),
            counters: Arc::new(ProducerCounters::default()),
            coordinator: Arc::new(HandoffCoordinator::new()),
            binding: Binding::Unbound,
            consumer: None,
            device_rate,
            started: None,
            report: None,
        })
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn CaptureDelegate>) {
        *self.status.delegate.lock() = Some(delegate);
    }

    pub fn session_id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &CaptureConfiguration {
        &self.config
    }

    pub fn state(&self) -> CaptureState {
        self.status.get()
    }

    /// Whether the consumer is draining (armed and not yet stopped).
    pub fn is_armed(&self) -> bool {
        self.gates.can_capture()
    }

    /// Frames dropped so far because the queue was full.
    pub fn overruns(&self) -> u64 {
        self.counters.overruns.load(Ordering::Relaxed)
    }

    pub fn diagnostics(&self) -> HandoffDiagnostics {
        let handoff = self.coordinator.stats();
        HandoffDiagnostics {
            producer_cycles: self.counters.cycles.load(Ordering::Relaxed),
            frames_enqueued: self.counters.frames_enqueued.load(Ordering::Relaxed),
            overruns: self.overruns(),
            notifies_sent: handoff.notifies_sent,
            notifies_skipped: handoff.notifies_skipped,
            consumer_wakeups: handoff.wakeups,
            consumer_timeouts: handoff.timeouts,
        }
    }

    /// The final report, once capture has ended.
    pub fn report(&self) -> Option<&CaptureReport> {
        self.report.as_ref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            gates: Arc::clone(&self.gates),
            coordinator: Arc::clone(&self.coordinator),
        }
    }

    /// Open a callback-driven source, allocate the queue and register the
    /// producer with it. Transitions: idle → ports_bound.
    ///
    /// Any failure is fatal: the source is closed and the session stops.
    pub fn bind_callback<S: CallbackSource + 'static>(&mut self, source: S) -> Result<(), CaptureError> {
        self.expect_state(CaptureState::Idle, "bind a source")?;

        let mut source: Box<dyn CallbackSource> = Box::new(source);
        match self.prepare_callback(source.as_mut()) {
            Ok(reader) => {
                self.binding = Binding::Callback {
                    source,
                    reader: Some(reader),
                };
                self.status.transition(CaptureState::PortsBound);
                Ok(())
            }
            Err(err) => {
                close_source(source.as_mut());
                Err(self.fail(err))
            }
        }
    }

    /// Open a polled source. Transitions: idle → ports_bound.
    pub fn bind_poll<S: PollSource + 'static>(&mut self, source: S) -> Result<(), CaptureError> {
        self.expect_state(CaptureState::Idle, "bind a source")?;

        let mut source: Box<dyn PollSource> = Box::new(source);
        let opened = source
            .open(&self.config)
            .and_then(|()| self.check_format(source.as_ref()));
        match opened {
            Ok(()) => {
                self.binding = Binding::Poll {
                    source: Some(source),
                };
                self.status.transition(CaptureState::PortsBound);
                Ok(())
            }
            Err(err) => {
                close_source(source.as_mut());
                Err(self.fail(err))
            }
        }
    }

    /// Connect source ports, open the producer gate and start the consumer
    /// thread, gated until [`arm`](Self::arm). Transitions: ports_bound → capturing.
    ///
    /// `on_window` runs on the consumer thread with each full window.
    pub fn start<F>(&mut self, on_window: F) -> Result<(), CaptureError>
    where
        F: FnMut(&mut [f32]) + Send + 'static,
    {
        self.expect_state(CaptureState::PortsBound, "start capture")?;

        let connected = match &mut self.binding {
            Binding::Callback { source, .. } => source.connect_ports(&self.config.source_ports),
            _ => Ok(()),
        };
        if let Err(err) = connected {
            return Err(self.fail(err));
        }
        self.gates.set_can_process(true);

        let input = match &mut self.binding {
            Binding::Callback { reader, .. } => reader.take().map(ConsumerInput::Queue),
            Binding::Poll { source } => source.take().map(ConsumerInput::Poll),
            Binding::Unbound | Binding::Released => None,
        };
        let Some(input) = input else {
            return Err(self.fail(CaptureError::invalid_state("no capture source bound")));
        };

        let accumulator = WindowAccumulator::from_config(&self.config, Box::new(on_window));
        let context = ConsumerContext {
            gates: Arc::clone(&self.gates),
            coordinator: Arc::clone(&self.coordinator),
            counters: Arc::clone(&self.counters),
            status: Arc::clone(&self.status),
            bytes_per_frame: self.config.bytes_per_frame(),
            duration_limit: self.config.duration_limit(),
            wake_timeout: self.config.wake_timeout(),
            poll_interval: self.config.poll_interval(),
            flush_policy: self.config.flush_policy,
        };

        self.started = Some((Utc::now(), Instant::now()));
        self.status.transition(CaptureState::Capturing);
        match ConsumerHandle::spawn(context, input, accumulator) {
            Ok(handle) => {
                self.consumer = Some(handle);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Let the consumer start draining.
    pub fn arm(&self) -> Result<(), CaptureError> {
        self.expect_state(CaptureState::Capturing, "arm capture")?;
        self.gates.set_can_capture(true);
        self.coordinator.notify_blocking();
        log::info!("Capture armed (session {})", self.id);
        Ok(())
    }

    /// Arm and block until capture ends on its own or is stopped through a
    /// [`StopHandle`].
    pub fn run(&mut self) -> Result<CaptureReport, CaptureError> {
        self.arm()?;
        self.wait()
    }

    /// Block until the consumer exits, then release the source.
    ///
    /// With no duration limit this returns only after a [`StopHandle`]
    /// request or a source failure.
    pub fn wait(&mut self) -> Result<CaptureReport, CaptureError> {
        if self.consumer.is_none() {
            return self
                .report
                .clone()
                .ok_or_else(|| CaptureError::invalid_state("capture was not started"));
        }
        self.collect(None)
    }

    /// Stop capture and release the source.
    ///
    /// Waits up to `shutdown_timeout_ms` for the consumer. On
    /// [`CaptureError::ShutdownTimeout`] the device and queue stay allocated
    /// and `stop` may be called again. A session that was never started is
    /// released and reported as [`CaptureError::InvalidState`].
    pub fn stop(&mut self) -> Result<CaptureReport, CaptureError> {
        if self.consumer.is_none() {
            if let Some(report) = &self.report {
                return Ok(report.clone());
            }
            let state = self.state();
            self.release();
            return Err(CaptureError::invalid_state(format!(
                "capture was not started (state: {:?})",
                state
            )));
        }

        let timeout = self.config.shutdown_timeout();
        let deadline = Instant::now() + timeout;
        self.gates.request_shutdown();
        self.coordinator.notify_within(timeout);
        self.status.transition(CaptureState::Draining);
        self.collect(Some((deadline, timeout)))
    }

    // --- Internal helpers ---

    fn expect_state(&self, expected: CaptureState, action: &str) -> Result<(), CaptureError> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(CaptureError::invalid_state(format!(
                "cannot {} while {:?}",
                action, state
            )))
        }
    }

    fn prepare_callback(&mut self, source: &mut dyn CallbackSource) -> Result<QueueReader, CaptureError> {
        source.open(&self.config)?;
        self.check_format(&*source)?;

        let (writer, reader) = BoundedByteQueue::for_frames(
            self.config.queue_capacity_frames,
            self.config.bytes_per_frame(),
        )?
        .split();
        let producer = FrameProducer::new(
            writer,
            Arc::clone(&self.coordinator),
            Arc::clone(&self.gates),
            Arc::clone(&self.counters),
            self.config.channel_count,
            self.config.sample_format,
        );
        source.register(producer)?;
        source.activate()?;
        Ok(reader)
    }

    fn check_format<S: CaptureSource + ?Sized>(&mut self, source: &S) -> Result<(), CaptureError> {
        let info = source.device_info();
        if source.channel_count() != self.config.channel_count {
            return Err(CaptureError::config(format!(
                "{} delivers {} channels, configured for {}",
                info.name,
                source.channel_count(),
                self.config.channel_count
            )));
        }
        if source.sample_format() != self.config.sample_format {
            return Err(CaptureError::config(format!(
                "{} delivers {:?} samples, configured for {:?}",
                info.name,
                source.sample_format(),
                self.config.sample_format
            )));
        }

        self.device_rate = source.sample_rate();
        if self.device_rate != self.config.sample_rate {
            log::warn!(
                "{} runs at {} Hz (requested {} Hz); using the device rate",
                info.name,
                self.device_rate,
                self.config.sample_rate
            );
        }
        log::info!(
            "Bound {} ({} Hz, {} ch, {:?})",
            info.name,
            self.device_rate,
            self.config.channel_count,
            self.config.sample_format
        );
        Ok(())
    }

    fn collect(&mut self, limit: Option<(Instant, Duration)>) -> Result<CaptureReport, CaptureError> {
        let Some(handle) = self.consumer.as_mut() else {
            return Err(CaptureError::invalid_state("capture was not started"));
        };

        match handle.join(limit.map(|(deadline, _)| deadline)) {
            Ok(Some(outcome)) => {
                self.consumer = None;
                self.finish(outcome)
            }
            Ok(None) => {
                let err = CaptureError::ShutdownTimeout(limit.map_or(Duration::ZERO, |(_, timeout)| timeout));
                log::error!("{}; device and queue left allocated", err);
                if let Some(delegate) = self.status.delegate() {
                    delegate.on_error(&err);
                }
                Err(err)
            }
            Err(err) => {
                self.consumer = None;
                Err(self.fail(err))
            }
        }
    }

    fn finish(&mut self, outcome: ConsumerOutcome) -> Result<CaptureReport, CaptureError> {
        let mode = match outcome.input {
            ConsumerInput::Queue(_) => CaptureMode::Callback,
            ConsumerInput::Poll(source) => {
                if let Binding::Poll { source: slot } = &mut self.binding {
                    *slot = Some(source);
                }
                CaptureMode::Poll
            }
        };
        self.release();

        let (started_at, duration_secs) = match self.started {
            Some((at, instant)) => (at.to_rfc3339(), instant.elapsed().as_secs_f64()),
            None => (String::new(), 0.0),
        };
        let report = CaptureReport {
            session_id: self.id.clone(),
            started_at,
            mode,
            sample_rate: self.device_rate,
            channel_count: self.config.channel_count,
            frames_captured: outcome.stats.frames_pushed,
            windows_delivered: outcome.stats.windows_delivered,
            samples_delivered: outcome.stats.samples_delivered,
            final_window: outcome.final_window,
            overruns: self.overruns(),
            queue_capacity_frames: self.config.queue_capacity_frames,
            stop_reason: outcome.reason,
            duration_secs,
            diagnostics: self.diagnostics(),
        };

        if report.is_degraded() {
            log::warn!(
                "Capture finished with {} overruns; audio quality may be degraded. \
                 Try a larger queue_capacity_frames (currently {}).",
                report.overruns,
                report.queue_capacity_frames
            );
        }
        log::info!(
            "Capture finished: {} frames, {} windows, {:?}",
            report.frames_captured,
            report.windows_delivered,
            report.stop_reason
        );

        self.report = Some(report.clone());
        let delegate = self.status.delegate();
        if let (Some(delegate), Some(err)) = (&delegate, &outcome.failure) {
            delegate.on_error(err);
        }
        if let Some(delegate) = &delegate {
            delegate.on_capture_finished(&report);
        }

        match outcome.failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Release resources after a fatal error and report it.
    fn fail(&mut self, err: CaptureError) -> CaptureError {
        log::error!("Capture session failed: {}", err);
        self.release();
        if let Some(delegate) = self.status.delegate() {
            delegate.on_error(&err);
        }
        err
    }

    /// Close the source and free the queue. Idempotent.
    fn release(&mut self) {
        self.gates.close_all();
        match std::mem::replace(&mut self.binding, Binding::Released) {
            Binding::Callback { mut source, reader } => {
                close_source(source.as_mut());
                drop(reader);
            }
            Binding::Poll {
                source: Some(mut source),
            } => close_source(source.as_mut()),
            Binding::Poll { source: None } | Binding::Unbound | Binding::Released => {}
        }
        self.status.transition(CaptureState::Stopped);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(mut handle) = self.consumer.take() {
            self.stop_handle().request_stop();
            match handle.join(Some(Instant::now() + self.config.wake_timeout())) {
                Ok(Some(outcome)) => {
                    if let (ConsumerInput::Poll(source), Binding::Poll { source: slot }) =
                        (outcome.input, &mut self.binding)
                    {
                        *slot = Some(source);
                    }
                }
                Ok(None) => log::warn!("Dropping capture session without joining its consumer thread"),
                Err(err) => log::warn!("Consumer thread failed during drop: {}", err),
            }
        }
        self.release();
    }
}

fn close_source<S: CaptureSource + ?Sized>(source: &mut S) {
    if let Err(err) = source.close() {
        log::warn!("Failed to close {}: {}", source.device_info().name, err);
    }
}
