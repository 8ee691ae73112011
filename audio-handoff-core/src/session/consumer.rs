//! The session-owned worker thread.
//!
//! In callback mode it drains whole frames from the queue while holding the
//! coordinator lock, waiting on the condition variable when the queue runs
//! dry. In poll mode it owns the source outright and alternates between
//! draining it and sleeping on the same condition variable, so a stop
//! request interrupts the poll interval.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::models::capture_report::{FinalWindow, StopReason};
use crate::models::config::FlushPolicy;
use crate::models::error::CaptureError;
use crate::models::state::CaptureState;
use crate::processing::accumulator::{AccumulatorStats, WindowAccumulator};
use crate::processing::byte_queue::QueueReader;
use crate::processing::handoff::{ConsumerLock, HandoffCoordinator};
use crate::traits::capture_source::PollSource;

use super::capture_session::SessionStatus;
use super::producer::{CaptureGates, ProducerCounters};

/// Frames copied out of a poll source per `drain` call.
const POLL_BATCH_FRAMES: usize = 1024;

pub(crate) struct ConsumerContext {
    pub(crate) gates: Arc<CaptureGates>,
    pub(crate) coordinator: Arc<HandoffCoordinator>,
    pub(crate) counters: Arc<ProducerCounters>,
    pub(crate) status: Arc<SessionStatus>,
    pub(crate) bytes_per_frame: usize,
    pub(crate) duration_limit: Option<u64>,
    pub(crate) wake_timeout: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) flush_policy: FlushPolicy,
}

impl ConsumerContext {
    fn reached_limit(&self, accumulator: &WindowAccumulator) -> bool {
        self.duration_limit
            .is_some_and(|limit| accumulator.stats().frames_pushed >= limit)
    }
}

/// Where the consumer reads frames from. Handed back in the outcome so the
/// session can release it.
pub(crate) enum ConsumerInput {
    Queue(QueueReader),
    Poll(Box<dyn PollSource>),
}

pub(crate) struct ConsumerOutcome {
    pub(crate) reason: StopReason,
    pub(crate) failure: Option<CaptureError>,
    pub(crate) stats: AccumulatorStats,
    pub(crate) final_window: FinalWindow,
    pub(crate) input: ConsumerInput,
}

pub(crate) struct ConsumerHandle {
    thread: Option<JoinHandle<()>>,
    outcome: Receiver<ConsumerOutcome>,
}

impl ConsumerHandle {
    pub(crate) fn spawn(
        context: ConsumerContext,
        input: ConsumerInput,
        accumulator: WindowAccumulator,
    ) -> Result<Self, CaptureError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let thread = thread::Builder::new()
            .name("audio-handoff-consumer".into())
            .spawn(move || {
                let outcome = run(context, input, accumulator);
                let _ = tx.send(outcome);
            })
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn consumer thread: {}", e)))?;

        Ok(Self {
            thread: Some(thread),
            outcome: rx,
        })
    }

    /// Wait for the consumer to finish, until `deadline` if one is given.
    ///
    /// `Ok(None)` means the deadline passed; the handle stays valid and the
    /// call may be repeated.
    pub(crate) fn join(&mut self, deadline: Option<Instant>) -> Result<Option<ConsumerOutcome>, CaptureError> {
        let received = match deadline {
            None => self.outcome.recv().ok(),
            Some(deadline) => match self.outcome.recv_deadline(deadline) {
                Ok(outcome) => Some(outcome),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => None,
            },
        };
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        match received {
            Some(outcome) => Ok(Some(outcome)),
            None => Err(CaptureError::Unknown("consumer thread exited without a result".into())),
        }
    }
}

fn run(context: ConsumerContext, mut input: ConsumerInput, mut accumulator: WindowAccumulator) -> ConsumerOutcome {
    log::debug!("Consumer thread started");

    let mut lock = context.coordinator.lock_consumer();
    let result = match &mut input {
        ConsumerInput::Queue(reader) => drain_queue(&context, &mut lock, reader, &mut accumulator),
        ConsumerInput::Poll(source) => drain_poll(&context, &mut lock, source.as_mut(), &mut accumulator),
    };

    context.gates.set_can_capture(false);
    context.status.transition(CaptureState::Draining);

    let final_window = accumulator.flush(context.flush_policy);
    match final_window {
        FinalWindow::Delivered { samples } => log::debug!("Delivered final short window of {} samples", samples),
        FinalWindow::Discarded { samples } => log::info!("Discarded final short window of {} samples", samples),
        FinalWindow::Empty => {}
    }
    drop(lock);

    let (reason, failure) = match result {
        Ok(reason) => (reason, None),
        Err(err) => {
            log::error!("Capture consumer failed: {}", err);
            (StopReason::SourceFailed, Some(err))
        }
    };
    log::debug!("Consumer thread exiting: {:?}", reason);

    ConsumerOutcome {
        reason,
        failure,
        stats: accumulator.stats(),
        final_window,
        input,
    }
}

fn device_lost() -> CaptureError {
    CaptureError::device("capture device was lost")
}

fn drain_queue(
    context: &ConsumerContext,
    lock: &mut ConsumerLock<'_>,
    reader: &mut QueueReader,
    accumulator: &mut WindowAccumulator,
) -> Result<StopReason, CaptureError> {
    let mut frame = vec![0u8; context.bytes_per_frame];
    loop {
        if context.gates.is_device_lost() {
            return Err(device_lost());
        }
        while context.gates.can_capture() && reader.available_to_read() >= frame.len() {
            reader.read(&mut frame)?;
            accumulator.push_frame(&frame);
            if context.reached_limit(accumulator) {
                return Ok(StopReason::DurationReached);
            }
        }
        if context.gates.is_shutdown() {
            return Ok(StopReason::Stopped);
        }
        lock.wait_for_data(context.wake_timeout);
    }
}

fn drain_poll(
    context: &ConsumerContext,
    lock: &mut ConsumerLock<'_>,
    source: &mut dyn PollSource,
    accumulator: &mut WindowAccumulator,
) -> Result<StopReason, CaptureError> {
    // Streaming starts once capture is armed.
    loop {
        if context.gates.is_device_lost() {
            return Err(device_lost());
        }
        if context.gates.is_shutdown() {
            return Ok(StopReason::Stopped);
        }
        if context.gates.can_capture() {
            break;
        }
        lock.wait_for_data(context.wake_timeout);
    }

    source.start()?;
    let result = poll_frames(context, lock, source, accumulator);
    if let Err(err) = source.stop() {
        log::warn!("Failed to stop {}: {}", source.device_info().name, err);
    }
    result
}

fn poll_frames(
    context: &ConsumerContext,
    lock: &mut ConsumerLock<'_>,
    source: &mut dyn PollSource,
    accumulator: &mut WindowAccumulator,
) -> Result<StopReason, CaptureError> {
    let bytes_per_frame = context.bytes_per_frame;
    let mut scratch = vec![0u8; bytes_per_frame * POLL_BATCH_FRAMES];
    loop {
        if context.gates.is_device_lost() {
            return Err(device_lost());
        }
        if context.gates.is_shutdown() {
            return Ok(StopReason::Stopped);
        }

        let available = source.poll()?;
        context
            .counters
            .overruns
            .store(source.overruns(), Ordering::Relaxed);
        if available > 0 {
            let mut wanted = available.min(POLL_BATCH_FRAMES);
            if let Some(limit) = context.duration_limit {
                let remaining = limit.saturating_sub(accumulator.stats().frames_pushed);
                wanted = wanted.min(usize::try_from(remaining).unwrap_or(usize::MAX));
            }
            let copied = source.drain(&mut scratch[..wanted * bytes_per_frame])?.min(wanted);
            for frame in scratch[..copied * bytes_per_frame].chunks_exact(bytes_per_frame) {
                if context.gates.is_shutdown() {
                    return Ok(StopReason::Stopped);
                }
                accumulator.push_frame(frame);
            }
            if context.reached_limit(accumulator) {
                return Ok(StopReason::DurationReached);
            }
            if copied > 0 {
                continue;
            }
        }
        lock.wait_for_data(context.poll_interval);
    }
}
