//! The real-time side of the hand-off.
//!
//! Everything reachable from `FrameProducer::push_*` is bounded: no locks
//! that can block, no allocation, no logging. Frames are assembled in a
//! fixed stack buffer and either stored whole or dropped whole.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::models::config::MAX_CHANNELS;
use crate::models::sample_format::{PcmSample, SampleFormat};
use crate::processing::byte_queue::QueueWriter;
use crate::processing::handoff::HandoffCoordinator;

const MAX_FRAME_BYTES: usize = MAX_CHANNELS as usize * 4;

/// Flags shared by the producer, the consumer, and the session.
#[derive(Debug, Default)]
pub(crate) struct CaptureGates {
    can_process: AtomicBool,
    can_capture: AtomicBool,
    shutdown: AtomicBool,
    device_lost: AtomicBool,
}

impl CaptureGates {
    pub(crate) fn set_can_process(&self, value: bool) {
        self.can_process.store(value, Ordering::Release);
    }

    pub(crate) fn set_can_capture(&self, value: bool) {
        self.can_capture.store(value, Ordering::Release);
    }

    pub(crate) fn can_capture(&self) -> bool {
        self.can_capture.load(Ordering::Acquire)
    }

    /// Both gates open: the producer may touch the queue.
    pub(crate) fn is_open(&self) -> bool {
        self.can_process.load(Ordering::Acquire) && self.can_capture.load(Ordering::Acquire)
    }

    pub(crate) fn request_shutdown(&self) {
        self.can_capture.store(false, Ordering::Release);
        self.shutdown.store(true, Ordering::Release);
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn mark_device_lost(&self) {
        self.device_lost.store(true, Ordering::Release);
    }

    pub(crate) fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::Acquire)
    }

    pub(crate) fn close_all(&self) {
        self.can_process.store(false, Ordering::Release);
        self.can_capture.store(false, Ordering::Release);
    }
}

/// Producer-side counters.
#[derive(Debug, Default)]
pub(crate) struct ProducerCounters {
    pub(crate) cycles: AtomicU64,
    pub(crate) frames_enqueued: AtomicU64,
    pub(crate) overruns: AtomicU64,
}

/// Handed to a [`CallbackSource`](crate::CallbackSource); the driver calls one
/// of the `push_*` methods once per period with the buffer it just received.
pub struct FrameProducer {
    writer: QueueWriter,
    coordinator: Arc<HandoffCoordinator>,
    gates: Arc<CaptureGates>,
    counters: Arc<ProducerCounters>,
    channels: usize,
    format: SampleFormat,
    bytes_per_frame: usize,
}

impl FrameProducer {
    pub(crate) fn new(
        writer: QueueWriter,
        coordinator: Arc<HandoffCoordinator>,
        gates: Arc<CaptureGates>,
        counters: Arc<ProducerCounters>,
        channels: u16,
        format: SampleFormat,
    ) -> Self {
        let channels = channels.clamp(1, MAX_CHANNELS) as usize;
        Self {
            writer,
            coordinator,
            gates,
            counters,
            channels,
            format,
            bytes_per_frame: channels * format.bytes_per_sample(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.format
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    /// Whether pushed data is currently being kept.
    pub fn is_open(&self) -> bool {
        self.gates.is_open()
    }

    /// Enqueue interleaved raw bytes in the session's sample format.
    ///
    /// Returns the number of frames stored. Trailing bytes that do not form a
    /// whole frame are ignored.
    pub fn push_interleaved(&mut self, bytes: &[u8]) -> usize {
        if !self.gates.is_open() {
            return 0;
        }
        let stored = self.enqueue_interleaved(bytes);
        self.finish_cycle();
        stored
    }

    /// Like [`push_interleaved`](Self::push_interleaved) but without ending
    /// the cycle, for drivers that hand over several packets per invocation.
    /// Call [`finish_cycle`](Self::finish_cycle) once after the last packet.
    pub fn enqueue_interleaved(&mut self, bytes: &[u8]) -> usize {
        if !self.gates.is_open() {
            return 0;
        }
        let mut stored = 0;
        for frame in bytes.chunks_exact(self.bytes_per_frame) {
            if self.enqueue_frame(frame) {
                stored += 1;
            }
        }
        stored
    }

    /// Enqueue interleaved typed samples. `S` must match the session's format.
    pub fn push_samples<S: PcmSample>(&mut self, interleaved: &[S]) -> usize {
        if !self.gates.is_open() {
            return 0;
        }
        debug_assert_eq!(S::FORMAT, self.format);
        if S::FORMAT != self.format {
            return 0;
        }
        let width = self.format.bytes_per_sample();
        let mut scratch = [0u8; MAX_FRAME_BYTES];
        let mut stored = 0;
        for samples in interleaved.chunks_exact(self.channels) {
            let frame = &mut scratch[..self.bytes_per_frame];
            for (sample, out) in samples.iter().zip(frame.chunks_exact_mut(width)) {
                sample.write_ne(out);
            }
            if self.enqueue_frame(&scratch[..self.bytes_per_frame]) {
                stored += 1;
            }
        }
        self.finish_cycle();
        stored
    }

    /// Interleave one buffer per channel, frame by frame, channel 0 first.
    ///
    /// `planes.len()` must equal the channel count. Frames beyond the
    /// shortest plane are ignored.
    pub fn push_planar<S: PcmSample>(&mut self, planes: &[&[S]]) -> usize {
        if !self.gates.is_open() {
            return 0;
        }
        debug_assert_eq!(planes.len(), self.channels);
        debug_assert_eq!(S::FORMAT, self.format);
        if planes.len() != self.channels || S::FORMAT != self.format {
            return 0;
        }
        let frames = planes.iter().map(|p| p.len()).min().unwrap_or(0);
        let width = self.format.bytes_per_sample();
        let mut scratch = [0u8; MAX_FRAME_BYTES];
        let mut stored = 0;
        for i in 0..frames {
            let frame = &mut scratch[..self.bytes_per_frame];
            for (plane, out) in planes.iter().zip(frame.chunks_exact_mut(width)) {
                plane[i].write_ne(out);
            }
            if self.enqueue_frame(&scratch[..self.bytes_per_frame]) {
                stored += 1;
            }
        }
        self.finish_cycle();
        stored
    }

    /// Tell the session the device went away. Safe to call from any thread.
    pub fn report_device_lost(&self) {
        self.gates.mark_device_lost();
        self.coordinator.try_notify();
    }

    /// Store one frame whole, or count it as an overrun.
    fn enqueue_frame(&mut self, frame: &[u8]) -> bool {
        if self.writer.available_to_write() < frame.len() {
            self.counters.overruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let written = self.writer.write(frame);
        debug_assert_eq!(written, frame.len());
        self.counters.frames_enqueued.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// End a driver invocation: one wake-up attempt, however many frames
    /// were stored. The `push_*` methods call this themselves.
    pub fn finish_cycle(&self) {
        if !self.gates.is_open() {
            return;
        }
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        self.coordinator.try_notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::byte_queue::{BoundedByteQueue, QueueReader};

    fn producer(frames: usize, channels: u16, format: SampleFormat) -> (FrameProducer, QueueReader, Arc<CaptureGates>, Arc<ProducerCounters>) {
        let bytes_per_frame = channels as usize * format.bytes_per_sample();
        let (writer, reader) = BoundedByteQueue::for_frames(frames, bytes_per_frame)
            .unwrap()
            .split();
        let gates = Arc::new(CaptureGates::default());
        let counters = Arc::new(ProducerCounters::default());
        let producer = FrameProducer::new(
            writer,
            Arc::new(HandoffCoordinator::new()),
            Arc::clone(&gates),
            Arc::clone(&counters),
            channels,
            format,
        );
        (producer, reader, gates, counters)
    }

    fn open(gates: &CaptureGates) {
        gates.set_can_process(true);
        gates.set_can_capture(true);
    }

    fn read_f32_frame(reader: &mut QueueReader, channels: usize) -> Vec<f32> {
        let mut bytes = vec![0u8; channels * 4];
        reader.read(&mut bytes).unwrap();
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn gated_producer_drops_silently() {
        let (mut producer, reader, gates, counters) = producer(8, 1, SampleFormat::F32);

        assert_eq!(producer.push_samples(&[0.1f32, 0.2]), 0);
        gates.set_can_process(true);
        assert_eq!(producer.push_samples(&[0.1f32, 0.2]), 0);

        assert_eq!(reader.available_to_read(), 0);
        assert_eq!(counters.overruns.load(Ordering::Relaxed), 0);
        assert_eq!(counters.cycles.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn full_queue_counts_one_overrun_per_frame_and_keeps_oldest() {
        let (mut producer, mut reader, gates, counters) = producer(2, 1, SampleFormat::F32);
        open(&gates);

        for sample in [0.1f32, 0.2, 0.3, 0.4, 0.5] {
            producer.push_samples(&[sample]);
        }

        assert_eq!(counters.overruns.load(Ordering::Relaxed), 3);
        assert_eq!(counters.frames_enqueued.load(Ordering::Relaxed), 2);
        assert_eq!(counters.cycles.load(Ordering::Relaxed), 5);
        assert_eq!(reader.available_to_read(), 8);
        assert_eq!(read_f32_frame(&mut reader, 1), vec![0.1]);
        assert_eq!(read_f32_frame(&mut reader, 1), vec![0.2]);
    }

    #[test]
    fn never_stores_partial_frames() {
        let (mut producer, reader, gates, counters) = producer(3, 2, SampleFormat::F32);
        open(&gates);

        // Five stereo frames into a three-frame queue in one period.
        let stored = producer.push_samples(&[0.0f32; 10]);

        assert_eq!(stored, 3);
        assert_eq!(counters.overruns.load(Ordering::Relaxed), 2);
        assert_eq!(reader.available_to_read() % producer.bytes_per_frame(), 0);
    }

    #[test]
    fn planar_buffers_are_interleaved_in_channel_order() {
        let (mut producer, mut reader, gates, _) = producer(8, 2, SampleFormat::F32);
        open(&gates);

        let left = [0.1f32, 0.2, 0.3];
        let right = [-0.1f32, -0.2, -0.3];
        assert_eq!(producer.push_planar(&[&left[..], &right[..]]), 3);

        assert_eq!(read_f32_frame(&mut reader, 2), vec![0.1, -0.1]);
        assert_eq!(read_f32_frame(&mut reader, 2), vec![0.2, -0.2]);
        assert_eq!(read_f32_frame(&mut reader, 2), vec![0.3, -0.3]);
    }

    #[test]
    fn raw_bytes_ignore_trailing_partial_frame() {
        let (mut producer, reader, gates, _) = producer(8, 1, SampleFormat::I16);
        open(&gates);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&100i16.to_ne_bytes());
        bytes.extend_from_slice(&200i16.to_ne_bytes());
        bytes.push(0xff);

        assert_eq!(producer.push_interleaved(&bytes), 2);
        assert_eq!(reader.available_to_read(), 4);
    }

    #[test]
    fn batched_packets_notify_once_per_cycle() {
        let (writer, _reader) = BoundedByteQueue::for_frames(16, 4).unwrap().split();
        let coordinator = Arc::new(HandoffCoordinator::new());
        let gates = Arc::new(CaptureGates::default());
        let counters = Arc::new(ProducerCounters::default());
        let mut producer = FrameProducer::new(
            writer,
            Arc::clone(&coordinator),
            Arc::clone(&gates),
            Arc::clone(&counters),
            1,
            SampleFormat::F32,
        );
        open(&gates);

        let packet: Vec<u8> = [0.1f32, 0.2].iter().flat_map(|s| s.to_ne_bytes()).collect();
        for _ in 0..3 {
            assert_eq!(producer.enqueue_interleaved(&packet), 2);
        }
        producer.finish_cycle();

        let stats = coordinator.stats();
        assert_eq!(counters.cycles.load(Ordering::Relaxed), 1);
        assert_eq!(counters.frames_enqueued.load(Ordering::Relaxed), 6);
        assert_eq!(stats.notifies_sent + stats.notifies_skipped, 1);
    }

    #[test]
    fn device_loss_is_flagged() {
        let (producer, _reader, gates, _) = producer(2, 1, SampleFormat::F32);
        producer.report_device_lost();
        assert!(gates.is_device_lost());
    }
}
