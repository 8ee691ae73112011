use serde::{Deserialize, Serialize};

use crate::models::capture_report::FinalWindow;
use crate::models::config::{CaptureConfiguration, ChannelReduction, FlushPolicy, MAX_CHANNELS};
use crate::models::sample_format::SampleFormat;

/// Downstream analysis callback.
///
/// Runs synchronously on the consumer thread with exactly `window_size`
/// samples (or the final short window). The slice is only borrowed for the
/// duration of the call.
pub type WindowCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Running totals for an accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorStats {
    pub frames_pushed: u64,
    pub windows_delivered: u64,
    pub samples_delivered: u64,
}

/// Decodes frames, applies channel reduction, and hands out fixed-size windows.
pub struct WindowAccumulator {
    window: Vec<f32>,
    window_size: usize,
    channels: usize,
    format: SampleFormat,
    reduction: ChannelReduction,
    callback: WindowCallback,
    stats: AccumulatorStats,
}

impl WindowAccumulator {
    pub fn new(
        window_size: usize,
        channels: u16,
        format: SampleFormat,
        reduction: ChannelReduction,
        callback: WindowCallback,
    ) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: Vec::with_capacity(window_size),
            window_size,
            channels: channels.clamp(1, MAX_CHANNELS) as usize,
            format,
            reduction,
            callback,
            stats: AccumulatorStats::default(),
        }
    }

    pub fn from_config(config: &CaptureConfiguration, callback: WindowCallback) -> Self {
        Self::new(
            config.window_size,
            config.channel_count,
            config.sample_format,
            config.channel_reduction,
            callback,
        )
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels * self.format.bytes_per_sample()
    }

    /// Decode one raw frame and accumulate it. Returns the number of windows
    /// delivered while doing so.
    pub fn push_frame(&mut self, frame: &[u8]) -> usize {
        debug_assert_eq!(frame.len(), self.bytes_per_frame());
        let width = self.format.bytes_per_sample();
        let mut decoded = [0.0f32; MAX_CHANNELS as usize];
        for (slot, raw) in decoded.iter_mut().zip(frame.chunks_exact(width)) {
            *slot = self.format.decode(raw);
        }
        let channels = self.channels;
        self.push_decoded(&decoded[..channels])
    }

    /// Accumulate one already-decoded frame of `channels` samples.
    pub fn push_decoded(&mut self, frame: &[f32]) -> usize {
        debug_assert_eq!(frame.len(), self.channels);
        self.stats.frames_pushed += 1;
        match self.reduction {
            ChannelReduction::Interleaved => frame.iter().map(|&s| self.append(s)).sum(),
            ChannelReduction::MixToMono => {
                let mixed = frame.iter().sum::<f32>() / frame.len().max(1) as f32;
                self.append(mixed)
            }
            ChannelReduction::Select(channel) => {
                let sample = frame.get(channel as usize).copied().unwrap_or(0.0);
                self.append(sample)
            }
        }
    }

    /// Samples waiting for the window to fill.
    pub fn pending(&self) -> usize {
        self.window.len()
    }

    /// Resolve the pending short window according to `policy`.
    pub fn flush(&mut self, policy: FlushPolicy) -> FinalWindow {
        let samples = self.window.len();
        if samples == 0 {
            return FinalWindow::Empty;
        }
        match policy {
            FlushPolicy::DeliverPartial => {
                self.deliver();
                FinalWindow::Delivered { samples }
            }
            FlushPolicy::Discard => {
                self.window.clear();
                FinalWindow::Discarded { samples }
            }
        }
    }

    pub fn stats(&self) -> AccumulatorStats {
        self.stats
    }

    fn append(&mut self, sample: f32) -> usize {
        self.window.push(sample);
        if self.window.len() >= self.window_size {
            self.deliver();
            1
        } else {
            0
        }
    }

    fn deliver(&mut self) {
        (self.callback)(self.window.as_mut_slice());
        self.stats.windows_delivered += 1;
        self.stats.samples_delivered += self.window.len() as u64;
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Windows = Arc<Mutex<Vec<Vec<f32>>>>;

    fn collector() -> (Windows, WindowCallback) {
        let windows: Windows = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&windows);
        let callback: WindowCallback = Box::new(move |window: &mut [f32]| {
            sink.lock().push(window.to_vec());
        });
        (windows, callback)
    }

    fn f32_frame(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    #[test]
    fn delivers_full_window_and_holds_remainder() {
        let (windows, callback) = collector();
        let mut acc = WindowAccumulator::new(
            4,
            1,
            SampleFormat::F32,
            ChannelReduction::Interleaved,
            callback,
        );

        for sample in [0.1f32, -0.2, 0.3, -0.4, 0.5] {
            acc.push_frame(&f32_frame(&[sample]));
        }

        let windows = windows.lock();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0], vec![0.1, -0.2, 0.3, -0.4]);
        assert_eq!(acc.pending(), 1);
        assert_eq!(acc.stats().frames_pushed, 5);
        assert_eq!(acc.stats().windows_delivered, 1);
    }

    #[test]
    fn interleaved_frames_straddle_windows_in_channel_order() {
        let (windows, callback) = collector();
        let mut acc = WindowAccumulator::new(
            3,
            2,
            SampleFormat::F32,
            ChannelReduction::Interleaved,
            callback,
        );

        acc.push_decoded(&[1.0, -1.0]);
        acc.push_decoded(&[0.5, -0.5]);
        acc.push_decoded(&[0.25, -0.25]);

        let windows = windows.lock();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0], vec![1.0, -1.0, 0.5]);
        assert_eq!(windows[1], vec![-0.5, 0.25, -0.25]);
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn mix_to_mono_averages_channels() {
        let (windows, callback) = collector();
        let mut acc = WindowAccumulator::new(
            2,
            2,
            SampleFormat::F32,
            ChannelReduction::MixToMono,
            callback,
        );

        acc.push_decoded(&[0.2, 0.4]);
        acc.push_decoded(&[-1.0, 0.0]);

        let windows = windows.lock();
        assert_eq!(windows.len(), 1);
        assert_abs_diff_eq!(windows[0][0], 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(windows[0][1], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn select_keeps_one_channel() {
        let (windows, callback) = collector();
        let mut acc = WindowAccumulator::new(
            2,
            3,
            SampleFormat::F32,
            ChannelReduction::Select(2),
            callback,
        );

        acc.push_decoded(&[0.1, 0.2, 0.3]);
        acc.push_decoded(&[0.4, 0.5, 0.6]);

        assert_eq!(windows.lock()[0], vec![0.3, 0.6]);
    }

    #[test]
    fn decodes_i16_frames() {
        let (windows, callback) = collector();
        let mut acc = WindowAccumulator::new(
            2,
            2,
            SampleFormat::I16,
            ChannelReduction::Interleaved,
            callback,
        );
        assert_eq!(acc.bytes_per_frame(), 4);

        let mut frame = Vec::new();
        frame.extend_from_slice(&i16::MAX.to_ne_bytes());
        frame.extend_from_slice(&0i16.to_ne_bytes());
        assert_eq!(acc.push_frame(&frame), 1);

        let windows = windows.lock();
        assert_abs_diff_eq!(windows[0][0], 1.0);
        assert_abs_diff_eq!(windows[0][1], 0.0);
    }

    #[test]
    fn flush_delivers_partial_window() {
        let (windows, callback) = collector();
        let mut acc = WindowAccumulator::new(
            4,
            1,
            SampleFormat::F32,
            ChannelReduction::Interleaved,
            callback,
        );
        acc.push_decoded(&[0.5]);

        assert_eq!(acc.flush(FlushPolicy::DeliverPartial), FinalWindow::Delivered { samples: 1 });
        assert_eq!(windows.lock().last(), Some(&vec![0.5]));
        assert_eq!(acc.flush(FlushPolicy::DeliverPartial), FinalWindow::Empty);
        assert_eq!(acc.stats().samples_delivered, 1);
    }

    #[test]
    fn flush_discard_drops_partial_window() {
        let (windows, callback) = collector();
        let mut acc = WindowAccumulator::new(
            4,
            1,
            SampleFormat::F32,
            ChannelReduction::Interleaved,
            callback,
        );
        acc.push_decoded(&[0.5]);
        acc.push_decoded(&[0.6]);

        assert_eq!(acc.flush(FlushPolicy::Discard), FinalWindow::Discarded { samples: 2 });
        assert!(windows.lock().is_empty());
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn callback_may_modify_window_in_place() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: WindowCallback = Box::new(move |window: &mut [f32]| {
            for sample in window.iter_mut() {
                *sample *= 2.0;
            }
            sink.lock().extend_from_slice(window);
        });
        let mut acc = WindowAccumulator::new(
            2,
            1,
            SampleFormat::F32,
            ChannelReduction::Interleaved,
            callback,
        );

        acc.push_decoded(&[0.1]);
        acc.push_decoded(&[0.2]);
        acc.push_decoded(&[0.3]);
        acc.push_decoded(&[0.4]);

        let seen = seen.lock();
        assert_abs_diff_eq!(seen[2], 0.6, epsilon = 1e-6);
        assert_eq!(seen.len(), 4);
    }
}
