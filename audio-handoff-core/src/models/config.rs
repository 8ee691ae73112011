use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;
use super::sample_format::SampleFormat;

/// Upper bound on channels per frame. Frames are assembled on the stack of the
/// real-time thread, so this keeps that scratch space fixed.
pub const MAX_CHANNELS: u16 = 32;

/// Optional channel reduction applied to each frame before it is accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelReduction {
    /// Keep every channel, interleaved in channel order.
    #[default]
    Interleaved,
    /// Average all channels of a frame into one sample.
    MixToMono,
    /// Keep only the given channel index.
    Select(u16),
}

impl ChannelReduction {
    /// Samples appended to the window per frame of `channels` channels.
    pub fn samples_per_frame(self, channels: u16) -> usize {
        match self {
            Self::Interleaved => channels as usize,
            Self::MixToMono | Self::Select(_) => 1,
        }
    }
}

/// What happens to a partially filled window when capture ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Hand the short window to the callback one last time.
    #[default]
    DeliverPartial,
    /// Drop the short window. The drop is still recorded in the report.
    Discard,
}

/// Configuration for a capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfiguration {
    /// Device to open by name or id, or None for the system default.
    pub device_name: Option<String>,

    /// Name the session registers under with callback-driven audio servers.
    pub client_name: String,

    /// Requested sample rate in Hz (default: 44100). The opened device's rate wins.
    pub sample_rate: u32,

    /// Channels per frame (default: 1).
    pub channel_count: u16,

    /// Encoding of raw device bytes (default: native f32).
    pub sample_format: SampleFormat,

    /// Samples per window callback invocation (default: 1024).
    pub window_size: usize,

    /// Ring buffer depth in frames (default: 16384).
    pub queue_capacity_frames: usize,

    /// Frames to capture before stopping on its own; 0 means unbounded.
    pub duration_frames: u64,

    pub channel_reduction: ChannelReduction,

    pub flush_policy: FlushPolicy,

    /// Source ports connected to the session's inputs, one per channel.
    /// Empty leaves routing to the source. Callback mode only.
    pub source_ports: Vec<String>,

    /// Sleep between polls in poll mode (default: 10 ms).
    pub poll_interval_ms: u64,

    /// Upper bound on how long an idle consumer waits before re-checking the queue.
    pub wake_timeout_ms: u64,

    /// How long `stop()` waits for the consumer thread to exit (default: 2 s).
    pub shutdown_timeout_ms: u64,
}

impl CaptureConfiguration {
    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaptureError::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Set `duration_frames` from seconds at the configured sample rate.
    pub fn with_duration_secs(mut self, secs: f64) -> Self {
        self.duration_frames = (secs.max(0.0) * self.sample_rate as f64).round() as u64;
        self
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate == 0 {
            return Err(CaptureError::config("sample rate must be positive"));
        }
        if self.channel_count == 0 || self.channel_count > MAX_CHANNELS {
            return Err(CaptureError::config(format!(
                "unsupported channel count: {} (1..={})",
                self.channel_count, MAX_CHANNELS
            )));
        }
        if self.window_size == 0 {
            return Err(CaptureError::config("window size must be positive"));
        }
        if self.queue_capacity_frames == 0 {
            return Err(CaptureError::config("queue capacity must be at least one frame"));
        }
        if self.poll_interval_ms == 0 {
            return Err(CaptureError::config("poll interval must be positive"));
        }
        if let ChannelReduction::Select(channel) = self.channel_reduction {
            if channel >= self.channel_count {
                return Err(CaptureError::config(format!(
                    "selected channel {} out of range for {} channels",
                    channel, self.channel_count
                )));
            }
        }
        if !self.source_ports.is_empty() && self.source_ports.len() != self.channel_count as usize {
            return Err(CaptureError::config(format!(
                "{} source ports given for {} channels",
                self.source_ports.len(),
                self.channel_count
            )));
        }
        Ok(())
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channel_count as usize * self.sample_format.bytes_per_sample()
    }

    /// The frame limit, or None when unbounded.
    pub fn duration_limit(&self) -> Option<u64> {
        (self.duration_frames > 0).then_some(self.duration_frames)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wake_timeout(&self) -> Duration {
        Duration::from_millis(self.wake_timeout_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            device_name: None,
            client_name: "audio-handoff".into(),
            sample_rate: 44100,
            channel_count: 1,
            sample_format: SampleFormat::F32,
            window_size: 1024,
            queue_capacity_frames: 16384,
            duration_frames: 0,
            channel_reduction: ChannelReduction::Interleaved,
            flush_policy: FlushPolicy::DeliverPartial,
            source_ports: Vec::new(),
            poll_interval_ms: 10,
            wake_timeout_ms: 50,
            shutdown_timeout_ms: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CaptureConfiguration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_size, 1024);
        assert_eq!(config.queue_capacity_frames, 16384);
        assert_eq!(config.channel_count, 1);
        assert_eq!(config.duration_limit(), None);
        assert_eq!(config.bytes_per_frame(), 4);
    }

    #[test]
    fn rejects_zero_window() {
        let config = CaptureConfiguration {
            window_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CaptureError::ConfigurationFailed(_))));
    }

    #[test]
    fn rejects_too_many_channels() {
        let config = CaptureConfiguration {
            channel_count: MAX_CHANNELS + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_selected_channel_out_of_range() {
        let config = CaptureConfiguration {
            channel_count: 2,
            channel_reduction: ChannelReduction::Select(2),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_port_count_mismatch() {
        let config = CaptureConfiguration {
            channel_count: 2,
            source_ports: vec!["system:capture_1".into()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn duration_from_seconds() {
        let config = CaptureConfiguration {
            sample_rate: 48000,
            ..Default::default()
        }
        .with_duration_secs(1.5);
        assert_eq!(config.duration_frames, 72000);
        assert_eq!(config.duration_limit(), Some(72000));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = CaptureConfiguration::from_json(
            r#"{ "window_size": 256, "channel_count": 2, "sample_format": "i16",
                 "channel_reduction": "mix_to_mono" }"#,
        )
        .unwrap();

        assert_eq!(config.window_size, 256);
        assert_eq!(config.channel_count, 2);
        assert_eq!(config.sample_format, SampleFormat::I16);
        assert_eq!(config.channel_reduction, ChannelReduction::MixToMono);
        assert_eq!(config.queue_capacity_frames, 16384);
        assert_eq!(config.bytes_per_frame(), 4);
    }

    #[test]
    fn json_select_channel() {
        let config = CaptureConfiguration::from_json(
            r#"{ "channel_count": 4, "channel_reduction": { "select": 3 } }"#,
        )
        .unwrap();
        assert_eq!(config.channel_reduction, ChannelReduction::Select(3));
        assert_eq!(config.channel_reduction.samples_per_frame(4), 1);
    }

    #[test]
    fn json_invalid_is_configuration_error() {
        let err = CaptureConfiguration::from_json(r#"{ "window_size": 0 }"#).unwrap_err();
        assert!(matches!(err, CaptureError::ConfigurationFailed(_)));
    }
}
