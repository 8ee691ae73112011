use serde::{Deserialize, Serialize};

use super::diagnostics::HandoffDiagnostics;

/// Which capture path produced the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Callback,
    Poll,
}

/// Why the consumer left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `duration_frames` frames were captured.
    DurationReached,
    /// The session was stopped by its owner.
    Stopped,
    /// The source failed or the device went away.
    SourceFailed,
}

/// Fate of the partially filled window at the end of capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FinalWindow {
    Empty,
    Delivered { samples: usize },
    Discarded { samples: usize },
}

/// Overall capture quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureQuality {
    Clean,
    /// Every window that could be formed was delivered, but frames were dropped.
    Degraded { overruns: u64 },
}

/// Summary returned when a capture session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureReport {
    pub session_id: String,
    pub started_at: String,
    pub mode: CaptureMode,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub frames_captured: u64,
    pub windows_delivered: u64,
    pub samples_delivered: u64,
    pub final_window: FinalWindow,
    pub overruns: u64,
    pub queue_capacity_frames: usize,
    pub stop_reason: StopReason,
    pub duration_secs: f64,
    pub diagnostics: HandoffDiagnostics,
}

impl CaptureReport {
    pub fn quality(&self) -> CaptureQuality {
        if self.overruns > 0 {
            CaptureQuality::Degraded {
                overruns: self.overruns,
            }
        } else {
            CaptureQuality::Clean
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.quality(), CaptureQuality::Degraded { .. })
    }

    /// Captured audio length at the device sample rate.
    pub fn captured_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames_captured as f64 / self.sample_rate as f64
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
