use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while setting up, running, or tearing down a capture session.
///
/// Queue overruns are deliberately absent: they are counted, not raised, and
/// surface through [`CaptureReport::quality`](crate::CaptureReport::quality).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Opening the device, registering a port, or connecting a source port failed.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The consumer asked the queue for more bytes than it holds.
    #[error("queue underrun: requested {requested} bytes but only {available} available")]
    Underrun { requested: usize, available: usize },

    /// The consumer thread did not exit in time; resources were left allocated.
    #[error("consumer thread did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A capture source failed after capture had started.
    #[error("capture source failed: {0}")]
    SourceFailed(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CaptureError {
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceUnavailable(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigurationFailed(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }
}
