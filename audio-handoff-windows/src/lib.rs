//! # audio-handoff-windows
//!
//! Windows WASAPI capture sources for audio-handoff.
//!
//! Provides:
//! - `WasapiEventSource`: callback mode, driven by the endpoint's buffer-ready event
//! - `WasapiPollSource`: poll mode, drained by the session's consumer thread
//! - `DeviceEnumerator`: capture endpoint enumeration via the MMDevice API
//!
//! Both sources deliver shared-mode Float32 at the endpoint's mix rate.
//!
//! ## Usage
//! ```ignore
//! use audio_handoff_core::{CaptureConfiguration, CaptureSession};
//! use audio_handoff_windows::WasapiEventSource;
//!
//! let mut session = CaptureSession::new(CaptureConfiguration::default())?;
//! session.bind_callback(WasapiEventSource::new())?;
//! session.start(|window: &mut [f32]| println!("{} samples", window.len()))?;
//! let report = session.run()?;
//! ```

#[cfg(any(target_os = "windows", test))]
mod backlog;
#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod error;
#[cfg(target_os = "windows")]
mod stream;
#[cfg(target_os = "windows")]
pub mod wasapi_event;
#[cfg(target_os = "windows")]
pub mod wasapi_poll;

#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use error::WasapiError;
#[cfg(target_os = "windows")]
pub use wasapi_event::WasapiEventSource;
#[cfg(target_os = "windows")]
pub use wasapi_poll::WasapiPollSource;
