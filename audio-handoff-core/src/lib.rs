//! # audio-handoff-core
//!
//! Platform-agnostic core for handing audio from a real-time driver thread
//! to a worker thread that delivers fixed-size sample windows.
//!
//! Provides the bounded SPSC byte queue, the non-blocking wake-up
//! coordinator, window accumulation and the capture session lifecycle.
//! Platform backends (Windows WASAPI) implement the `CallbackSource` or
//! `PollSource` trait and plug into `CaptureSession`.
//!
//! ## Architecture
//!
//! ```text
//! audio-handoff-core (this crate)
//! ├── traits/       ← CaptureSource, CallbackSource, PollSource, CaptureDelegate
//! ├── models/       ← CaptureError, CaptureState, CaptureConfiguration, CaptureReport, etc.
//! ├── processing/   ← BoundedByteQueue, HandoffCoordinator, WindowAccumulator
//! └── session/      ← FrameProducer (real-time side), consumer thread, CaptureSession
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::capture_report::{CaptureMode, CaptureQuality, CaptureReport, FinalWindow, StopReason};
pub use models::config::{CaptureConfiguration, ChannelReduction, FlushPolicy, MAX_CHANNELS};
pub use models::diagnostics::HandoffDiagnostics;
pub use models::error::CaptureError;
pub use models::sample_format::{PcmSample, SampleFormat};
pub use models::state::CaptureState;
pub use processing::accumulator::{AccumulatorStats, WindowAccumulator, WindowCallback};
pub use processing::byte_queue::{BoundedByteQueue, QueueReader, QueueWriter};
pub use processing::handoff::{ConsumerLock, HandoffCoordinator, HandoffStats, WakeReason};
pub use session::capture_session::{CaptureSession, StopHandle};
pub use session::producer::FrameProducer;
pub use traits::capture_delegate::CaptureDelegate;
pub use traits::capture_source::{CallbackSource, CaptureSource, PollSource, SourceInfo};
