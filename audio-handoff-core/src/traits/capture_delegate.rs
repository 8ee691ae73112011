use crate::models::capture_report::CaptureReport;
use crate::models::error::CaptureError;
use crate::models::state::CaptureState;

/// Event delegate for capture session notifications.
///
/// Methods are called from whichever thread drives the transition: the
/// owning thread for setup and teardown, the consumer thread when capture
/// ends on its own. Never from the real-time thread.
pub trait CaptureDelegate: Send + Sync {
    /// Called when the session state changes.
    fn on_state_changed(&self, state: &CaptureState);

    /// Called when a fatal error ends capture.
    fn on_error(&self, error: &CaptureError);

    /// Called once the session is stopped and resources are released.
    fn on_capture_finished(&self, report: &CaptureReport);
}
