use serde::{Deserialize, Serialize};

/// Capture session state machine.
///
/// State transitions:
/// ```text
/// idle → ports_bound → capturing → draining → stopped
///   └────────┴─────────────┴──────────────────→ stopped   (startup failure / teardown)
/// ```
///
/// While `Capturing`, the consumer stays gated until the session is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    PortsBound,
    Capturing,
    Draining,
    Stopped,
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Whether the session may move from `self` to `next`.
    pub fn can_transition_to(&self, next: CaptureState) -> bool {
        use CaptureState::*;
        matches!(
            (self, next),
            (Idle, PortsBound)
                | (PortsBound, Capturing)
                | (Capturing, Draining)
                | (Draining, Stopped)
                | (Idle | PortsBound | Capturing, Stopped)
        )
    }
}
