use serde::{Deserialize, Serialize};

/// Counters describing how the producer and consumer threads interacted.
///
/// Snapshotted from atomics, so fields may be mutually inconsistent by a
/// few counts while capture is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffDiagnostics {
    /// Producer invocations that passed the gates.
    pub producer_cycles: u64,
    /// Frames stored in the queue.
    pub frames_enqueued: u64,
    /// Frames dropped because the queue was full.
    pub overruns: u64,
    /// `try_notify` calls that took the lock and signalled.
    pub notifies_sent: u64,
    /// `try_notify` calls that found the consumer holding the lock.
    pub notifies_skipped: u64,
    /// Consumer waits ended by a signal.
    pub consumer_wakeups: u64,
    /// Consumer waits ended by the wake timeout.
    pub consumer_timeouts: u64,
}
