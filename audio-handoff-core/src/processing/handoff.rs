//! Wake-up signalling between a non-blocking producer and a blocking consumer.
//!
//! The mutex guards no data. The consumer holds it for the whole drain pass
//! and releases it only while waiting on the condition variable, so a failed
//! `try_lock` on the producer side means the consumer is awake and will see
//! whatever was queued before it next waits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Why a consumer wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Signaled,
    TimedOut,
}

/// Snapshot of signalling counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoffStats {
    pub notifies_sent: u64,
    pub notifies_skipped: u64,
    pub wakeups: u64,
    pub timeouts: u64,
}

/// Mutex + condition variable pair with an asymmetric locking discipline.
#[derive(Debug, Default)]
pub struct HandoffCoordinator {
    lock: Mutex<()>,
    data_ready: Condvar,
    notifies_sent: AtomicU64,
    notifies_skipped: AtomicU64,
    wakeups: AtomicU64,
    timeouts: AtomicU64,
}

impl HandoffCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the consumer if it is waiting. Never blocks.
    ///
    /// Returns false when the consumer held the lock, i.e. it is mid-drain
    /// and does not need a signal.
    pub fn try_notify(&self) -> bool {
        match self.lock.try_lock() {
            Some(_guard) => {
                self.data_ready.notify_one();
                self.notifies_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => {
                self.notifies_skipped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Take the lock and wake every waiter. For control paths only, never the
    /// real-time thread.
    pub fn notify_blocking(&self) {
        let _guard = self.lock.lock();
        self.data_ready.notify_all();
    }

    /// Like [`notify_blocking`](Self::notify_blocking), but gives up after
    /// `timeout` if the consumer keeps the lock (e.g. a stuck callback).
    pub fn notify_within(&self, timeout: Duration) -> bool {
        match self.lock.try_lock_for(timeout) {
            Some(_guard) => {
                self.data_ready.notify_all();
                true
            }
            None => false,
        }
    }

    /// Acquire the consumer side of the lock.
    pub fn lock_consumer(&self) -> ConsumerLock<'_> {
        ConsumerLock {
            coordinator: self,
            guard: self.lock.lock(),
        }
    }

    pub fn stats(&self) -> HandoffStats {
        HandoffStats {
            notifies_sent: self.notifies_sent.load(Ordering::Relaxed),
            notifies_skipped: self.notifies_skipped.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// The consumer's hold on the coordinator lock.
pub struct ConsumerLock<'a> {
    coordinator: &'a HandoffCoordinator,
    guard: MutexGuard<'a, ()>,
}

impl ConsumerLock<'_> {
    /// Release the lock and wait for a signal or `timeout`, then re-acquire.
    ///
    /// Wake-ups may be spurious; callers re-check their gates and the queue.
    pub fn wait_for_data(&mut self, timeout: Duration) -> WakeReason {
        let result = self
            .coordinator
            .data_ready
            .wait_for(&mut self.guard, timeout);
        if result.timed_out() {
            self.coordinator.timeouts.fetch_add(1, Ordering::Relaxed);
            WakeReason::TimedOut
        } else {
            self.coordinator.wakeups.fetch_add(1, Ordering::Relaxed);
            WakeReason::Signaled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn try_notify_without_waiter_takes_lock() {
        let coordinator = HandoffCoordinator::new();
        assert!(coordinator.try_notify());
        assert_eq!(coordinator.stats().notifies_sent, 1);
    }

    #[test]
    fn try_notify_never_blocks_while_consumer_holds_lock() {
        let coordinator = Arc::new(HandoffCoordinator::new());
        let _held = coordinator.lock_consumer();

        let remote = Arc::clone(&coordinator);
        let started = Instant::now();
        let signalled = thread::spawn(move || remote.try_notify()).join().unwrap();

        assert!(!signalled);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(coordinator.stats().notifies_skipped, 1);
    }

    #[test]
    fn waiting_consumer_is_woken() {
        let coordinator = Arc::new(HandoffCoordinator::new());
        let locked = Arc::new(AtomicBool::new(false));

        let consumer = {
            let coordinator = Arc::clone(&coordinator);
            let locked = Arc::clone(&locked);
            thread::spawn(move || {
                let mut lock = coordinator.lock_consumer();
                locked.store(true, Ordering::SeqCst);
                lock.wait_for_data(Duration::from_secs(10))
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while !locked.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "consumer never took the lock");
            thread::yield_now();
        }
        // The consumer holds the lock until it is parked in wait_for_data, so
        // the first successful try_notify lands on a waiting consumer.
        while !coordinator.try_notify() {
            assert!(Instant::now() < deadline, "consumer never started waiting");
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(consumer.join().unwrap(), WakeReason::Signaled);
        assert_eq!(coordinator.stats().wakeups, 1);
    }

    #[test]
    fn notify_within_gives_up_on_held_lock() {
        let coordinator = Arc::new(HandoffCoordinator::new());
        let held = coordinator.lock_consumer();

        let remote = Arc::clone(&coordinator);
        let notified = thread::spawn(move || remote.notify_within(Duration::from_millis(5)))
            .join()
            .unwrap();
        assert!(!notified);

        drop(held);
        assert!(coordinator.notify_within(Duration::from_millis(5)));
    }

    #[test]
    fn wait_times_out_without_signal() {
        let coordinator = HandoffCoordinator::new();
        let mut lock = coordinator.lock_consumer();
        assert_eq!(lock.wait_for_data(Duration::from_millis(5)), WakeReason::TimedOut);
        drop(lock);
        assert_eq!(coordinator.stats().timeouts, 1);
    }
}
