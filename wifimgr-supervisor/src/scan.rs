//! Scan arbitration: one scan in flight, ever.
//!
//! The scan lock is a binary semaphore taken by whichever thread initiates a
//! scan (user scan, connect, reassociate) and released by the dispatcher
//! once it has consumed the results. The dispatcher itself never blocks on
//! it; its internal follow-up scans use `try_acquire`.

use std::sync::{Condvar, Mutex};

use wifimgr_core_lib::StaState;

use crate::events::ScanCallback;

/// Counted-to-one semaphore with release allowed from any thread.
#[derive(Debug, Default)]
pub(crate) struct ScanLock {
    held: Mutex<bool>,
    cv: Condvar,
}

impl ScanLock {
    /// Block until the lock is free, then take it.
    pub fn acquire(&self) {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.cv.wait(held).unwrap();
        }
        *held = true;
    }

    /// Take the lock only if it is free right now.
    pub fn try_acquire(&self) -> bool {
        let mut held = self.held.lock().unwrap();
        if *held {
            false
        } else {
            *held = true;
            true
        }
    }

    /// Release from any thread. Releasing a free lock is a no-op.
    pub fn release(&self) {
        let mut held = self.held.lock().unwrap();
        *held = false;
        self.cv.notify_one();
    }

    pub fn is_locked(&self) -> bool {
        *self.held.lock().unwrap()
    }

    /// Test helper: wait until the lock is released.
    #[cfg(test)]
    pub fn wait_released(&self, timeout: std::time::Duration) -> bool {
        let mut held = self.held.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while *held {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, result) = self.cv.wait_timeout(held, remaining).unwrap();
            held = guard;
            if result.timed_out() && *held {
                return false;
            }
        }
        true
    }
}

/// Dispatcher-side bookkeeping for the scan currently in flight.
pub(crate) struct ScanArbiter {
    /// Callback for a user scan; `None` while the connect pipeline scans
    pub user_callback: Option<ScanCallback>,
    /// STA state to restore after a user scan completes
    pub stashed_state: StaState,
    /// Callers blocked in `get_dtim_period` until the scan finishes
    pub dtim_waiters: Vec<oneshot::Sender<u8>>,
}

impl ScanArbiter {
    pub fn new() -> Self {
        Self {
            user_callback: None,
            stashed_state: StaState::Idle,
            dtim_waiters: Vec::new(),
        }
    }

    /// Answer every waiting DTIM query with the current value.
    pub fn flush_dtim_waiters(&mut self, dtim: u8) {
        for waiter in self.dtim_waiters.drain(..) {
            let _ = waiter.send(dtim);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_lock_counts_to_one() {
        let lock = ScanLock::default();
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
        lock.release();
        assert!(lock.try_acquire());
    }

    #[test]
    fn test_release_from_other_thread_unblocks() {
        let lock = Arc::new(ScanLock::default());
        lock.acquire();

        let unlocker = Arc::clone(&lock);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            unlocker.release();
        });

        let start = Instant::now();
        lock.acquire(); // blocks until the other thread releases
        assert!(start.elapsed() >= Duration::from_millis(10));
        t.join().unwrap();
        lock.release();
    }

    #[test]
    fn test_double_release_is_noop() {
        let lock = ScanLock::default();
        lock.release();
        lock.release();
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
    }
}
