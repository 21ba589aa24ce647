//! Counting synchronization primitives.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A counter that threads can block on until it drains to zero.
///
/// Unlike a one-shot latch, units may be added again after the count has
/// reached zero; each drain wakes whoever is waiting at that moment.
#[derive(Debug, Default)]
pub struct WaitGroup {
    count: Mutex<usize>,
    drained: Condvar,
}

impl WaitGroup {
    /// Creates a group with `count` outstanding units.
    #[must_use]
    pub const fn with_count(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            drained: Condvar::new(),
        }
    }

    /// Registers `n` more outstanding units.
    pub fn add(&self, n: usize) {
        *self.count.lock() += n;
    }

    /// Releases one unit and returns the remaining count.
    ///
    /// Releasing from an empty group is a bookkeeping bug; it is logged
    /// and the count stays at zero.
    pub fn done(&self) -> usize {
        let mut count = self.count.lock();
        if *count == 0 {
            tracing::error!("wait group released more units than were added");
            return 0;
        }
        *count -= 1;
        if *count == 0 {
            let _ = self.drained.notify_all();
        }
        *count
    }

    /// Current number of outstanding units.
    #[must_use]
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Blocks until the count is zero.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count != 0 {
            self.drained.wait(&mut count);
        }
    }

    /// Blocks until the count is zero or `timeout` elapses.
    ///
    /// Returns `true` if the group drained.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        let _ = self
            .drained
            .wait_while_for(&mut count, |c| *c != 0, timeout);
        *count == 0
    }
}
