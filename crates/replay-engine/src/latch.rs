//! Count-down latch used as the probe-send join barrier

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Barrier released once `count` slots have been counted down
#[derive(Debug)]
pub struct CountDownLatch {
    remaining: AtomicUsize,
    released: Notify,
}

impl CountDownLatch {
    /// Latch with `count` slots
    #[must_use]
    pub fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(count),
            released: Notify::new(),
        })
    }

    /// Slots not yet released
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Release one slot; extra calls after zero are ignored
    pub fn count_down(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.released.notify_waiters();
        }
    }

    /// Guard that releases one slot when dropped
    #[must_use]
    pub fn guard(self: &Arc<Self>) -> LatchGuard {
        LatchGuard {
            latch: Arc::clone(self),
        }
    }

    /// Wait until every slot is released or `timeout` elapses.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }

    /// Wait until every slot is released
    pub async fn wait(&self) {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.remaining() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Releases one latch slot on drop, including during unwinding
#[derive(Debug)]
pub struct LatchGuard {
    latch: Arc<CountDownLatch>,
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.latch.count_down();
    }
}
