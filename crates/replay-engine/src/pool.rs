//! Worker pools for probe sends and noise analysis
//!
//! Each pool is a tokio task spawner with:
//! - Optional concurrency bound (semaphore permits)
//! - Panic isolation per unit of work
//! - Statistics and an idle barrier

use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

/// Pool submission errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Pool no longer accepts work
    #[error("pool {0} is closed")]
    Closed(&'static str),

    /// Submission happened outside a tokio runtime
    #[error("pool {0} has no runtime to spawn on")]
    NoRuntime(&'static str),
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Units accepted
    pub submitted: usize,
    /// Units that ran to completion
    pub completed: usize,
    /// Units that panicked
    pub panicked: usize,
    /// Units accepted but not finished
    pub in_flight: usize,
}

#[derive(Debug)]
struct PoolInner {
    name: &'static str,
    permits: Option<Arc<Semaphore>>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    stats: Mutex<PoolStats>,
}

impl PoolInner {
    fn finish(&self, panicked: bool) {
        {
            let mut stats = self.stats.lock();
            if panicked {
                stats.panicked += 1;
            } else {
                stats.completed += 1;
            }
            stats.in_flight = stats.in_flight.saturating_sub(1);
        }
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Named pool of tokio tasks
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Pool running at most `max_concurrency` units at once
    #[must_use]
    pub fn bounded(name: &'static str, max_concurrency: usize) -> Self {
        Self::build(name, Some(Arc::new(Semaphore::new(max_concurrency.max(1)))))
    }

    /// Pool with no concurrency bound
    #[must_use]
    pub fn unbounded(name: &'static str) -> Self {
        Self::build(name, None)
    }

    fn build(name: &'static str, permits: Option<Arc<Semaphore>>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name,
                permits,
                closed: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                stats: Mutex::new(PoolStats::default()),
            }),
        }
    }

    /// Pool name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Submit a unit of work.
    ///
    /// The unit runs once a permit is available. A panic inside the unit is
    /// caught, logged and counted; it never reaches the submitter.
    ///
    /// # Errors
    /// - `PoolError::Closed` after [`WorkerPool::close`]
    /// - `PoolError::NoRuntime` outside a tokio runtime
    pub fn execute<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed(self.inner.name));
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| PoolError::NoRuntime(self.inner.name))?;

        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        {
            let mut stats = self.inner.stats.lock();
            stats.submitted += 1;
            stats.in_flight += 1;
        }

        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            let _permit = match &inner.permits {
                Some(permits) => match Arc::clone(permits).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        tracing::error!(pool = inner.name, "pool semaphore closed, dropping unit");
                        inner.finish(true);
                        return;
                    }
                },
                None => None,
            };
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            if outcome.is_err() {
                tracing::error!(pool = inner.name, "unit of work panicked");
            }
            inner.finish(outcome.is_err());
        });
        Ok(())
    }

    /// Stop accepting work; units already accepted still run
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    /// Wait until no accepted unit is outstanding
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Get pool statistics
    #[inline]
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_submitted_units() {
        let pool = WorkerPool::bounded("send", 2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.execute(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.wait_idle().await;

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        let stats = pool.stats();
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn bound_limits_concurrency() {
        let pool = WorkerPool::bounded("send", 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.execute(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.wait_idle().await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panics_are_isolated() {
        let pool = WorkerPool::unbounded("analysis");
        pool.execute(async { panic!("comparison exploded") }).unwrap();
        pool.execute(async {}).unwrap();
        pool.wait_idle().await;

        let stats = pool.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn closed_pool_rejects_work() {
        let pool = WorkerPool::unbounded("analysis");
        pool.close();
        assert_eq!(pool.execute(async {}), Err(PoolError::Closed("analysis")));
    }

    #[test]
    fn submission_outside_runtime_fails() {
        let pool = WorkerPool::bounded("send", 1);
        assert_eq!(pool.execute(async {}), Err(PoolError::NoRuntime("send")));
    }

    #[tokio::test]
    async fn idle_pool_returns_immediately() {
        let pool = WorkerPool::unbounded("analysis");
        tokio_test::assert_ready!(tokio_test::task::spawn(pool.wait_idle()).poll());
    }
}
