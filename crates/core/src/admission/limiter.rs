//! Bounded concurrency with a bounded, time-limited wait queue.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::LimitsConfig;
use crate::failure::Failure;
use crate::metrics;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("Wait queue is full ({max_queued} jobs waiting)")]
    QueueFull { max_queued: usize },

    #[error("No slot became free within {waited:?}")]
    TimedOut { waited: Duration },

    #[error("Limiter is shut down")]
    Closed,
}

impl AcquireError {
    pub fn reason(&self) -> &'static str {
        match self {
            AcquireError::QueueFull { .. } => "queue_full",
            AcquireError::TimedOut { .. } => "queue_timeout",
            AcquireError::Closed => "closed",
        }
    }
}

impl From<AcquireError> for Failure {
    fn from(err: AcquireError) -> Self {
        let cause = err.to_string();
        Failure::overloaded("The server is busy, try again shortly").with_cause(cause)
    }
}

/// Snapshot of limiter occupancy.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LimiterStatus {
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub max_queued: usize,
    pub total_admitted: u64,
    pub total_rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    queued: AtomicUsize,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

/// Caps the number of jobs running at once.
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    max_queued: usize,
    queue_timeout: Duration,
    counters: Arc<Counters>,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: usize, max_queued: usize, queue_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_queued,
            queue_timeout,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self::new(
            limits.max_concurrent_jobs,
            limits.max_queued_jobs,
            limits.queue_timeout(),
        )
    }

    /// Waits for a slot. Fails immediately when the queue is full and after
    /// the queue timeout otherwise. Nothing is allocated on failure.
    pub async fn acquire(&self) -> Result<JobPermit, AcquireError> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(self.grant(permit));
        }

        let _slot = match QueueSlot::enter(&self.counters, self.max_queued) {
            Some(slot) => slot,
            None => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(AcquireError::QueueFull {
                    max_queued: self.max_queued,
                });
            }
        };

        let started = Instant::now();
        let waited = tokio::time::timeout(
            self.queue_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await;

        match waited {
            Ok(Ok(permit)) => {
                debug!(waited = ?started.elapsed(), "Acquired slot after queueing");
                Ok(self.grant(permit))
            }
            Ok(Err(_)) => Err(AcquireError::Closed),
            Err(_) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(AcquireError::TimedOut {
                    waited: started.elapsed(),
                })
            }
        }
    }

    fn grant(&self, permit: OwnedSemaphorePermit) -> JobPermit {
        self.counters.active.fetch_add(1, Ordering::AcqRel);
        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        metrics::JOBS_RUNNING.inc();
        JobPermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        }
    }

    pub fn status(&self) -> LimiterStatus {
        LimiterStatus {
            active: self.counters.active.load(Ordering::Acquire),
            queued: self.counters.queued.load(Ordering::Acquire),
            max_concurrent: self.max_concurrent,
            max_queued: self.max_queued,
            total_admitted: self.counters.admitted.load(Ordering::Relaxed),
            total_rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }
}

/// A held concurrency slot. Released on drop.
#[derive(Debug)]
pub struct JobPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::AcqRel);
        metrics::JOBS_RUNNING.dec();
    }
}

/// A place in the wait queue, given up on drop (including when the waiting
/// request is abandoned).
struct QueueSlot {
    counters: Arc<Counters>,
}

impl QueueSlot {
    fn enter(counters: &Arc<Counters>, max_queued: usize) -> Option<Self> {
        counters
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (queued < max_queued).then_some(queued + 1)
            })
            .ok()?;
        metrics::JOBS_QUEUED.inc();
        Some(Self {
            counters: Arc::clone(counters),
        })
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.counters.queued.fetch_sub(1, Ordering::AcqRel);
        metrics::JOBS_QUEUED.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let limiter = ConcurrencyLimiter::new(2, 0, Duration::from_millis(10));
        let a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.status().active, 2);

        drop(a);
        assert_eq!(limiter.status().active, 1);
        let _c = limiter.acquire().await.unwrap();
        assert_eq!(limiter.status().total_admitted, 3);
    }

    #[tokio::test]
    async fn test_no_queue_rejects_immediately() {
        let limiter = ConcurrencyLimiter::new(1, 0, Duration::from_secs(30));
        let _held = limiter.acquire().await.unwrap();
        let started = Instant::now();
        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(err, AcquireError::QueueFull { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(limiter.status().total_rejected, 1);
    }

    #[tokio::test]
    async fn test_queue_timeout() {
        let limiter = ConcurrencyLimiter::new(1, 4, Duration::from_millis(50));
        let _held = limiter.acquire().await.unwrap();
        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(err, AcquireError::TimedOut { .. }));
        assert_eq!(err.reason(), "queue_timeout");
        assert_eq!(limiter.status().queued, 0);
    }

    #[tokio::test]
    async fn test_queued_job_gets_released_slot() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1, 4, Duration::from_secs(5)));
        let held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        while limiter.status().queued == 0 {
            tokio::task::yield_now().await;
        }
        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(limiter.status().queued, 0);
    }

    #[tokio::test]
    async fn test_abandoned_wait_leaves_queue() {
        let limiter = ConcurrencyLimiter::new(1, 4, Duration::from_secs(5));
        let _held = limiter.acquire().await.unwrap();
        let _ = tokio::time::timeout(Duration::from_millis(20), limiter.acquire()).await;
        assert_eq!(limiter.status().queued, 0);
    }

    #[test]
    fn test_failure_is_overloaded() {
        let failure: Failure = AcquireError::QueueFull { max_queued: 1 }.into();
        assert_eq!(failure.kind, crate::failure::FailureKind::Overloaded);
    }
}
