//! Concurrency budgets for shared handler instances.
//!
//! Every handler instance carries a [`LeasePool`] sized to its configured
//! concurrency limit. A session acquires one [`Lease`] per distinct handler
//! before any frame flows and holds it for the session's lifetime, so a slow
//! stage can never be oversubscribed by admission racing.

use crate::error::{EngineError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A fixed-capacity pool of leases for one handler instance.
#[derive(Debug, Clone)]
pub struct LeasePool {
    handler: Arc<str>,
    semaphore: Arc<Semaphore>,
    limit: Option<usize>,
}

impl LeasePool {
    /// Create a pool for `handler` with `limit` concurrent leases
    /// (`None` = unbounded).
    pub fn new(handler: &str, limit: Option<u32>) -> Self {
        let permits = match limit {
            Some(n) => n as usize,
            None => Semaphore::MAX_PERMITS,
        };
        Self {
            handler: Arc::from(handler),
            semaphore: Arc::new(Semaphore::new(permits)),
            limit: limit.map(|n| n as usize),
        }
    }

    /// Acquire one lease, waiting up to `timeout` for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LeaseTimeout`] if no lease frees up in time.
    pub async fn acquire(&self, timeout: Duration) -> Result<Lease> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        let permit = tokio::time::timeout(timeout, acquire)
            .await
            .map_err(|_| EngineError::LeaseTimeout {
                handler: self.handler.to_string(),
            })?
            .map_err(|_| EngineError::Channel(format!("lease pool for {} closed", self.handler)))?;
        Ok(Lease {
            handler: Arc::clone(&self.handler),
            _permit: permit,
        })
    }

    /// Acquire without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LeaseTimeout`] immediately when the pool is
    /// exhausted.
    pub fn try_acquire(&self) -> Result<Lease> {
        let permit = Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map_err(|_| EngineError::LeaseTimeout {
                handler: self.handler.to_string(),
            })?;
        Ok(Lease {
            handler: Arc::clone(&self.handler),
            _permit: permit,
        })
    }

    /// Number of leases currently free. `None` for unbounded pools.
    pub fn available(&self) -> Option<usize> {
        self.limit.map(|_| self.semaphore.available_permits())
    }

    /// The configured concurrency limit. `None` for unbounded pools.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

/// One unit of a handler's concurrency budget, held by exactly one session.
///
/// Released on drop, so teardown paths (including cancellation and handler
/// failure) release exactly once without bookkeeping.
#[derive(Debug)]
pub struct Lease {
    handler: Arc<str>,
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    /// Name of the handler this lease draws from.
    pub fn handler(&self) -> &str {
        &self.handler
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn acquire_and_drop_round_trips() {
        let pool = LeasePool::new("asr", Some(2));
        assert_eq!(pool.available(), Some(2));

        let lease = pool.acquire(SHORT).await.unwrap();
        assert_eq!(lease.handler(), "asr");
        assert_eq!(pool.available(), Some(1));

        drop(lease);
        assert_eq!(pool.available(), Some(2));
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let pool = LeasePool::new("llm", Some(1));
        let _held = pool.acquire(SHORT).await.unwrap();

        let err = pool.acquire(SHORT).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::LeaseTimeout { ref handler } if handler == "llm"
        ));
        // The failed attempt must not leak a permit.
        assert_eq!(pool.available(), Some(0));
    }

    #[tokio::test]
    async fn waiter_gets_lease_when_one_frees() {
        let pool = LeasePool::new("tts", Some(1));
        let held = pool.acquire(SHORT).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(Duration::from_secs(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(held);

        let lease = waiter.await.unwrap().unwrap();
        assert_eq!(pool.available(), Some(0));
        drop(lease);
        assert_eq!(pool.available(), Some(1));
    }

    #[tokio::test]
    async fn never_exceeds_limit() {
        let pool = LeasePool::new("avatar", Some(3));
        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(pool.acquire(SHORT).await.unwrap());
        }
        assert_eq!(pool.available(), Some(0));
        assert!(pool.try_acquire().is_err());
        held.pop();
        assert!(pool.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn unbounded_pool_reports_no_limit() {
        let pool = LeasePool::new("transport", None);
        assert_eq!(pool.available(), None);
        assert_eq!(pool.limit(), None);
        let _a = pool.acquire(SHORT).await.unwrap();
        let _b = pool.acquire(SHORT).await.unwrap();
    }
}
