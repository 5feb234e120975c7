//! Bounded worker pools for the expensive tiers.
//!
//! Each pool is a semaphore: a backend call only starts once it holds a
//! permit, and the permit travels with the spawned task so it is released
//! however the call ends. Tier 1 never goes through a pool.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::Tier;
use crate::error::BackendError;

/// Outcome of a pooled call that did not produce a value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// The deadline passed while queued for a permit or while running.
    #[error("deadline elapsed")]
    TimedOut,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Semaphore-bounded executor for one tier.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    tier: Tier,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(tier: Tier, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            tier,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Calls currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Run one collaborator call before `deadline`.
    ///
    /// `make` receives the cancellation token for the call. On expiry the
    /// token is cancelled and the task aborted, so a collaborator that
    /// ignores the token still cannot outlive the deadline.
    pub async fn run<F, Fut, T>(&self, deadline: Instant, make: F) -> Result<T, CallError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
        T: Send + 'static,
    {
        let permit =
            match tokio::time::timeout_at(deadline, Arc::clone(&self.permits).acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    return Err(CallError::Backend(BackendError::Unavailable(format!(
                        "{} worker pool closed",
                        self.tier
                    ))))
                }
                Err(_) => {
                    tracing::debug!(tier = %self.tier, "deadline passed waiting for a worker");
                    return Err(CallError::TimedOut);
                }
            };

        let cancel = CancellationToken::new();
        // Cancels the call if the dispatch future itself is dropped.
        let _guard = cancel.clone().drop_guard();
        let call = make(cancel.clone());
        let mut handle = tokio::spawn(async move {
            let _permit = permit;
            call.await
        });

        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(result)) => result.map_err(CallError::Backend),
            Ok(Err(join_err)) => Err(CallError::Backend(BackendError::Request(format!(
                "{} worker task failed: {join_err}",
                self.tier
            )))),
            Err(_) => {
                cancel.cancel();
                handle.abort();
                Err(CallError::TimedOut)
            }
        }
    }
}
