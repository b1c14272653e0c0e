//! Memoised async initialisers with an explicit failure policy
//!
//! A guard is a three-state cell: not started, in flight (one shared attempt
//! awaited by every concurrent caller), or settled. Success is always cached.
//! Failure is either cached until [`LifecycleGuard::reset`] or cleared so the
//! next caller retries, depending on [`FailurePolicy`].

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::common::{Error, Result};

type Attempt<T> = Shared<BoxFuture<'static, std::result::Result<T, Arc<Error>>>>;

/// What a guard does with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Keep returning the failure until the guard is reset
    CacheForever,
    /// Forget the failure; the next call starts a fresh attempt
    RetryOnFailure,
}

enum GuardState<T> {
    NotStarted,
    InFlight { generation: u64, attempt: Attempt<T> },
    Ready(T),
    Failed(Arc<Error>),
}

struct Inner<T> {
    state: GuardState<T>,
    generation: u64,
}

/// Idempotent async setup step shared by independent call sites
pub struct LifecycleGuard<T> {
    name: &'static str,
    policy: FailurePolicy,
    inner: Mutex<Inner<T>>,
}

impl<T> LifecycleGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, policy: FailurePolicy) -> Self {
        Self {
            name,
            policy,
            inner: Mutex::new(Inner {
                state: GuardState::NotStarted,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `init` unless an attempt is already in flight or settled
    ///
    /// `init` is only called to build the attempt future; it must not block.
    pub async fn ensure<F, Fut>(&self, init: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (generation, attempt) = {
            let mut locked = self.lock();
            let inner = &mut *locked;
            match &inner.state {
                GuardState::Ready(value) => return Ok(value.clone()),
                GuardState::Failed(err) => return Err(Error::Lifecycle(err.clone())),
                GuardState::InFlight {
                    generation,
                    attempt,
                } => {
                    tracing::trace!(guard = self.name, "Joining in-flight attempt");
                    (*generation, attempt.clone())
                }
                GuardState::NotStarted => {
                    inner.generation += 1;
                    let generation = inner.generation;
                    tracing::debug!(guard = self.name, generation, "Starting attempt");
                    let attempt = init().map(|r| r.map_err(Arc::new)).boxed().shared();
                    inner.state = GuardState::InFlight {
                        generation,
                        attempt: attempt.clone(),
                    };
                    (generation, attempt)
                }
            }
        };

        let outcome = attempt.await;
        self.settle(generation, &outcome);
        outcome.map_err(Error::Lifecycle)
    }

    fn settle(&self, generation: u64, outcome: &std::result::Result<T, Arc<Error>>) {
        let mut inner = self.lock();
        let current = matches!(
            &inner.state,
            GuardState::InFlight { generation: g, .. } if *g == generation
        );
        if !current {
            // Already settled by another awaiter, or reset mid-flight
            return;
        }

        inner.state = match (outcome, self.policy) {
            (Ok(value), _) => GuardState::Ready(value.clone()),
            (Err(err), FailurePolicy::CacheForever) => {
                tracing::warn!(guard = self.name, error = %err, "Attempt failed; not retrying");
                GuardState::Failed(err.clone())
            }
            (Err(err), FailurePolicy::RetryOnFailure) => {
                tracing::warn!(guard = self.name, error = %err, "Attempt failed; next call retries");
                GuardState::NotStarted
            }
        };
    }

    /// Forget any outcome so the next call starts clean
    pub fn reset(&self) {
        self.lock().state = GuardState::NotStarted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_attempt() {
        let guard = Arc::new(LifecycleGuard::new("test", FailurePolicy::CacheForever));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    guard
                        .ensure(|| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            async {
                                tokio::time::sleep(Duration::from_millis(20)).await;
                                Ok(7u32)
                            }
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_forever_keeps_failure() {
        let guard = LifecycleGuard::new("listener", FailurePolicy::CacheForever);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = guard
            .ensure(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Internal("address in use".to_string())) }
            })
            .await;
        assert!(first.is_err());

        let second = guard
            .ensure(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(1u32) }
            })
            .await;
        let err = second.unwrap_err();
        assert!(err.to_string().contains("address in use"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_on_failure_retries_next_call() {
        let guard = LifecycleGuard::new("route", FailurePolicy::RetryOnFailure);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = guard
            .ensure(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::route_failed(7007, "device offline")) }
            })
            .await;
        assert_eq!(first.unwrap_err().code(), "ROUTE_FAILED");

        let second = guard
            .ensure(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(second.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Settled success is never re-run
        guard
            .ensure(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reset_allows_fresh_attempt() {
        let guard = LifecycleGuard::new("listener", FailurePolicy::CacheForever);
        let calls = Arc::new(AtomicUsize::new(0));

        let value = guard.ensure(|| counted_sync(&calls, 1)).await.unwrap();
        assert_eq!(value, 1);

        guard.reset();

        let value = guard.ensure(|| counted_sync(&calls, 2)).await.unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    fn counted_sync(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl Future<Output = Result<u32>> + Send + 'static {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(value) }
    }
}
