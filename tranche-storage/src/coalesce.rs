//! Generic memoization of asynchronous work with in-flight deduplication.
//!
//! [`CoalescingCache`] puts two layers in front of arbitrary async work:
//! the scalar keyspace of the [`SortedSetStore`] (a TTL'd memo with an
//! optional max-staleness tolerance on read), and a per-instance in-flight
//! registry guaranteeing at most one concurrent execution per key within
//! this process. Concurrent callers for the same key attach to the pending
//! result instead of re-running the work. There is no cross-process
//! guarantee.
//!
//! Work runs on a spawned task, so a caller that goes away does not cancel
//! an execution other callers may have joined. Failures are never cached:
//! the next caller after a failure retries immediately.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{oneshot, Mutex};

use tranche_core::{TrancheError, TrancheResult};

use crate::sorted_set::SortedSetStore;

/// A shared view of one pending execution. `None` means the task died
/// without reporting a result.
type PendingResult<T> = Shared<BoxFuture<'static, Option<TrancheResult<T>>>>;

/// Memoizes async work per key, deduplicating concurrent executions.
pub struct CoalescingCache<T, S> {
    store: Arc<S>,
    in_flight: Arc<Mutex<HashMap<String, PendingResult<T>>>>,
}

impl<T, S> Clone for CoalescingCache<T, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T, S> CoalescingCache<T, S>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SortedSetStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `work` at most once per key per process, memoizing successes.
    ///
    /// 1. A memo hit within `max_age` returns without running `work`.
    /// 2. On miss, an in-flight execution for `key` is joined if present.
    /// 3. Otherwise the work is registered and spawned; registration and the
    ///    check in step 2 happen under one lock acquisition with no
    ///    suspension in between, so two concurrent missers cannot both
    ///    start it.
    /// 4. On success only, the result lands in the memo with `ttl`. The
    ///    registry entry is removed on completion regardless of outcome.
    pub async fn wrap<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        max_age: Option<Duration>,
        work: F,
    ) -> TrancheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TrancheResult<T>> + Send + 'static,
    {
        if let Some(raw) = self.store.get(key, max_age).await? {
            match serde_json::from_str(&raw) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(key, error = %e, "discarding undecodable memo entry");
                }
            }
        }

        let (pending, starter) = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(key) {
                Some(pending) => (pending.clone(), None),
                None => {
                    let (tx, rx) = oneshot::channel();
                    let pending = rx.map(|received| received.ok()).boxed().shared();
                    in_flight.insert(key.to_string(), pending.clone());
                    (pending, Some(tx))
                }
            }
        };

        if let Some(tx) = starter {
            let fut = work();
            let store = Arc::clone(&self.store);
            let registry = Arc::clone(&self.in_flight);
            let key = key.to_string();
            tokio::spawn(async move {
                let result = fut.await;
                if let Ok(value) = &result {
                    match serde_json::to_string(value) {
                        Ok(raw) => {
                            if let Err(e) = store.set(&key, &raw, ttl).await {
                                tracing::warn!(key = %key, error = %e, "memo write failed");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "memo value not serializable");
                        }
                    }
                }
                registry.lock().await.remove(&key);
                // Joined callers observe the result through the shared
                // receiver; nobody may be listening anymore, which is fine.
                let _ = tx.send(result);
            });
        }

        match pending.clone().await {
            Some(result) => result,
            None => {
                // The task died without reporting. Clear the wedged entry so
                // the next caller can retry, unless it was already replaced.
                let mut in_flight = self.in_flight.lock().await;
                if let Some(current) = in_flight.get(key) {
                    if current.ptr_eq(&pending) {
                        in_flight.remove(key);
                    }
                }
                Err(TrancheError::InFlightAborted {
                    key: key.to_string(),
                })
            }
        }
    }
}
