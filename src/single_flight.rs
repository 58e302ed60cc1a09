//! Single-flight coalescing for concurrent identical operations
//!
//! Two primitives back the crate's "at most one upstream call per key"
//! guarantees:
//! - [`SingleFlight`]: a keyed map of in-flight shared futures (per-game
//!   update checks, per-game image fetches).
//! - [`SingleSlot`]: one shared future for an unkeyed operation (the
//!   whole-catalogue update sweep); scheduled ticks and manual triggers
//!   join the same run instead of starting a duplicate.
//!
//! Entries are removed when the underlying future completes; every waiter
//! attempts the removal, guarded by pointer identity, so cleanup happens
//! even if the initiating task is cancelled while waiting.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use tokio::sync::Mutex;

/// Keyed single-flight map: concurrent callers for the same key share one
/// underlying operation and all receive its (cloned) output.
pub struct SingleFlight<K, T> {
    inflight: Mutex<HashMap<K, Shared<BoxFuture<'static, T>>>>,
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send,
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `make()` for `key`, unless a run for that key is already in
    /// flight, in which case await and return the in-flight result.
    ///
    /// `make` is only invoked when no operation is in flight for the key.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let fut = {
            let mut map = self.inflight.lock().await;
            if let Some(existing) = map.get(&key) {
                existing.clone()
            } else {
                let shared = make().boxed().shared();
                map.insert(key.clone(), shared.clone());
                shared
            }
        };

        let out = fut.clone().await;

        // Remove the entry once the operation completed. Pointer identity
        // keeps a racing newer run for the same key intact.
        let mut map = self.inflight.lock().await;
        if let Some(existing) = map.get(&key) {
            if existing.ptr_eq(&fut) {
                map.remove(&key);
            }
        }

        out
    }

    /// True when an operation for `key` is currently in flight
    pub async fn in_flight(&self, key: &K) -> bool {
        self.inflight.lock().await.contains_key(key)
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Unkeyed single-flight slot: at most one run at a time, late callers join.
pub struct SingleSlot<T> {
    running: Mutex<Option<Shared<BoxFuture<'static, T>>>>,
}

impl<T> SingleSlot<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty slot
    pub fn new() -> Self {
        Self {
            running: Mutex::new(None),
        }
    }

    /// Run `make()`, unless a run is already in flight, in which case await
    /// and return the in-flight result.
    pub async fn run<F, Fut>(&self, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let fut = {
            let mut slot = self.running.lock().await;
            if let Some(existing) = slot.as_ref() {
                existing.clone()
            } else {
                let shared = make().boxed().shared();
                *slot = Some(shared.clone());
                shared
            }
        };

        let out = fut.clone().await;

        let mut slot = self.running.lock().await;
        if let Some(existing) = slot.as_ref() {
            if existing.ptr_eq(&fut) {
                *slot = None;
            }
        }

        out
    }

    /// True when a run is currently in flight
    pub async fn in_flight(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

impl<T> Default for SingleSlot<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_runs_for_same_key_share_one_execution() {
        let flight = Arc::new(SingleFlight::<i64, u32>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run(7, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        42
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "all eight callers must share one execution"
        );
    }

    #[tokio::test]
    async fn different_keys_do_not_coalesce() {
        let flight = Arc::new(SingleFlight::<i64, i64>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let a = {
            let calls = calls.clone();
            flight.run(1, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                1
            })
        };
        let b = {
            let calls = calls.clone();
            flight.run(2, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                2
            })
        };

        let (ra, rb) = tokio::join!(a, b);
        assert_eq!((ra, rb), (1, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn entry_is_removed_after_completion() {
        let flight = SingleFlight::<i64, ()>::new();
        flight.run(3, || async {}).await;
        assert!(
            !flight.in_flight(&3).await,
            "completed entry must be removed from the in-flight map"
        );

        // A later run executes again
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        flight
            .run(3, move || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slot_joins_in_flight_run() {
        let slot = Arc::new(SingleSlot::<u32>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let slot = slot.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                slot.run(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    9
                })
                .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 9);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!slot.in_flight().await);
    }
}
