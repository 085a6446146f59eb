//! Time-bounded cache with single-flight rebuild.
//!
//! [`TtlCache::get`] returns the cached value while it is fresh. When it is
//! stale, the first caller becomes the leader and runs the producer; every
//! caller arriving while that rebuild is in flight joins it and receives the
//! same result, success or failure. No two producers ever run at once for the
//! same cache.
//!
//! The lock only guards bookkeeping and is never held across an await.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{BridgeError, Result};

/// Default time-to-live for exported command metadata.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

type Shared<T> = std::result::Result<Arc<T>, String>;

/// A cached value and when it was produced.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub value: Arc<T>,
    pub produced_at: Instant,
    generation: u64,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self, ttl: Duration, generation: u64) -> bool {
        self.generation == generation && self.produced_at.elapsed() < ttl
    }
}

struct Flight<T> {
    id: u64,
    /// Generation the leader captured. A flight from an older generation
    /// can only produce a stale value.
    generation: u64,
    rx: watch::Receiver<Option<Shared<T>>>,
}

struct Inner<T> {
    entry: Option<CacheEntry<T>>,
    inflight: Option<Flight<T>>,
    /// Bumped by `invalidate`. Entries from an older generation are stale.
    generation: u64,
    next_flight: u64,
}

enum Role<T> {
    Hit(Arc<T>),
    Join(watch::Receiver<Option<Shared<T>>>),
    /// A rebuild started before the last `invalidate` is still running.
    /// Its result is stale, so wait it out and claim again.
    Outlast(watch::Receiver<Option<Shared<T>>>),
    Lead {
        tx: watch::Sender<Option<Shared<T>>>,
        flight: u64,
        generation: u64,
    },
}

/// Concurrency-safe cache holding one value with a TTL.
pub struct TtlCache<T> {
    ttl: Duration,
    inner: Mutex<Inner<T>>,
}

impl<T: Send + Sync + 'static> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(Inner {
                entry: None,
                inflight: None,
                generation: 0,
                next_flight: 0,
            }),
        }
    }

    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the fresh value, or rebuild it with `producer`.
    ///
    /// `producer` only runs if this caller leads the rebuild. If the leader
    /// is cancelled before finishing, a waiting caller takes over with its
    /// own producer.
    ///
    /// # Errors
    ///
    /// [`BridgeError::CacheRebuild`] if the rebuild this caller led or joined
    /// failed. The previous value stays in place.
    pub async fn get<F, Fut>(&self, producer: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut producer = Some(producer);

        loop {
            match self.claim() {
                Role::Hit(value) => return Ok(value),
                Role::Join(rx) => {
                    if let Some(result) = Self::join(rx).await {
                        return result.map_err(BridgeError::CacheRebuild);
                    }
                    tracing::debug!("cache rebuild abandoned by its leader, retrying");
                }
                Role::Outlast(rx) => {
                    let _ = Self::join(rx).await;
                    tracing::debug!("stale cache rebuild finished, claiming again");
                }
                Role::Lead {
                    tx,
                    flight,
                    generation,
                } => {
                    let produce = producer.take().ok_or_else(|| {
                        BridgeError::CacheRebuild("producer already consumed".into())
                    })?;
                    return self.lead(tx, flight, generation, produce).await;
                }
            }
        }
    }

    /// Force the next `get` to rebuild regardless of TTL.
    ///
    /// A rebuild already in flight still completes and answers the callers
    /// joined to it, but its value is stored as stale. Callers arriving after
    /// the invalidation wait for that rebuild to finish and then run a fresh
    /// one instead of joining it.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        tracing::debug!(generation = inner.generation, "cache invalidated");
    }

    /// The last produced value, fresh or not.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.inner.lock().entry.as_ref().map(|e| e.value.clone())
    }

    pub fn is_fresh(&self) -> bool {
        let inner = self.inner.lock();
        inner
            .entry
            .as_ref()
            .is_some_and(|e| e.is_fresh(self.ttl, inner.generation))
    }

    /// Whether a rebuild is currently running.
    pub fn is_rebuilding(&self) -> bool {
        self.inner.lock().inflight.is_some()
    }

    fn claim(&self) -> Role<T> {
        let mut inner = self.inner.lock();

        if let Some(entry) = &inner.entry {
            if entry.is_fresh(self.ttl, inner.generation) {
                return Role::Hit(entry.value.clone());
            }
        }

        if let Some(flight) = &inner.inflight {
            if flight.generation == inner.generation {
                return Role::Join(flight.rx.clone());
            }
            return Role::Outlast(flight.rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        let flight = inner.next_flight;
        inner.next_flight += 1;
        inner.inflight = Some(Flight {
            id: flight,
            generation: inner.generation,
            rx,
        });
        Role::Lead {
            tx,
            flight,
            generation: inner.generation,
        }
    }

    /// Wait for the in-flight rebuild. `None` if its leader went away.
    async fn join(mut rx: watch::Receiver<Option<Shared<T>>>) -> Option<Shared<T>> {
        let published = rx.wait_for(Option::is_some).await.ok()?;
        published.as_ref().cloned()
    }

    async fn lead<F, Fut>(
        &self,
        tx: watch::Sender<Option<Shared<T>>>,
        flight: u64,
        generation: u64,
        produce: F,
    ) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = FlightGuard {
            cache: self,
            flight,
            tx: Some(tx),
        };

        let started = Instant::now();
        let shared: Shared<T> = match produce().await {
            Ok(value) => {
                let value = Arc::new(value);
                let mut inner = self.inner.lock();
                inner.entry = Some(CacheEntry {
                    value: value.clone(),
                    produced_at: Instant::now(),
                    generation,
                });
                tracing::debug!(elapsed = ?started.elapsed(), "cache rebuilt");
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(error = %e, "cache rebuild failed, keeping previous value");
                Err(e.to_string())
            }
        };

        guard.publish(shared.clone());
        shared.map_err(BridgeError::CacheRebuild)
    }
}

/// Clears the in-flight slot when the leader finishes or is dropped.
struct FlightGuard<'a, T> {
    cache: &'a TtlCache<T>,
    flight: u64,
    tx: Option<watch::Sender<Option<Shared<T>>>>,
}

impl<T> FlightGuard<'_, T> {
    fn publish(mut self, result: Shared<T>) {
        self.clear();
        if let Some(tx) = self.tx.take() {
            // No receivers just means nobody joined.
            let _ = tx.send(Some(result));
        }
    }

    fn clear(&self) {
        let mut inner = self.cache.inner.lock();
        if inner.inflight.as_ref().is_some_and(|f| f.id == self.flight) {
            inner.inflight = None;
        }
    }
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            // Cancelled mid-rebuild: free the slot before joiners see the
            // sender close, so one of them can take over.
            self.clear();
            self.tx = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_producer(
        calls: &Arc<AtomicUsize>,
        value: &'static str,
    ) -> impl Future<Output = Result<String>> {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(value.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_value_served_without_producer() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache.get(|| counting_producer(&calls, "tree")).await.unwrap();
        let second = cache.get(|| counting_producer(&calls, "other")).await.unwrap();

        assert_eq!(*first, "tree");
        assert_eq!(*second, "tree");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_fresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_gets_single_flight() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache.get(|| counting_producer(&calls, "tree")).await
            }));
        }

        for task in tasks {
            assert_eq!(*task.await.unwrap().unwrap(), "tree");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_rebuilding());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_rebuilt() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get(|| counting_producer(&calls, "old")).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!cache.is_fresh());

        let value = cache.get(|| counting_producer(&calls, "new")).await.unwrap();
        assert_eq!(*value, "new");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_rebuild() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get(|| counting_producer(&calls, "v1")).await.unwrap();
        cache.invalidate();
        assert!(!cache.is_fresh());
        assert_eq!(cache.peek().as_deref().map(String::as_str), Some("v1"));

        let value = cache.get(|| counting_producer(&calls, "v2")).await.unwrap();
        assert_eq!(*value, "v2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_during_rebuild_marks_result_stale() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let leader = {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move { cache.get(|| counting_producer(&calls, "racing")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.invalidate();

        assert_eq!(*leader.await.unwrap().unwrap(), "racing");
        assert!(!cache.is_fresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_invalidate_does_not_join_stale_rebuild() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get(|| async move {
                        let _ = released.await;
                        Ok("before-change".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.is_rebuilding());

        cache.invalidate();
        let follower = {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move { cache.get(|| counting_producer(&calls, "after-change")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        release.send(()).unwrap();
        assert_eq!(*leader.await.unwrap().unwrap(), "before-change");
        assert_eq!(*follower.await.unwrap().unwrap(), "after-change");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_fresh());
        assert_eq!(cache.peek().as_deref().map(String::as_str), Some("after-change"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_shared_with_joiners_and_value_kept() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(1)));
        let calls = Arc::new(AtomicUsize::new(0));
        cache.get(|| counting_producer(&calls, "good")).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        let failing = || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<String, _>(BridgeError::HandlerFailed("registry unavailable".into()))
        };

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move { cache.get(failing).await }));
        }
        for task in tasks {
            match task.await.unwrap() {
                Err(BridgeError::CacheRebuild(msg)) => assert!(msg.contains("registry unavailable")),
                other => panic!("expected rebuild failure, got {other:?}"),
            }
        }

        assert_eq!(cache.peek().as_deref().map(String::as_str), Some("good"));
        assert!(!cache.is_rebuilding());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_leader_hands_over() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get(|| async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok("never".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.is_rebuilding());

        let joiner = {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move { cache.get(|| counting_producer(&calls, "takeover")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        assert_eq!(*joiner.await.unwrap().unwrap(), "takeover");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
