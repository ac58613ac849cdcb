//! Get-or-compute cache with single-flight and stale serving.
//!
//! Entries live in a `DashMap` so fresh hits never wait on a lock. Misses go
//! through a per-key flight: the first caller computes, everyone else who
//! arrives while it runs awaits the same `OnceCell` and receives the same
//! outcome, failure included. Expired entries are kept so a failed
//! recompute can fall back to them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{Error, Result};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// A stored computation result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A value returned from the cache with its age.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub computed_at: DateTime<Utc>,
    pub age_secs: i64,
    /// Served from an expired entry because the recompute failed.
    pub stale: bool,
}

/// Failure shared with every caller of a flight.
#[derive(Debug, Clone)]
struct FlightFailure {
    message: String,
    no_data: bool,
}

type Flight = Arc<OnceCell<std::result::Result<CacheEntry, FlightFailure>>>;

#[derive(Default)]
pub struct ConditionsCache {
    entries: DashMap<String, CacheEntry>,
    inflight: Mutex<HashMap<String, Flight>>,
}

/// Cache key for one (location, product, request shape). Parameters are
/// sorted so `?a=1&b=2` and `?b=2&a=1` share an entry.
pub fn cache_key(location: &str, product: &str, params: &[(&str, &str)]) -> String {
    let mut key = format!("{location}:{product}");
    if !params.is_empty() {
        let mut sorted: Vec<_> = params.to_vec();
        sorted.sort();
        let query: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
        key.push('?');
        key.push_str(&query.join("&"));
    }
    key
}

fn to_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero())
}

impl ConditionsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key` if fresh; otherwise compute it once
    /// for all concurrent callers, store it for `ttl` and return it.
    ///
    /// When the computation fails and any earlier value exists, that value is
    /// returned with `stale = true`. The error surfaces only when nothing was
    /// ever stored under `key`.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(entry) = self.fresh_entry(key, Utc::now()) {
            debug!("cache hit: {}", key);
            return decode(entry, false);
        }

        let flight = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = inflight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()));
            // A settled flight still in the map must not replay its outcome.
            if slot.initialized() {
                *slot = Arc::new(OnceCell::new());
            }
            Arc::clone(slot)
        };

        let outcome = flight
            .get_or_init(|| async {
                // A flight that finished between our miss and joining may
                // already have stored a fresh value.
                if let Some(entry) = self.fresh_entry(key, Utc::now()) {
                    return Ok(entry);
                }
                debug!("cache miss: {}", key);
                match compute().await {
                    Ok(value) => {
                        let value = serde_json::to_value(value).map_err(|e| FlightFailure {
                            message: e.to_string(),
                            no_data: false,
                        })?;
                        let computed_at = Utc::now();
                        let entry = CacheEntry {
                            key: key.to_string(),
                            value,
                            computed_at,
                            expires_at: computed_at + to_chrono(ttl),
                        };
                        self.entries.insert(key.to_string(), entry.clone());
                        Ok(entry)
                    }
                    Err(e) => Err(FlightFailure {
                        message: e.to_string(),
                        no_data: matches!(e, Error::NoData(_)),
                    }),
                }
            })
            .await
            .clone();

        self.finish_flight(key, &flight);

        match outcome {
            Ok(entry) => decode(entry, false),
            Err(failure) => {
                let prior = self.entries.get(key).map(|e| e.value().clone());
                match prior {
                    Some(entry) => {
                        warn!("recompute of {} failed, serving stale value: {}", key, failure.message);
                        decode(entry, true)
                    }
                    None if failure.no_data => Err(Error::NoData(failure.message)),
                    None => Err(Error::ComputeFailed {
                        key: key.to_string(),
                        message: failure.message,
                    }),
                }
            }
        }
    }

    /// Drop a settled flight from the in-flight map. Synchronous, so a
    /// caller cancelled after its flight settles cannot skip it.
    fn finish_flight(&self, key: &str, flight: &Flight) {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if inflight.get(key).is_some_and(|f| Arc::ptr_eq(f, flight)) {
            inflight.remove(key);
        }
    }

    fn fresh_entry(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        self.entries
            .get(key)
            .filter(|e| e.is_fresh(now))
            .map(|e| e.value().clone())
    }

    /// Drop a stored value. Returns whether one existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Number of stored values, fresh or expired.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn decode<T: DeserializeOwned>(entry: CacheEntry, stale: bool) -> Result<Cached<T>> {
    let age_secs = (Utc::now() - entry.computed_at).num_seconds().max(0);
    Ok(Cached {
        value: serde_json::from_value(entry.value)?,
        computed_at: entry.computed_at,
        age_secs,
        stale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_cache_key_sorts_params() {
        let a = cache_key("stevens-pass", "parking", &[("hour", "7"), ("day", "sat")]);
        let b = cache_key("stevens-pass", "parking", &[("day", "sat"), ("hour", "7")]);
        assert_eq!(a, b);
        assert_eq!(a, "stevens-pass:parking?day=sat&hour=7");
        assert_eq!(cache_key("x", "powder-score", &[]), "x:powder-score");
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_compute() {
        let cache = ConditionsCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let got: Cached<u32> = cache
                .get_or_compute("k", TTL, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .expect("value");
            assert_eq!(got.value, 7);
            assert!(!got.stale);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_share_one_compute() {
        let cache = Arc::new(ConditionsCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_compute("shared", TTL, || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, Error>("payload".to_string())
                        })
                        .await
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            let got = task.expect("task joins").expect("value");
            assert_eq!(got.value, "payload");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failure_is_shared() {
        let cache = Arc::new(ConditionsCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_compute::<u32, _, _>("broken", TTL, || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Err(Error::NoData("broken".into()))
                        })
                        .await
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            let err = task.expect("task joins").expect_err("no value ever stored");
            assert!(matches!(err, Error::NoData(_)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_recompute_serves_stale() {
        let cache = ConditionsCache::new();

        let first: Cached<u32> = cache
            .get_or_compute("k", Duration::ZERO, || async { Ok(41) })
            .await
            .expect("first value");
        assert!(!first.stale);

        let second: Cached<u32> = cache
            .get_or_compute("k", Duration::ZERO, || async {
                Err(Error::Other("upstream down".into()))
            })
            .await
            .expect("stale value");
        assert_eq!(second.value, 41);
        assert!(second.stale);
        assert_eq!(second.computed_at, first.computed_at);
    }

    #[tokio::test]
    async fn test_failure_without_prior_value_propagates() {
        let cache = ConditionsCache::new();
        let result = cache
            .get_or_compute::<u32, _, _>("k", TTL, || async { Err(Error::Other("boom".into())) })
            .await;
        assert!(matches!(result, Err(Error::ComputeFailed { .. })));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_expired_entry_recomputes() {
        let cache = ConditionsCache::new();
        let _: Cached<u32> = cache
            .get_or_compute("k", Duration::ZERO, || async { Ok(1) })
            .await
            .expect("first");
        let again: Cached<u32> = cache
            .get_or_compute("k", TTL, || async { Ok(2) })
            .await
            .expect("second");
        assert_eq!(again.value, 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_settled_flight_is_not_replayed() {
        let cache = ConditionsCache::new();
        let _: Cached<u32> = cache
            .get_or_compute("k", Duration::ZERO, || async { Ok(1) })
            .await
            .expect("first");

        // Leave a settled flight behind, as an abandoned caller would.
        let leftover: Flight = Arc::new(OnceCell::new());
        let entry = cache.entries.get("k").map(|e| e.value().clone()).expect("stored");
        leftover.set(Ok(entry)).expect("empty cell");
        cache
            .inflight
            .lock()
            .expect("unpoisoned")
            .insert("k".to_string(), leftover);

        let calls = AtomicUsize::new(0);
        let again: Cached<u32> = cache
            .get_or_compute("k", TTL, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .await
            .expect("second");
        assert_eq!(again.value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.inflight.lock().expect("unpoisoned").is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_leader_does_not_wedge_key() {
        let cache = Arc::new(ConditionsCache::new());
        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute::<u32, _, _>("k", TTL, || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        assert!(leader.await.is_err());

        let got: Cached<u32> = cache
            .get_or_compute("k", TTL, || async { Ok(2) })
            .await
            .expect("value");
        assert_eq!(got.value, 2);
        assert!(!got.stale);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache = ConditionsCache::new();
        let _: Cached<u32> = cache.get_or_compute("k", TTL, || async { Ok(1) }).await.expect("first");
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
        let again: Cached<u32> = cache.get_or_compute("k", TTL, || async { Ok(2) }).await.expect("second");
        assert_eq!(again.value, 2);
    }
}
