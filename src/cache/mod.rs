//! Process-wide request cache.
//!
//! Deduplicates identical in-flight reads and serves recent results for a short
//! TTL. A miss is always safe: callers fall through to the network. Scope changes
//! call [`RequestCache::clear`], which drops every entry and every pending request;
//! results of reads started before the clear are never stored. The same holds for
//! reads still in flight when a mutation invalidates their prefix.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;

use crate::errors::SyncError;

/// Default time-to-live for cached reads.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

type SharedFetch = Shared<BoxFuture<'static, Result<Value, SyncError>>>;

struct PendingFetch {
    /// Identifies the request that owns the slot
    id: u64,
    request: SharedFetch,
}

struct CacheEntry {
    data: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    pending: HashMap<String, PendingFetch>,
    /// Bumped on every full clear
    epoch: u64,
    next_request: u64,
}

fn lock_state(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub pending: usize,
    pub epoch: u64,
}

/// Keyed store of recent request results.
pub struct RequestCache {
    state: Arc<Mutex<CacheState>>,
    default_ttl: Duration,
}

impl RequestCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            default_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        lock_state(&self.state)
    }

    /// Fresh cached value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.lock();
        match state.entries.get(key) {
            Some(entry) if entry.is_fresh() => Some(entry.data.clone()),
            Some(_) => {
                state.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.lock().entries.insert(
            key.to_string(),
            CacheEntry {
                data: value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Remove every entry and pending request unconditionally.
    pub fn clear(&self) {
        let mut state = self.lock();
        let entries = state.entries.len();
        let pending = state.pending.len();
        state.entries.clear();
        state.pending.clear();
        state.epoch += 1;
        tracing::info!(entries, pending, epoch = state.epoch, "request cache cleared");
    }

    /// Remove entries whose key starts with `prefix`.
    ///
    /// Matching reads still in flight keep answering their callers but no longer
    /// store their result.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut state = self.lock();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        state.pending.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            pending: state.pending.len(),
            epoch: state.epoch,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Serve `key` from the cache, join an identical in-flight request, or run `fetcher`.
    ///
    /// The shared request settles its own slot, so whichever caller drives it to
    /// completion stores the result even if the caller that started it was dropped.
    pub async fn fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetcher: F,
    ) -> Result<Value, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, SyncError>> + Send + 'static,
    {
        let request = {
            let mut state = self.lock();
            if let Some(pending) = state.pending.get(key) {
                tracing::debug!(key, "deduplicating request");
                pending.request.clone()
            } else {
                if let Some(entry) = state.entries.get(key) {
                    if entry.is_fresh() {
                        tracing::debug!(
                            key,
                            age_ms = entry.stored_at.elapsed().as_millis() as u64,
                            "cache hit"
                        );
                        return Ok(entry.data.clone());
                    }
                }
                state.next_request += 1;
                let id = state.next_request;
                let request = settle(
                    Arc::clone(&self.state),
                    key.to_string(),
                    id,
                    ttl.unwrap_or(self.default_ttl),
                    fetcher(),
                )
                .boxed()
                .shared();
                state.pending.insert(
                    key.to_string(),
                    PendingFetch {
                        id,
                        request: request.clone(),
                    },
                );
                request
            }
        };

        request.await
    }
}

/// Run `fetch` and, if request `id` still owns the slot for `key`, release it and
/// store a successful result.
async fn settle<Fut>(
    state: Arc<Mutex<CacheState>>,
    key: String,
    id: u64,
    ttl: Duration,
    fetch: Fut,
) -> Result<Value, SyncError>
where
    Fut: Future<Output = Result<Value, SyncError>> + Send + 'static,
{
    let result = fetch.await;

    let mut state = lock_state(&state);
    let owns_slot = state.pending.get(&key).map(|pending| pending.id) == Some(id);
    if owns_slot {
        state.pending.remove(&key);
        if let Ok(data) = &result {
            state.entries.insert(
                key,
                CacheEntry {
                    data: data.clone(),
                    stored_at: Instant::now(),
                    ttl,
                },
            );
        }
    } else {
        tracing::debug!(key = %key, "dropping result invalidated while in flight");
    }

    result
}

impl Default for RequestCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_get_set_and_expiry() {
        let cache = RequestCache::default();
        cache.set("GET:/kpi", json!({ "records": [] }), None);
        assert!(cache.get("GET:/kpi").is_some());

        cache.set("GET:/debt", json!(1), Some(Duration::ZERO));
        assert!(cache.get("GET:/debt").is_none());
        assert!(cache.get("GET:/missing").is_none());
    }

    #[test]
    fn test_clear_removes_everything_and_bumps_epoch() {
        let cache = RequestCache::default();
        cache.set("GET:/kpi?userId=a", json!(1), None);
        cache.set("GET:/debt?all=true", json!(2), None);
        let before = cache.epoch();

        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.epoch, before + 1);
    }

    #[test]
    fn test_invalidate_prefix_is_selective() {
        let cache = RequestCache::default();
        cache.set("GET:/kpi?userId=a", json!(1), None);
        cache.set("GET:/kpi?all=true", json!(2), None);
        cache.set("GET:/debt?userId=a", json!(3), None);

        cache.invalidate_prefix("GET:/kpi");

        assert!(cache.get("GET:/kpi?userId=a").is_none());
        assert!(cache.get("GET:/kpi?all=true").is_none());
        assert!(cache.get("GET:/debt?userId=a").is_some());
    }

    #[tokio::test]
    async fn test_fetch_deduplicates_concurrent_requests() {
        let cache = Arc::new(RequestCache::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, SyncError>(json!({ "records": [1, 2, 3] }))
            }
        };

        let (a, b) = tokio::join!(
            cache.fetch("GET:/kpi", None, make(calls.clone())),
            cache.fetch("GET:/kpi", None, make(calls.clone())),
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Served from cache afterwards
        let c = cache.fetch("GET:/kpi", None, make(calls.clone())).await.unwrap();
        assert_eq!(c["records"][2], 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_errors_are_not_cached() {
        let cache = RequestCache::default();
        let err = cache
            .fetch("GET:/tasks", None, || async {
                Err::<Value, _>(SyncError::Network("offline".to_string()))
            })
            .await;
        assert!(err.is_err());
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_cancelled_first_caller_does_not_pin_the_key() {
        let cache = RequestCache::default();
        let key = "GET:/kpi?all=true";
        let ttl = Some(Duration::from_millis(5));

        let first = tokio::time::timeout(
            Duration::from_millis(5),
            cache.fetch(key, ttl, || async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, SyncError>(json!("v1"))
            }),
        )
        .await;
        assert!(first.is_err());
        assert_eq!(cache.stats().pending, 1);

        // Joins the orphaned request and drives it to completion
        let second = cache
            .fetch(key, ttl, || async { Ok::<_, SyncError>(json!("v2")) })
            .await
            .unwrap();
        assert_eq!(second, json!("v1"));
        assert_eq!(cache.stats().pending, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let third = cache
            .fetch(key, ttl, || async { Ok::<_, SyncError>(json!("v3")) })
            .await
            .unwrap();
        assert_eq!(third, json!("v3"));
    }

    #[tokio::test]
    async fn test_read_in_flight_during_invalidation_is_not_stored() {
        let cache = Arc::new(RequestCache::default());
        let reading = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .fetch("GET:/kpi?all=true", None, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, SyncError>(json!("pre-mutation"))
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.invalidate_prefix("GET:/kpi");

        assert_eq!(reading.await.unwrap().unwrap(), json!("pre-mutation"));
        assert!(cache.get("GET:/kpi?all=true").is_none());

        // The next read goes back to the network
        let fresh = cache
            .fetch("GET:/kpi?all=true", None, || async {
                Ok::<_, SyncError>(json!("post-mutation"))
            })
            .await
            .unwrap();
        assert_eq!(fresh, json!("post-mutation"));
    }

    #[tokio::test]
    async fn test_result_started_before_clear_is_not_stored() {
        let cache = Arc::new(RequestCache::default());
        let fetching = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .fetch("GET:/kpi?userId=a", None, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, SyncError>(json!("stale"))
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.clear();

        assert_eq!(fetching.await.unwrap().unwrap(), json!("stale"));
        assert!(cache.get("GET:/kpi?userId=a").is_none());
        assert_eq!(cache.stats().entries, 0);
    }
}
