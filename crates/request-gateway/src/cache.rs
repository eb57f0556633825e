//! App-wide keyed cache of query results.

use crate::error::{RequestError, RequestResult};
use crate::gateway::{ApiRequest, RequestGateway};
use crate::retry::RetryPolicy;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(60);

struct CacheEntry {
    value: serde_json::Value,
    fetched_at: Instant,
}

/// Query results keyed by string, with retrying fetches.
///
/// Queries go through the [`RetryPolicy`]; mutations run exactly once.
pub struct QueryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    policy: RetryPolicy,
    stale_time: Duration,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), DEFAULT_STALE_TIME)
    }
}

impl QueryCache {
    pub fn new(policy: RetryPolicy, stale_time: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
            stale_time,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Cached value for `key` if fresh, else the result of `fetch`.
    pub async fn query<T, F, Fut>(&self, key: &str, fetch: F) -> RequestResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = RequestResult<T>>,
    {
        if let Some(value) = self.fresh(key) {
            debug!(key, "Query cache hit");
            return serde_json::from_value(value).map_err(|e| RequestError::Decode(e.to_string()));
        }

        let value = self.policy.run(fetch).await?;
        match serde_json::to_value(&value) {
            Ok(json) => {
                self.entries.lock().insert(
                    key.to_string(),
                    CacheEntry {
                        value: json,
                        fetched_at: Instant::now(),
                    },
                );
            }
            Err(err) => debug!(key, error = %err, "Query result not cacheable"),
        }
        Ok(value)
    }

    /// GET `path` through the gateway, cached under the path.
    pub async fn fetch_json<T>(&self, gateway: &RequestGateway, path: &str) -> RequestResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let request = ApiRequest::get(path);
        self.query(path, || gateway.send_json(&request)).await
    }

    /// Run a state-changing operation once. Never retried, never cached.
    pub async fn mutate<T, F, Fut>(&self, operation: F) -> RequestResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RequestResult<T>>,
    {
        operation().await
    }

    pub fn invalidate(&self, key: &str) {
        if self.entries.lock().remove(key).is_some() {
            debug!(key, "Query invalidated");
        }
    }

    /// Drop every key starting with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.entries.lock().retain(|key, _| !key.starts_with(prefix));
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        debug!(dropped, "Query cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fresh(&self, key: &str) -> Option<serde_json::Value> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.stale_time)
            .map(|entry| entry.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn network_like() -> RequestError {
        RequestError::Http {
            status: 502,
            body: "bad gateway".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_values_are_served_from_cache() {
        let cache = QueryCache::default();
        let calls = AtomicU32::new(0);
        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(vec!["venue".to_string()]) }
        };

        let first: Vec<String> = cache.query("events", fetch).await.unwrap();
        let second: Vec<String> = cache.query("events", fetch).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(DEFAULT_STALE_TIME).await;
        let _: Vec<String> = cache.query("events", fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_and_clear() {
        let cache = QueryCache::default();
        let _: u32 = cache.query("tasks/1", || async { Ok(1) }).await.unwrap();
        let _: u32 = cache.query("tasks/2", || async { Ok(2) }).await.unwrap();
        let _: u32 = cache.query("vendors", || async { Ok(3) }).await.unwrap();
        assert_eq!(cache.len(), 3);

        cache.invalidate("vendors");
        assert_eq!(cache.len(), 2);
        cache.invalidate_prefix("tasks/");
        assert!(cache.is_empty());

        let _: u32 = cache.query("vendors", || async { Ok(3) }).await.unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queries_retry_server_errors() {
        let cache = QueryCache::default();
        let calls = AtomicU32::new(0);

        let result: RequestResult<u32> = cache
            .query("budget", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(network_like()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queries_do_not_retry_auth_failures() {
        let cache = QueryCache::default();
        let calls = AtomicU32::new(0);

        let result: RequestResult<u32> = cache
            .query("budget", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RequestError::session_expired()) }
            })
            .await;

        assert!(matches!(result, Err(RequestError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_are_never_retried() {
        let cache = QueryCache::default();
        let calls = AtomicU32::new(0);

        let result: RequestResult<()> = cache
            .mutate(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(network_like()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_are_retried_with_growing_delays() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/api/events", listener.local_addr().unwrap());
        drop(listener);

        let cache = QueryCache::default();
        let client = reqwest::Client::new();
        let stamps = Mutex::new(Vec::new());

        let result: RequestResult<serde_json::Value> = cache
            .query("events", || {
                stamps.lock().push(Instant::now());
                let send = client.get(&url).send();
                async move {
                    let response = send.await?;
                    Ok(response.json().await?)
                }
            })
            .await;

        assert!(matches!(result, Err(RequestError::Network(_))));
        let stamps = stamps.lock();
        assert_eq!(stamps.len(), 4);
        let gaps: Vec<_> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|w| w[1] > w[0]));
        assert!(gaps[0] >= Duration::from_millis(1000));
    }
}
