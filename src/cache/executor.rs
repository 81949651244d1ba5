//! Query executor: one in-flight fetch per key, shared by every caller
//!
//! Each fetch runs as its own tokio task so that it completes (and writes
//! into the store) even if every caller stops awaiting it. Completions are
//! tagged with the key's generation; only the latest generation is applied.

use crate::cache::{
    config::{QueryConfig, QueryOptions},
    entry::{FetchOutcome, InFlight, SharedFetch},
    invalidation::KeyFilter,
    key::QueryKey,
    store::QueryCache,
};
use crate::error::{QueryError, Result};
use futures::FutureExt;
use parking_lot::RwLock;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs fetches against a [`QueryCache`] with deduplication and retry
pub struct QueryExecutor<T> {
    cache: Arc<QueryCache<T>>,
    config: Arc<QueryConfig>,
}

impl<T> Clone for QueryExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T> QueryExecutor<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(cache: Arc<QueryCache<T>>, config: Arc<QueryConfig>) -> Self {
        Self { cache, config }
    }

    pub fn cache(&self) -> &Arc<QueryCache<T>> {
        &self.cache
    }

    /// Fetch `key`, joining the running fetch if there is one
    ///
    /// Every caller that joins receives the same value or the same error.
    pub async fn run<F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<Arc<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (future, _) = self.start(key, None, false, fetcher);
        future.await
    }

    /// Like `run`, with options that govern this key from now on
    pub async fn run_with<F, Fut>(
        &self,
        key: &QueryKey,
        options: QueryOptions,
        fetcher: F,
    ) -> Result<Arc<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (future, _) = self.start(key, Some(options), false, fetcher);
        future.await
    }

    /// Start a new generation even if a fetch is already running
    ///
    /// Callers waiting on the older fetch still receive its result, but only
    /// this generation's result is written to the store.
    pub async fn refetch<F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<Arc<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (future, _) = self.start(key, None, true, fetcher);
        future.await
    }

    /// Start (or join) a fetch without waiting for it
    ///
    /// Returns whether a new fetch was started.
    pub fn spawn<F, Fut>(&self, key: &QueryKey, options: Option<QueryOptions>, fetcher: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (_, started) = self.start(key, options, false, fetcher);
        started
    }

    /// Abort matching in-flight fetches; their waiters get `Cancelled`
    pub fn cancel(&self, filter: &KeyFilter) -> usize {
        self.cache.cancel_matching(filter).len()
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.cache.is_fetching(key)
    }

    fn start<F, Fut>(
        &self,
        key: &QueryKey,
        options: Option<QueryOptions>,
        force: bool,
        fetcher: F,
    ) -> (SharedFetch<T>, bool)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let retries = options
            .unwrap_or_else(|| self.cache.options_for(key))
            .retry_count;
        let cache = self.cache.clone();
        let config = self.config.clone();
        let task_key = key.clone();

        self.cache.join_or_begin(key, options, force, move |generation| {
            let label = task_key.to_string();
            let handle = tokio::spawn(async move {
                let result = fetch_with_retry(&cache, &config, &task_key, fetcher, retries).await;
                cache.complete(&task_key, generation, FetchOutcome::from(result.clone()));
                result
            });
            let abort = handle.abort_handle();

            let future = async move {
                match handle.await {
                    Ok(result) => result,
                    Err(e) if e.is_cancelled() => Err(QueryError::Cancelled { key: label }),
                    Err(e) => Err(QueryError::Other(format!("Fetch task for {} failed: {}", label, e))),
                }
            }
            .boxed()
            .shared();

            InFlight {
                generation,
                future,
                abort,
            }
        })
    }
}

/// Call `fetcher` until it succeeds or `retries` extra attempts are spent
///
/// Attempts never overlap, so the key keeps a single outstanding request.
async fn fetch_with_retry<T, F, Fut>(
    cache: &QueryCache<T>,
    config: &QueryConfig,
    key: &QueryKey,
    fetcher: F,
    retries: u32,
) -> Result<Arc<T>>
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut retry_count = 0;

    loop {
        let attempt = AssertUnwindSafe(async { fetcher().await }).catch_unwind().await;
        let err = match attempt {
            Ok(Ok(data)) => {
                if retry_count > 0 {
                    debug!("Fetch for {} succeeded after {} retries", key, retry_count);
                }
                return Ok(Arc::new(data));
            }
            Ok(Err(e)) => e,
            Err(_) => anyhow::anyhow!("fetch function panicked"),
        };

        if retry_count >= retries {
            warn!("Fetch for {} failed: {:#}", key, err);
            return Err(QueryError::fetch(err));
        }

        // Wait before retrying
        retry_count += 1;
        let delay = config.retry_backoff(retry_count);
        warn!(
            "Fetch for {} failed (attempt {}/{}), retrying after {:?}: {:#}",
            key,
            retry_count,
            retries + 1,
            delay,
            err
        );
        cache.record_retry();
        tokio::time::sleep(delay).await;
    }
}

/// The key a consumer currently cares about
///
/// A caller remembers the key it started a fetch with and checks
/// `is_current` before acting on the result; mismatches are dropped quietly.
#[derive(Debug, Clone, Default)]
pub struct ActiveKey {
    current: Arc<RwLock<Option<QueryKey>>>,
}

impl ActiveKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `key` the active key, returning the previous one
    pub fn set(&self, key: QueryKey) -> Option<QueryKey> {
        self.current.write().replace(key)
    }

    pub fn clear(&self) -> Option<QueryKey> {
        self.current.write().take()
    }

    pub fn is_current(&self, key: &QueryKey) -> bool {
        self.current.read().as_ref() == Some(key)
    }

    pub fn current(&self) -> Option<QueryKey> {
        self.current.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::SystemClock;
    use crate::cache::entry::QueryStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn executor(retry_count: u32) -> QueryExecutor<String> {
        let config = QueryConfig::builder()
            .retry_count(retry_count)
            .retry_delay(Duration::from_millis(10))
            .retry_jitter(0.0)
            .build();
        let cache = Arc::new(QueryCache::with_clock(&config, Arc::new(SystemClock)));
        QueryExecutor::new(cache, Arc::new(config))
    }

    #[tokio::test]
    async fn test_run_writes_to_store() {
        let executor = executor(0);
        let key = QueryKey::from("images");

        let value = executor
            .run(&key, || async { Ok("cats".to_string()) })
            .await
            .unwrap();
        assert_eq!(value.as_str(), "cats");

        let entry = executor.cache().get(&key).unwrap();
        assert_eq!(entry.status, QueryStatus::Success);
        assert!(!entry.is_fetching);
    }

    #[tokio::test]
    async fn test_concurrent_runs_share_one_fetch() {
        let executor = executor(0);
        let key = QueryKey::from("images");
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let make_fetcher = || {
            let calls = calls.clone();
            let gate = gate.clone();
            move || {
                let calls = calls.clone();
                let gate = gate.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok("cats".to_string())
                }
            }
        };

        let first = executor.run(&key, make_fetcher());
        let second = executor.run(&key, make_fetcher());
        let third = executor.run(&key, make_fetcher());
        let release = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.notify_waiters();
        };

        let (a, b, c, _) = tokio::join!(first, second, third, release);
        assert_eq!(a.unwrap(), b.clone().unwrap());
        assert_eq!(b.unwrap(), c.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.cache().stats().deduplicated, 2);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let executor = executor(2);
        let key = QueryKey::from("flaky");
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let value = executor
            .run(&key, move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        anyhow::bail!("temporarily unavailable");
                    }
                    Ok("ok".to_string())
                }
            })
            .await
            .unwrap();

        assert_eq!(value.as_str(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.cache().stats().retries, 2);
    }

    #[tokio::test]
    async fn test_failure_after_retries() {
        let executor = executor(1);
        let key = QueryKey::from("broken");
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let result = executor
            .run(&key, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<String, _>(anyhow::anyhow!("HTTP 500")) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_fetch());
        assert!(err.to_string().contains("HTTP 500"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let entry = executor.cache().get(&key).unwrap();
        assert_eq!(entry.status, QueryStatus::Error);
    }

    #[tokio::test]
    async fn test_panicking_fetcher_is_a_failure() {
        let executor = executor(0);
        let key = QueryKey::from("panics");

        let result = executor
            .run(&key, || async {
                if true {
                    panic!("boom");
                }
                Ok("unreachable".to_string())
            })
            .await;

        assert!(result.unwrap_err().is_fetch());
        assert!(!executor.is_fetching(&key));
    }

    #[test]
    fn test_active_key() {
        let active = ActiveKey::new();
        let cats = QueryKey::from("cats");
        let dogs = QueryKey::from("dogs");

        assert!(active.current().is_none());
        assert!(active.set(cats.clone()).is_none());
        assert!(active.is_current(&cats));

        assert_eq!(active.set(dogs.clone()), Some(cats.clone()));
        assert!(!active.is_current(&cats));
        assert!(active.is_current(&dogs));

        // Clones share state
        let other = active.clone();
        other.clear();
        assert!(active.current().is_none());
    }
}
