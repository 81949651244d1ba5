//! Query client: store, executor and GC wired together behind one handle

use crate::cache::{
    clock::{Clock, SystemClock},
    config::{QueryConfig, QueryOptions},
    entry::EntrySnapshot,
    executor::QueryExecutor,
    gc::{GcHandle, GcScheduler},
    invalidation::{EvictionEvent, KeyFilter},
    key::QueryKey,
    store::{QueryCache, Subscription},
    types::CacheStats,
};
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point for fetching through the cache
///
/// Cloning is cheap; clones share the same store.
pub struct QueryClient<T> {
    config: Arc<QueryConfig>,
    cache: Arc<QueryCache<T>>,
    executor: QueryExecutor<T>,
}

impl<T> Clone for QueryClient<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            cache: self.cache.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<T> QueryClient<T>
where
    T: Send + Sync + 'static,
{
    /// Create a client using the wall clock
    pub fn new(config: QueryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a client with a custom time source
    pub fn with_clock(config: QueryConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            "Initializing query client (stale_time: {:?}, gc_time: {:?}, retry_count: {})",
            config.stale_time, config.gc_time, config.retry_count
        );

        let config = Arc::new(config);
        let cache = Arc::new(QueryCache::with_clock(&config, clock));
        let executor = QueryExecutor::new(cache.clone(), config.clone());

        Self {
            config,
            cache,
            executor,
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<QueryCache<T>> {
        &self.cache
    }

    pub fn executor(&self) -> &QueryExecutor<T> {
        &self.executor
    }

    /// Current state of `key`, if it has a live entry
    pub fn get_entry(&self, key: &QueryKey) -> Option<EntrySnapshot<T>> {
        self.cache.get(key)
    }

    pub fn subscribe<F>(&self, key: &QueryKey, listener: F) -> Subscription
    where
        F: Fn(&EntrySnapshot<T>) + Send + Sync + 'static,
    {
        self.cache.subscribe(key, listener)
    }

    /// Fresh data for `key`: cached if within `stale_time`, fetched otherwise
    pub async fn fetch<F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<Arc<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if let Some(data) = self.fresh_data(key) {
            return Ok(data);
        }
        self.executor.run(key, fetcher).await
    }

    /// Like `fetch`, with per-query options
    pub async fn fetch_with<F, Fut>(
        &self,
        key: &QueryKey,
        options: QueryOptions,
        fetcher: F,
    ) -> Result<Arc<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if let Some(data) = self.fresh_data(key) {
            return Ok(data);
        }
        self.executor.run_with(key, options, fetcher).await
    }

    /// Stale-while-revalidate read
    ///
    /// Cached data is returned immediately, fresh or not. If it is stale a
    /// background refetch is started (or joined). Without cached data the
    /// call waits for the fetch.
    pub async fn query<F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<Arc<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let entry = self.cache.ensure(key);

        match entry.data {
            Some(data) if !entry.is_stale => {
                debug!("Cache hit: {}", key);
                self.cache.record_hit();
                Ok(data)
            }
            Some(data) => {
                debug!("Serving stale data for {}, refetching in background", key);
                self.cache.record_hit();
                if self.executor.spawn(key, None, fetcher) {
                    self.cache.record_stale_refetch();
                }
                Ok(data)
            }
            None => {
                debug!("Cache miss: {}", key);
                self.cache.record_miss();
                self.executor.run(key, fetcher).await
            }
        }
    }

    /// Warm the cache for `key` without waiting
    ///
    /// Skipped when fresh data is already cached. Returns whether a new
    /// fetch was started; joining a running one counts as not started.
    pub fn prefetch<F, Fut>(&self, key: &QueryKey, fetcher: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.prefetch_inner(key, None, fetcher)
    }

    /// Like `prefetch`, with per-query options
    pub fn prefetch_with<F, Fut>(&self, key: &QueryKey, options: QueryOptions, fetcher: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.prefetch_inner(key, Some(options), fetcher)
    }

    fn prefetch_inner<F, Fut>(&self, key: &QueryKey, options: Option<QueryOptions>, fetcher: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if self
            .cache
            .get(key)
            .is_some_and(|entry| entry.has_data() && !entry.is_stale)
        {
            debug!("Skipping prefetch of fresh key: {}", key);
            return false;
        }

        debug!("Prefetching {}", key);
        self.executor.spawn(key, options, fetcher)
    }

    /// Force a new fetch of `key`, superseding any running one
    pub async fn refetch<F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<Arc<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.executor.refetch(key, fetcher).await
    }

    /// Mark matching entries stale; their data stays readable
    pub fn invalidate(&self, filter: &KeyFilter) -> usize {
        self.cache.invalidate(filter)
    }

    /// Abort matching in-flight fetches
    pub fn cancel(&self, filter: &KeyFilter) -> usize {
        self.executor.cancel(filter)
    }

    pub fn remove(&self, key: &QueryKey) -> Option<EntrySnapshot<T>> {
        self.cache.remove(key)
    }

    pub fn remove_matching(&self, filter: &KeyFilter) -> EvictionEvent {
        self.cache.remove_matching(filter)
    }

    pub fn clear(&self) -> EvictionEvent {
        self.cache.clear()
    }

    /// Run one garbage collection pass now
    pub fn sweep(&self) -> EvictionEvent {
        self.cache.sweep()
    }

    /// Start periodic sweeps every `config.gc_interval`
    ///
    /// Nothing is swept unless this is called; dropping the handle stops it.
    pub fn start_gc(&self) -> GcHandle {
        GcScheduler::spawn(&self.cache, self.config.gc_interval)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn fresh_data(&self, key: &QueryKey) -> Option<Arc<T>> {
        match self.cache.get(key) {
            Some(entry) if !entry.is_stale => {
                debug!("Cache hit: {}", key);
                self.cache.record_hit();
                entry.data
            }
            _ => {
                debug!("Cache miss: {}", key);
                self.cache.record_miss();
                None
            }
        }
    }
}

impl<T> std::fmt::Debug for QueryClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}
