//! Cache store: key -> entry map, listener registry and entry lifecycle

use crate::cache::{
    clock::{Clock, SystemClock},
    config::{QueryConfig, QueryOptions},
    entry::{CacheEntry, EntrySnapshot, FetchOutcome, InFlight, QueryStatus, SharedFetch},
    invalidation::{EvictionEvent, EvictionReason, KeyFilter},
    key::QueryKey,
    types::CacheStats,
};
use crate::error::{QueryError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use uuid::Uuid;

/// Callback invoked with the entry's new state after every write
pub type Listener<T> = Arc<dyn Fn(&EntrySnapshot<T>) + Send + Sync>;

/// In-memory query cache
///
/// This implementation provides:
/// - One entry per canonical key, created on first access
/// - Synchronous listener notification on every write
/// - Idempotent subscriptions that pin entries against collection
/// - Invalidation that keeps last-known data visible
/// - Garbage collection of unobserved entries past their retention window
pub struct QueryCache<T> {
    /// Internal storage
    store: RwLock<CacheStore<T>>,

    /// Time source for freshness decisions
    clock: Arc<dyn Clock>,

    /// Options for entries created without explicit ones
    defaults: QueryOptions,

    enable_metrics: bool,
}

/// Internal cache storage
struct CacheStore<T> {
    /// Main storage: key -> entry
    entries: HashMap<QueryKey, CacheEntry<T>>,

    /// Listener registry: key -> (subscription id, listener)
    listeners: HashMap<QueryKey, Vec<(Uuid, Listener<T>)>>,

    /// Current cache statistics
    stats: CacheStats,
}

impl<T> CacheStore<T> {
    fn listener_count(&self, key: &QueryKey) -> usize {
        self.listeners.get(key).map_or(0, Vec::len)
    }

    fn listeners_for(&self, key: &QueryKey) -> Vec<Listener<T>> {
        self.listeners
            .get(key)
            .map(|ls| ls.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }

    /// Existing live entry, or a fresh idle one (replacing garbage)
    fn ensure_entry(
        &mut self,
        key: &QueryKey,
        options: QueryOptions,
        now: DateTime<Utc>,
    ) -> &mut CacheEntry<T> {
        if self.entries.get(key).is_some_and(|e| e.is_garbage(now)) {
            debug!("Replacing collectable entry: {}", key);
            self.entries.remove(key);
            self.stats.evictions += 1;
        }

        let subscribers = self.listener_count(key);
        self.entries.entry(key.clone()).or_insert_with(|| {
            debug!("Creating cache entry: {}", key);
            let mut entry = CacheEntry::new(key.clone(), options, now);
            entry.subscriber_count = subscribers;
            entry
        })
    }

    /// Drop an entry, aborting its in-flight fetch
    fn remove_entry(&mut self, key: &QueryKey) -> Option<CacheEntry<T>> {
        let mut entry = self.entries.remove(key)?;
        if let Some(in_flight) = entry.in_flight.take() {
            in_flight.abort.abort();
        }
        Some(entry)
    }
}

impl<T> QueryCache<T>
where
    T: Send + Sync + 'static,
{
    /// Create a store with the given default options and clock
    pub fn new(defaults: QueryOptions, clock: Arc<dyn Clock>) -> Self {
        info!("Initializing query cache with defaults: {:?}", defaults);

        Self {
            store: RwLock::new(CacheStore {
                entries: HashMap::new(),
                listeners: HashMap::new(),
                stats: CacheStats::default(),
            }),
            clock,
            defaults,
            enable_metrics: true,
        }
    }

    /// Create a store from a query configuration, using the wall clock
    pub fn from_config(config: &QueryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store from a query configuration and a custom clock
    pub fn with_clock(config: &QueryConfig, clock: Arc<dyn Clock>) -> Self {
        let mut cache = Self::new(config.query_options(), clock);
        cache.enable_metrics = config.enable_metrics;
        cache
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn default_options(&self) -> QueryOptions {
        self.defaults
    }

    /// Look up an entry; collectable entries read as absent
    pub fn get(&self, key: &QueryKey) -> Option<EntrySnapshot<T>> {
        let now = self.now();
        let store = self.store.read();
        store
            .entries
            .get(key)
            .filter(|entry| !entry.is_garbage(now))
            .map(|entry| entry.snapshot(now))
    }

    /// Return the entry for `key`, creating an idle one if needed
    pub fn ensure(&self, key: &QueryKey) -> EntrySnapshot<T> {
        let now = self.now();
        let mut store = self.store.write();
        store.ensure_entry(key, self.defaults, now).snapshot(now)
    }

    /// Like `ensure`, and make `options` govern the entry's next writes
    pub fn ensure_with(&self, key: &QueryKey, options: QueryOptions) -> EntrySnapshot<T> {
        let now = self.now();
        let mut store = self.store.write();
        let entry = store.ensure_entry(key, options, now);
        entry.options = options;
        entry.snapshot(now)
    }

    /// Record a fetch result and notify subscribers of `key`
    ///
    /// Writing to a key that was never ensured is a caller bug and is
    /// reported as `QueryError::MissingEntry`.
    pub fn write(&self, key: &QueryKey, outcome: FetchOutcome<T>) -> Result<()> {
        let now = self.now();
        let (snapshot, listeners) = {
            let mut store = self.store.write();
            let failed = matches!(outcome, FetchOutcome::Failure(_));
            let entry = store
                .entries
                .get_mut(key)
                .ok_or_else(|| QueryError::MissingEntry(key.to_string()))?;
            entry.apply(outcome, now);
            let snapshot = entry.snapshot(now);
            if failed && self.enable_metrics {
                store.stats.failures += 1;
            }
            (snapshot, store.listeners_for(key))
        };

        Self::notify(&snapshot, &listeners);
        Ok(())
    }

    /// Register a listener for `key`
    ///
    /// The entry is created if needed and cannot be collected while the
    /// returned subscription is live. Dropping the subscription unsubscribes.
    pub fn subscribe<F>(self: &Arc<Self>, key: &QueryKey, listener: F) -> Subscription
    where
        F: Fn(&EntrySnapshot<T>) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let now = self.now();
        {
            let mut store = self.store.write();
            store.ensure_entry(key, self.defaults, now);
            store
                .listeners
                .entry(key.clone())
                .or_default()
                .push((id, Arc::new(listener)));
            let count = store.listener_count(key);
            if let Some(entry) = store.entries.get_mut(key) {
                entry.subscriber_count = count;
            }
        }
        debug!("Subscribed {} to {}", id, key);

        let weak: Weak<Self> = Arc::downgrade(self);
        let key = key.clone();
        Subscription {
            id,
            disposer: Some(Box::new(move || {
                if let Some(cache) = weak.upgrade() {
                    cache.unsubscribe(&key, id);
                }
            })),
        }
    }

    fn unsubscribe(&self, key: &QueryKey, id: Uuid) {
        let mut store = self.store.write();
        let Some(listeners) = store.listeners.get_mut(key) else {
            return;
        };
        listeners.retain(|(lid, _)| *lid != id);
        if listeners.is_empty() {
            store.listeners.remove(key);
        }

        let count = store.listener_count(key);
        if let Some(entry) = store.entries.get_mut(key) {
            entry.subscriber_count = count;
        }
        debug!("Unsubscribed {} from {}", id, key);
    }

    /// Mark matching entries stale without touching their data
    pub fn invalidate(&self, filter: &KeyFilter) -> usize {
        let mut store = self.store.write();
        let mut invalidated = 0;

        for (key, entry) in store.entries.iter_mut() {
            if filter.matches(key) {
                entry.mark_invalidated();
                invalidated += 1;
            }
        }

        if self.enable_metrics {
            store.stats.invalidations += invalidated as u64;
        }
        info!("Invalidated {} entries matching {:?}", invalidated, filter);

        invalidated
    }

    /// Remove every unobserved entry past its retention window
    ///
    /// Safe to call at any time and any number of times.
    pub fn sweep(&self) -> EvictionEvent {
        let now = self.now();
        let mut store = self.store.write();

        let collectable: Vec<QueryKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_garbage(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &collectable {
            store.remove_entry(key);
        }

        if self.enable_metrics {
            store.stats.evictions += collectable.len() as u64;
        }
        if !collectable.is_empty() {
            debug!("Collected {} entries", collectable.len());
        }

        EvictionEvent::new(EvictionReason::Collected, collectable, now)
    }

    /// Remove an entry regardless of subscribers, cancelling its fetch
    pub fn remove(&self, key: &QueryKey) -> Option<EntrySnapshot<T>> {
        let now = self.now();
        let mut store = self.store.write();
        let entry = store.remove_entry(key)?;
        debug!("Removed cache entry: {}", key);
        Some(entry.snapshot(now))
    }

    /// Remove all matching entries
    pub fn remove_matching(&self, filter: &KeyFilter) -> EvictionEvent {
        let now = self.now();
        let mut store = self.store.write();
        let keys: Vec<QueryKey> = store
            .entries
            .keys()
            .filter(|key| filter.matches(key))
            .cloned()
            .collect();

        for key in &keys {
            store.remove_entry(key);
        }

        EvictionEvent::new(EvictionReason::Manual, keys, now)
    }

    /// Clear all entries; listeners stay registered
    pub fn clear(&self) -> EvictionEvent {
        let now = self.now();
        let mut store = self.store.write();
        let keys: Vec<QueryKey> = store.entries.keys().cloned().collect();
        for key in &keys {
            store.remove_entry(key);
        }
        info!("Cleared {} entries from query cache", keys.len());
        EvictionEvent::new(EvictionReason::Cleared, keys, now)
    }

    pub fn contains_key(&self, key: &QueryKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of entries, collectable ones included until swept
    pub fn len(&self) -> usize {
        self.store.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().entries.is_empty()
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self.store.read().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let store = self.store.read();
        let mut stats = store.stats.clone();
        stats.entries = store.entries.len();
        stats
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.store
            .read()
            .entries
            .get(key)
            .is_some_and(|e| e.in_flight.is_some())
    }

    /// Join the running fetch for `key` or install a new one
    ///
    /// `begin` receives the new generation and must start the fetch. With
    /// `force`, a new generation starts even if one is running; the older
    /// completion is then discarded. Returns the shared future and whether
    /// this call started it.
    pub(crate) fn join_or_begin<B>(
        &self,
        key: &QueryKey,
        options: Option<QueryOptions>,
        force: bool,
        begin: B,
    ) -> (SharedFetch<T>, bool)
    where
        B: FnOnce(u64) -> InFlight<T>,
    {
        let now = self.now();
        let mut store = self.store.write();
        let entry = store.ensure_entry(key, options.unwrap_or(self.defaults), now);
        if let Some(options) = options {
            entry.options = options;
        }

        if !force {
            if let Some(in_flight) = &entry.in_flight {
                let future = in_flight.future.clone();
                debug!("Joining in-flight fetch for {} (generation {})", key, in_flight.generation);
                if self.enable_metrics {
                    store.stats.deduplicated += 1;
                }
                return (future, false);
            }
        }

        entry.generation += 1;
        let in_flight = begin(entry.generation);
        let future = in_flight.future.clone();
        debug!("Starting fetch for {} (generation {})", key, entry.generation);
        entry.in_flight = Some(in_flight);
        entry.status = QueryStatus::Loading;

        if self.enable_metrics {
            store.stats.fetches += 1;
        }
        (future, true)
    }

    /// Options currently governing `key`
    pub(crate) fn options_for(&self, key: &QueryKey) -> QueryOptions {
        self.store
            .read()
            .entries
            .get(key)
            .map_or(self.defaults, |e| e.options)
    }

    /// Apply a finished fetch if it is still the latest generation for `key`
    pub(crate) fn complete(&self, key: &QueryKey, generation: u64, outcome: FetchOutcome<T>) -> bool {
        let now = self.now();
        let (snapshot, listeners) = {
            let mut store = self.store.write();
            let latest = store.entries.get(key).map(|e| e.generation);

            if latest != Some(generation) {
                debug!(
                    "Discarding completion for {} (generation {}, latest {:?})",
                    key, generation, latest
                );
                if self.enable_metrics {
                    store.stats.discarded += 1;
                }
                return false;
            }

            let failed = matches!(outcome, FetchOutcome::Failure(_));
            let Some(entry) = store.entries.get_mut(key) else {
                return false;
            };
            if entry.in_flight.as_ref().is_some_and(|f| f.generation == generation) {
                entry.in_flight = None;
            }
            entry.apply(outcome, now);
            let snapshot = entry.snapshot(now);

            if failed && self.enable_metrics {
                store.stats.failures += 1;
            }
            (snapshot, store.listeners_for(key))
        };

        Self::notify(&snapshot, &listeners);
        true
    }

    /// Abort matching in-flight fetches and settle their entries
    pub(crate) fn cancel_matching(&self, filter: &KeyFilter) -> Vec<QueryKey> {
        let mut store = self.store.write();
        let mut cancelled = Vec::new();

        for (key, entry) in store.entries.iter_mut() {
            if !filter.matches(key) {
                continue;
            }
            if let Some(in_flight) = entry.in_flight.take() {
                in_flight.abort.abort();
                // A completion already past its last await must not land
                entry.generation += 1;
                entry.status = entry.settled_status();
                cancelled.push(key.clone());
            }
        }

        if !cancelled.is_empty() {
            info!("Cancelled {} in-flight fetches", cancelled.len());
        }
        cancelled
    }

    pub(crate) fn record_hit(&self) {
        if self.enable_metrics {
            self.store.write().stats.hits += 1;
        }
    }

    pub(crate) fn record_miss(&self) {
        if self.enable_metrics {
            self.store.write().stats.misses += 1;
        }
    }

    pub(crate) fn record_retry(&self) {
        if self.enable_metrics {
            self.store.write().stats.retries += 1;
        }
    }

    pub(crate) fn record_stale_refetch(&self) {
        if self.enable_metrics {
            self.store.write().stats.stale_refetches += 1;
        }
    }

    // Listeners run outside the lock so they may read the store again.
    fn notify(snapshot: &EntrySnapshot<T>, listeners: &[Listener<T>]) {
        for listener in listeners {
            listener(snapshot);
        }
    }
}

impl<T> fmt::Debug for QueryCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.store.read();
        f.debug_struct("QueryCache")
            .field("entries", &store.entries.len())
            .field("defaults", &self.defaults)
            .finish()
    }
}

/// Handle returned by `subscribe`; unsubscribes once, on demand or on drop
pub struct Subscription {
    id: Uuid,
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.disposer.is_some()
    }

    /// Stop receiving notifications; later calls do nothing
    pub fn unsubscribe(&mut self) {
        if let Some(dispose) = self.disposer.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
