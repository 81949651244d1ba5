//! Periodic garbage collection of unobserved entries

use crate::cache::store::QueryCache;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Spawns the background sweep task
pub struct GcScheduler;

impl GcScheduler {
    /// Sweep `cache` every `interval` until the handle or the cache is dropped
    ///
    /// The task holds only a weak reference, so it never keeps the cache alive.
    pub fn spawn<T>(cache: &Arc<QueryCache<T>>, interval: Duration) -> GcHandle
    where
        T: Send + Sync + 'static,
    {
        let interval = if interval.is_zero() {
            warn!("GC interval of zero requested, using {:?}", MIN_INTERVAL);
            MIN_INTERVAL
        } else {
            interval
        };
        let weak = Arc::downgrade(cache);
        info!("Starting query cache GC task (interval: {:?})", interval);

        let task = tokio::spawn(run_sweeps(weak, interval));
        GcHandle { task, interval }
    }
}

async fn run_sweeps<T>(cache: Weak<QueryCache<T>>, interval: Duration)
where
    T: Send + Sync + 'static,
{
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(cache) = cache.upgrade() else {
            debug!("Query cache dropped, stopping GC task");
            return;
        };

        let event = cache.sweep();
        if !event.is_empty() {
            debug!("GC sweep: {} entries collected", event.len());
        }
    }
}

/// Owns the sweep task; dropping it stops the task
#[derive(Debug)]
pub struct GcHandle {
    task: JoinHandle<()>,
    interval: Duration,
}

impl GcHandle {
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for GcHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::config::QueryOptions;
    use crate::cache::entry::FetchOutcome;
    use crate::cache::key::QueryKey;

    fn cache_with_clock() -> (Arc<QueryCache<u32>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let options = QueryOptions {
            stale_time: Duration::from_secs(10),
            gc_time: Duration::from_secs(30),
            retry_count: 0,
        };
        (Arc::new(QueryCache::new(options, clock.clone())), clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep_collects_garbage() {
        let (cache, clock) = cache_with_clock();
        let key = QueryKey::from("images");
        cache.ensure(&key);
        cache.write(&key, FetchOutcome::Success(Arc::new(1))).unwrap();

        let handle = GcScheduler::spawn(&cache, Duration::from_secs(5));
        assert!(handle.is_running());

        // First tick: still retained
        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.len(), 1);

        clock.advance(Duration::from_secs(31));
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribed_entries_survive_sweeps() {
        let (cache, clock) = cache_with_clock();
        let key = QueryKey::from("images");
        let _sub = cache.subscribe(&key, |_| {});

        let _handle = GcScheduler::spawn(&cache, Duration::from_secs(1));
        clock.advance(Duration::from_secs(3600));
        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_stops_with_cache() {
        let (cache, _) = cache_with_clock();
        let handle = GcScheduler::spawn(&cache, Duration::from_secs(1));

        drop(cache);
        time::sleep(Duration::from_secs(2)).await;
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let (cache, _) = cache_with_clock();
        let handle = GcScheduler::spawn(&cache, Duration::ZERO);
        assert_eq!(handle.interval(), MIN_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_task() {
        let (cache, _) = cache_with_clock();
        let handle = GcScheduler::spawn(&cache, Duration::from_secs(1));

        handle.stop();
        time::sleep(Duration::from_secs(2)).await;
        assert!(!handle.is_running());
    }
}
