//! # Query Cache
//!
//! This module implements an in-memory cache for the results of async,
//! parameterised fetches.
//!
//! ## Features
//!
//! - **Canonical Keys**: Structurally equal parameters map to the same entry
//! - **Request Deduplication**: Concurrent callers for one key share one fetch
//! - **Stale-While-Revalidate**: Stale data is served while a refetch runs
//! - **Generation Checks**: A superseded fetch never overwrites newer data
//! - **Garbage Collection**: Unobserved entries are dropped after `gc_time`
//! - **Subscriptions**: Listeners are notified synchronously on every write
//!
//! ## Example
//!
//! ```rust
//! use pagequery::cache::{QueryCache, QueryConfig, QueryExecutor, QueryKey};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> pagequery::Result<()> {
//! let config = QueryConfig::builder()
//!     .stale_time(Duration::from_secs(60))
//!     .gc_time(Duration::from_secs(300))
//!     .build();
//!
//! let cache = Arc::new(QueryCache::<Vec<String>>::from_config(&config));
//! let executor = QueryExecutor::new(cache.clone(), Arc::new(config));
//!
//! let key = QueryKey::builder("images").segment("list").build();
//! let _subscription = cache.subscribe(&key, |entry| {
//!     println!("{} is now {}", entry.key, entry.status);
//! });
//!
//! let images = executor
//!     .run(&key, || async { Ok(vec!["cat.jpg".to_string()]) })
//!     .await?;
//! println!("Fetched {} images", images.len());
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod entry;
pub mod executor;
pub mod gc;
pub mod invalidation;
pub mod key;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{QueryConfig, QueryConfigBuilder, QueryOptions};
pub use entry::{CacheEntry, EntrySnapshot, FetchOutcome, QueryStatus};
pub use executor::{ActiveKey, QueryExecutor};
pub use gc::{GcHandle, GcScheduler};
pub use invalidation::{EvictionEvent, EvictionReason, KeyFilter};
pub use key::{QueryKey, QueryKeyBuilder};
pub use store::{Listener, QueryCache, Subscription};
pub use types::CacheStats;
