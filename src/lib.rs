//! # pagequery
//!
//! An async query cache for parameterised, paginated fetches.
//!
//! ## Features
//!
//! - Canonical cache keys built from serialisable parameters
//! - Request deduplication: concurrent callers for one key share one fetch
//! - Stale-while-revalidate reads with configurable `stale_time`
//! - Periodic garbage collection of unobserved entries after `gc_time`
//! - Transparent retries with exponential backoff
//! - Pagination with placeholder data between pages
//! - Background prefetch of the next page
//! - Debounced search input
//!
//! ## Fetching Through the Cache
//!
//! ```no_run
//! use pagequery::{QueryClient, QueryConfig, QueryKey};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client: QueryClient<Vec<String>> = QueryClient::new(QueryConfig::from_env()?);
//!     let _gc = client.start_gc();
//!
//!     let key = QueryKey::builder("images").segment("list").build();
//!     let images = client
//!         .fetch(&key, || async { Ok(vec!["cat.jpg".to_string()]) })
//!         .await?;
//!     println!("Fetched {} images", images.len());
//!
//!     // Served from cache while fresh
//!     let again = client.fetch(&key, || async { Ok(vec![]) }).await?;
//!     assert_eq!(images, again);
//!     Ok(())
//! }
//! ```
//!
//! ## Paginated Search
//!
//! ```no_run
//! use pagequery::{Page, PaginationController, QueryClient, QueryConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     pagequery::logging::init_tracing("pagequery=info");
//!
//!     let client = QueryClient::new(QueryConfig::default());
//!     // Pages nobody watches are collected while the handle lives
//!     let _gc = client.start_gc();
//!
//!     let controller = PaginationController::new(client, "images", |query: String, page: u32| async move {
//!         // Call the remote API here
//!         let items = vec![format!("{} #{}", query, page)];
//!         Ok::<_, anyhow::Error>(Page::from_total_hits(items, 120, 20))
//!     });
//!
//!     controller.search("nature").await?;
//!     controller.go_to_page(2).await?;
//!
//!     let view = controller.view();
//!     println!("Page {}/{}: {:?}", view.page, view.total_pages, view.items());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod logging;
pub mod pagination;

// Re-export main types for convenience
pub use cache::{
    ActiveKey, CacheStats, Clock, EntrySnapshot, EvictionEvent, EvictionReason, FetchOutcome,
    GcHandle, GcScheduler, KeyFilter, ManualClock, QueryCache, QueryConfig, QueryConfigBuilder,
    QueryExecutor, QueryKey, QueryKeyBuilder, QueryOptions, QueryStatus, Subscription,
    SystemClock,
};
pub use client::QueryClient;
pub use error::{QueryError, Result};
pub use pagination::{
    Debouncer, Page, PageSource, PageView, PaginationController, Prefetcher, ViewStatus,
};
