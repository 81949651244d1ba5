//! Pages and the fetch capability that produces them

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Items requested per page when the caller has no preference
pub const DEFAULT_PER_PAGE: u32 = 20;

/// One page of results as reported by the remote API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<I> {
    pub items: Vec<I>,

    /// Total matches for the query across all pages
    pub total_hits: u64,

    /// Number of pages available; 0 means none or unknown
    pub total_pages: u32,
}

impl<I> Page<I> {
    pub fn new(items: Vec<I>, total_hits: u64, total_pages: u32) -> Self {
        Self {
            items,
            total_hits,
            total_pages,
        }
    }

    /// Derive the page count as `ceil(total_hits / per_page)`
    pub fn from_total_hits(items: Vec<I>, total_hits: u64, per_page: u32) -> Self {
        let total_pages = if per_page == 0 {
            0
        } else {
            u32::try_from(total_hits.div_ceil(u64::from(per_page))).unwrap_or(u32::MAX)
        };
        Self::new(items, total_hits, total_pages)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Fetches one page of one query
///
/// Transport, status and payload errors are all reported as `Err`.
/// Implemented for any `Fn(String, u32) -> impl Future<Output = anyhow::Result<Page<I>>>`.
pub trait PageSource<I>: Send + Sync + 'static {
    fn fetch_page(&self, query: &str, page: u32) -> BoxFuture<'static, anyhow::Result<Page<I>>>;
}

impl<I, F, Fut> PageSource<I> for F
where
    F: Fn(String, u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Page<I>>> + Send + 'static,
{
    fn fetch_page(&self, query: &str, page: u32) -> BoxFuture<'static, anyhow::Result<Page<I>>> {
        self(query.to_string(), page).boxed()
    }
}
