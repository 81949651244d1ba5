//! Background warming of the next page

use crate::client::QueryClient;
use crate::pagination::page_key;
use crate::pagination::source::{Page, PageSource};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Prefetches page N+1 through the same cache path as regular loads
///
/// Prefetches never subscribe to the key, so they cannot disturb what a
/// controller is currently showing. A later load of the same page joins the
/// in-flight prefetch instead of fetching twice.
pub struct Prefetcher<I> {
    client: QueryClient<Page<I>>,
    resource: Arc<str>,
    source: Arc<dyn PageSource<I>>,
}

impl<I> Clone for Prefetcher<I> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            resource: self.resource.clone(),
            source: self.source.clone(),
        }
    }
}

impl<I> Prefetcher<I>
where
    I: Send + Sync + 'static,
{
    pub fn new(
        client: QueryClient<Page<I>>,
        resource: impl Into<Arc<str>>,
        source: Arc<dyn PageSource<I>>,
    ) -> Self {
        Self {
            client,
            resource: resource.into(),
            source,
        }
    }

    /// Warm `current_page + 1` of `query`
    ///
    /// Does nothing for a blank query or when the next page would exceed
    /// `total_pages` (0 meaning unknown). Returns whether a fetch started.
    pub fn prefetch_next(&self, query: &str, current_page: u32, total_pages: u32) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return false;
        }

        let next_page = current_page.saturating_add(1);
        if next_page > total_pages {
            return false;
        }

        let key = page_key(&self.resource, query, next_page);
        let source = self.source.clone();
        let query = query.to_string();
        let started = self
            .client
            .prefetch(&key, move || source.fetch_page(&query, next_page));

        if started {
            debug!("Prefetch started for page {} of {}", next_page, key);
        }
        started
    }
}

impl<I> fmt::Debug for Prefetcher<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prefetcher")
            .field("resource", &self.resource)
            .finish()
    }
}
