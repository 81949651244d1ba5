//! Pagination controller with placeholder data between pages

use crate::cache::{
    entry::{EntrySnapshot, QueryStatus},
    executor::ActiveKey,
    invalidation::KeyFilter,
    key::QueryKey,
    store::Subscription,
};
use crate::client::QueryClient;
use crate::error::{QueryError, Result};
use crate::pagination::debounce::Debouncer;
use crate::pagination::{is_page_of, page_key, resource_key};
use crate::pagination::prefetch::Prefetcher;
use crate::pagination::source::{Page, PageSource};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What the consumer should render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewStatus {
    /// No search yet
    Idle,
    /// Nothing to show until the fetch resolves
    Loading,
    /// Previous page shown while the requested one loads
    Transitioning,
    Success,
    Error,
}

/// Snapshot of the controller's visible state
#[derive(Debug)]
pub struct PageView<I> {
    pub query: String,
    pub page: u32,
    pub total_pages: u32,
    pub status: ViewStatus,
    pub data: Option<Arc<Page<I>>>,
    pub error: Option<QueryError>,
    /// `data` belongs to another page of the same query
    pub is_placeholder: bool,
}

impl<I> Clone for PageView<I> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            page: self.page,
            total_pages: self.total_pages,
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            is_placeholder: self.is_placeholder,
        }
    }
}

impl<I> Default for PageView<I> {
    fn default() -> Self {
        Self {
            query: String::new(),
            page: 1,
            total_pages: 0,
            status: ViewStatus::Idle,
            data: None,
            error: None,
            is_placeholder: false,
        }
    }
}

impl<I> PageView<I> {
    pub fn items(&self) -> &[I] {
        self.data.as_deref().map_or(&[], |page| page.items.as_slice())
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.status, ViewStatus::Loading | ViewStatus::Transitioning)
    }
}

struct Navigation {
    query: String,
    page: u32,
    /// Keeps the displayed key alive in the cache
    subscription: Option<Subscription>,
}

struct ControllerInner<I> {
    client: QueryClient<Page<I>>,
    resource: Arc<str>,
    source: Arc<dyn PageSource<I>>,
    prefetcher: Prefetcher<I>,
    active: ActiveKey,
    nav: Mutex<Navigation>,
    view: watch::Sender<PageView<I>>,
}

/// Owns the `(query, page)` state of one consumer
///
/// Clones share state.
pub struct PaginationController<I> {
    inner: Arc<ControllerInner<I>>,
}

impl<I> Clone for PaginationController<I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<I> PaginationController<I>
where
    I: Send + Sync + 'static,
{
    /// Build a controller for `resource` on top of `client`
    ///
    /// The controller does not sweep the cache. Pages it navigates away from
    /// only become collectable; keep a `client.start_gc()` handle alive (or
    /// call `client.sweep()`) to actually evict them.
    pub fn new<S>(client: QueryClient<Page<I>>, resource: impl Into<Arc<str>>, source: S) -> Self
    where
        S: PageSource<I>,
    {
        let resource = resource.into();
        let source: Arc<dyn PageSource<I>> = Arc::new(source);
        let prefetcher = Prefetcher::new(client.clone(), resource.clone(), source.clone());
        let (view, _) = watch::channel(PageView::default());

        info!("Initializing pagination controller for {}", resource);

        Self {
            inner: Arc::new(ControllerInner {
                client,
                resource,
                source,
                prefetcher,
                active: ActiveKey::new(),
                nav: Mutex::new(Navigation {
                    query: String::new(),
                    page: 1,
                    subscription: None,
                }),
                view,
            }),
        }
    }

    /// Start a new search at page 1
    ///
    /// Blank queries are ignored and leave the current results in place.
    /// Returns `Ok(true)` when the result was applied to the view and
    /// `Ok(false)` when the call was a no-op or was superseded.
    pub async fn search(&self, query: &str) -> Result<bool> {
        let query = query.trim();
        if query.is_empty() {
            debug!("Ignoring blank search");
            return Ok(false);
        }
        self.load(query.to_string(), 1).await
    }

    /// Move to `page` of the current search
    ///
    /// Ignored without a search, outside `1..=total_pages`, or when `page`
    /// is already the current page.
    pub async fn go_to_page(&self, page: u32) -> Result<bool> {
        let (query, current) = {
            let nav = self.inner.nav.lock();
            (nav.query.clone(), nav.page)
        };
        let total_pages = self.inner.view.borrow().total_pages;

        if query.is_empty() || page < 1 || page > total_pages || page == current {
            debug!(
                "Ignoring navigation to page {} (current {}, total {})",
                page, current, total_pages
            );
            return Ok(false);
        }
        self.load(query, page).await
    }

    pub fn view(&self) -> PageView<I> {
        self.inner.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<PageView<I>> {
        self.inner.view.subscribe()
    }

    /// Key of the page currently requested, if any
    pub fn active_key(&self) -> Option<QueryKey> {
        self.inner.active.current()
    }

    pub fn query(&self) -> String {
        self.inner.nav.lock().query.clone()
    }

    pub fn page(&self) -> u32 {
        self.inner.nav.lock().page
    }

    pub fn client(&self) -> &QueryClient<Page<I>> {
        &self.inner.client
    }

    pub fn prefetcher(&self) -> &Prefetcher<I> {
        &self.inner.prefetcher
    }

    /// Mark every cached page of `query` stale
    ///
    /// Pages stay visible; the next visit refetches them in the background.
    pub fn invalidate_query(&self, query: &str) -> usize {
        let resource = self.inner.resource.clone();
        let query = query.trim().to_string();
        self.inner
            .client
            .invalidate(&KeyFilter::predicate(move |key| is_page_of(key, &resource, &query)))
    }

    /// Mark every cached page of this resource stale
    pub fn invalidate_all(&self) -> usize {
        self.inner
            .client
            .invalidate(&KeyFilter::prefix(resource_key(&self.inner.resource)))
    }

    /// Debounce gate feeding settled input into `search`
    pub fn debounced_search(&self) -> Debouncer<String> {
        let controller = self.clone();
        Debouncer::new(self.inner.client.config().debounce_delay, move |query: String| {
            let controller = controller.clone();
            tokio::spawn(async move {
                if let Err(e) = controller.search(&query).await {
                    debug!("Debounced search for {:?} failed: {}", query, e);
                }
            });
        })
    }

    async fn load(&self, query: String, page: u32) -> Result<bool> {
        let inner = &self.inner;
        let key = page_key(&inner.resource, &query, page);
        inner.active.set(key.clone());

        let same_query = {
            let mut nav = inner.nav.lock();
            let same = nav.query == query;
            nav.query = query.clone();
            nav.page = page;
            same
        };

        let cached = inner.client.get_entry(&key).and_then(|entry| entry.data);
        inner.view.send_modify(|view| {
            let keep_previous = same_query && cached.is_none() && view.data.is_some();
            view.query = query.clone();
            view.page = page;
            view.error = None;
            if !same_query {
                view.total_pages = 0;
            }

            match &cached {
                Some(data) => {
                    view.total_pages = data.total_pages;
                    view.data = Some(data.clone());
                    view.status = ViewStatus::Success;
                    view.is_placeholder = false;
                }
                None if keep_previous => {
                    view.status = ViewStatus::Transitioning;
                    view.is_placeholder = true;
                }
                None => {
                    view.data = None;
                    view.status = ViewStatus::Loading;
                    view.is_placeholder = false;
                }
            }
        });

        // Swap the subscription only after the interim view is out
        let weak = Arc::downgrade(inner);
        let listener_key = key.clone();
        let subscription = inner.client.subscribe(&key, move |entry| {
            if let Some(inner) = weak.upgrade() {
                apply_entry(&inner, &listener_key, entry);
            }
        });
        let previous = inner.nav.lock().subscription.replace(subscription);
        drop(previous);

        let source = inner.source.clone();
        let fetch_query = query.clone();
        let result = inner
            .client
            .query(&key, move || source.fetch_page(&fetch_query, page))
            .await;

        if !inner.active.is_current(&key) {
            debug!("Discarding superseded result for {}", key);
            return Ok(false);
        }

        match result {
            Ok(data) => {
                // The entry may already hold something newer than `data`
                let latest = inner
                    .client
                    .get_entry(&key)
                    .and_then(|entry| entry.data)
                    .unwrap_or(data);
                let total_pages = latest.total_pages;
                let applied = publish_success(inner, &key, latest);

                if applied && inner.client.config().prefetch_next_page {
                    inner.prefetcher.prefetch_next(&query, page, total_pages);
                }
                Ok(applied)
            }
            Err(e) => {
                warn!("Loading page {} of {:?} failed: {}", page, query, e);
                publish_error(inner, &key, e.clone(), None);
                Err(e)
            }
        }
    }
}

/// Reflect a cache write for `key` in the view, if `key` is still active
fn apply_entry<I>(inner: &ControllerInner<I>, key: &QueryKey, entry: &EntrySnapshot<Page<I>>) {
    match entry.status {
        QueryStatus::Success => {
            if let Some(data) = entry.data.clone() {
                publish_success(inner, key, data);
            }
        }
        QueryStatus::Error => {
            if let Some(error) = entry.error.clone() {
                publish_error(inner, key, error, entry.data.clone());
            }
        }
        QueryStatus::Idle | QueryStatus::Loading => {}
    }
}

fn publish_success<I>(inner: &ControllerInner<I>, key: &QueryKey, data: Arc<Page<I>>) -> bool {
    let mut applied = false;
    inner.view.send_if_modified(|view| {
        if !inner.active.is_current(key) {
            return false;
        }
        applied = true;

        let unchanged = view.status == ViewStatus::Success
            && view.data.as_ref().is_some_and(|current| Arc::ptr_eq(current, &data));
        if unchanged {
            return false;
        }

        view.total_pages = data.total_pages;
        view.data = Some(data);
        view.status = ViewStatus::Success;
        view.error = None;
        view.is_placeholder = false;
        true
    });
    applied
}

fn publish_error<I>(
    inner: &ControllerInner<I>,
    key: &QueryKey,
    error: QueryError,
    data: Option<Arc<Page<I>>>,
) {
    inner.view.send_if_modified(|view| {
        if !inner.active.is_current(key) {
            return false;
        }

        view.status = ViewStatus::Error;
        view.error = Some(error);
        if let Some(data) = data {
            view.total_pages = data.total_pages;
            view.data = Some(data);
            view.is_placeholder = false;
        }
        true
    });
}

impl<I> fmt::Debug for PaginationController<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nav = self.inner.nav.lock();
        f.debug_struct("PaginationController")
            .field("resource", &self.inner.resource)
            .field("query", &nav.query)
            .field("page", &nav.page)
            .finish()
    }
}
