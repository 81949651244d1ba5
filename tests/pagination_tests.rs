//! Integration tests for paginated search
//!
//! Covers placeholder continuity between pages, debounced input, prefetch
//! boundaries and the race guard against superseded results.

use pagequery::pagination::page_key;
use pagequery::{
    ManualClock, Page, PaginationController, QueryClient, QueryConfig, QueryKey, ViewStatus,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq)]
struct Image {
    id: String,
}

/// Page source that records calls and can hold or fail chosen requests
#[derive(Clone, Default)]
struct FakeApi {
    calls: Arc<Mutex<HashMap<(String, u32), usize>>>,
    held: Arc<Mutex<HashSet<(String, u32)>>>,
    failing: Arc<Mutex<HashSet<(String, u32)>>>,
    gate: Arc<Notify>,
}

impl FakeApi {
    fn fail(&self, query: &str, page: u32) {
        self.failing.lock().insert((query.to_string(), page));
    }

    fn recover(&self, query: &str, page: u32) {
        self.failing.lock().remove(&(query.to_string(), page));
    }

    fn hold(&self, query: &str, page: u32) {
        self.held.lock().insert((query.to_string(), page));
    }

    fn release(&self) {
        self.gate.notify_waiters();
    }

    fn calls(&self, query: &str, page: u32) -> usize {
        self.calls
            .lock()
            .get(&(query.to_string(), page))
            .copied()
            .unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    fn source(
        &self,
    ) -> impl Fn(String, u32) -> futures::future::BoxFuture<'static, anyhow::Result<Page<Image>>>
           + Send
           + Sync
           + 'static {
        let api = self.clone();
        move |query: String, page: u32| {
            let api = api.clone();
            Box::pin(async move {
                *api.calls.lock().entry((query.clone(), page)).or_default() += 1;
                let held = api.held.lock().contains(&(query.clone(), page));
                if held {
                    api.gate.notified().await;
                }
                if api.failing.lock().contains(&(query.clone(), page)) {
                    anyhow::bail!("HTTP 503 for {} page {}", query, page);
                }
                let items = vec![Image {
                    id: format!("{}-{}", query, page),
                }];
                Ok(Page::from_total_hits(items, 100, 20))
            })
        }
    }
}

fn controller(api: &FakeApi, prefetch: bool) -> PaginationController<Image> {
    let config = QueryConfig::builder()
        .retry_count(0)
        .debounce_delay(Duration::from_millis(300))
        .prefetch_next_page(prefetch)
        .build();
    PaginationController::new(QueryClient::new(config), "images", api.source())
}

fn ids(view: &pagequery::PageView<Image>) -> Vec<String> {
    view.items().iter().map(|image| image.id.clone()).collect()
}

async fn wait_for_call(api: &FakeApi, query: &str, page: u32) {
    while api.calls(query, page) == 0 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_placeholder_data_survives_page_transition() {
    let api = FakeApi::default();
    let controller = controller(&api, false);

    controller.search("cats").await.unwrap();
    assert_eq!(ids(&controller.view()), vec!["cats-1"]);

    api.hold("cats", 2);
    let mut views = controller.subscribe_view();
    let navigation = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.go_to_page(2).await })
    };
    wait_for_call(&api, "cats", 2).await;

    let transitioning = views
        .wait_for(|view| view.status == ViewStatus::Transitioning)
        .await
        .unwrap()
        .clone();
    assert_eq!(transitioning.page, 2);
    assert!(transitioning.is_placeholder);
    assert!(transitioning.is_loading());
    assert_eq!(ids(&transitioning), vec!["cats-1"]);

    // Record everything the consumer could observe from here on
    let observed = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let observed = observed.clone();
        let mut views = controller.subscribe_view();
        tokio::spawn(async move {
            while views.changed().await.is_ok() {
                let view = views.borrow_and_update().clone();
                let done = view.status == ViewStatus::Success;
                observed.lock().push(view);
                if done {
                    break;
                }
            }
        })
    };

    api.release();
    assert!(navigation.await.unwrap().unwrap());
    recorder.await.unwrap();

    let view = controller.view();
    assert_eq!(view.status, ViewStatus::Success);
    assert!(!view.is_placeholder);
    assert_eq!(ids(&view), vec!["cats-2"]);
    assert!(observed.lock().iter().all(|view| view.data.is_some()));
}

#[tokio::test]
async fn test_new_query_does_not_use_placeholder() {
    let api = FakeApi::default();
    let controller = controller(&api, false);
    controller.search("cats").await.unwrap();

    api.hold("dogs", 1);
    let mut views = controller.subscribe_view();
    let search = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.search("dogs").await })
    };

    let loading = views
        .wait_for(|view| view.query == "dogs")
        .await
        .unwrap()
        .clone();
    assert_eq!(loading.status, ViewStatus::Loading);
    assert!(loading.data.is_none());

    wait_for_call(&api, "dogs", 1).await;
    api.release();
    assert!(search.await.unwrap().unwrap());
    assert_eq!(ids(&controller.view()), vec!["dogs-1"]);
}

#[tokio::test]
async fn test_superseded_result_is_discarded() {
    let api = FakeApi::default();
    let controller = controller(&api, false);

    api.hold("cats", 1);
    let stale_search = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.search("cats").await })
    };
    wait_for_call(&api, "cats", 1).await;

    assert!(controller.search("dogs").await.unwrap());
    assert_eq!(ids(&controller.view()), vec!["dogs-1"]);

    api.release();
    assert!(!stale_search.await.unwrap().unwrap());

    let view = controller.view();
    assert_eq!(view.query, "dogs");
    assert_eq!(ids(&view), vec!["dogs-1"]);
    assert_eq!(controller.active_key(), Some(page_key("images", "dogs", 1)));
}

#[tokio::test(start_paused = true)]
async fn test_debounced_typing_settles_once() {
    let api = FakeApi::default();
    let controller = controller(&api, false);
    let input = controller.debounced_search();

    for partial in ["n", "na", "nat", "nature"] {
        input.emit(partial.to_string());
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let mut views = controller.subscribe_view();
    views
        .wait_for(|view| view.status == ViewStatus::Success)
        .await
        .unwrap();

    assert_eq!(api.total_calls(), 1);
    assert_eq!(api.calls("nature", 1), 1);
    assert_eq!(controller.query(), "nature");
}

#[tokio::test(start_paused = true)]
async fn test_dropped_debouncer_never_searches() {
    let api = FakeApi::default();
    let controller = controller(&api, false);

    let input = controller.debounced_search();
    input.emit("cats".to_string());
    drop(input);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(api.total_calls(), 0);
    assert_eq!(controller.view().status, ViewStatus::Idle);
}

#[tokio::test]
async fn test_prefetch_boundaries_make_no_calls() {
    let api = FakeApi::default();
    let controller = controller(&api, false);
    let prefetcher = controller.prefetcher();

    assert!(!prefetcher.prefetch_next("cats", 5, 5));
    assert!(!prefetcher.prefetch_next("", 1, 5));
    assert!(!prefetcher.prefetch_next("cats", 1, 0));

    tokio::task::yield_now().await;
    assert_eq!(api.total_calls(), 0);
}

#[tokio::test]
async fn test_navigation_joins_in_flight_prefetch() {
    let api = FakeApi::default();
    let controller = controller(&api, false);
    controller.search("cats").await.unwrap();

    api.hold("cats", 2);
    assert!(controller.prefetcher().prefetch_next("cats", 1, 5));
    wait_for_call(&api, "cats", 2).await;

    // Prefetching does not touch what is on screen
    let view = controller.view();
    assert_eq!(view.status, ViewStatus::Success);
    assert_eq!(ids(&view), vec!["cats-1"]);

    let navigation = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.go_to_page(2).await })
    };
    let mut views = controller.subscribe_view();
    views
        .wait_for(|view| view.status == ViewStatus::Transitioning)
        .await
        .unwrap();

    api.release();
    assert!(navigation.await.unwrap().unwrap());
    assert_eq!(ids(&controller.view()), vec!["cats-2"]);
    assert_eq!(api.calls("cats", 2), 1);
}

#[tokio::test]
async fn test_resolved_page_prefetches_the_next_one() {
    let api = FakeApi::default();
    let controller = controller(&api, true);

    controller.search("cats").await.unwrap();
    assert_eq!(controller.view().total_pages, 5);
    wait_for_call(&api, "cats", 2).await;

    let next: QueryKey = page_key("images", "cats", 2);
    while controller.client().executor().is_fetching(&next) {
        tokio::task::yield_now().await;
    }

    // Page 2 comes from cache
    assert!(controller.go_to_page(2).await.unwrap());
    assert_eq!(api.calls("cats", 2), 1);
    assert_eq!(ids(&controller.view()), vec!["cats-2"]);

    // The last page has nothing after it
    wait_for_call(&api, "cats", 3).await;
    controller.go_to_page(5).await.unwrap();
    tokio::task::yield_now().await;
    assert_eq!(api.calls("cats", 6), 0);
}

#[tokio::test]
async fn test_failed_prefetch_leaves_view_untouched() {
    let api = FakeApi::default();
    api.fail("cats", 2);
    let controller = controller(&api, true);

    assert!(controller.search("cats").await.unwrap());
    wait_for_call(&api, "cats", 2).await;

    let next = page_key("images", "cats", 2);
    let client = controller.client();
    while client.executor().is_fetching(&next) {
        tokio::task::yield_now().await;
    }
    assert!(client.get_entry(&next).unwrap().is_error());

    let view = controller.view();
    assert_eq!(view.status, ViewStatus::Success);
    assert!(view.error.is_none());
    assert!(!view.is_placeholder);
    assert_eq!(ids(&view), vec!["cats-1"]);

    // Visiting the page fetches it again
    api.recover("cats", 2);
    assert!(controller.go_to_page(2).await.unwrap());
    assert_eq!(api.calls("cats", 2), 2);

    let view = controller.view();
    assert_eq!(view.status, ViewStatus::Success);
    assert_eq!(ids(&view), vec!["cats-2"]);
}

#[tokio::test(start_paused = true)]
async fn test_gc_evicts_pages_left_behind() {
    let api = FakeApi::default();
    let clock = Arc::new(ManualClock::default());
    let config = QueryConfig::builder()
        .retry_count(0)
        .gc_time(Duration::from_secs(60))
        .gc_interval(Duration::from_secs(1))
        .prefetch_next_page(false)
        .build();
    let client = QueryClient::with_clock(config, clock.clone());
    let _gc = client.start_gc();
    let controller = PaginationController::new(client.clone(), "images", api.source());

    controller.search("cats").await.unwrap();
    controller.search("dogs").await.unwrap();
    let cats = page_key("images", "cats", 1);
    let dogs = page_key("images", "dogs", 1);

    assert_eq!(client.store().len(), 2);
    clock.advance(Duration::from_secs(61));
    tokio::time::sleep(Duration::from_secs(2)).await;

    // Swept for real, not just hidden
    assert_eq!(client.store().len(), 1);
    assert_eq!(client.stats().evictions, 1);
    assert!(!client.store().contains_key(&cats));
    assert!(client.store().contains_key(&dogs));
    assert_eq!(ids(&controller.view()), vec!["dogs-1"]);
}
