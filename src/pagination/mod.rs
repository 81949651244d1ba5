//! # Paginated Search
//!
//! Drives a `(query, page)` state machine on top of the query cache.
//!
//! Keys follow a three-level hierarchy so prefix filters can target them:
//! - `[resource]` - every query for the resource
//! - `[resource, "page", {query, page}]` - one page of one search term
//!
//! `is_page_of` selects every page of one search term.
//!
//! While a new page of the same search loads, the previous page stays
//! visible (`ViewStatus::Transitioning`). The next page is prefetched in the
//! background once the current one resolves.

pub mod controller;
pub mod debounce;
pub mod prefetch;
pub mod source;

pub use controller::{PageView, PaginationController, ViewStatus};
pub use debounce::Debouncer;
pub use prefetch::Prefetcher;
pub use source::{Page, PageSource, DEFAULT_PER_PAGE};

use crate::cache::key::QueryKey;
use serde_json::json;

/// `[resource]`
pub fn resource_key(resource: &str) -> QueryKey {
    QueryKey::new(vec![json!(resource)])
}

/// `[resource, "page", {query, page}]`
pub fn page_key(resource: &str, query: &str, page: u32) -> QueryKey {
    QueryKey::new(vec![
        json!(resource),
        json!("page"),
        json!({ "query": query, "page": page }),
    ])
}

/// Every page key of `query`, for use with `KeyFilter::predicate`
pub fn is_page_of(key: &QueryKey, resource: &str, query: &str) -> bool {
    let segments = key.segments();
    key.starts_with(&QueryKey::new(vec![json!(resource), json!("page")]))
        && segments
            .get(2)
            .and_then(|params| params.get("query"))
            .and_then(|q| q.as_str())
            == Some(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hierarchy() {
        let page = page_key("images", "cats", 2);
        assert!(page.starts_with(&resource_key("images")));
        assert!(!page.starts_with(&resource_key("videos")));
        assert_eq!(
            page.canonical(),
            r#"["images","page",{"page":2,"query":"cats"}]"#
        );
    }

    #[test]
    fn test_page_keys_differ_by_page_and_query() {
        assert_ne!(page_key("images", "cats", 1), page_key("images", "cats", 2));
        assert_ne!(page_key("images", "cats", 1), page_key("images", "dogs", 1));
        assert_eq!(page_key("images", "cats", 1), page_key("images", "cats", 1));
    }

    #[test]
    fn test_is_page_of() {
        assert!(is_page_of(&page_key("images", "cats", 3), "images", "cats"));
        assert!(!is_page_of(&page_key("images", "dogs", 3), "images", "cats"));
        assert!(!is_page_of(&resource_key("images"), "images", "cats"));
    }
}
