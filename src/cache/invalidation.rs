//! Key filters and removal bookkeeping
//!
//! Invalidation never drops data: matching entries are only marked stale so
//! they refetch on next access while their last value stays visible.
//! Removal is reserved for garbage collection and explicit `remove` calls.

use crate::cache::key::QueryKey;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Selects a set of keys
#[derive(Clone)]
pub enum KeyFilter {
    /// Every key
    All,

    /// Exactly this key
    Exact(QueryKey),

    /// Every key whose leading segments equal this key
    Prefix(QueryKey),

    /// Arbitrary predicate
    Predicate(Arc<dyn Fn(&QueryKey) -> bool + Send + Sync>),
}

impl KeyFilter {
    pub fn exact(key: QueryKey) -> Self {
        KeyFilter::Exact(key)
    }

    pub fn prefix(prefix: impl Into<QueryKey>) -> Self {
        KeyFilter::Prefix(prefix.into())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&QueryKey) -> bool + Send + Sync + 'static,
    {
        KeyFilter::Predicate(Arc::new(f))
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Exact(k) => k == key,
            KeyFilter::Prefix(p) => key.starts_with(p),
            KeyFilter::Predicate(f) => f(key),
        }
    }
}

impl fmt::Debug for KeyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyFilter::All => write!(f, "All"),
            KeyFilter::Exact(k) => write!(f, "Exact({})", k),
            KeyFilter::Prefix(p) => write!(f, "Prefix({})", p),
            KeyFilter::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// Why an entry left the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Unobserved past its retention window
    Collected,

    /// Removed on request
    Manual,

    /// Removed by `clear`
    Cleared,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionReason::Collected => write!(f, "garbage collected"),
            EvictionReason::Manual => write!(f, "manual removal"),
            EvictionReason::Cleared => write!(f, "cache cleared"),
        }
    }
}

/// Record of one removal pass
#[derive(Debug, Clone, Serialize)]
pub struct EvictionEvent {
    pub reason: EvictionReason,
    pub timestamp: DateTime<Utc>,
    pub keys: Vec<QueryKey>,
}

impl EvictionEvent {
    pub fn new(reason: EvictionReason, keys: Vec<QueryKey>, timestamp: DateTime<Utc>) -> Self {
        Self {
            reason,
            timestamp,
            keys,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page_key(query: &str, page: u32) -> QueryKey {
        QueryKey::new(vec![
            json!("images"),
            json!("page"),
            json!({"query": query, "page": page}),
        ])
    }

    #[test]
    fn test_exact_filter() {
        let filter = KeyFilter::exact(page_key("cats", 1));
        assert!(filter.matches(&page_key("cats", 1)));
        assert!(!filter.matches(&page_key("cats", 2)));
    }

    #[test]
    fn test_prefix_filter() {
        let filter = KeyFilter::prefix("images");
        assert!(filter.matches(&page_key("cats", 1)));
        assert!(!filter.matches(&QueryKey::from("videos")));
    }

    #[test]
    fn test_predicate_filter() {
        let filter = KeyFilter::predicate(|key| key.canonical().contains("\"cats\""));
        assert!(filter.matches(&page_key("cats", 4)));
        assert!(!filter.matches(&page_key("dogs", 4)));
        assert_eq!(format!("{:?}", filter), "Predicate(..)");
    }

    #[test]
    fn test_all_filter() {
        assert!(KeyFilter::All.matches(&page_key("anything", 9)));
    }

    #[test]
    fn test_eviction_event() {
        let event = EvictionEvent::new(
            EvictionReason::Collected,
            vec![page_key("cats", 1), page_key("cats", 2)],
            Utc::now(),
        );
        assert_eq!(event.len(), 2);
        assert!(!event.is_empty());
        assert_eq!(event.reason.to_string(), "garbage collected");
    }
}
