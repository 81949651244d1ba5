//! Cache entry state with freshness and retention timestamps

use crate::cache::clock::add_duration;
use crate::cache::config::QueryOptions;
use crate::cache::key::QueryKey;
use crate::error::{QueryError, Result};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::task::AbortHandle;

/// Lifecycle status of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    /// Created, never fetched
    Idle,
    /// A fetch is running
    Loading,
    /// Last fetch succeeded
    Success,
    /// Last fetch failed
    Error,
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStatus::Idle => write!(f, "idle"),
            QueryStatus::Loading => write!(f, "loading"),
            QueryStatus::Success => write!(f, "success"),
            QueryStatus::Error => write!(f, "error"),
        }
    }
}

/// Result of one completed fetch, as written into the store
#[derive(Debug)]
pub enum FetchOutcome<T> {
    Success(Arc<T>),
    Failure(QueryError),
}

impl<T> From<Result<Arc<T>>> for FetchOutcome<T> {
    fn from(result: Result<Arc<T>>) -> Self {
        match result {
            Ok(data) => FetchOutcome::Success(data),
            Err(e) => FetchOutcome::Failure(e),
        }
    }
}

pub(crate) type SharedFetch<T> = Shared<BoxFuture<'static, Result<Arc<T>>>>;

/// The single outstanding fetch for a key
pub(crate) struct InFlight<T> {
    pub(crate) generation: u64,
    pub(crate) future: SharedFetch<T>,
    pub(crate) abort: AbortHandle,
}

/// A cache entry; only the store mutates it
pub struct CacheEntry<T> {
    pub(crate) key: QueryKey,
    pub(crate) status: QueryStatus,
    pub(crate) data: Option<Arc<T>>,
    pub(crate) error: Option<QueryError>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) fetched_at: Option<DateTime<Utc>>,
    pub(crate) stale_at: DateTime<Utc>,
    pub(crate) collect_after: DateTime<Utc>,
    pub(crate) subscriber_count: usize,
    pub(crate) options: QueryOptions,
    /// Latest generation handed out for this key
    pub(crate) generation: u64,
    pub(crate) in_flight: Option<InFlight<T>>,
    pub(crate) failure_count: u32,
    pub(crate) update_count: u64,
}

impl<T> CacheEntry<T> {
    /// Create an idle entry
    pub(crate) fn new(key: QueryKey, options: QueryOptions, now: DateTime<Utc>) -> Self {
        Self {
            key,
            status: QueryStatus::Idle,
            data: None,
            error: None,
            created_at: now,
            fetched_at: None,
            stale_at: now,
            collect_after: add_duration(now, options.gc_time),
            subscriber_count: 0,
            options,
            generation: 0,
            in_flight: None,
            failure_count: 0,
            update_count: 0,
        }
    }

    /// Data is missing, invalidated, or past its freshness window
    ///
    /// The boundary instant counts as stale so a zero `stale_time` is stale
    /// as soon as it is written.
    pub(crate) fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.data.is_none() || now >= self.stale_at
    }

    /// Unobserved, idle and past its retention window
    pub(crate) fn is_garbage(&self, now: DateTime<Utc>) -> bool {
        self.subscriber_count == 0 && self.in_flight.is_none() && now > self.collect_after
    }

    pub(crate) fn apply(&mut self, outcome: FetchOutcome<T>, now: DateTime<Utc>) {
        match outcome {
            FetchOutcome::Success(data) => {
                self.status = QueryStatus::Success;
                self.data = Some(data);
                self.error = None;
                self.fetched_at = Some(now);
                self.stale_at = add_duration(now, self.options.stale_time);
                self.failure_count = 0;
                self.update_count += 1;
            }
            FetchOutcome::Failure(error) => {
                // Last good data and its freshness window stay as they were
                self.status = QueryStatus::Error;
                self.error = Some(error);
                self.failure_count += 1;
            }
        }
        let anchor = self.fetched_at.unwrap_or(self.created_at);
        self.collect_after = add_duration(anchor, self.options.gc_time);
    }

    /// Status to fall back to when a fetch is cancelled
    pub(crate) fn settled_status(&self) -> QueryStatus {
        if self.error.is_some() {
            QueryStatus::Error
        } else if self.data.is_some() {
            QueryStatus::Success
        } else {
            QueryStatus::Idle
        }
    }

    pub(crate) fn mark_invalidated(&mut self) {
        self.stale_at = DateTime::<Utc>::MIN_UTC;
    }

    pub(crate) fn snapshot(&self, now: DateTime<Utc>) -> EntrySnapshot<T> {
        EntrySnapshot {
            key: self.key.clone(),
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            fetched_at: self.fetched_at,
            stale_at: self.stale_at,
            collect_after: self.collect_after,
            subscriber_count: self.subscriber_count,
            is_fetching: self.in_flight.is_some(),
            is_stale: self.is_stale(now),
            failure_count: self.failure_count,
            update_count: self.update_count,
            age: self.fetched_at.map(|at| now - at),
            created_at: self.created_at,
        }
    }
}

/// Read-only view of an entry at a point in time
#[derive(Debug)]
pub struct EntrySnapshot<T> {
    pub key: QueryKey,
    pub status: QueryStatus,
    pub data: Option<Arc<T>>,
    pub error: Option<QueryError>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub stale_at: DateTime<Utc>,
    pub collect_after: DateTime<Utc>,
    pub subscriber_count: usize,
    pub is_fetching: bool,
    pub is_stale: bool,
    pub failure_count: u32,
    pub update_count: u64,
    /// Time since the last successful fetch
    pub age: Option<chrono::Duration>,
    pub created_at: DateTime<Utc>,
}

// Manual impl: cloning a snapshot only bumps the `Arc`, `T` need not be `Clone`
impl<T> Clone for EntrySnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            fetched_at: self.fetched_at,
            stale_at: self.stale_at,
            collect_after: self.collect_after,
            subscriber_count: self.subscriber_count,
            is_fetching: self.is_fetching,
            is_stale: self.is_stale,
            failure_count: self.failure_count,
            update_count: self.update_count,
            age: self.age,
            created_at: self.created_at,
        }
    }
}

impl<T> EntrySnapshot<T> {
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }
}
