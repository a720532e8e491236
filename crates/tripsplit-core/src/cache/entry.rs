use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::key::Key;
use crate::api::ApiError;

/// One cached result set plus its freshness and fetch state.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: Key,
    pub value: Option<Value>,
    /// When the value was last confirmed by the server. `None` for entries
    /// that only ever held a locally written value.
    pub fetched_at: Option<DateTime<Utc>>,
    pub is_fetching: bool,
    /// Marked stale by invalidation; the value stays readable.
    pub is_invalidated: bool,
    pub error: Option<ApiError>,
    pub last_accessed: DateTime<Utc>,
    /// Bumped on every value write.
    pub(crate) version: u64,
    /// Bumped whenever a fetch starts or is cancelled; a fetch may only write
    /// its result while the generation it started with is current.
    pub(crate) fetch_generation: u64,
}

impl CacheEntry {
    pub(crate) fn new(key: Key, now: DateTime<Utc>) -> Self {
        Self {
            key,
            value: None,
            fetched_at: None,
            is_fetching: false,
            is_invalidated: false,
            error: None,
            last_accessed: now,
            version: 0,
            fetch_generation: 0,
        }
    }

    /// Fresh means: has a value, not invalidated, and fetched within `window`.
    pub fn is_fresh(&self, window: Duration, now: DateTime<Utc>) -> bool {
        if self.value.is_none() || self.is_invalidated {
            return false;
        }
        match self.fetched_at {
            Some(fetched_at) => match chrono::Duration::from_std(window) {
                Ok(window) => now - fetched_at < window,
                Err(_) => true,
            },
            None => false,
        }
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            value: self.value.clone(),
            fetched_at: self.fetched_at,
            is_invalidated: self.is_invalidated,
            error: self.error.clone(),
        }
    }
}

/// The observable state of an entry, as captured before an optimistic write.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot {
    pub value: Option<Value>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub is_invalidated: bool,
    pub error: Option<ApiError>,
}
