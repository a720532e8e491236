//! The Entry Store: the single shared mutable resource of the cache layer.
//!
//! Every operation takes the lock once and releases it before returning, and
//! the lock is never held across an `.await`. A reader therefore never sees a
//! half-applied optimistic write, reconciliation or rollback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::entry::{CacheEntry, EntrySnapshot};
use super::key::{Key, KeyPredicate};
use crate::api::ApiError;
use crate::models::{Page, PageCollection};

/// How a completed fetch lands in its entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommitMode {
    /// Replace the value and reset freshness.
    Replace,
    /// Append one page to the entry's page collection.
    AppendPage,
}

/// A key written by an optimistic apply, with what it held before.
#[derive(Debug, Clone)]
pub(crate) struct TouchedKey {
    pub key: Key,
    pub before: EntrySnapshot,
    pub version_after: u64,
    /// Session the write happened in; see [`EntryStore::epoch`].
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rollback {
    /// Nothing else wrote the key; the snapshot was restored as-is.
    Verbatim,
    /// A later write landed on the key; only this mutation's change was undone.
    Surgical,
    /// The entry was collected or the session cleared; nothing was written.
    Gone,
}

#[derive(Clone, Default)]
pub struct EntryStore {
    entries: Arc<Mutex<HashMap<Key, CacheEntry>>>,
    /// Bumped by `clear` under the entries lock.
    epoch: Arc<AtomicU64>,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Point read. Counts as an access for garbage collection.
    pub fn get(&self, key: &Key) -> Option<CacheEntry> {
        let mut entries = self.lock();
        entries.get_mut(key).map(|entry| {
            entry.last_accessed = Utc::now();
            entry.clone()
        })
    }

    /// Point read without touching the access time.
    pub fn peek(&self, key: &Key) -> Option<CacheEntry> {
        self.lock().get(key).cloned()
    }

    /// All entries whose key matches, ordered by key.
    pub fn get_many(&self, predicate: &KeyPredicate) -> Vec<CacheEntry> {
        let entries = self.lock();
        let mut matched: Vec<CacheEntry> = entries
            .iter()
            .filter(|(key, _)| predicate.matches(key))
            .map(|(_, entry)| entry.clone())
            .collect();
        matched.sort_by(|a, b| a.key.cmp(&b.key));
        matched
    }

    /// Typed point read of the value.
    pub fn get_data<T: DeserializeOwned>(&self, key: &Key) -> Result<Option<T>, ApiError> {
        match self.get(key).and_then(|entry| entry.value) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Session counter. Writes that began before a [`clear`](Self::clear)
    /// carry the old epoch and are dropped instead of landing in the new
    /// session.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Replace the value of one entry, creating it if absent. A created entry
    /// has no `fetched_at`, so it is never considered fresh.
    pub fn set(&self, key: &Key, value: Value) {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key.clone(), Utc::now()));
        entry.value = Some(value);
        entry.version += 1;
        trace!(key = %key, "entry set");
    }

    pub fn set_data<T: Serialize>(&self, key: &Key, data: &T) -> Result<(), ApiError> {
        let value = serde_json::to_value(data)?;
        self.set(key, value);
        Ok(())
    }

    /// Bulk write over existing entries. The updater sees the current value
    /// (or `None`) and returns the replacement; returning `None` leaves the
    /// entry untouched. Returns the keys that were written.
    pub fn set_many<F>(&self, predicate: &KeyPredicate, mut updater: F) -> Vec<Key>
    where
        F: FnMut(&Key, Option<&Value>) -> Option<Value>,
    {
        let mut entries = self.lock();
        let mut written = Vec::new();
        for (key, entry) in entries.iter_mut() {
            if !predicate.matches(key) {
                continue;
            }
            if let Some(next) = updater(key, entry.value.as_ref()) {
                entry.value = Some(next);
                entry.version += 1;
                written.push(key.clone());
            }
        }
        written.sort();
        written
    }

    /// Mark matching entries stale without dropping their values. Applying
    /// the same predicate again changes nothing.
    pub fn mark_stale(&self, predicate: &KeyPredicate) -> usize {
        let mut entries = self.lock();
        let mut count = 0;
        for (key, entry) in entries.iter_mut() {
            if predicate.matches(key) {
                entry.is_invalidated = true;
                count += 1;
            }
        }
        count
    }

    /// Drop every entry. Used at session teardown.
    pub fn clear(&self) {
        let mut entries = self.lock();
        debug!(count = entries.len(), "clearing cache");
        entries.clear();
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Remove entries idle for longer than `max_idle`. Entries with a fetch
    /// in flight are kept.
    pub fn collect_garbage(&self, max_idle: Duration, now: DateTime<Utc>) -> usize {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fetching || now - entry.last_accessed <= max_idle);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "garbage collected cache entries");
        }
        removed
    }

    // ===== Fetch Coordinator hooks =====

    /// Cached value when fresh; touches the entry either way.
    pub(crate) fn fresh_value(&self, key: &Key, window: Duration, now: DateTime<Utc>) -> Option<Value> {
        let mut entries = self.lock();
        let entry = entries.get_mut(key)?;
        entry.last_accessed = now;
        if entry.is_fresh(window, now) {
            entry.value.clone()
        } else {
            None
        }
    }

    /// Number of pages currently held by an infinite entry.
    pub(crate) fn loaded_pages(&self, key: &Key) -> usize {
        self.lock()
            .get(key)
            .and_then(|entry| entry.value.as_ref())
            .and_then(|value| value.get("pages"))
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Start a fetch for `key`, creating the entry if needed. The returned
    /// generation must be presented when the result is committed.
    pub(crate) fn begin_fetch(&self, key: &Key) -> u64 {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key.clone(), Utc::now()));
        entry.fetch_generation += 1;
        entry.is_fetching = true;
        entry.fetch_generation
    }

    /// Commit a fetch outcome. Results from a superseded or cancelled fetch
    /// are not written; the caller then gets the entry's current value.
    pub(crate) fn complete_fetch(
        &self,
        key: &Key,
        generation: u64,
        outcome: Result<Value, ApiError>,
        mode: CommitMode,
    ) -> Result<Value, ApiError> {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            debug!(key = %key, "entry removed while fetching, result discarded");
            return outcome;
        };
        if entry.fetch_generation != generation {
            debug!(key = %key, generation, current = entry.fetch_generation, "discarding stale fetch result");
            return match (outcome, entry.value.clone()) {
                (Ok(_), Some(current)) => Ok(current),
                (outcome, _) => outcome,
            };
        }

        entry.is_fetching = false;
        let value = match outcome {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "fetch failed, keeping last good value");
                entry.error = Some(e.clone());
                return Err(e);
            }
        };

        match mode {
            CommitMode::Replace => {
                entry.value = Some(value.clone());
                entry.fetched_at = Some(Utc::now());
                entry.is_invalidated = false;
                entry.error = None;
                entry.version += 1;
                Ok(value)
            }
            CommitMode::AppendPage => match Self::append_page(entry.value.as_ref(), value) {
                Ok(Some(next)) => {
                    entry.value = Some(next.clone());
                    entry.error = None;
                    entry.version += 1;
                    Ok(next)
                }
                Ok(None) => {
                    debug!(key = %key, "page out of sequence, not appended");
                    Ok(entry.value.clone().unwrap_or(Value::Null))
                }
                Err(e) => {
                    entry.error = Some(e.clone());
                    Err(e)
                }
            },
        }
    }

    fn append_page(current: Option<&Value>, page: Value) -> Result<Option<Value>, ApiError> {
        let page: Page<Value> = serde_json::from_value(page)?;
        let mut collection: PageCollection<Value> = match current {
            Some(value) => serde_json::from_value(value.clone())?,
            None => PageCollection::default(),
        };
        if !collection.append(page) {
            return Ok(None);
        }
        Ok(Some(serde_json::to_value(&collection)?))
    }

    /// Invalidate the fetch generation of matching entries so any in-flight
    /// result is discarded on arrival.
    pub(crate) fn cancel_fetches(&self, predicate: &KeyPredicate) -> Vec<Key> {
        let mut entries = self.lock();
        let mut cancelled = Vec::new();
        for (key, entry) in entries.iter_mut() {
            if entry.is_fetching && predicate.matches(key) {
                entry.fetch_generation += 1;
                entry.is_fetching = false;
                cancelled.push(key.clone());
            }
        }
        cancelled
    }

    // ===== Mutation Engine hooks =====

    /// Snapshot and optimistically rewrite every matching entry in one step.
    pub(crate) fn apply_optimistic<F>(&self, predicate: &KeyPredicate, mut apply: F) -> Vec<TouchedKey>
    where
        F: FnMut(&Key, &Value) -> Option<Value>,
    {
        let mut entries = self.lock();
        let epoch = self.epoch();
        let mut touched = Vec::new();
        for (key, entry) in entries.iter_mut() {
            if !predicate.matches(key) {
                continue;
            }
            let Some(current) = entry.value.as_ref() else {
                continue;
            };
            if let Some(next) = apply(key, current) {
                let before = entry.snapshot();
                entry.value = Some(next);
                entry.version += 1;
                touched.push(TouchedKey {
                    key: key.clone(),
                    before,
                    version_after: entry.version,
                    epoch,
                });
            }
        }
        touched
    }

    /// Rewrite previously touched keys with the server's answer. The closure
    /// is told whether another write landed after the optimistic apply.
    pub(crate) fn reconcile<F>(&self, touched: &[TouchedKey], mut reconcile: F) -> usize
    where
        F: FnMut(&Key, &Value, bool) -> Option<Value>,
    {
        let mut entries = self.lock();
        let epoch = self.epoch();
        let mut written = 0;
        for t in touched.iter().filter(|t| t.epoch == epoch) {
            let Some(entry) = entries.get_mut(&t.key) else {
                continue;
            };
            let superseded = entry.version != t.version_after;
            let Some(current) = entry.value.as_ref() else {
                continue;
            };
            if let Some(next) = reconcile(&t.key, current, superseded) {
                entry.value = Some(next);
                entry.version += 1;
                written += 1;
            }
        }
        written
    }

    /// Undo an optimistic write. Restores the snapshot verbatim unless the
    /// key was written again since, in which case `revert` strips only this
    /// mutation's change from the current value. An entry that has since
    /// been collected or cleared stays gone.
    pub(crate) fn roll_back<F>(&self, touched: &TouchedKey, revert: F) -> Rollback
    where
        F: FnOnce(&Value) -> Option<Value>,
    {
        let mut entries = self.lock();
        if touched.epoch != self.epoch() {
            return Rollback::Gone;
        }
        match entries.get_mut(&touched.key) {
            None => Rollback::Gone,
            Some(entry) if entry.version == touched.version_after => {
                entry.value = touched.before.value.clone();
                entry.fetched_at = touched.before.fetched_at;
                entry.is_invalidated = touched.before.is_invalidated;
                entry.error = touched.before.error.clone();
                entry.version += 1;
                Rollback::Verbatim
            }
            Some(entry) => {
                if let Some(next) = entry.value.as_ref().and_then(revert) {
                    entry.value = Some(next);
                    entry.version += 1;
                }
                Rollback::Surgical
            }
        }
    }

    /// Store a value the server returned from a write as if freshly fetched.
    /// Dropped when the session was cleared after `epoch`.
    pub(crate) fn commit_value(&self, key: &Key, value: Value, epoch: u64) -> bool {
        let mut entries = self.lock();
        if epoch != self.epoch() {
            debug!(key = %key, "session cleared, write-back dropped");
            return false;
        }
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key.clone(), Utc::now()));
        entry.value = Some(value);
        entry.fetched_at = Some(Utc::now());
        entry.is_invalidated = false;
        entry.error = None;
        entry.version += 1;
        true
    }

    // ===== Seed Resolver hook =====

    /// Seed a detail entry. Only fills an entry that has no value and no
    /// fetch in flight.
    pub(crate) fn seed(&self, key: &Key, value: Value, fetched_at: DateTime<Utc>, is_invalidated: bool) -> bool {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key.clone(), Utc::now()));
        if entry.value.is_some() || entry.is_fetching {
            return false;
        }
        entry.value = Some(value);
        entry.fetched_at = Some(fetched_at);
        entry.is_invalidated = is_invalidated;
        entry.version += 1;
        true
    }

    #[cfg(test)]
    pub(crate) fn put_fetched(&self, key: &Key, value: Value) {
        let generation = self.begin_fetch(key);
        let _ = self.complete_fetch(key, generation, Ok(value), CommitMode::Replace);
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, key: &Key, by: chrono::Duration) {
        if let Some(entry) = self.lock().get_mut(key) {
            entry.fetched_at = entry.fetched_at.map(|t| t - by);
            entry.last_accessed -= by;
        }
    }
}
