//! Fetch Coordinator: read-through fetching with freshness windows, request
//! de-duplication, supersession, cancellation and paginated collections.
//!
//! Each network request runs in its own spawned task together with the write
//! of its result, so a result lands in the store even when every caller that
//! was waiting on it has gone away. Callers share the task's outcome through a
//! [`Shared`] future.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::key::{Key, KeyPredicate};
use super::store::{CommitMode, EntryStore};
use crate::api::ApiError;
use crate::models::{Page, PageCollection};

type SharedFetch = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

/// Fetches one page of an infinite list by page number.
pub type PageFetcher<T> = Arc<dyn Fn(u32) -> BoxFuture<'static, Result<Page<T>, ApiError>> + Send + Sync>;

struct InFlight {
    generation: u64,
    future: SharedFetch,
}

#[derive(Clone)]
pub struct FetchCoordinator {
    store: EntryStore,
    in_flight: Arc<Mutex<HashMap<Key, InFlight>>>,
    timeout: Duration,
}

impl FetchCoordinator {
    pub fn new(store: EntryStore, timeout: Duration) -> Self {
        Self {
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    // Lock order: in_flight before the store.
    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<Key, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_in_flight(&self, key: &Key) -> bool {
        self.lock_in_flight().contains_key(key)
    }

    /// Return the cached value when fresh, join an in-flight fetch for the
    /// key, or start a new one.
    pub async fn fetch<T, F, Fut>(&self, key: &Key, window: Duration, fetcher: F) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let value = self.fetch_value(key, window, || erase(fetcher())).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fetch ignoring freshness, superseding any fetch already in flight.
    pub async fn refetch<T, F, Fut>(&self, key: &Key, fetcher: F) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = self.lock_in_flight();
            debug!(key = %key, "refetching");
            self.start_locked(&mut in_flight, key, erase(fetcher()), CommitMode::Replace)
        };
        Ok(serde_json::from_value(shared.await?)?)
    }

    async fn fetch_value<F>(&self, key: &Key, window: Duration, fetcher: F) -> Result<Value, ApiError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<Value, ApiError>>,
    {
        if let Some(value) = self.store.fresh_value(key, window, Utc::now()) {
            debug!(key = %key, "cache hit");
            return Ok(value);
        }
        let shared = {
            let mut in_flight = self.lock_in_flight();
            match in_flight.get(key) {
                Some(existing) => {
                    debug!(key = %key, "joining in-flight fetch");
                    existing.future.clone()
                }
                None => {
                    debug!(key = %key, "cache miss, fetching");
                    self.start_locked(&mut in_flight, key, fetcher(), CommitMode::Replace)
                }
            }
        };
        shared.await
    }

    /// Discard in-flight fetches for matching keys. Their requests still run
    /// to completion but the results are never written.
    pub fn cancel(&self, predicate: &KeyPredicate) -> Vec<Key> {
        let mut in_flight = self.lock_in_flight();
        in_flight.retain(|key, _| !predicate.matches(key));
        let cancelled = self.store.cancel_fetches(predicate);
        for key in &cancelled {
            debug!(key = %key, "fetch cancelled");
        }
        cancelled
    }

    fn start_locked(
        &self,
        in_flight: &mut HashMap<Key, InFlight>,
        key: &Key,
        request: BoxFuture<'static, Result<Value, ApiError>>,
        mode: CommitMode,
    ) -> SharedFetch {
        let generation = self.store.begin_fetch(key);
        let store = self.store.clone();
        let registry = Arc::clone(&self.in_flight);
        let timeout = self.timeout;
        let task_key = key.clone();

        // The registry lock is held by our caller until the entry below is
        // inserted, so the task cannot remove it before it exists.
        let task = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, request).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(key = %task_key, timeout_secs = timeout.as_secs_f64(), "fetch timed out");
                    Err(ApiError::Timeout)
                }
            };
            {
                let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
                if registry.get(&task_key).map(|f| f.generation) == Some(generation) {
                    registry.remove(&task_key);
                }
            }
            store.complete_fetch(&task_key, generation, outcome, mode)
        });

        let future = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ApiError::Network(format!("fetch task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            key.clone(),
            InFlight {
                generation,
                future: future.clone(),
            },
        );
        future
    }

    // ===== Paginated collections =====

    /// Read an infinite list. When stale, every currently loaded page is
    /// fetched again in order and the collection is replaced in one write.
    pub async fn fetch_infinite<T>(
        &self,
        key: &Key,
        window: Duration,
        fetch_page: PageFetcher<T>,
    ) -> Result<PageCollection<T>, ApiError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let loaded = self.store.loaded_pages(key);
        let value = self
            .fetch_value(key, window, || refetch_pages(fetch_page, loaded))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn refetch_infinite<T>(&self, key: &Key, fetch_page: PageFetcher<T>) -> Result<PageCollection<T>, ApiError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let loaded = self.store.loaded_pages(key);
        let shared = {
            let mut in_flight = self.lock_in_flight();
            self.start_locked(&mut in_flight, key, refetch_pages(fetch_page, loaded), CommitMode::Replace)
        };
        Ok(serde_json::from_value(shared.await?)?)
    }

    /// Append the page after the last loaded one. A no-op returning the
    /// current collection when the last page reported no further results.
    pub async fn fetch_next_page<T>(&self, key: &Key, fetch_page: PageFetcher<T>) -> Result<PageCollection<T>, ApiError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let current: Option<PageCollection<Value>> = match self.store.peek(key).and_then(|e| e.value) {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };

        let shared = {
            let mut in_flight = self.lock_in_flight();
            if let Some(existing) = in_flight.get(key) {
                debug!(key = %key, "joining in-flight page fetch");
                existing.future.clone()
            } else {
                match current {
                    None => self.start_locked(&mut in_flight, key, refetch_pages(fetch_page, 0), CommitMode::Replace),
                    Some(collection) if !collection.has_next_page() => {
                        debug!(key = %key, "no further pages");
                        drop(in_flight);
                        return Ok(serde_json::from_value(serde_json::to_value(collection)?)?);
                    }
                    Some(collection) => {
                        let next = collection.next_page_number();
                        debug!(key = %key, page = next, "fetching next page");
                        let request = async move {
                            let page = fetch_page(next).await?;
                            Ok(serde_json::to_value(page)?)
                        }
                        .boxed();
                        self.start_locked(&mut in_flight, key, request, CommitMode::AppendPage)
                    }
                }
            }
        };
        Ok(serde_json::from_value(shared.await?)?)
    }
}

fn erase<T, Fut>(request: Fut) -> BoxFuture<'static, Result<Value, ApiError>>
where
    T: Serialize + Send + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
    async move {
        let data = request.await?;
        Ok(serde_json::to_value(data)?)
    }
    .boxed()
}

/// Fetch pages 1..=loaded (at least one), stopping early once the server
/// reports no further results.
fn refetch_pages<T>(fetch_page: PageFetcher<T>, loaded: usize) -> BoxFuture<'static, Result<Value, ApiError>>
where
    T: Serialize + Send + 'static,
{
    let wanted = loaded.max(1) as u32;
    async move {
        let mut collection = PageCollection::default();
        for number in 1..=wanted {
            let page = fetch_page(number).await?;
            let more = page.has_more();
            collection.pages.push(page);
            if !more {
                break;
            }
        }
        Ok(serde_json::to_value(collection)?)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const WINDOW: Duration = Duration::from_secs(60);

    fn coordinator() -> FetchCoordinator {
        FetchCoordinator::new(EntryStore::new(), Duration::from_secs(5))
    }

    fn key() -> Key {
        Key::entity("members").id(7)
    }

    fn numbers(total: u64, page_size: u32, calls: Arc<AtomicUsize>) -> PageFetcher<u64> {
        Arc::new(move |page| {
            calls.fetch_add(1, Ordering::SeqCst);
            let start = (page as u64 - 1) * page_size as u64;
            let end = (start + page_size as u64).min(total);
            let items = (start..end).collect();
            async move { Ok(Page::new(items, page, page_size, total)) }.boxed()
        })
    }

    #[tokio::test]
    async fn test_fresh_value_skips_network() {
        let fetch = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            let value: Vec<i64> = fetch
                .fetch(&key(), WINDOW, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2])
                })
                .await
                .unwrap();
            assert_eq!(value, vec![1, 2]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_request() {
        let fetch = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let read = |calls: Arc<AtomicUsize>, gate: Arc<Notify>| {
            let fetch = fetch.clone();
            async move {
                fetch
                    .fetch::<Vec<i64>, _, _>(&key(), WINDOW, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok(vec![3])
                    })
                    .await
            }
        };
        let first = tokio::spawn(read(calls.clone(), gate.clone()));
        let second = tokio::spawn(read(calls.clone(), gate.clone()));
        while !fetch.is_in_flight(&key()) {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;
        gate.notify_one();

        assert_eq!(first.await.unwrap().unwrap(), vec![3]);
        assert_eq!(second.await.unwrap().unwrap(), vec![3]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!fetch.is_in_flight(&key()));
    }

    #[tokio::test]
    async fn test_stale_entry_is_refetched() {
        let fetch = coordinator();
        let _: i64 = fetch.fetch(&key(), WINDOW, || async { Ok(1) }).await.unwrap();
        fetch.store().mark_stale(&KeyPredicate::Exact(key()));
        let value: i64 = fetch.fetch(&key(), WINDOW, || async { Ok(2) }).await.unwrap();
        assert_eq!(value, 2);
        assert!(!fetch.store().peek(&key()).unwrap().is_invalidated);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_does_not_write() {
        let fetch = coordinator();
        fetch.store().put_fetched(&key(), serde_json::json!("before"));
        fetch.store().mark_stale(&KeyPredicate::Exact(key()));
        let gate = Arc::new(Notify::new());

        let reader = {
            let fetch = fetch.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                fetch
                    .fetch::<String, _, _>(&key(), WINDOW, move || async move {
                        gate.notified().await;
                        Ok("from server".to_string())
                    })
                    .await
            })
        };
        while !fetch.is_in_flight(&key()) {
            tokio::task::yield_now().await;
        }

        assert_eq!(fetch.cancel(&KeyPredicate::Exact(key())), vec![key()]);
        fetch.store().set(&key(), serde_json::json!("optimistic"));
        gate.notify_one();

        assert_eq!(reader.await.unwrap().unwrap(), "optimistic");
        let entry = fetch.store().peek(&key()).unwrap();
        assert_eq!(entry.value, Some(serde_json::json!("optimistic")));
        assert!(!entry.is_fetching);
    }

    #[tokio::test]
    async fn test_refetch_supersedes_in_flight_fetch() {
        let fetch = coordinator();
        let gate = Arc::new(Notify::new());
        let slow = {
            let fetch = fetch.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                fetch
                    .fetch::<i64, _, _>(&key(), WINDOW, move || async move {
                        gate.notified().await;
                        Ok(1)
                    })
                    .await
            })
        };
        while !fetch.is_in_flight(&key()) {
            tokio::task::yield_now().await;
        }

        let fresh: i64 = fetch.refetch(&key(), || async { Ok(2) }).await.unwrap();
        assert_eq!(fresh, 2);
        gate.notify_one();
        assert_eq!(slow.await.unwrap().unwrap(), 2);
        assert_eq!(fetch.store().peek(&key()).unwrap().value, Some(serde_json::json!(2)));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_value_and_reports_error() {
        let fetch = coordinator();
        fetch.store().put_fetched(&key(), serde_json::json!(5));
        fetch.store().mark_stale(&KeyPredicate::Exact(key()));
        let err = fetch
            .fetch::<i64, _, _>(&key(), WINDOW, || async {
                Err(ApiError::Network("connection reset".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
        let entry = fetch.store().peek(&key()).unwrap();
        assert_eq!(entry.value, Some(serde_json::json!(5)));
        assert_eq!(entry.error, Some(err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_is_a_failure() {
        let fetch = FetchCoordinator::new(EntryStore::new(), Duration::from_millis(100));
        let err = fetch
            .fetch::<i64, _, _>(&key(), WINDOW, || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(1)
            })
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Timeout);
        assert!(!fetch.store().peek(&key()).unwrap().is_fetching);
    }

    #[tokio::test]
    async fn test_next_pages_match_one_large_page() {
        let fetch = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = Key::entity("expenses").name("infinite").id(7);
        let fetcher = numbers(7, 3, calls.clone());

        let first = fetch.fetch_infinite(&k, WINDOW, fetcher.clone()).await.unwrap();
        assert_eq!(first.pages.len(), 1);
        fetch.fetch_next_page(&k, fetcher.clone()).await.unwrap();
        let all = fetch.fetch_next_page(&k, fetcher.clone()).await.unwrap();

        let whole = numbers(7, 9, Arc::new(AtomicUsize::new(0)))(1).await.unwrap();
        assert_eq!(all.items().copied().collect::<Vec<_>>(), whole.items);
        assert!(!all.has_next_page());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Last page is complete: nothing is requested.
        let again = fetch.fetch_next_page(&k, fetcher.clone()).await.unwrap();
        assert_eq!(again, all);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stale_infinite_refetches_loaded_pages() {
        let fetch = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = Key::entity("expenses").name("infinite").id(7);
        let fetcher = numbers(10, 2, calls.clone());

        fetch.fetch_infinite(&k, WINDOW, fetcher.clone()).await.unwrap();
        fetch.fetch_next_page(&k, fetcher.clone()).await.unwrap();
        fetch.fetch_next_page(&k, fetcher.clone()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        fetch.store().mark_stale(&KeyPredicate::Exact(k.clone()));
        let refreshed = fetch.fetch_infinite(&k, WINDOW, fetcher).await.unwrap();
        assert_eq!(refreshed.pages.len(), 3);
        assert_eq!(refreshed.len(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }
}
