//! Query client: the per-session entry point views talk to.
//!
//! Read accessors return a [`QueryState`] snapshot; writes go through a
//! [`MutationHandle`]. The per-entity accessors live in the submodules.

mod balances;
mod expenses;
mod handle;
mod invites;
mod members;
mod trips;
mod users;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::{ApiError, Remote};
use crate::cache::{
    EntityKind, EntryStore, FetchCoordinator, Key, KeyPredicate, MutationEngine, OptimisticUpdate,
    SeedResolver,
};
use crate::config::{CacheTimings, Config};

pub use handle::{MutationHandle, MutationStatus};

/// What a view renders for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    /// Fetching with no data to show yet.
    pub is_loading: bool,
    pub is_fetching: bool,
    pub error: Option<ApiError>,
    pub is_stale: bool,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            is_fetching: false,
            error: None,
            is_stale: true,
        }
    }
}

impl<T> QueryState<T> {
    pub fn is_success(&self) -> bool {
        self.data.is_some() && self.error.is_none()
    }

    /// Data when present, otherwise the error.
    pub fn into_result(self) -> Result<T, ApiError> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(error),
            (None, None) => Err(ApiError::InvalidResponse("no data".to_string())),
        }
    }
}

#[derive(Clone)]
pub struct QueryClient {
    remote: Arc<dyn Remote>,
    store: EntryStore,
    fetch: FetchCoordinator,
    mutations: MutationEngine,
    seeds: SeedResolver,
    timings: CacheTimings,
    gc_time: Duration,
}

impl QueryClient {
    pub fn new(remote: Arc<dyn Remote>, config: &Config) -> Self {
        let store = EntryStore::new();
        let fetch = FetchCoordinator::new(store.clone(), config.request_timeout());
        let mutations = MutationEngine::new(fetch.clone(), config.request_timeout());
        Self {
            remote,
            seeds: SeedResolver::new(store.clone()),
            store,
            fetch,
            mutations,
            timings: config.cache.clone(),
            gc_time: config.gc_time(),
        }
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    fn window(&self, key: &Key) -> Duration {
        match EntityKind::of(key) {
            Some(kind) => self.timings.window(kind),
            None => Duration::ZERO,
        }
    }

    /// Mark matching entries stale so the next read refetches.
    pub fn invalidate(&self, predicate: &KeyPredicate) -> usize {
        self.store.mark_stale(predicate)
    }

    /// Session teardown: drop in-flight fetches and every cached entry.
    pub fn clear(&self) {
        self.fetch.cancel(&KeyPredicate::every_key());
        self.store.clear();
        info!("query cache cleared");
    }

    pub fn collect_garbage(&self) -> usize {
        self.store.collect_garbage(self.gc_time, Utc::now())
    }

    /// Sweep idle entries every `every` until the returned task is aborted.
    pub fn spawn_gc(&self, every: Duration) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = client.collect_garbage();
                if removed > 0 {
                    debug!(removed, "periodic cache sweep");
                }
            }
        })
    }

    /// Current state of a key without fetching.
    pub fn cached<T: DeserializeOwned>(&self, key: &Key) -> QueryState<T> {
        let Some(entry) = self.store.get(key) else {
            return QueryState::default();
        };
        let is_stale = !entry.is_fresh(self.window(key), Utc::now());
        let (data, decode_error) = match entry.value {
            Some(value) => match serde_json::from_value(value) {
                Ok(data) => (Some(data), None),
                Err(e) => (None, Some(ApiError::from(e))),
            },
            None => (None, None),
        };
        QueryState {
            is_loading: entry.is_fetching && data.is_none(),
            data,
            is_fetching: entry.is_fetching,
            error: decode_error.or(entry.error),
            is_stale,
        }
    }

    fn settle<T: DeserializeOwned>(&self, key: &Key, result: Result<T, ApiError>) -> QueryState<T> {
        let mut state = self.cached::<T>(key);
        match result {
            Ok(data) => {
                state.data = Some(data);
                state.error = None;
            }
            Err(e) => state.error = Some(e),
        }
        state.is_loading = state.is_fetching && state.data.is_none();
        state
    }

    async fn query<T, F, Fut>(&self, key: Key, fetcher: F) -> QueryState<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let result = self.fetch.fetch(&key, self.window(&key), fetcher).await;
        self.settle(&key, result)
    }

    async fn refetch_query<T, F, Fut>(&self, key: Key, fetcher: F) -> QueryState<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let result = self.fetch.refetch(&key, fetcher).await;
        self.settle(&key, result)
    }

    /// Build a handle whose runs go through the Mutation Engine. `build`
    /// turns an input into the mutation's cache effects plus the (lazy)
    /// remote call. The optimistic step runs as the handle is invoked; only
    /// the remote call and settling happen in the run's task.
    fn mutation<I, M, F, Fut>(&self, build: F) -> MutationHandle<I, M::Output>
    where
        I: Send + 'static,
        M: OptimisticUpdate,
        F: Fn(&Arc<dyn Remote>, I) -> (M, Fut) + Send + Sync + 'static,
        Fut: Future<Output = Result<M::Output, ApiError>> + Send + 'static,
    {
        let engine = self.mutations.clone();
        let remote = Arc::clone(&self.remote);
        MutationHandle::new(move |input| {
            let (mutation, call) = build(&remote, input);
            let started = engine.start(mutation);
            let engine = engine.clone();
            async move { engine.finish(started, call).await }.boxed()
        })
    }
}

/// Optimistic inserts only land on the head of a list: page 1 of a paged
/// list, or the first page of an infinite one.
fn is_first_page(key: &Key) -> bool {
    key.trailing_params()
        .and_then(|params| params.get("page"))
        .map_or(true, |page| page == "1")
}

fn now() -> String {
    Utc::now().to_rfc3339()
}
