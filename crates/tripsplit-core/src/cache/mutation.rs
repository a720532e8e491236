//! Mutation Engine: optimistic pre-write, commit-reconciliation and
//! rollback-on-failure around a remote write.
//!
//! ```text
//! Idle -> OptimisticApplied -> Reconciled | RolledBack -> Settled
//! ```
//!
//! A mutation describes its cache effects through [`OptimisticUpdate`]; the
//! engine owns the ordering, the snapshots and the locking.

use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::fetch::FetchCoordinator;
use super::invalidation::{InvalidationGraph, MutationEvent};
use super::key::{Key, KeyPredicate};
use super::store::{EntryStore, Rollback, TouchedKey};
use crate::api::ApiError;

/// Correlates an optimistic record with the mutation that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationToken {
    /// Negative id given to the optimistic record. Never collides with a
    /// server id.
    pub sentinel_id: i64,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    OptimisticApplied,
    Reconciled,
    RolledBack,
    Settled,
}

/// Cache effects of one kind of write.
///
/// Every hook returning `Option<Value>` follows the store's convention:
/// `None` leaves the entry as it is.
pub trait OptimisticUpdate: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Keys the optimistic step writes. `None` skips the optimistic step.
    fn affected(&self) -> Option<KeyPredicate> {
        None
    }

    /// Optimistic value for one affected key.
    fn apply(&self, _key: &Key, _current: &Value, _token: &MutationToken) -> Option<Value> {
        None
    }

    /// Authoritative value for a key this mutation wrote optimistically.
    /// `superseded` is set when another write landed on the key after ours.
    fn reconcile(
        &self,
        _key: &Key,
        _current: &Value,
        _token: &MutationToken,
        _output: &Self::Output,
        _superseded: bool,
    ) -> Option<Value> {
        None
    }

    /// Strip this mutation's change from a key that was written again after
    /// the optimistic apply. `before` is the key's value prior to the apply.
    fn revert(&self, _key: &Key, _current: &Value, _before: Option<&Value>, _token: &MutationToken) -> Option<Value> {
        None
    }

    fn event(&self, output: &Self::Output) -> MutationEvent;

    /// A server response that is itself the current value of a key, stored
    /// as fresh once dependents have been invalidated.
    fn write_back(&self, _output: &Self::Output) -> Option<(Key, Value)> {
        None
    }
}

/// Ephemeral state of one running mutation.
#[derive(Debug)]
pub struct MutationContext {
    name: &'static str,
    token: MutationToken,
    epoch: u64,
    touched: Vec<TouchedKey>,
    phase: MutationPhase,
}

impl MutationContext {
    fn new(name: &'static str, token: MutationToken, epoch: u64) -> Self {
        Self {
            name,
            token,
            epoch,
            touched: Vec::new(),
            phase: MutationPhase::Idle,
        }
    }

    fn advance(&mut self, phase: MutationPhase) {
        debug!(
            mutation = self.name,
            sequence = self.token.sequence,
            from = ?self.phase,
            to = ?phase,
            "mutation phase"
        );
        self.phase = phase;
    }
}

/// A mutation past its optimistic step, waiting on the remote write.
#[derive(Debug)]
pub struct StartedMutation<M> {
    mutation: M,
    ctx: MutationContext,
}

#[derive(Clone)]
pub struct MutationEngine {
    fetch: FetchCoordinator,
    graph: InvalidationGraph,
    timeout: Duration,
    next_sentinel: Arc<AtomicI64>,
    next_sequence: Arc<AtomicU64>,
}

impl MutationEngine {
    pub fn new(fetch: FetchCoordinator, timeout: Duration) -> Self {
        Self {
            fetch,
            graph: InvalidationGraph,
            timeout,
            next_sentinel: Arc::new(AtomicI64::new(-1)),
            next_sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    fn store(&self) -> &EntryStore {
        self.fetch.store()
    }

    fn next_token(&self) -> MutationToken {
        MutationToken {
            sentinel_id: self.next_sentinel.fetch_sub(1, Ordering::SeqCst),
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Take a correlation token and run the optimistic step. Synchronous, so
    /// optimistic writes land in the order mutations are started no matter
    /// how the runtime schedules the rest of each run.
    pub fn start<M: OptimisticUpdate>(&self, mutation: M) -> StartedMutation<M> {
        let mut ctx = MutationContext::new(mutation.name(), self.next_token(), self.store().epoch());

        if let Some(predicate) = mutation.affected() {
            self.fetch.cancel(&predicate);
            let token = ctx.token;
            ctx.touched = self
                .store()
                .apply_optimistic(&predicate, |key, current| mutation.apply(key, current, &token));
            ctx.advance(MutationPhase::OptimisticApplied);
            debug!(mutation = ctx.name, keys = ctx.touched.len(), "optimistic values applied");
        }
        StartedMutation { mutation, ctx }
    }

    /// Await the remote write and settle the cache around its outcome.
    ///
    /// On success the optimistic values are reconciled and dependents
    /// invalidated; on failure (timeout included) every touched key is rolled
    /// back and the error returned. The cache side effects happen before the
    /// result is handed back either way.
    pub async fn finish<M, Fut>(&self, started: StartedMutation<M>, call: Fut) -> Result<M::Output, ApiError>
    where
        M: OptimisticUpdate,
        Fut: Future<Output = Result<M::Output, ApiError>> + Send,
    {
        let StartedMutation { mutation, mut ctx } = started;
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ApiError::Timeout),
        };

        match outcome {
            Ok(output) => {
                let token = ctx.token;
                self.store().reconcile(&ctx.touched, |key, current, superseded| {
                    mutation.reconcile(key, current, &token, &output, superseded)
                });
                ctx.advance(MutationPhase::Reconciled);
                let event = mutation.event(&output);
                self.graph.invalidate(self.store(), &event);
                if let Some((key, value)) = mutation.write_back(&output) {
                    self.fetch.cancel(&KeyPredicate::Exact(key.clone()));
                    self.store().commit_value(&key, value, ctx.epoch);
                }
                info!(mutation = ctx.name, event = ?event, "mutation committed");
                ctx.advance(MutationPhase::Settled);
                Ok(output)
            }
            Err(e) => {
                let token = ctx.token;
                for touched in &ctx.touched {
                    let kind = self.store().roll_back(touched, |current| {
                        mutation.revert(&touched.key, current, touched.before.value.as_ref(), &token)
                    });
                    match kind {
                        Rollback::Verbatim => {}
                        Rollback::Surgical => debug!(key = %touched.key, "rolled back around a later write"),
                        Rollback::Gone => debug!(key = %touched.key, "entry gone, nothing to roll back"),
                    }
                }
                ctx.advance(MutationPhase::RolledBack);
                warn!(mutation = ctx.name, keys = ctx.touched.len(), error = %e, "mutation failed, rolled back");
                ctx.advance(MutationPhase::Settled);
                Err(e)
            }
        }
    }

    /// [`start`](Self::start) then [`finish`](Self::finish) with the remote
    /// write produced by `call`.
    pub async fn execute<M, F, Fut>(&self, mutation: M, call: F) -> Result<M::Output, ApiError>
    where
        M: OptimisticUpdate,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<M::Output, ApiError>> + Send,
    {
        let started = self.start(mutation);
        self.finish(started, call()).await
    }
}
