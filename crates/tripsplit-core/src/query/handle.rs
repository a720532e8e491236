use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::api::ApiError;

type Run<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, ApiError>> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationStatus {
    pub pending: usize,
    pub error: Option<ApiError>,
}

/// View-facing handle for one kind of write.
///
/// Invoking the handle applies the optimistic values before it returns, so
/// runs touch the cache in call order. The rest of every run executes in its
/// own task, so a caller that stops waiting never leaves an optimistic value
/// un-reconciled or un-rolled-back. Status is shared between clones of a
/// handle.
pub struct MutationHandle<I, O> {
    run: Run<I, O>,
    status: Arc<Mutex<MutationStatus>>,
}

impl<I, O> Clone for MutationHandle<I, O> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
            status: Arc::clone(&self.status),
        }
    }
}

impl<I, O> fmt::Debug for MutationHandle<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationHandle").field("status", &*self.lock()).finish()
    }
}

impl<I, O> MutationHandle<I, O> {
    fn lock(&self) -> MutexGuard<'_, MutationStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_pending(&self) -> bool {
        self.lock().pending > 0
    }

    /// True when the most recent run failed.
    pub fn is_error(&self) -> bool {
        self.lock().error.is_some()
    }

    pub fn error(&self) -> Option<ApiError> {
        self.lock().error.clone()
    }

    pub fn status(&self) -> MutationStatus {
        self.lock().clone()
    }

    /// Clear the error of a settled run.
    pub fn reset(&self) {
        self.lock().error = None;
    }
}

impl<I, O> MutationHandle<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub(crate) fn new<F>(run: F) -> Self
    where
        F: Fn(I) -> BoxFuture<'static, Result<O, ApiError>> + Send + Sync + 'static,
    {
        Self {
            run: Arc::new(run),
            status: Arc::new(Mutex::new(MutationStatus::default())),
        }
    }

    fn spawn(&self, input: I) -> JoinHandle<Result<O, ApiError>> {
        {
            let mut status = self.lock();
            status.pending += 1;
            status.error = None;
        }
        let run = (self.run)(input);
        let status = Arc::clone(&self.status);
        tokio::spawn(async move {
            let result = run.await;
            let mut status = status.lock().unwrap_or_else(PoisonError::into_inner);
            status.pending = status.pending.saturating_sub(1);
            if let Err(ref e) = result {
                status.error = Some(e.clone());
            }
            result
        })
    }

    /// Run and wait for the server's answer. The run starts when this is
    /// called, not when the returned future is first polled.
    pub fn mutate_async(&self, input: I) -> impl Future<Output = Result<O, ApiError>> + Send + 'static {
        let task = self.spawn(input);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(ApiError::Network(format!("mutation task failed: {}", e))),
            }
        }
    }

    /// Fire and forget. Failures are logged and recorded on the handle.
    pub fn mutate(&self, input: I) {
        let task = self.spawn(input);
        tokio::spawn(async move {
            match task.await {
                Ok(Err(e)) => warn!(error = %e, "mutation failed"),
                Err(e) => warn!(error = %e, "mutation task failed"),
                Ok(Ok(_)) => {}
            }
        });
    }
}
