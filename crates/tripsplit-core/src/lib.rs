//! tripsplit core library.
//!
//! Client-side cache synchronization for the trip-splitting API: a keyed
//! entry store with freshness windows, request deduplication, optimistic
//! mutations with rollback, and the invalidation rules that keep
//! server-derived balances honest.
//!
//! Views talk to a [`QueryClient`]; the HTTP side sits behind the
//! [`Remote`] trait so the cache can run against any backend.

pub mod api;
pub mod cache;
pub mod config;
pub mod models;
pub mod query;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, Remote};
pub use config::Config;
pub use query::{MutationHandle, MutationStatus, QueryClient, QueryState};
