//! In-memory query cache with optimistic mutations.
//!
//! - `store`: the Entry Store, the one shared map of cached result sets
//! - `key`, `keys`: structured keys and the per-entity key registry
//! - `fetch`: read-through fetching, de-duplication and pagination
//! - `mutation`: the optimistic write pipeline
//! - `invalidation`: derived-data invalidation rules
//! - `seed`: detail entries bootstrapped from cached lists

mod entry;
pub mod fetch;
pub mod invalidation;
pub mod key;
pub mod keys;
pub mod mutation;
pub(crate) mod optimistic;
pub mod seed;
pub mod store;

pub use entry::{CacheEntry, EntrySnapshot};
pub use fetch::{FetchCoordinator, PageFetcher};
pub use invalidation::{InvalidationGraph, MutationEvent};
pub use key::{Key, KeyPredicate, Params, Segment};
pub use keys::EntityKind;
pub use mutation::{
    MutationContext, MutationEngine, MutationPhase, MutationToken, OptimisticUpdate, StartedMutation,
};
pub use seed::SeedResolver;
pub use store::EntryStore;
