//! Seed/Bootstrap Resolver: fills an empty detail entry from a record already
//! held by a cached list, so opening a row from a list needs no round trip.

use tracing::debug;

use super::key::{Key, KeyPredicate};
use super::keys::{expenses, trips};
use super::optimistic;
use super::store::EntryStore;

#[derive(Clone)]
pub struct SeedResolver {
    store: EntryStore,
}

impl SeedResolver {
    pub fn new(store: EntryStore) -> Self {
        Self { store }
    }

    pub fn seed_trip(&self, trip_id: i64) -> bool {
        self.seed_from(&trips::detail(trip_id), &trips::lists(), trip_id)
    }

    pub fn seed_expense(&self, trip_id: i64, expense_id: i64) -> bool {
        self.seed_from(
            &expenses::detail(trip_id, expense_id),
            &expenses::lists_for_trip(trip_id),
            expense_id,
        )
    }

    /// The most recently fetched source list holding a confirmed record with
    /// `id` wins. Lists never confirmed by the server carry no freshness to
    /// hand over and are skipped.
    fn seed_from(&self, target: &Key, sources: &KeyPredicate, id: i64) -> bool {
        if id <= 0 {
            return false;
        }
        if let Some(entry) = self.store.peek(target) {
            if entry.value.is_some() || entry.is_fetching {
                return false;
            }
        }

        let best = self
            .store
            .get_many(sources)
            .into_iter()
            .filter_map(|entry| {
                let fetched_at = entry.fetched_at?;
                let record = optimistic::find_confirmed(entry.value.as_ref()?, id)?;
                Some((fetched_at, entry.is_invalidated, record, entry.key))
            })
            .max_by_key(|(fetched_at, ..)| *fetched_at);

        match best {
            Some((fetched_at, is_invalidated, record, source)) => {
                let seeded = self.store.seed(target, record, fetched_at, is_invalidated);
                if seeded {
                    debug!(key = %target, source = %source, "seeded detail from list");
                }
                seeded
            }
            None => false,
        }
    }
}
