//! Invalidation Graph: which cached keys go stale after a successful mutation.
//!
//! Balances, totals and settlements are computed server-side from expenses
//! and members but cached independently, so nothing would ever refresh them
//! without these rules. Rules only mark entries stale; values stay readable
//! until the next fetch replaces them.

use tracing::debug;

use super::key::KeyPredicate;
use super::keys::{self, balances, expenses, invites, members, settlements, totals, trips, users};
use super::store::EntryStore;

/// Entity event emitted by a mutation that the server accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    ExpenseChanged { trip_id: i64, expense_id: Option<i64> },
    SettlementCreated { trip_id: i64 },
    MemberChanged { trip_id: i64, nickname_changed: bool },
    TripCreated,
    TripUpdated { trip_id: i64 },
    TripRemoved { trip_id: i64 },
    TripJoined { trip_id: i64 },
    InviteCreated { trip_id: i64 },
    ProfileUpdated,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidationGraph;

impl InvalidationGraph {
    /// Predicates that must be marked stale after `event`.
    pub fn dependents(&self, event: &MutationEvent) -> Vec<KeyPredicate> {
        match *event {
            MutationEvent::ExpenseChanged { trip_id, expense_id } => {
                let mut preds = expense_dependents(trip_id);
                if let Some(expense_id) = expense_id {
                    preds.push(expenses::detail(trip_id, expense_id).into());
                }
                preds
            }
            MutationEvent::SettlementCreated { trip_id } => expense_dependents(trip_id),
            MutationEvent::MemberChanged {
                trip_id,
                nickname_changed,
            } => {
                let mut preds = vec![trips::detail(trip_id).into(), members::list(trip_id).into()];
                if nickname_changed {
                    // Nicknames are denormalized into expense rows and balances.
                    preds.push(expenses::for_trip(trip_id));
                    preds.push(balances::for_trip(trip_id));
                    preds.push(settlements::trip(trip_id).into());
                }
                preds
            }
            MutationEvent::TripUpdated { trip_id } => vec![
                trips::detail(trip_id).into(),
                trips::lists(),
                balances::for_trip(trip_id),
                settlements::trip(trip_id).into(),
            ],
            MutationEvent::TripCreated => vec![trips::lists()],
            MutationEvent::TripRemoved { trip_id } => vec![trips::lists(), keys::trip_scope(trip_id)],
            MutationEvent::TripJoined { trip_id } => vec![
                trips::lists(),
                trips::detail(trip_id).into(),
                members::list(trip_id).into(),
            ],
            MutationEvent::InviteCreated { trip_id } => vec![invites::trip(trip_id).into()],
            // Display name and avatar are copied onto member rows, including
            // the member lists embedded in trip details.
            MutationEvent::ProfileUpdated => vec![
                users::me().into(),
                keys::all_members(),
                keys::all_trip_details(),
            ],
        }
    }

    /// Mark every dependent of `event` stale. Returns how many entries matched.
    pub fn invalidate(&self, store: &EntryStore, event: &MutationEvent) -> usize {
        let predicate = KeyPredicate::Any(self.dependents(event));
        let count = store.mark_stale(&predicate);
        debug!(event = ?event, count, "invalidated dependent keys");
        count
    }
}

fn expense_dependents(trip_id: i64) -> Vec<KeyPredicate> {
    vec![
        expenses::lists_for_trip(trip_id),
        trips::detail(trip_id).into(),
        trips::lists(),
        balances::for_trip(trip_id),
        totals::trip(trip_id).into(),
        settlements::trip(trip_id).into(),
    ]
}
