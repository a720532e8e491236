//! Key registry: one key factory per entity type.
//!
//! Layout of every key the client uses:
//!
//! | entity            | key                                          |
//! |-------------------|----------------------------------------------|
//! | trip list         | `trips/list/{page,page_size}`                |
//! | trip detail       | `trips/detail/<trip>`                        |
//! | expense list      | `expenses/list/<trip>/{filters,page,size}`   |
//! | expense infinite  | `expenses/infinite/<trip>/{filters,size}`    |
//! | expense detail    | `expenses/detail/<trip>/<expense>`           |
//! | members           | `members/<trip>`                             |
//! | balances          | `balances/<trip>`                            |
//! | member balance    | `balances/<trip>/member/<member>`            |
//! | totals            | `totals/<trip>`                              |
//! | settlements       | `settlements/<trip>`                         |
//! | invites           | `invites/<trip>`                             |
//! | profile           | `users/me`                                   |
//!
//! The trip id always sits at a fixed position per entity, so "everything for
//! trip T" is a union of prefixes rather than a fuzzy containment search.

use super::key::{Key, KeyPredicate, Segment};

const TRIPS: &str = "trips";
const EXPENSES: &str = "expenses";
const MEMBERS: &str = "members";
const BALANCES: &str = "balances";
const TOTALS: &str = "totals";
const SETTLEMENTS: &str = "settlements";
const INVITES: &str = "invites";
const USERS: &str = "users";

/// Entity type a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    TripList,
    TripDetail,
    ExpenseList,
    ExpenseInfinite,
    ExpenseDetail,
    Members,
    Balances,
    MemberBalance,
    Totals,
    Settlements,
    Invites,
    Profile,
}

impl EntityKind {
    pub fn of(key: &Key) -> Option<Self> {
        let name = |i: usize| match key.segments().get(i) {
            Some(Segment::Name(n)) => Some(n.as_str()),
            _ => None,
        };
        match name(0)? {
            TRIPS => match name(1)? {
                "list" => Some(EntityKind::TripList),
                "detail" => Some(EntityKind::TripDetail),
                _ => None,
            },
            EXPENSES => match name(1)? {
                "list" => Some(EntityKind::ExpenseList),
                "infinite" => Some(EntityKind::ExpenseInfinite),
                "detail" => Some(EntityKind::ExpenseDetail),
                _ => None,
            },
            MEMBERS => Some(EntityKind::Members),
            BALANCES if key.len() > 2 => Some(EntityKind::MemberBalance),
            BALANCES => Some(EntityKind::Balances),
            TOTALS => Some(EntityKind::Totals),
            SETTLEMENTS => Some(EntityKind::Settlements),
            INVITES => Some(EntityKind::Invites),
            USERS => Some(EntityKind::Profile),
            _ => None,
        }
    }
}

pub mod trips {
    use super::*;
    use crate::models::TripListParams;
    use crate::cache::Params;

    pub fn list(params: &TripListParams) -> Key {
        Key::entity(TRIPS).name("list").params(
            Params::new()
                .with("page", params.page)
                .with("page_size", params.page_size),
        )
    }

    pub fn lists() -> KeyPredicate {
        KeyPredicate::Prefix(Key::entity(TRIPS).name("list"))
    }

    pub fn detail(trip_id: i64) -> Key {
        Key::entity(TRIPS).name("detail").id(trip_id)
    }
}

pub mod expenses {
    use super::*;
    use crate::models::{ExpenseFilters, ExpenseListParams};

    pub fn list(trip_id: i64, params: &ExpenseListParams) -> Key {
        Key::entity(EXPENSES)
            .name("list")
            .id(trip_id)
            .params(params.to_params())
    }

    /// Infinite list key: filters and page size, never the page cursor.
    pub fn infinite(trip_id: i64, filters: &ExpenseFilters, page_size: u32) -> Key {
        Key::entity(EXPENSES)
            .name("infinite")
            .id(trip_id)
            .params(filters.to_params().with("page_size", page_size))
    }

    pub fn detail(trip_id: i64, expense_id: i64) -> Key {
        Key::entity(EXPENSES).name("detail").id(trip_id).id(expense_id)
    }

    /// Every paged and infinite expense list of a trip, whatever the filters.
    pub fn lists_for_trip(trip_id: i64) -> KeyPredicate {
        KeyPredicate::Any(vec![
            KeyPredicate::Prefix(Key::entity(EXPENSES).name("list").id(trip_id)),
            KeyPredicate::Prefix(Key::entity(EXPENSES).name("infinite").id(trip_id)),
        ])
    }

    pub fn details_for_trip(trip_id: i64) -> KeyPredicate {
        KeyPredicate::Prefix(Key::entity(EXPENSES).name("detail").id(trip_id))
    }

    pub fn for_trip(trip_id: i64) -> KeyPredicate {
        lists_for_trip(trip_id).or(details_for_trip(trip_id))
    }
}

pub mod members {
    use super::*;

    pub fn list(trip_id: i64) -> Key {
        Key::entity(MEMBERS).id(trip_id)
    }
}

pub mod balances {
    use super::*;

    pub fn trip(trip_id: i64) -> Key {
        Key::entity(BALANCES).id(trip_id)
    }

    pub fn member(trip_id: i64, member_id: i64) -> Key {
        Key::entity(BALANCES).id(trip_id).name("member").id(member_id)
    }

    /// Trip balances plus every member balance of the trip.
    pub fn for_trip(trip_id: i64) -> KeyPredicate {
        KeyPredicate::Prefix(trip(trip_id))
    }
}

pub mod totals {
    use super::*;

    pub fn trip(trip_id: i64) -> Key {
        Key::entity(TOTALS).id(trip_id)
    }
}

pub mod settlements {
    use super::*;

    pub fn trip(trip_id: i64) -> Key {
        Key::entity(SETTLEMENTS).id(trip_id)
    }
}

pub mod invites {
    use super::*;

    pub fn trip(trip_id: i64) -> Key {
        Key::entity(INVITES).id(trip_id)
    }
}

pub mod users {
    use super::*;

    pub fn me() -> Key {
        Key::entity(USERS).name("me")
    }
}

/// Member lists of every cached trip.
pub fn all_members() -> KeyPredicate {
    KeyPredicate::Prefix(Key::entity(MEMBERS))
}

/// Trip details of every cached trip.
pub fn all_trip_details() -> KeyPredicate {
    KeyPredicate::Prefix(Key::entity(TRIPS).name("detail"))
}

/// Every key scoped to one trip.
pub fn trip_scope(trip_id: i64) -> KeyPredicate {
    KeyPredicate::Any(vec![
        KeyPredicate::Exact(trips::detail(trip_id)),
        expenses::for_trip(trip_id),
        KeyPredicate::Exact(members::list(trip_id)),
        balances::for_trip(trip_id),
        KeyPredicate::Exact(totals::trip(trip_id)),
        KeyPredicate::Exact(settlements::trip(trip_id)),
        KeyPredicate::Exact(invites::trip(trip_id)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExpenseFilters, ExpenseListParams, TripListParams};

    #[test]
    fn test_entity_kind_classification() {
        let cases = [
            (trips::list(&TripListParams::default()), EntityKind::TripList),
            (trips::detail(7), EntityKind::TripDetail),
            (expenses::list(7, &ExpenseListParams::default()), EntityKind::ExpenseList),
            (expenses::infinite(7, &ExpenseFilters::default(), 20), EntityKind::ExpenseInfinite),
            (expenses::detail(7, 101), EntityKind::ExpenseDetail),
            (members::list(7), EntityKind::Members),
            (balances::trip(7), EntityKind::Balances),
            (balances::member(7, 3), EntityKind::MemberBalance),
            (totals::trip(7), EntityKind::Totals),
            (settlements::trip(7), EntityKind::Settlements),
            (invites::trip(7), EntityKind::Invites),
            (users::me(), EntityKind::Profile),
        ];
        for (key, kind) in cases {
            assert_eq!(EntityKind::of(&key), Some(kind), "{}", key);
        }
    }

    #[test]
    fn test_lists_for_trip_ignores_filters() {
        let filtered = ExpenseListParams::with_filters(ExpenseFilters {
            category: Some("food".to_string()),
            ..Default::default()
        });
        let pred = expenses::lists_for_trip(7);
        assert!(pred.matches(&expenses::list(7, &filtered)));
        assert!(pred.matches(&expenses::infinite(7, &ExpenseFilters::default(), 20)));
        assert!(!pred.matches(&expenses::detail(7, 1)));
        assert!(!pred.matches(&expenses::list(8, &filtered)));
    }

    #[test]
    fn test_trip_scope_does_not_leak_across_trips() {
        let scope = trip_scope(7);
        assert!(scope.matches(&balances::member(7, 3)));
        assert!(scope.matches(&trips::detail(7)));
        // Expense 7 of trip 8 must not be swept up by trip 7.
        assert!(!scope.matches(&expenses::detail(8, 7)));
        assert!(!scope.matches(&trips::list(&TripListParams::default())));
    }
}
