//! Server-derived reads. These have no mutations of their own; they go stale
//! through the invalidation rules of expense, member and trip writes.

use std::sync::Arc;

use super::{QueryClient, QueryState};
use crate::cache::keys;
use crate::models::{Balances, MemberBalanceDetail, Settlements, TripTotals};

impl QueryClient {
    pub async fn balances(&self, trip_id: i64) -> QueryState<Balances> {
        let remote = Arc::clone(&self.remote);
        self.query(keys::balances::trip(trip_id), move || async move { remote.balances(trip_id).await })
            .await
    }

    pub async fn refetch_balances(&self, trip_id: i64) -> QueryState<Balances> {
        let remote = Arc::clone(&self.remote);
        self.refetch_query(keys::balances::trip(trip_id), move || async move {
            remote.balances(trip_id).await
        })
        .await
    }

    pub async fn member_balance(&self, trip_id: i64, member_id: i64) -> QueryState<MemberBalanceDetail> {
        let remote = Arc::clone(&self.remote);
        self.query(keys::balances::member(trip_id, member_id), move || async move {
            remote.member_balance(trip_id, member_id).await
        })
        .await
    }

    pub async fn totals(&self, trip_id: i64) -> QueryState<TripTotals> {
        let remote = Arc::clone(&self.remote);
        self.query(keys::totals::trip(trip_id), move || async move { remote.trip_totals(trip_id).await })
            .await
    }

    /// Suggested payments that would settle the trip.
    pub async fn settlements(&self, trip_id: i64) -> QueryState<Settlements> {
        let remote = Arc::clone(&self.remote);
        self.query(keys::settlements::trip(trip_id), move || async move {
            remote.settlements(trip_id).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::api::ApiError;
    use crate::cache::keys;
    use crate::models::{Balances, ExpenseCreate};
    use crate::query::QueryState;
    use crate::testing::{self, client, FakeRemote};

    fn remote() -> FakeRemote {
        FakeRemote::new()
            .with_trip(testing::trip(7, "Lisbon"))
            .with_member(testing::member(3, 7, "Ana"))
            .with_member(testing::member(4, 7, "Bo"))
            .with_expense(testing::expense(1, 7, 25.0, 3))
    }

    #[tokio::test]
    async fn test_balances_cached_within_window() {
        let remote = remote();
        let client = client(&remote);
        let first = client.balances(7).await;
        assert_eq!(first.data.unwrap().balances[0].total_paid, 25.0);
        client.balances(7).await;
        assert_eq!(remote.calls("balances"), 1);

        client.refetch_balances(7).await;
        assert_eq!(remote.calls("balances"), 2);
    }

    #[tokio::test]
    async fn test_balances_follow_new_expense() {
        let remote = remote();
        let client = client(&remote);
        client.balances(7).await;
        client.member_balance(7, 4).await;

        client
            .create_expense(7)
            .mutate_async(ExpenseCreate {
                description: "Taxi".to_string(),
                amount: 12.0,
                currency: "USD".to_string(),
                paid_by_member_id: 4,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(client.store().peek(&keys::balances::member(7, 4)).unwrap().is_invalidated);
        let stale: QueryState<Balances> = client.cached(&keys::balances::trip(7));
        assert!(stale.is_stale);

        let fresh = client.balances(7).await.data.unwrap();
        let bo = fresh.balances.iter().find(|b| b.member_id == 4).unwrap();
        assert_eq!(bo.total_paid, 12.0);
        assert_eq!(remote.calls("balances"), 2);
    }

    #[tokio::test]
    async fn test_totals_come_from_trip_counters() {
        let remote = remote();
        let client = client(&remote);
        let totals = client.totals(7).await.data.unwrap();
        assert_eq!(totals.expense_count, 1);
        assert_eq!(totals.total_spent, 25.0);
        assert_eq!(totals.base_currency, "USD");
    }

    #[tokio::test]
    async fn test_settlements_error_surfaces_without_data() {
        let remote = remote();
        let client = client(&remote);
        remote.fail(
            "settlements",
            ApiError::ServerRejected {
                status: 403,
                detail: "Not a member of this trip".to_string(),
            },
        );
        let state = client.settlements(7).await;
        assert!(state.data.is_none());
        assert!(!state.is_loading);
        assert!(matches!(state.into_result(), Err(ApiError::ServerRejected { status: 403, .. })));
    }
}
