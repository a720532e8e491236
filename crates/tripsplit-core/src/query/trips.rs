use std::sync::Arc;

use serde_json::Value;

use super::{is_first_page, now, MutationHandle, QueryClient, QueryState};
use crate::cache::{keys, optimistic, EntityKind, Key, KeyPredicate, MutationEvent, MutationToken, OptimisticUpdate};
use crate::models::{Page, Trip, TripCreate, TripListParams, TripUpdate};

impl QueryClient {
    pub async fn trips(&self, params: &TripListParams) -> QueryState<Page<Trip>> {
        let remote = Arc::clone(&self.remote);
        let params = *params;
        self.query(keys::trips::list(&params), move || async move { remote.list_trips(&params).await })
            .await
    }

    /// Pull-to-refresh for a trip list page.
    pub async fn refetch_trips(&self, params: &TripListParams) -> QueryState<Page<Trip>> {
        let remote = Arc::clone(&self.remote);
        let params = *params;
        self.refetch_query(keys::trips::list(&params), move || async move { remote.list_trips(&params).await })
            .await
    }

    /// Trip detail. A cold read is seeded from any cached list containing
    /// the trip, so opening a trip from the list renders without a request.
    pub async fn trip(&self, trip_id: i64) -> QueryState<Trip> {
        self.seeds.seed_trip(trip_id);
        let remote = Arc::clone(&self.remote);
        self.query(keys::trips::detail(trip_id), move || async move { remote.get_trip(trip_id).await })
            .await
    }

    pub fn create_trip(&self) -> MutationHandle<TripCreate, Trip> {
        self.mutation(|remote, input: TripCreate| {
            let remote = Arc::clone(remote);
            let mutation = CreateTrip {
                input: input.clone(),
                now: now(),
            };
            (mutation, async move { remote.create_trip(&input).await })
        })
    }

    pub fn update_trip(&self, trip_id: i64) -> MutationHandle<TripUpdate, Trip> {
        self.mutation(move |remote, patch: TripUpdate| {
            let remote = Arc::clone(remote);
            let mutation = UpdateTrip {
                trip_id,
                patch: patch.clone(),
            };
            (mutation, async move { remote.update_trip(trip_id, &patch).await })
        })
    }

    /// Delete a trip (admin only). Input is the trip id.
    pub fn delete_trip(&self) -> MutationHandle<i64, ()> {
        self.mutation(|remote, trip_id: i64| {
            let remote = Arc::clone(remote);
            let mutation = RemoveTrip {
                trip_id,
                name: "delete_trip",
            };
            (mutation, async move { remote.delete_trip(trip_id).await })
        })
    }

    /// Leave a trip as the current user. Input is the trip id.
    pub fn leave_trip(&self) -> MutationHandle<i64, ()> {
        self.mutation(|remote, trip_id: i64| {
            let remote = Arc::clone(remote);
            let mutation = RemoveTrip {
                trip_id,
                name: "leave_trip",
            };
            (mutation, async move { remote.leave_trip(trip_id).await })
        })
    }
}

struct CreateTrip {
    input: TripCreate,
    now: String,
}

impl OptimisticUpdate for CreateTrip {
    type Output = Trip;

    fn name(&self) -> &'static str {
        "create_trip"
    }

    fn affected(&self) -> Option<KeyPredicate> {
        Some(keys::trips::lists())
    }

    fn apply(&self, key: &Key, current: &Value, token: &MutationToken) -> Option<Value> {
        if !is_first_page(key) {
            return None;
        }
        let record = serde_json::to_value(self.input.to_optimistic(token.sentinel_id, &self.now)).ok()?;
        optimistic::prepend(current, &record)
    }

    fn reconcile(&self, _key: &Key, current: &Value, token: &MutationToken, output: &Trip, _: bool) -> Option<Value> {
        optimistic::replace_by_id(current, token.sentinel_id, &serde_json::to_value(output).ok()?)
    }

    fn revert(&self, _key: &Key, current: &Value, _before: Option<&Value>, token: &MutationToken) -> Option<Value> {
        optimistic::remove_by_id(current, token.sentinel_id)
    }

    fn event(&self, _output: &Trip) -> MutationEvent {
        MutationEvent::TripCreated
    }
}

struct UpdateTrip {
    trip_id: i64,
    patch: TripUpdate,
}

impl OptimisticUpdate for UpdateTrip {
    type Output = Trip;

    fn name(&self) -> &'static str {
        "update_trip"
    }

    fn affected(&self) -> Option<KeyPredicate> {
        Some(KeyPredicate::Exact(keys::trips::detail(self.trip_id)).or(keys::trips::lists()))
    }

    fn apply(&self, key: &Key, current: &Value, _token: &MutationToken) -> Option<Value> {
        let edit = |trip: &mut Trip| {
            trip.apply_update(&self.patch);
            true
        };
        match EntityKind::of(key)? {
            EntityKind::TripDetail => optimistic::update_as(current, edit),
            EntityKind::TripList => {
                optimistic::patch_by_id(current, self.trip_id, |row| optimistic::update_as(row, edit))
            }
            _ => None,
        }
    }

    fn reconcile(&self, key: &Key, current: &Value, _token: &MutationToken, output: &Trip, superseded: bool) -> Option<Value> {
        if superseded {
            return None;
        }
        let confirmed = serde_json::to_value(output).ok()?;
        match EntityKind::of(key)? {
            EntityKind::TripDetail => Some(confirmed),
            EntityKind::TripList => optimistic::replace_by_id(current, self.trip_id, &confirmed),
            _ => None,
        }
    }

    fn revert(&self, key: &Key, current: &Value, before: Option<&Value>, _token: &MutationToken) -> Option<Value> {
        let fields = self.patch.written_fields();
        match EntityKind::of(key)? {
            EntityKind::TripDetail => optimistic::restore_fields(current, before?, &fields),
            EntityKind::TripList => optimistic::restore_fields_by_id(current, before, self.trip_id, &fields),
            _ => None,
        }
    }

    fn event(&self, _output: &Trip) -> MutationEvent {
        MutationEvent::TripUpdated { trip_id: self.trip_id }
    }
}

/// Delete and leave share cache effects: nothing optimistic, the trip's
/// scope is invalidated once the server confirms.
struct RemoveTrip {
    trip_id: i64,
    name: &'static str,
}

impl OptimisticUpdate for RemoveTrip {
    type Output = ();

    fn name(&self) -> &'static str {
        self.name
    }

    fn event(&self, _output: &()) -> MutationEvent {
        MutationEvent::TripRemoved { trip_id: self.trip_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::testing::{self, client, FakeRemote};

    fn list_key() -> Key {
        keys::trips::list(&TripListParams::default())
    }

    fn ids(client: &QueryClient) -> Vec<i64> {
        let state: QueryState<Page<Trip>> = client.cached(&list_key());
        state.data.unwrap().items.iter().map(|t| t.id).collect()
    }

    #[tokio::test]
    async fn test_trip_detail_seeded_from_list() {
        let remote = FakeRemote::new()
            .with_trip(testing::trip(7, "Lisbon"))
            .with_trip(testing::trip(8, "Porto"));
        let client = client(&remote);
        client.trips(&TripListParams::default()).await;

        let detail = client.trip(8).await;
        assert_eq!(detail.data.unwrap().name, "Porto");
        assert_eq!(remote.calls("get_trip"), 0);
    }

    #[tokio::test]
    async fn test_refetch_trips_ignores_freshness() {
        let remote = FakeRemote::new().with_trip(testing::trip(7, "Lisbon"));
        let client = client(&remote);
        client.trips(&TripListParams::default()).await;
        client.trips(&TripListParams::default()).await;
        assert_eq!(remote.calls("list_trips"), 1);

        client.refetch_trips(&TripListParams::default()).await;
        assert_eq!(remote.calls("list_trips"), 2);
    }

    #[tokio::test]
    async fn test_create_trip_shows_optimistic_row_then_server_row() {
        let remote = FakeRemote::new().with_trip(testing::trip(7, "Lisbon"));
        let client = client(&remote);
        client.trips(&TripListParams::default()).await;

        let gate = remote.gate("create_trip");
        let handle = client.create_trip();
        let running = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .mutate_async(TripCreate {
                        name: "Madrid".to_string(),
                        base_currency: "eur".to_string(),
                        ..Default::default()
                    })
                    .await
            })
        };
        while ids(&client).len() < 2 {
            tokio::task::yield_now().await;
        }
        let optimistic: QueryState<Page<Trip>> = client.cached(&list_key());
        let optimistic = optimistic.data.unwrap();
        assert!(optimistic.items[0].id < 0);
        assert!(optimistic.items[0].is_optimistic);
        assert_eq!(optimistic.total, 2);
        assert!(handle.is_pending());

        gate.notify_one();
        let created = running.await.unwrap().unwrap();
        assert_eq!(created.id, 101);
        assert_eq!(ids(&client), vec![101, 7]);
        let after: QueryState<Page<Trip>> = client.cached(&list_key());
        assert!(after.is_stale);
    }

    #[tokio::test]
    async fn test_update_trip_failure_restores_detail_and_list() {
        let remote = FakeRemote::new().with_trip(testing::trip(7, "Lisbon"));
        let client = client(&remote);
        client.trips(&TripListParams::default()).await;
        client.trip(7).await;
        let detail_before = client.store().peek(&keys::trips::detail(7)).unwrap().snapshot();
        let list_before = client.store().peek(&list_key()).unwrap().snapshot();

        remote.fail(
            "update_trip",
            ApiError::ServerRejected {
                status: 403,
                detail: "Only admins can update".to_string(),
            },
        );
        let patch = TripUpdate {
            name: Some("Sintra".to_string()),
            ..Default::default()
        };
        let err = client.update_trip(7).mutate_async(patch).await.unwrap_err();
        assert!(matches!(err, ApiError::ServerRejected { status: 403, .. }));
        assert_eq!(client.store().peek(&keys::trips::detail(7)).unwrap().snapshot(), detail_before);
        assert_eq!(client.store().peek(&list_key()).unwrap().snapshot(), list_before);
    }

    #[tokio::test]
    async fn test_update_trip_success_writes_server_record() {
        let remote = FakeRemote::new().with_trip(testing::trip(7, "Lisbon"));
        let client = client(&remote);
        client.trips(&TripListParams::default()).await;
        client.trip(7).await;

        let patch = TripUpdate {
            simplify_debts: Some(true),
            ..Default::default()
        };
        client.update_trip(7).mutate_async(patch).await.unwrap();
        let detail: QueryState<Trip> = client.cached(&keys::trips::detail(7));
        assert!(detail.data.unwrap().simplify_debts);
        assert!(detail.is_stale);
        let list: QueryState<Page<Trip>> = client.cached(&list_key());
        assert!(list.data.unwrap().items[0].simplify_debts);
    }

    #[tokio::test]
    async fn test_leave_trip_invalidates_trip_scope() {
        let remote = FakeRemote::new()
            .with_trip(testing::trip(7, "Lisbon"))
            .with_member(testing::member(3, 7, "Ana"));
        let client = client(&remote);
        client.trips(&TripListParams::default()).await;
        client.trip(7).await;
        client.members(7).await;

        client.leave_trip().mutate_async(7).await.unwrap();
        assert_eq!(remote.calls("leave_trip"), 1);
        assert!(client.store().peek(&keys::members::list(7)).unwrap().is_invalidated);
        assert!(client.store().peek(&keys::trips::detail(7)).unwrap().is_invalidated);
        assert!(client.store().peek(&list_key()).unwrap().is_invalidated);
    }
}
