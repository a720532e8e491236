use std::sync::Arc;

use serde_json::Value;

use super::{now, MutationHandle, QueryClient, QueryState};
use crate::cache::{keys, optimistic, Key, KeyPredicate, MutationEvent, MutationToken, OptimisticUpdate};
use crate::models::{Member, MemberAdd, MemberUpdate};

impl QueryClient {
    pub async fn members(&self, trip_id: i64) -> QueryState<Vec<Member>> {
        let remote = Arc::clone(&self.remote);
        self.query(keys::members::list(trip_id), move || async move { remote.list_members(trip_id).await })
            .await
    }

    pub async fn refetch_members(&self, trip_id: i64) -> QueryState<Vec<Member>> {
        let remote = Arc::clone(&self.remote);
        self.refetch_query(keys::members::list(trip_id), move || async move {
            remote.list_members(trip_id).await
        })
        .await
    }

    pub fn add_member(&self, trip_id: i64) -> MutationHandle<MemberAdd, Member> {
        self.mutation(move |remote, input: MemberAdd| {
            let remote = Arc::clone(remote);
            let mutation = AddMember {
                trip_id,
                input: input.clone(),
                now: now(),
            };
            (mutation, async move { remote.add_member(trip_id, &input).await })
        })
    }

    /// Input is `(member_id, patch)`. Whether the nickname changes is decided
    /// against the cached members list when the run starts.
    pub fn update_member(&self, trip_id: i64) -> MutationHandle<(i64, MemberUpdate), Member> {
        let store = self.store.clone();
        self.mutation(move |remote, (member_id, patch): (i64, MemberUpdate)| {
            let cached: Option<Vec<Member>> = store.get_data(&keys::members::list(trip_id)).ok().flatten();
            let current = cached.as_ref().and_then(|members| members.iter().find(|m| m.id == member_id));
            let mutation = UpdateMember {
                trip_id,
                member_id,
                nickname_changed: patch.changes_nickname(current),
                patch: patch.clone(),
            };
            let remote = Arc::clone(remote);
            (mutation, async move { remote.update_member(trip_id, member_id, &patch).await })
        })
    }

    /// Input is the member id.
    pub fn remove_member(&self, trip_id: i64) -> MutationHandle<i64, ()> {
        self.mutation(move |remote, member_id: i64| {
            let remote = Arc::clone(remote);
            (RemoveMember { trip_id }, async move { remote.remove_member(trip_id, member_id).await })
        })
    }
}

struct AddMember {
    trip_id: i64,
    input: MemberAdd,
    now: String,
}

impl OptimisticUpdate for AddMember {
    type Output = Member;

    fn name(&self) -> &'static str {
        "add_member"
    }

    fn affected(&self) -> Option<KeyPredicate> {
        Some(keys::members::list(self.trip_id).into())
    }

    fn apply(&self, _key: &Key, current: &Value, token: &MutationToken) -> Option<Value> {
        let record = self.input.to_optimistic(self.trip_id, token.sentinel_id, &self.now);
        optimistic::append(current, &serde_json::to_value(record).ok()?)
    }

    fn reconcile(&self, _key: &Key, current: &Value, token: &MutationToken, output: &Member, _: bool) -> Option<Value> {
        optimistic::replace_by_id(current, token.sentinel_id, &serde_json::to_value(output).ok()?)
    }

    fn revert(&self, _key: &Key, current: &Value, _before: Option<&Value>, token: &MutationToken) -> Option<Value> {
        optimistic::remove_by_id(current, token.sentinel_id)
    }

    fn event(&self, _output: &Member) -> MutationEvent {
        MutationEvent::MemberChanged {
            trip_id: self.trip_id,
            nickname_changed: false,
        }
    }
}

struct UpdateMember {
    trip_id: i64,
    member_id: i64,
    patch: MemberUpdate,
    nickname_changed: bool,
}

impl OptimisticUpdate for UpdateMember {
    type Output = Member;

    fn name(&self) -> &'static str {
        "update_member"
    }

    fn affected(&self) -> Option<KeyPredicate> {
        Some(keys::members::list(self.trip_id).into())
    }

    fn apply(&self, _key: &Key, current: &Value, _token: &MutationToken) -> Option<Value> {
        optimistic::patch_by_id(current, self.member_id, |row| {
            optimistic::update_as(row, |member: &mut Member| {
                member.apply_update(&self.patch);
                true
            })
        })
    }

    fn reconcile(
        &self,
        _key: &Key,
        current: &Value,
        _token: &MutationToken,
        output: &Member,
        superseded: bool,
    ) -> Option<Value> {
        if superseded {
            return None;
        }
        optimistic::replace_by_id(current, self.member_id, &serde_json::to_value(output).ok()?)
    }

    fn revert(&self, _key: &Key, current: &Value, before: Option<&Value>, _token: &MutationToken) -> Option<Value> {
        optimistic::restore_fields_by_id(current, before, self.member_id, &self.patch.written_fields())
    }

    fn event(&self, _output: &Member) -> MutationEvent {
        MutationEvent::MemberChanged {
            trip_id: self.trip_id,
            nickname_changed: self.nickname_changed,
        }
    }
}

struct RemoveMember {
    trip_id: i64,
}

impl OptimisticUpdate for RemoveMember {
    type Output = ();

    fn name(&self) -> &'static str {
        "remove_member"
    }

    fn event(&self, _output: &()) -> MutationEvent {
        MutationEvent::MemberChanged {
            trip_id: self.trip_id,
            nickname_changed: false,
        }
    }
}
