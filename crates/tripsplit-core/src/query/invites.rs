use std::sync::Arc;

use serde_json::Value;

use super::{MutationHandle, QueryClient, QueryState};
use crate::cache::{keys, Key, MutationEvent, OptimisticUpdate};
use crate::models::{InviteLink, Member};

impl QueryClient {
    /// Last invite link minted this session, read from the cache only. The
    /// backend has no read route for invites; every request mints a new
    /// link, so only [`Self::regenerate_invite`] talks to it.
    pub fn invite_link(&self, trip_id: i64) -> QueryState<InviteLink> {
        self.cached(&keys::invites::trip(trip_id))
    }

    /// Mint a new invite link; the cached link is replaced with it.
    pub fn regenerate_invite(&self, trip_id: i64) -> MutationHandle<(), InviteLink> {
        self.mutation(move |remote, ()| {
            let remote = Arc::clone(remote);
            (RegenerateInvite { trip_id }, async move { remote.create_invite(trip_id).await })
        })
    }

    /// Join a trip through an invite. Input is the trip id.
    pub fn join_trip(&self) -> MutationHandle<i64, Member> {
        self.mutation(|remote, trip_id: i64| {
            let remote = Arc::clone(remote);
            (JoinTrip { trip_id }, async move { remote.join_trip(trip_id).await })
        })
    }
}

struct RegenerateInvite {
    trip_id: i64,
}

impl OptimisticUpdate for RegenerateInvite {
    type Output = InviteLink;

    fn name(&self) -> &'static str {
        "regenerate_invite"
    }

    fn event(&self, _output: &InviteLink) -> MutationEvent {
        MutationEvent::InviteCreated { trip_id: self.trip_id }
    }

    fn write_back(&self, output: &InviteLink) -> Option<(Key, Value)> {
        Some((keys::invites::trip(self.trip_id), serde_json::to_value(output).ok()?))
    }
}

struct JoinTrip {
    trip_id: i64,
}

impl OptimisticUpdate for JoinTrip {
    type Output = Member;

    fn name(&self) -> &'static str {
        "join_trip"
    }

    fn event(&self, _output: &Member) -> MutationEvent {
        MutationEvent::TripJoined { trip_id: self.trip_id }
    }
}
