use std::sync::Arc;

use serde_json::Value;

use super::{MutationHandle, QueryClient, QueryState};
use crate::cache::{keys, optimistic, Key, KeyPredicate, MutationEvent, MutationToken, OptimisticUpdate};
use crate::models::{User, UserUpdate};

impl QueryClient {
    /// The signed-in user's profile.
    pub async fn me(&self) -> QueryState<User> {
        let remote = Arc::clone(&self.remote);
        self.query(keys::users::me(), move || async move { remote.get_me().await })
            .await
    }

    pub fn update_me(&self) -> MutationHandle<UserUpdate, User> {
        self.mutation(|remote, patch: UserUpdate| {
            let remote = Arc::clone(remote);
            (UpdateProfile { patch: patch.clone() }, async move { remote.update_me(&patch).await })
        })
    }
}

struct UpdateProfile {
    patch: UserUpdate,
}

impl OptimisticUpdate for UpdateProfile {
    type Output = User;

    fn name(&self) -> &'static str {
        "update_me"
    }

    fn affected(&self) -> Option<KeyPredicate> {
        Some(KeyPredicate::Exact(keys::users::me()))
    }

    fn apply(&self, _key: &Key, current: &Value, _token: &MutationToken) -> Option<Value> {
        optimistic::update_as(current, |user: &mut User| {
            user.apply_update(&self.patch);
            true
        })
    }

    fn reconcile(&self, _key: &Key, _current: &Value, _token: &MutationToken, output: &User, superseded: bool) -> Option<Value> {
        if superseded {
            return None;
        }
        serde_json::to_value(output).ok()
    }

    fn revert(&self, _key: &Key, current: &Value, before: Option<&Value>, _token: &MutationToken) -> Option<Value> {
        optimistic::restore_fields(current, before?, &self.patch.written_fields())
    }

    fn event(&self, _output: &User) -> MutationEvent {
        MutationEvent::ProfileUpdated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::models::Member;
    use crate::testing::{self, client, FakeRemote};

    fn remote() -> FakeRemote {
        let mut ana = testing::member(3, 7, "Ana");
        ana.user_id = Some("u-ana".to_string());
        ana.display_name = Some("Ana".to_string());
        FakeRemote::new()
            .with_trip(testing::trip(7, "Lisbon"))
            .with_member(ana)
            .with_user(testing::user("u-ana", "Ana"))
    }

    fn cached_me(client: &QueryClient) -> User {
        let state: QueryState<User> = client.cached(&keys::users::me());
        state.data.unwrap()
    }

    #[tokio::test]
    async fn test_me_cached_within_window() {
        let remote = remote();
        let client = client(&remote);
        assert_eq!(client.me().await.data.unwrap().display_name.as_deref(), Some("Ana"));
        client.me().await;
        assert_eq!(remote.calls("get_me"), 1);
    }

    #[tokio::test]
    async fn test_update_me_optimistic_then_refreshes_members() {
        let remote = remote();
        let client = client(&remote);
        client.me().await;
        client.members(7).await;

        let gate = remote.gate("update_me");
        let running = client.update_me().mutate_async(UserUpdate {
            display_name: Some("Ana Pereira".to_string()),
            ..Default::default()
        });
        assert_eq!(cached_me(&client).display_name.as_deref(), Some("Ana Pereira"));

        gate.notify_one();
        running.await.unwrap();
        assert!(client.store().peek(&keys::members::list(7)).unwrap().is_invalidated);
        let members: Vec<Member> = client.members(7).await.data.unwrap();
        assert_eq!(members[0].display_name.as_deref(), Some("Ana Pereira"));
    }

    #[tokio::test]
    async fn test_update_me_failure_restores_profile() {
        let remote = remote();
        let client = client(&remote);
        client.me().await;
        client.members(7).await;
        let before = client.store().peek(&keys::users::me()).unwrap().snapshot();

        remote.fail(
            "update_me",
            ApiError::ServerRejected {
                status: 422,
                detail: "invalid avatar url".to_string(),
            },
        );
        let err = client
            .update_me()
            .mutate_async(UserUpdate {
                avatar_url: Some("not a url".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ServerRejected { status: 422, .. }));
        assert_eq!(client.store().peek(&keys::users::me()).unwrap().snapshot(), before);
        assert!(!client.store().peek(&keys::members::list(7)).unwrap().is_invalidated);
    }
}
