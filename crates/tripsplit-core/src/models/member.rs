use serde::{Deserialize, Serialize};

use super::{is_false, Identified};

/// Membership state, decided by the backend when a member is added.
///
/// - email given and the user exists: `Active`
/// - email given, no such user yet: `Pending`
/// - no email: `Placeholder`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Active,
    Pending,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct Member {
    pub id: i64,
    #[serde(default)]
    pub trip_id: i64,
    pub nickname: String,
    #[serde(default)]
    pub status: MemberStatus,
    #[serde(default)]
    pub is_admin: bool,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub invited_email: Option<String>,
    pub invited_at: Option<String>,
    pub created_at: Option<String>,
    pub joined_at: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_optimistic: bool,
}

impl Identified for Member {
    fn id(&self) -> i64 {
        self.id
    }

    fn is_optimistic(&self) -> bool {
        self.is_optimistic
    }
}

impl Member {
    pub fn apply_update(&mut self, patch: &MemberUpdate) {
        if let Some(ref nickname) = patch.nickname {
            self.nickname = nickname.trim().to_string();
        }
        if let Some(ref email) = patch.email {
            self.invited_email = Some(email.trim().to_lowercase());
        }
        if let Some(is_admin) = patch.is_admin {
            self.is_admin = is_admin;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct MemberAdd {
    pub nickname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl MemberAdd {
    pub fn to_optimistic(&self, trip_id: i64, sentinel_id: i64, now: &str) -> Member {
        let email = self.email.as_ref().map(|e| e.trim().to_lowercase());
        Member {
            id: sentinel_id,
            trip_id,
            nickname: self.nickname.trim().to_string(),
            // Guess; the server decides between active and pending.
            status: if email.is_some() {
                MemberStatus::Pending
            } else {
                MemberStatus::Placeholder
            },
            is_admin: self.is_admin,
            user_id: None,
            email: None,
            display_name: None,
            avatar_url: None,
            invited_email: email,
            invited_at: None,
            created_at: Some(now.to_string()),
            joined_at: None,
            is_optimistic: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct MemberUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
}

impl MemberUpdate {
    /// Fields of [`Member`] that [`Member::apply_update`] writes for this patch.
    pub fn written_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.nickname.is_some() {
            fields.push("nickname");
        }
        if self.email.is_some() {
            fields.push("invited_email");
        }
        if self.is_admin.is_some() {
            fields.push("is_admin");
        }
        fields
    }

    /// Nicknames are denormalized into expense and balance records, so a
    /// rename has a wider invalidation footprint than other edits.
    pub fn changes_nickname(&self, current: Option<&Member>) -> bool {
        match (&self.nickname, current) {
            (Some(new), Some(member)) => new.trim() != member.nickname,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}
