use serde::{Deserialize, Serialize};

/// The signed-in user's profile (`/users/me`).
///
/// `display_name` and `avatar_url` are copied onto every [`super::Member`]
/// row the user is linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl User {
    pub fn apply_update(&mut self, patch: &UserUpdate) {
        if let Some(ref name) = patch.display_name {
            self.display_name = Some(name.clone());
        }
        if let Some(ref url) = patch.avatar_url {
            self.avatar_url = Some(url.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UserUpdate {
    /// Fields of [`User`] that [`User::apply_update`] writes for this patch.
    pub fn written_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.display_name.is_some() {
            fields.push("display_name");
        }
        if self.avatar_url.is_some() {
            fields.push("avatar_url");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_only_touches_set_fields() {
        let mut user = User {
            id: "u-1".to_string(),
            email: "ana@example.com".to_string(),
            display_name: Some("Ana".to_string()),
            avatar_url: Some("https://cdn.example.com/a.png".to_string()),
        };
        let patch = UserUpdate {
            display_name: Some("Ana P".to_string()),
            ..Default::default()
        };
        user.apply_update(&patch);
        assert_eq!(user.display_name.as_deref(), Some("Ana P"));
        assert_eq!(user.avatar_url.as_deref(), Some("https://cdn.example.com/a.png"));
        assert_eq!(patch.written_fields(), vec!["display_name"]);
        assert_eq!(serde_json::to_string(&patch).unwrap(), r#"{"display_name":"Ana P"}"#);
    }
}
