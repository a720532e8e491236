use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct InviteLink {
    pub invite_code: String,
    pub invite_url: String,
    pub expires_at: Option<String>,
}
