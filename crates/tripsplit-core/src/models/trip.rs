use serde::{Deserialize, Serialize};

use super::{amount, is_false, Identified, Member, DEFAULT_PAGE_SIZE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct Trip {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub base_currency: String,
    #[serde(default)]
    pub simplify_debts: bool,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    /// Total spent in base currency, maintained server-side.
    #[serde(default, deserialize_with = "amount::deserialize")]
    pub total_spent: f64,
    #[serde(default)]
    pub expense_count: u64,
    pub member_count: Option<u32>,
    pub members: Option<Vec<Member>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_optimistic: bool,
}

impl Identified for Trip {
    fn id(&self) -> i64 {
        self.id
    }

    fn is_optimistic(&self) -> bool {
        self.is_optimistic
    }
}

impl Trip {
    /// Apply a partial update locally, the way the server would.
    pub fn apply_update(&mut self, patch: &TripUpdate) {
        if let Some(ref name) = patch.name {
            self.name = name.clone();
        }
        if let Some(ref description) = patch.description {
            self.description = Some(description.clone());
        }
        if let Some(ref currency) = patch.base_currency {
            self.base_currency = currency.clone();
        }
        if let Some(ref start) = patch.start_date {
            self.start_date = Some(start.clone());
        }
        if let Some(ref end) = patch.end_date {
            self.end_date = Some(end.clone());
        }
        if let Some(simplify) = patch.simplify_debts {
            self.simplify_debts = simplify;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct TripCreate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub base_currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub simplify_debts: bool,
}

impl TripCreate {
    /// Locally fabricated trip shown until the server answers.
    pub fn to_optimistic(&self, sentinel_id: i64, now: &str) -> Trip {
        Trip {
            id: sentinel_id,
            name: self.name.trim().to_string(),
            description: self.description.clone(),
            base_currency: self.base_currency.to_uppercase(),
            simplify_debts: self.simplify_debts,
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            created_by: String::new(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
            total_spent: 0.0,
            expense_count: 0,
            member_count: Some(1),
            members: None,
            is_optimistic: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct TripUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simplify_debts: Option<bool>,
}

impl TripUpdate {
    /// Fields of [`Trip`] that [`Trip::apply_update`] writes for this patch.
    pub fn written_fields(&self) -> Vec<&'static str> {
        [
            ("name", self.name.is_some()),
            ("description", self.description.is_some()),
            ("base_currency", self.base_currency.is_some()),
            ("start_date", self.start_date.is_some()),
            ("end_date", self.end_date.is_some()),
            ("simplify_debts", self.simplify_debts.is_some()),
        ]
        .into_iter()
        .filter_map(|(field, set)| set.then_some(field))
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct TripListParams {
    pub page: u32,
    pub page_size: u32,
}

impl Default for TripListParams {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}
