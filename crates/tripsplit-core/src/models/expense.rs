use std::fmt;

use serde::{Deserialize, Serialize};

use super::{amount, is_false, Identified, DEFAULT_PAGE_SIZE};
use crate::cache::Params;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "lowercase")]
pub enum ExpenseType {
    #[default]
    Expense,
    Settlement,
}

impl fmt::Display for ExpenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpenseType::Expense => write!(f, "expense"),
            ExpenseType::Settlement => write!(f, "settlement"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "lowercase")]
pub enum SplitType {
    #[default]
    Equal,
    Percentage,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct Split {
    #[serde(default)]
    pub id: i64,
    pub member_id: i64,
    #[serde(default)]
    pub member_nickname: String,
    #[serde(deserialize_with = "amount::deserialize")]
    pub amount: f64,
    #[serde(default, deserialize_with = "amount::deserialize_option")]
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct Expense {
    pub id: i64,
    pub trip_id: i64,
    pub description: String,
    #[serde(deserialize_with = "amount::deserialize")]
    pub amount: f64,
    pub currency: String,
    #[serde(default = "unit_rate", deserialize_with = "amount::deserialize")]
    pub exchange_rate_to_base: f64,
    #[serde(default, deserialize_with = "amount::deserialize")]
    pub amount_in_base_currency: f64,
    pub paid_by_member_id: i64,
    #[serde(default)]
    pub paid_by_nickname: String,
    pub category: Option<String>,
    pub notes: Option<String>,
    pub receipt_url: Option<String>,
    #[serde(default)]
    pub expense_type: ExpenseType,
    #[serde(default)]
    pub splits: Vec<Split>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_optimistic: bool,
}

fn unit_rate() -> f64 {
    1.0
}

impl Identified for Expense {
    fn id(&self) -> i64 {
        self.id
    }

    fn is_optimistic(&self) -> bool {
        self.is_optimistic
    }
}

impl Expense {
    /// Apply a partial update locally. Splits and conversion are recomputed
    /// by the server, so only the directly edited fields change.
    pub fn apply_update(&mut self, patch: &ExpenseUpdate) {
        if let Some(ref description) = patch.description {
            self.description = description.clone();
        }
        if let Some(amount) = patch.amount {
            self.amount = amount;
            self.amount_in_base_currency = amount * self.exchange_rate_to_base;
        }
        if let Some(ref currency) = patch.currency {
            self.currency = currency.to_uppercase();
        }
        if let Some(paid_by) = patch.paid_by_member_id {
            self.paid_by_member_id = paid_by;
        }
        if let Some(ref category) = patch.category {
            self.category = Some(category.trim().to_lowercase());
        }
        if let Some(ref notes) = patch.notes {
            self.notes = Some(notes.clone());
        }
        if let Some(ref url) = patch.receipt_url {
            self.receipt_url = Some(url.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct SplitCreate {
    pub member_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct ExpenseCreate {
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub paid_by_member_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
    #[serde(default)]
    pub split_type: SplitType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub splits: Option<Vec<SplitCreate>>,
    #[serde(default)]
    pub expense_type: ExpenseType,
}

impl ExpenseCreate {
    /// Locally fabricated expense shown until the server answers.
    ///
    /// The base-currency amount assumes a unit exchange rate; the server
    /// record replaces it on reconciliation.
    pub fn to_optimistic(&self, trip_id: i64, sentinel_id: i64, now: &str) -> Expense {
        Expense {
            id: sentinel_id,
            trip_id,
            description: self.description.trim().to_string(),
            amount: self.amount,
            currency: self.currency.to_uppercase(),
            exchange_rate_to_base: 1.0,
            amount_in_base_currency: self.amount,
            paid_by_member_id: self.paid_by_member_id,
            paid_by_nickname: String::new(),
            category: self
                .category
                .as_ref()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty()),
            notes: self.notes.clone(),
            receipt_url: self.receipt_url.clone(),
            expense_type: self.expense_type,
            splits: Vec::new(),
            created_by: String::new(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
            is_optimistic: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct ExpenseUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_by_member_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_type: Option<SplitType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub splits: Option<Vec<SplitCreate>>,
}

impl ExpenseUpdate {
    /// Fields of [`Expense`] that [`Expense::apply_update`] writes for this patch.
    pub fn written_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.description.is_some() {
            fields.push("description");
        }
        if self.amount.is_some() {
            fields.extend(["amount", "amount_in_base_currency"]);
        }
        if self.currency.is_some() {
            fields.push("currency");
        }
        if self.paid_by_member_id.is_some() {
            fields.push("paid_by_member_id");
        }
        if self.category.is_some() {
            fields.push("category");
        }
        if self.notes.is_some() {
            fields.push("notes");
        }
        if self.receipt_url.is_some() {
            fields.push("receipt_url");
        }
        fields
    }
}

/// Server-side `expense_type` filter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "lowercase")]
pub enum ExpenseTypeFilter {
    Expenses,
    Settlements,
    All,
}

impl ExpenseTypeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseTypeFilter::Expenses => "expenses",
            ExpenseTypeFilter::Settlements => "settlements",
            ExpenseTypeFilter::All => "all",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct ExpenseFilters {
    pub category: Option<String>,
    pub paid_by_member_id: Option<i64>,
    pub expense_type: Option<ExpenseTypeFilter>,
}

impl ExpenseFilters {
    /// Canonical key parameters. Absent filters are omitted so an empty
    /// filter set and an explicit `None` address the same entry.
    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        if let Some(ref category) = self.category {
            params.insert("category", category.to_lowercase());
        }
        if let Some(member) = self.paid_by_member_id {
            params.insert("paid_by_member_id", member);
        }
        if let Some(kind) = self.expense_type {
            params.insert("expense_type", kind.as_str());
        }
        params
    }

    /// Whether a list filtered this way would contain `expense`.
    pub fn accepts(&self, expense: &Expense) -> bool {
        if let Some(ref category) = self.category {
            if expense.category.as_deref() != Some(category.to_lowercase().as_str()) {
                return false;
            }
        }
        if let Some(member) = self.paid_by_member_id {
            if expense.paid_by_member_id != member {
                return false;
            }
        }
        match self.expense_type {
            Some(ExpenseTypeFilter::Expenses) => expense.expense_type == ExpenseType::Expense,
            Some(ExpenseTypeFilter::Settlements) => expense.expense_type == ExpenseType::Settlement,
            Some(ExpenseTypeFilter::All) | None => true,
        }
    }

    /// Parse filters back out of key parameters.
    pub fn from_params(params: &Params) -> Self {
        Self {
            category: params.get("category").map(str::to_string),
            paid_by_member_id: params.get("paid_by_member_id").and_then(|v| v.parse().ok()),
            expense_type: params.get("expense_type").and_then(|v| match v {
                "expenses" => Some(ExpenseTypeFilter::Expenses),
                "settlements" => Some(ExpenseTypeFilter::Settlements),
                "all" => Some(ExpenseTypeFilter::All),
                _ => None,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct ExpenseListParams {
    pub filters: ExpenseFilters,
    pub page: u32,
    pub page_size: u32,
}

impl Default for ExpenseListParams {
    fn default() -> Self {
        Self {
            filters: ExpenseFilters::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ExpenseListParams {
    pub fn with_filters(filters: ExpenseFilters) -> Self {
        Self {
            filters,
            ..Default::default()
        }
    }

    /// Filters plus paging, as a canonical key parameter map.
    pub fn to_params(&self) -> Params {
        let mut params = self.filters.to_params();
        params.insert("page", self.page);
        params.insert("page_size", self.page_size);
        params
    }

    /// Query-string pairs for the HTTP layer.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", self.page.to_string()),
            ("page_size", self.page_size.to_string()),
        ];
        if let Some(ref category) = self.filters.category {
            pairs.push(("category", category.clone()));
        }
        if let Some(member) = self.filters.paid_by_member_id {
            pairs.push(("paid_by_member_id", member.to_string()));
        }
        if let Some(kind) = self.filters.expense_type {
            pairs.push(("expense_type", kind.as_str().to_string()));
        }
        pairs
    }
}
