//! Server-computed derived data: balances, settlement suggestions, totals.
//!
//! The client never computes these; it caches them and marks them stale when
//! an expense, member or trip mutation makes them outdated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::amount;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct MemberBalance {
    pub member_id: i64,
    pub member_nickname: String,
    #[serde(deserialize_with = "amount::deserialize")]
    pub total_paid: f64,
    #[serde(deserialize_with = "amount::deserialize")]
    pub total_owed: f64,
    #[serde(deserialize_with = "amount::deserialize")]
    pub net_balance: f64,
    #[serde(default)]
    pub currency_balances: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct Balances {
    pub trip_id: i64,
    pub balances: Vec<MemberBalance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct SettlementSuggestion {
    pub from_member_id: i64,
    pub to_member_id: i64,
    #[serde(deserialize_with = "amount::deserialize")]
    pub amount: f64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub from_nickname: String,
    #[serde(default)]
    pub to_nickname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct Settlements {
    pub trip_id: i64,
    pub base_currency: String,
    pub settlements: Vec<SettlementSuggestion>,
}

/// Per-member breakdown. The shape is owned by the server and only displayed,
/// so everything beyond the identity fields is kept as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberBalanceDetail {
    pub member_id: i64,
    #[serde(default)]
    pub member_nickname: String,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Spend summary for one trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct TripTotals {
    pub trip_id: i64,
    pub base_currency: String,
    #[serde(deserialize_with = "amount::deserialize")]
    pub total_spent: f64,
    pub expense_count: u64,
}

impl From<&super::Trip> for TripTotals {
    fn from(trip: &super::Trip) -> Self {
        Self {
            trip_id: trip.id,
            base_currency: trip.base_currency.clone(),
            total_spent: trip.total_spent,
            expense_count: trip.expense_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_balances_response() {
        let json = r#"{"trip_id": 7, "balances": [{"member_id": 3, "member_nickname": "Ana",
            "total_paid": 40.0, "total_owed": 20.0, "net_balance": 20.0,
            "currency_balances": {"USD": 20.0}}]}"#;
        let balances: Balances = serde_json::from_str(json).unwrap();
        assert_eq!(balances.balances[0].net_balance, 20.0);
        assert_eq!(balances.balances[0].currency_balances["USD"], 20.0);
    }

    #[test]
    fn test_member_balance_detail_keeps_extra_fields() {
        let json = r#"{"member_id": 3, "member_nickname": "Ana", "paid_expenses": [], "total_paid": 0}"#;
        let detail: MemberBalanceDetail = serde_json::from_str(json).unwrap();
        assert_eq!(detail.member_id, 3);
        assert!(detail.details.contains_key("paid_expenses"));
    }
}
