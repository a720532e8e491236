//! Data-access abstraction the cache layer talks to.
//!
//! The cache never sees transport details; it only needs every call to resolve
//! with a value or an [`ApiError`]. [`super::ApiClient`] is the HTTP
//! implementation.

use async_trait::async_trait;

use super::ApiError;
use crate::models::{
    Balances, Expense, ExpenseCreate, ExpenseListParams, ExpenseUpdate, InviteLink, Member, MemberAdd,
    MemberBalanceDetail, MemberUpdate, Page, Settlements, Trip, TripCreate, TripListParams, TripTotals,
    TripUpdate, User, UserUpdate,
};

#[async_trait]
pub trait Remote: Send + Sync {
    // ===== Trips =====

    async fn list_trips(&self, params: &TripListParams) -> Result<Page<Trip>, ApiError>;

    async fn get_trip(&self, trip_id: i64) -> Result<Trip, ApiError>;

    async fn create_trip(&self, trip: &TripCreate) -> Result<Trip, ApiError>;

    async fn update_trip(&self, trip_id: i64, patch: &TripUpdate) -> Result<Trip, ApiError>;

    async fn delete_trip(&self, trip_id: i64) -> Result<(), ApiError>;

    async fn leave_trip(&self, trip_id: i64) -> Result<(), ApiError>;

    /// Spend summary. The backend keeps the counters on the trip itself.
    async fn trip_totals(&self, trip_id: i64) -> Result<TripTotals, ApiError> {
        let trip = self.get_trip(trip_id).await?;
        Ok(TripTotals::from(&trip))
    }

    // ===== Expenses =====

    async fn list_expenses(&self, trip_id: i64, params: &ExpenseListParams) -> Result<Page<Expense>, ApiError>;

    async fn get_expense(&self, trip_id: i64, expense_id: i64) -> Result<Expense, ApiError>;

    async fn create_expense(&self, trip_id: i64, expense: &ExpenseCreate) -> Result<Expense, ApiError>;

    async fn update_expense(&self, trip_id: i64, expense_id: i64, patch: &ExpenseUpdate) -> Result<Expense, ApiError>;

    async fn delete_expense(&self, trip_id: i64, expense_id: i64) -> Result<(), ApiError>;

    // ===== Members =====

    async fn list_members(&self, trip_id: i64) -> Result<Vec<Member>, ApiError>;

    async fn add_member(&self, trip_id: i64, member: &MemberAdd) -> Result<Member, ApiError>;

    async fn update_member(&self, trip_id: i64, member_id: i64, patch: &MemberUpdate) -> Result<Member, ApiError>;

    async fn remove_member(&self, trip_id: i64, member_id: i64) -> Result<(), ApiError>;

    // ===== Derived data =====

    async fn balances(&self, trip_id: i64) -> Result<Balances, ApiError>;

    async fn member_balance(&self, trip_id: i64, member_id: i64) -> Result<MemberBalanceDetail, ApiError>;

    async fn settlements(&self, trip_id: i64) -> Result<Settlements, ApiError>;

    // ===== Invites =====

    async fn create_invite(&self, trip_id: i64) -> Result<InviteLink, ApiError>;

    async fn join_trip(&self, trip_id: i64) -> Result<Member, ApiError>;

    // ===== Profile =====

    async fn get_me(&self) -> Result<User, ApiError>;

    async fn update_me(&self, patch: &UserUpdate) -> Result<User, ApiError>;
}
