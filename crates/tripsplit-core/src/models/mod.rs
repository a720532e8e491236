//! Data models for trip-splitting entities.
//!
//! These mirror the backend response shapes:
//!
//! - `Trip`: trip header with cached spend counters and optional member list
//! - `Expense`, `Split`: expenses and settlements (an expense variant)
//! - `Member`: trip membership, including pending and placeholder members
//! - `Balances`, `Settlements`, `TripTotals`: server-computed derived data
//! - `InviteLink`: shareable join link
//! - `User`: the signed-in user's profile
//! - `Page`, `PageCollection`: paginated list responses

pub mod amount;
pub mod balance;
pub mod expense;
pub mod invite;
pub mod member;
pub mod page;
pub mod trip;
pub mod user;

pub use balance::{Balances, MemberBalance, MemberBalanceDetail, SettlementSuggestion, Settlements, TripTotals};
pub use expense::{
    Expense, ExpenseCreate, ExpenseFilters, ExpenseListParams, ExpenseType, ExpenseTypeFilter,
    ExpenseUpdate, Split, SplitCreate, SplitType,
};
pub use invite::InviteLink;
pub use member::{Member, MemberAdd, MemberStatus, MemberUpdate};
pub use page::{Page, PageCollection};
pub use trip::{Trip, TripCreate, TripListParams, TripUpdate};
pub use user::{User, UserUpdate};

/// Default page size used by the backend when none is requested.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}

/// Entities that carry a stable server identifier.
///
/// Optimistic records use a negative sentinel id until the server assigns the
/// real one, so `id` alone is enough to find the record a mutation owns.
pub trait Identified {
    fn id(&self) -> i64;

    fn is_optimistic(&self) -> bool;
}
