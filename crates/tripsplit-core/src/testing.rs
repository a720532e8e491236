//! In-memory backend for tests.
//!
//! Behaves like the REST API closely enough for the cache layer: ids are
//! assigned from 101 upward, expense lists are newest first and paginated,
//! and trip counters follow expense writes. Every call is counted by
//! operation name, can be made to fail, and can be held at a gate until the
//! test releases it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::api::{ApiError, Remote};
use crate::config::Config;
use crate::query::QueryClient;
use crate::models::{
    Balances, Expense, ExpenseCreate, ExpenseListParams, ExpenseType, ExpenseUpdate, InviteLink, Member,
    MemberAdd, MemberBalance, MemberBalanceDetail, MemberStatus, MemberUpdate, Page, Settlements, Trip,
    TripCreate, TripListParams, TripUpdate, User, UserUpdate,
};

const NOW: &str = "2024-03-15T12:00:00Z";

/// A session over `remote` with default timings.
pub(crate) fn client(remote: &FakeRemote) -> QueryClient {
    QueryClient::new(Arc::new(remote.clone()), &Config::default())
}

pub(crate) fn trip(id: i64, name: &str) -> Trip {
    Trip {
        id,
        name: name.to_string(),
        description: None,
        base_currency: "USD".to_string(),
        simplify_debts: false,
        start_date: None,
        end_date: None,
        created_by: "owner".to_string(),
        created_at: NOW.to_string(),
        updated_at: NOW.to_string(),
        total_spent: 0.0,
        expense_count: 0,
        member_count: Some(0),
        members: None,
        is_optimistic: false,
    }
}

pub(crate) fn expense(id: i64, trip_id: i64, amount: f64, paid_by: i64) -> Expense {
    let mut expense = ExpenseCreate {
        description: format!("expense {}", id),
        amount,
        currency: "USD".to_string(),
        paid_by_member_id: paid_by,
        ..ExpenseCreate::default()
    }
    .to_optimistic(trip_id, id, NOW);
    expense.is_optimistic = false;
    expense
}

pub(crate) fn user(id: &str, display_name: &str) -> User {
    User {
        id: id.to_string(),
        email: format!("{}@example.com", id),
        display_name: Some(display_name.to_string()),
        avatar_url: None,
    }
}

pub(crate) fn member(id: i64, trip_id: i64, nickname: &str) -> Member {
    let mut member = MemberAdd {
        nickname: nickname.to_string(),
        ..MemberAdd::default()
    }
    .to_optimistic(trip_id, id, NOW);
    member.status = MemberStatus::Active;
    member.is_optimistic = false;
    member
}

#[derive(Default)]
struct State {
    trips: Vec<Trip>,
    /// Newest first.
    expenses: HashMap<i64, Vec<Expense>>,
    members: HashMap<i64, Vec<Member>>,
    user: Option<User>,
    next_id: i64,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, ApiError>,
    gates: HashMap<&'static str, Arc<Notify>>,
}

#[derive(Clone)]
pub(crate) struct FakeRemote {
    state: Arc<Mutex<State>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        let state = State {
            next_id: 101,
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_trip(self, trip: Trip) -> Self {
        self.lock().trips.push(trip);
        self
    }

    pub fn with_member(self, member: Member) -> Self {
        self.lock().members.entry(member.trip_id).or_default().push(member);
        self
    }

    /// The signed-in user. Members with a matching `user_id` mirror its
    /// display name and avatar.
    pub fn with_user(self, user: User) -> Self {
        self.lock().user = Some(user);
        self
    }

    /// Seed an expense as already stored; it becomes the newest.
    pub fn with_expense(self, expense: Expense) -> Self {
        {
            let mut state = self.lock();
            if let Some(trip) = state.trips.iter_mut().find(|t| t.id == expense.trip_id) {
                trip.expense_count += 1;
                trip.total_spent += expense.amount_in_base_currency;
            }
            state.expenses.entry(expense.trip_id).or_default().insert(0, expense);
        }
        self
    }

    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// Make every call to `op` fail with `error` until cleared.
    pub fn fail(&self, op: &'static str, error: ApiError) {
        self.lock().failures.insert(op, error);
    }

    pub fn clear_failure(&self, op: &'static str) {
        self.lock().failures.remove(op);
    }

    /// Hold calls to `op` until the returned gate is notified.
    pub fn gate(&self, op: &'static str) -> Arc<Notify> {
        self.lock().gates.entry(op).or_insert_with(|| Arc::new(Notify::new())).clone()
    }

    async fn enter(&self, op: &'static str) -> Result<(), ApiError> {
        let gate = {
            let mut state = self.lock();
            *state.calls.entry(op).or_insert(0) += 1;
            state.gates.get(op).cloned()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.lock().failures.get(op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn not_found(what: &str) -> ApiError {
        ApiError::ServerRejected {
            status: 404,
            detail: format!("{} not found", what),
        }
    }
}

#[async_trait]
impl Remote for FakeRemote {
    async fn list_trips(&self, params: &TripListParams) -> Result<Page<Trip>, ApiError> {
        self.enter("list_trips").await?;
        let state = self.lock();
        let start = ((params.page.max(1) - 1) * params.page_size) as usize;
        let items = state
            .trips
            .iter()
            .skip(start)
            .take(params.page_size as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, params.page, params.page_size, state.trips.len() as u64))
    }

    async fn get_trip(&self, trip_id: i64) -> Result<Trip, ApiError> {
        self.enter("get_trip").await?;
        let state = self.lock();
        state
            .trips
            .iter()
            .find(|t| t.id == trip_id)
            .cloned()
            .ok_or_else(|| Self::not_found("Trip"))
    }

    async fn create_trip(&self, input: &TripCreate) -> Result<Trip, ApiError> {
        self.enter("create_trip").await?;
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let mut created = input.to_optimistic(id, NOW);
        created.is_optimistic = false;
        state.trips.insert(0, created.clone());
        Ok(created)
    }

    async fn update_trip(&self, trip_id: i64, patch: &TripUpdate) -> Result<Trip, ApiError> {
        self.enter("update_trip").await?;
        let mut state = self.lock();
        let trip = state
            .trips
            .iter_mut()
            .find(|t| t.id == trip_id)
            .ok_or_else(|| Self::not_found("Trip"))?;
        trip.apply_update(patch);
        Ok(trip.clone())
    }

    async fn delete_trip(&self, trip_id: i64) -> Result<(), ApiError> {
        self.enter("delete_trip").await?;
        let mut state = self.lock();
        state.trips.retain(|t| t.id != trip_id);
        state.expenses.remove(&trip_id);
        state.members.remove(&trip_id);
        Ok(())
    }

    async fn leave_trip(&self, trip_id: i64) -> Result<(), ApiError> {
        self.enter("leave_trip").await?;
        self.lock().trips.retain(|t| t.id != trip_id);
        Ok(())
    }

    async fn list_expenses(&self, trip_id: i64, params: &ExpenseListParams) -> Result<Page<Expense>, ApiError> {
        self.enter("list_expenses").await?;
        let state = self.lock();
        let matching: Vec<&Expense> = state
            .expenses
            .get(&trip_id)
            .map(|all| all.iter().filter(|e| params.filters.accepts(e)).collect())
            .unwrap_or_default();
        let start = ((params.page.max(1) - 1) * params.page_size) as usize;
        let items = matching
            .iter()
            .skip(start)
            .take(params.page_size as usize)
            .map(|e| (*e).clone())
            .collect();
        Ok(Page::new(items, params.page, params.page_size, matching.len() as u64))
    }

    async fn get_expense(&self, trip_id: i64, expense_id: i64) -> Result<Expense, ApiError> {
        self.enter("get_expense").await?;
        let state = self.lock();
        state
            .expenses
            .get(&trip_id)
            .and_then(|all| all.iter().find(|e| e.id == expense_id))
            .cloned()
            .ok_or_else(|| Self::not_found("Expense"))
    }

    async fn create_expense(&self, trip_id: i64, input: &ExpenseCreate) -> Result<Expense, ApiError> {
        self.enter("create_expense").await?;
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let mut created = input.to_optimistic(trip_id, id, NOW);
        created.is_optimistic = false;
        if let Some(payer) = state
            .members
            .get(&trip_id)
            .and_then(|members| members.iter().find(|m| m.id == input.paid_by_member_id))
        {
            created.paid_by_nickname = payer.nickname.clone();
        }
        if let Some(trip) = state.trips.iter_mut().find(|t| t.id == trip_id) {
            trip.expense_count += 1;
            trip.total_spent += created.amount_in_base_currency;
        }
        state.expenses.entry(trip_id).or_default().insert(0, created.clone());
        Ok(created)
    }

    async fn update_expense(&self, trip_id: i64, expense_id: i64, patch: &ExpenseUpdate) -> Result<Expense, ApiError> {
        self.enter("update_expense").await?;
        let mut state = self.lock();
        let expense = state
            .expenses
            .get_mut(&trip_id)
            .and_then(|all| all.iter_mut().find(|e| e.id == expense_id))
            .ok_or_else(|| Self::not_found("Expense"))?;
        expense.apply_update(patch);
        Ok(expense.clone())
    }

    async fn delete_expense(&self, trip_id: i64, expense_id: i64) -> Result<(), ApiError> {
        self.enter("delete_expense").await?;
        let mut state = self.lock();
        if let Some(all) = state.expenses.get_mut(&trip_id) {
            all.retain(|e| e.id != expense_id);
        }
        Ok(())
    }

    async fn list_members(&self, trip_id: i64) -> Result<Vec<Member>, ApiError> {
        self.enter("list_members").await?;
        Ok(self.lock().members.get(&trip_id).cloned().unwrap_or_default())
    }

    async fn add_member(&self, trip_id: i64, input: &MemberAdd) -> Result<Member, ApiError> {
        self.enter("add_member").await?;
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let mut added = input.to_optimistic(trip_id, id, NOW);
        added.is_optimistic = false;
        state.members.entry(trip_id).or_default().push(added.clone());
        Ok(added)
    }

    async fn update_member(&self, trip_id: i64, member_id: i64, patch: &MemberUpdate) -> Result<Member, ApiError> {
        self.enter("update_member").await?;
        let mut state = self.lock();
        let member = state
            .members
            .get_mut(&trip_id)
            .and_then(|all| all.iter_mut().find(|m| m.id == member_id))
            .ok_or_else(|| Self::not_found("Member"))?;
        member.apply_update(patch);
        Ok(member.clone())
    }

    async fn remove_member(&self, trip_id: i64, member_id: i64) -> Result<(), ApiError> {
        self.enter("remove_member").await?;
        if let Some(all) = self.lock().members.get_mut(&trip_id) {
            all.retain(|m| m.id != member_id);
        }
        Ok(())
    }

    async fn balances(&self, trip_id: i64) -> Result<Balances, ApiError> {
        self.enter("balances").await?;
        let state = self.lock();
        let expenses = state.expenses.get(&trip_id).cloned().unwrap_or_default();
        let balances = state
            .members
            .get(&trip_id)
            .map(|members| {
                members
                    .iter()
                    .map(|m| {
                        let total_paid: f64 = expenses
                            .iter()
                            .filter(|e| e.paid_by_member_id == m.id && e.expense_type == ExpenseType::Expense)
                            .map(|e| e.amount_in_base_currency)
                            .sum();
                        MemberBalance {
                            member_id: m.id,
                            member_nickname: m.nickname.clone(),
                            total_paid,
                            total_owed: 0.0,
                            net_balance: total_paid,
                            currency_balances: Default::default(),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Balances { trip_id, balances })
    }

    async fn member_balance(&self, trip_id: i64, member_id: i64) -> Result<MemberBalanceDetail, ApiError> {
        self.enter("member_balance").await?;
        let state = self.lock();
        let member = state
            .members
            .get(&trip_id)
            .and_then(|all| all.iter().find(|m| m.id == member_id))
            .ok_or_else(|| Self::not_found("Member"))?;
        Ok(MemberBalanceDetail {
            member_id,
            member_nickname: member.nickname.clone(),
            details: Default::default(),
        })
    }

    async fn settlements(&self, trip_id: i64) -> Result<Settlements, ApiError> {
        self.enter("settlements").await?;
        let state = self.lock();
        let base_currency = state
            .trips
            .iter()
            .find(|t| t.id == trip_id)
            .map(|t| t.base_currency.clone())
            .unwrap_or_default();
        Ok(Settlements {
            trip_id,
            base_currency,
            settlements: Vec::new(),
        })
    }

    async fn create_invite(&self, trip_id: i64) -> Result<InviteLink, ApiError> {
        self.enter("create_invite").await?;
        let code = format!("code{}{}", trip_id, self.calls("create_invite"));
        Ok(InviteLink {
            invite_url: format!("https://split.example.com/join?trip={}&code={}", trip_id, code),
            invite_code: code,
            expires_at: None,
        })
    }

    async fn join_trip(&self, trip_id: i64) -> Result<Member, ApiError> {
        self.enter("join_trip").await?;
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let joined = member(id, trip_id, "joiner");
        state.members.entry(trip_id).or_default().push(joined.clone());
        Ok(joined)
    }

    async fn get_me(&self) -> Result<User, ApiError> {
        self.enter("get_me").await?;
        self.lock().user.clone().ok_or_else(|| Self::not_found("User"))
    }

    async fn update_me(&self, patch: &UserUpdate) -> Result<User, ApiError> {
        self.enter("update_me").await?;
        let mut state = self.lock();
        let user = state.user.as_mut().ok_or_else(|| Self::not_found("User"))?;
        user.apply_update(patch);
        let user = user.clone();
        for member in state.members.values_mut().flatten() {
            if member.user_id.as_deref() == Some(user.id.as_str()) {
                member.display_name = user.display_name.clone();
                member.avatar_url = user.avatar_url.clone();
            }
        }
        Ok(user)
    }
}
