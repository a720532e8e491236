use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use super::{is_first_page, now, MutationHandle, QueryClient, QueryState};
use crate::cache::{
    keys, optimistic, EntityKind, Key, KeyPredicate, MutationEvent, MutationToken, OptimisticUpdate, PageFetcher,
};
use crate::models::{
    Expense, ExpenseCreate, ExpenseFilters, ExpenseListParams, ExpenseType, ExpenseUpdate, Page, PageCollection,
    Trip, TripTotals,
};

impl QueryClient {
    pub async fn expenses(&self, trip_id: i64, params: &ExpenseListParams) -> QueryState<Page<Expense>> {
        let remote = Arc::clone(&self.remote);
        let params = params.clone();
        let key = keys::expenses::list(trip_id, &params);
        self.query(key, move || async move { remote.list_expenses(trip_id, &params).await })
            .await
    }

    pub async fn refetch_expenses(&self, trip_id: i64, params: &ExpenseListParams) -> QueryState<Page<Expense>> {
        let remote = Arc::clone(&self.remote);
        let params = params.clone();
        let key = keys::expenses::list(trip_id, &params);
        self.refetch_query(key, move || async move { remote.list_expenses(trip_id, &params).await })
            .await
    }

    /// Infinite expense list. A stale read refetches every loaded page.
    pub async fn expenses_infinite(
        &self,
        trip_id: i64,
        filters: &ExpenseFilters,
        page_size: u32,
    ) -> QueryState<PageCollection<Expense>> {
        let key = keys::expenses::infinite(trip_id, filters, page_size);
        let pages = self.expense_pages(trip_id, filters, page_size);
        let result = self.fetch.fetch_infinite(&key, self.window(&key), pages).await;
        self.settle(&key, result)
    }

    pub async fn refetch_expenses_infinite(
        &self,
        trip_id: i64,
        filters: &ExpenseFilters,
        page_size: u32,
    ) -> QueryState<PageCollection<Expense>> {
        let key = keys::expenses::infinite(trip_id, filters, page_size);
        let pages = self.expense_pages(trip_id, filters, page_size);
        let result = self.fetch.refetch_infinite(&key, pages).await;
        self.settle(&key, result)
    }

    /// Load the next page of an infinite list. Concurrent calls share one
    /// request; once the server reports no more results this is a no-op.
    pub async fn fetch_next_expense_page(
        &self,
        trip_id: i64,
        filters: &ExpenseFilters,
        page_size: u32,
    ) -> QueryState<PageCollection<Expense>> {
        let key = keys::expenses::infinite(trip_id, filters, page_size);
        let pages = self.expense_pages(trip_id, filters, page_size);
        let result = self.fetch.fetch_next_page(&key, pages).await;
        self.settle(&key, result)
    }

    fn expense_pages(&self, trip_id: i64, filters: &ExpenseFilters, page_size: u32) -> PageFetcher<Expense> {
        let remote = Arc::clone(&self.remote);
        let filters = filters.clone();
        Arc::new(move |page| {
            let remote = Arc::clone(&remote);
            let params = ExpenseListParams {
                filters: filters.clone(),
                page,
                page_size,
            };
            async move { remote.list_expenses(trip_id, &params).await }.boxed()
        })
    }

    /// Expense detail, seeded from a cached list when cold.
    pub async fn expense(&self, trip_id: i64, expense_id: i64) -> QueryState<Expense> {
        self.seeds.seed_expense(trip_id, expense_id);
        let remote = Arc::clone(&self.remote);
        self.query(keys::expenses::detail(trip_id, expense_id), move || async move {
            remote.get_expense(trip_id, expense_id).await
        })
        .await
    }

    pub fn create_expense(&self, trip_id: i64) -> MutationHandle<ExpenseCreate, Expense> {
        self.mutation(move |remote, input: ExpenseCreate| {
            let remote = Arc::clone(remote);
            let mutation = CreateExpense {
                trip_id,
                input: input.clone(),
                now: now(),
            };
            (mutation, async move { remote.create_expense(trip_id, &input).await })
        })
    }

    /// Record a payment between members. Settlements are expenses of type
    /// `settlement`; whatever type the input carries is overridden.
    pub fn create_settlement(&self, trip_id: i64) -> MutationHandle<ExpenseCreate, Expense> {
        self.mutation(move |remote, mut input: ExpenseCreate| {
            input.expense_type = ExpenseType::Settlement;
            let remote = Arc::clone(remote);
            let mutation = CreateExpense {
                trip_id,
                input: input.clone(),
                now: now(),
            };
            (mutation, async move { remote.create_expense(trip_id, &input).await })
        })
    }

    /// Input is `(expense_id, patch)`.
    pub fn update_expense(&self, trip_id: i64) -> MutationHandle<(i64, ExpenseUpdate), Expense> {
        self.mutation(move |remote, (expense_id, patch): (i64, ExpenseUpdate)| {
            let remote = Arc::clone(remote);
            let mutation = UpdateExpense {
                trip_id,
                expense_id,
                patch: patch.clone(),
            };
            (mutation, async move { remote.update_expense(trip_id, expense_id, &patch).await })
        })
    }

    /// Input is the expense id.
    pub fn delete_expense(&self, trip_id: i64) -> MutationHandle<i64, ()> {
        self.mutation(move |remote, expense_id: i64| {
            let remote = Arc::clone(remote);
            (DeleteExpense { trip_id, expense_id }, async move {
                remote.delete_expense(trip_id, expense_id).await
            })
        })
    }
}

struct CreateExpense {
    trip_id: i64,
    input: ExpenseCreate,
    now: String,
}

impl CreateExpense {
    fn record(&self, token: &MutationToken) -> Expense {
        self.input.to_optimistic(self.trip_id, token.sentinel_id, &self.now)
    }

    /// Step the trip's counters by one expense. Amounts in a foreign currency
    /// only move the count; converting them is the server's job.
    fn count(&self, expense_count: &mut u64, total_spent: &mut f64, base_currency: &str, sign: i64) -> bool {
        if self.input.expense_type == ExpenseType::Settlement {
            return false;
        }
        *expense_count = (*expense_count as i64 + sign).max(0) as u64;
        if self.input.currency.eq_ignore_ascii_case(base_currency) {
            *total_spent += sign as f64 * self.input.amount;
        }
        true
    }

    fn step_counters(&self, key: &Key, current: &Value, sign: i64) -> Option<Value> {
        match EntityKind::of(key)? {
            EntityKind::TripDetail => optimistic::update_as(current, |trip: &mut Trip| {
                self.count(&mut trip.expense_count, &mut trip.total_spent, &trip.base_currency, sign)
            }),
            EntityKind::Totals => optimistic::update_as(current, |totals: &mut TripTotals| {
                self.count(&mut totals.expense_count, &mut totals.total_spent, &totals.base_currency, sign)
            }),
            _ => None,
        }
    }
}

fn is_expense_list(key: &Key) -> bool {
    matches!(
        EntityKind::of(key),
        Some(EntityKind::ExpenseList | EntityKind::ExpenseInfinite)
    )
}

impl OptimisticUpdate for CreateExpense {
    type Output = Expense;

    fn name(&self) -> &'static str {
        match self.input.expense_type {
            ExpenseType::Expense => "create_expense",
            ExpenseType::Settlement => "create_settlement",
        }
    }

    fn affected(&self) -> Option<KeyPredicate> {
        Some(
            keys::expenses::lists_for_trip(self.trip_id)
                .or(KeyPredicate::Exact(keys::trips::detail(self.trip_id)))
                .or(KeyPredicate::Exact(keys::totals::trip(self.trip_id))),
        )
    }

    fn apply(&self, key: &Key, current: &Value, token: &MutationToken) -> Option<Value> {
        if !is_expense_list(key) {
            return self.step_counters(key, current, 1);
        }
        let record = self.record(token);
        let filters = key.trailing_params().map(ExpenseFilters::from_params).unwrap_or_default();
        // A filtered list only gets rows it would have returned itself.
        if !is_first_page(key) || !filters.accepts(&record) {
            return None;
        }
        optimistic::prepend(current, &serde_json::to_value(record).ok()?)
    }

    fn reconcile(&self, key: &Key, current: &Value, token: &MutationToken, output: &Expense, _: bool) -> Option<Value> {
        if !is_expense_list(key) {
            return None;
        }
        optimistic::replace_by_id(current, token.sentinel_id, &serde_json::to_value(output).ok()?)
    }

    fn revert(&self, key: &Key, current: &Value, _before: Option<&Value>, token: &MutationToken) -> Option<Value> {
        if is_expense_list(key) {
            optimistic::remove_by_id(current, token.sentinel_id)
        } else {
            self.step_counters(key, current, -1)
        }
    }

    fn event(&self, output: &Expense) -> MutationEvent {
        match output.expense_type {
            ExpenseType::Settlement => MutationEvent::SettlementCreated { trip_id: self.trip_id },
            ExpenseType::Expense => MutationEvent::ExpenseChanged {
                trip_id: self.trip_id,
                expense_id: Some(output.id),
            },
        }
    }
}

struct UpdateExpense {
    trip_id: i64,
    expense_id: i64,
    patch: ExpenseUpdate,
}

impl OptimisticUpdate for UpdateExpense {
    type Output = Expense;

    fn name(&self) -> &'static str {
        "update_expense"
    }

    fn affected(&self) -> Option<KeyPredicate> {
        Some(
            keys::expenses::lists_for_trip(self.trip_id)
                .or(KeyPredicate::Exact(keys::expenses::detail(self.trip_id, self.expense_id))),
        )
    }

    fn apply(&self, key: &Key, current: &Value, _token: &MutationToken) -> Option<Value> {
        let edit = |expense: &mut Expense| {
            expense.apply_update(&self.patch);
            true
        };
        if is_expense_list(key) {
            optimistic::patch_by_id(current, self.expense_id, |row| optimistic::update_as(row, edit))
        } else {
            optimistic::update_as(current, edit)
        }
    }

    fn reconcile(
        &self,
        key: &Key,
        current: &Value,
        _token: &MutationToken,
        output: &Expense,
        superseded: bool,
    ) -> Option<Value> {
        if superseded {
            return None;
        }
        let confirmed = serde_json::to_value(output).ok()?;
        if is_expense_list(key) {
            optimistic::replace_by_id(current, self.expense_id, &confirmed)
        } else {
            Some(confirmed)
        }
    }

    fn revert(&self, key: &Key, current: &Value, before: Option<&Value>, _token: &MutationToken) -> Option<Value> {
        let fields = self.patch.written_fields();
        if is_expense_list(key) {
            optimistic::restore_fields_by_id(current, before, self.expense_id, &fields)
        } else {
            optimistic::restore_fields(current, before?, &fields)
        }
    }

    fn event(&self, _output: &Expense) -> MutationEvent {
        MutationEvent::ExpenseChanged {
            trip_id: self.trip_id,
            expense_id: Some(self.expense_id),
        }
    }
}

struct DeleteExpense {
    trip_id: i64,
    expense_id: i64,
}

impl OptimisticUpdate for DeleteExpense {
    type Output = ();

    fn name(&self) -> &'static str {
        "delete_expense"
    }

    fn event(&self, _output: &()) -> MutationEvent {
        MutationEvent::ExpenseChanged {
            trip_id: self.trip_id,
            expense_id: Some(self.expense_id),
        }
    }
}
