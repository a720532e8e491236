//! Value-level edits used by optimistic writes, reconciliation and rollback.
//!
//! Cached list values come in three shapes: a single page
//! (`{items, page, page_size, total}`), a page collection (`{pages: [..]}`)
//! and a bare array. Every helper returns `None` when it has nothing to change,
//! which leaves the entry untouched.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub(crate) fn id_of(record: &Value) -> Option<i64> {
    record.get("id").and_then(Value::as_i64)
}

fn is_optimistic(record: &Value) -> bool {
    record.get("is_optimistic").and_then(Value::as_bool).unwrap_or(false)
}

/// Every item array inside a list value, in display order.
fn item_arrays_mut(value: &mut Value) -> Vec<&mut Vec<Value>> {
    match value {
        Value::Array(items) => vec![items],
        Value::Object(map) => {
            if map.contains_key("pages") {
                match map.get_mut("pages") {
                    Some(Value::Array(pages)) => pages
                        .iter_mut()
                        .filter_map(|page| match page.get_mut("items") {
                            Some(Value::Array(items)) => Some(items),
                            _ => None,
                        })
                        .collect(),
                    _ => Vec::new(),
                }
            } else {
                match map.get_mut("items") {
                    Some(Value::Array(items)) => vec![items],
                    _ => Vec::new(),
                }
            }
        }
        _ => Vec::new(),
    }
}

fn item_arrays(value: &Value) -> Vec<&Vec<Value>> {
    match value {
        Value::Array(items) => vec![items],
        Value::Object(map) => match (map.get("pages"), map.get("items")) {
            (Some(Value::Array(pages)), _) => pages
                .iter()
                .filter_map(|page| page.get("items").and_then(Value::as_array))
                .collect(),
            (None, Some(Value::Array(items))) => vec![items],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Add `delta` to the `total` of a page, or of every page in a collection.
fn adjust_total(value: &mut Value, delta: i64) {
    let bump = |page: &mut Value| {
        if let Some(total) = page.get("total").and_then(Value::as_u64) {
            page["total"] = Value::from((total as i64 + delta).max(0) as u64);
        }
    };
    match value.get_mut("pages") {
        Some(Value::Array(pages)) => pages.iter_mut().for_each(bump),
        _ => bump(value),
    }
}

/// Find a confirmed (server-assigned, non-optimistic) record by id.
pub(crate) fn find_confirmed(value: &Value, id: i64) -> Option<Value> {
    if id <= 0 {
        return None;
    }
    item_arrays(value)
        .into_iter()
        .flatten()
        .find(|record| id_of(record) == Some(id) && !is_optimistic(record))
        .cloned()
}

/// Insert a record at the head of the list (first page for collections) and
/// count it in `total`.
pub(crate) fn prepend(value: &Value, record: &Value) -> Option<Value> {
    let mut next = value.clone();
    {
        let mut arrays = item_arrays_mut(&mut next);
        let first = arrays.first_mut()?;
        first.insert(0, record.clone());
    }
    adjust_total(&mut next, 1);
    Some(next)
}

/// Insert a record at the tail of a bare array.
pub(crate) fn append(value: &Value, record: &Value) -> Option<Value> {
    let mut items = value.as_array()?.clone();
    items.push(record.clone());
    Some(Value::Array(items))
}

/// Replace the record with `id`, wherever it sits.
pub(crate) fn replace_by_id(value: &Value, id: i64, record: &Value) -> Option<Value> {
    patch_by_id(value, id, |_| Some(record.clone()))
}

/// Rewrite the record with `id` through `patch`.
pub(crate) fn patch_by_id<F>(value: &Value, id: i64, mut patch: F) -> Option<Value>
where
    F: FnMut(&Value) -> Option<Value>,
{
    let mut next = value.clone();
    let mut changed = false;
    for items in item_arrays_mut(&mut next) {
        for item in items.iter_mut() {
            if id_of(item) == Some(id) {
                if let Some(patched) = patch(item) {
                    *item = patched;
                    changed = true;
                }
            }
        }
    }
    changed.then_some(next)
}

/// Copy `fields` from `before` onto `current`, leaving every other field as
/// it is now. A field `before` lacked is removed.
pub(crate) fn restore_fields(current: &Value, before: &Value, fields: &[&str]) -> Option<Value> {
    let mut next = current.clone();
    let map = next.as_object_mut()?;
    let mut changed = false;
    for field in fields {
        let old = before.get(*field);
        if map.get(*field) == old {
            continue;
        }
        match old {
            Some(value) => map.insert((*field).to_string(), value.clone()),
            None => map.remove(*field),
        };
        changed = true;
    }
    changed.then_some(next)
}

/// [`restore_fields`] for the row with `id`, using that row as it was in the
/// list value `before`.
pub(crate) fn restore_fields_by_id(current: &Value, before: Option<&Value>, id: i64, fields: &[&str]) -> Option<Value> {
    let row = find_confirmed(before?, id)?;
    patch_by_id(current, id, |now| restore_fields(now, &row, fields))
}

/// Drop the record with `id` and uncount it from `total`.
pub(crate) fn remove_by_id(value: &Value, id: i64) -> Option<Value> {
    let mut next = value.clone();
    let mut removed = 0;
    for items in item_arrays_mut(&mut next) {
        let before = items.len();
        items.retain(|item| id_of(item) != Some(id));
        removed += before - items.len();
    }
    if removed == 0 {
        return None;
    }
    adjust_total(&mut next, -(removed as i64));
    Some(next)
}

/// Edit a whole value as a typed model. `edit` returns whether it changed
/// anything; values that do not deserialize as `T` are left alone.
pub(crate) fn update_as<T, F>(value: &Value, edit: F) -> Option<Value>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut T) -> bool,
{
    let mut model: T = serde_json::from_value(value.clone()).ok()?;
    if !edit(&mut model) {
        return None;
    }
    serde_json::to_value(model).ok()
}
