//! Identifier-list extraction shared by the list operations.
//!
//! Collection endpoints answer either with a plain `{"<key>": [..]}` array or
//! with a `{"resultList": {"result": [{"<key>": ..}]}}` envelope. Both shapes
//! are accepted here so the callers only deal with ordered identifiers.

use std::collections::HashSet;
use std::hash::Hash;

use serde_json::Value;

use crate::error::ArrayError;

/// Extracts the identifiers stored under `key` from a listing body.
///
/// A body without `key` yields an empty list. Numeric identifiers are
/// rendered as strings.
///
/// # Errors
///
/// Returns [`ArrayError::UnexpectedResponse`] when the body is not an object
/// or `key` holds something other than identifiers.
pub fn ids_from_body(body: &Value, key: &str) -> Result<Vec<String>, ArrayError> {
    let context = format!("{key} listing");
    if body.is_null() {
        return Ok(Vec::new());
    }
    let object = body
        .as_object()
        .ok_or_else(|| ArrayError::unexpected(&context, "listing body is not an object"))?;

    if let Some(results) = object
        .get("resultList")
        .and_then(|list| list.get("result"))
        .and_then(Value::as_array)
    {
        return results
            .iter()
            .filter_map(|entry| entry.get(key))
            .map(|value| id_from_value(value, &context))
            .collect();
    }

    match object.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(values)) => values
            .iter()
            .map(|value| id_from_value(value, &context))
            .collect(),
        Some(other) => id_from_value(other, &context).map(|id| vec![id]),
    }
}

fn id_from_value(value: &Value, context: &str) -> Result<String, ArrayError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(ArrayError::unexpected(
            context,
            format!("expected an identifier, found {other}"),
        )),
    }
}

/// Removes duplicates while keeping the first occurrence of each item.
#[must_use]
pub fn dedup_preserving_order<T>(items: Vec<T>) -> Vec<T>
where
    T: Clone + Eq + Hash,
{
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
