//! Dirty-field diffing with a credential denylist.

use std::collections::BTreeSet;

use serde_json::{Map, Value as JsonValue, json};

/// Fields that must never appear in any `changes` payload, under any action.
pub const CHANGE_DENYLIST: &[&str] = &[
    "password",
    "password_hash",
    "session_token",
    "auth_data",
    "access_control",
];

pub fn is_denylisted(field: &str) -> bool {
    CHANGE_DENYLIST.contains(&field)
}

/// Remove denylisted fields from a document. Non-object values pass through.
pub fn scrub(doc: &JsonValue) -> JsonValue {
    match doc.as_object() {
        Some(map) => JsonValue::Object(
            map.iter()
                .filter(|(field, _)| !is_denylisted(field))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
        ),
        None => doc.clone(),
    }
}

/// Compute the `{field: {from, to}}` map between the last persisted document
/// and the document being saved.
///
/// A field present locally with no persisted counterpart (new record, added
/// field) gets `from: null`; a field dropped by the save gets `to: null`.
/// Denylisted and unchanged fields are omitted.
pub fn changed_fields(prev: Option<&JsonValue>, next: &JsonValue) -> Map<String, JsonValue> {
    let empty = Map::new();
    let prev_map = prev.and_then(|v| v.as_object()).unwrap_or(&empty);
    let next_map = next.as_object().unwrap_or(&empty);

    let fields: BTreeSet<&String> = prev_map.keys().chain(next_map.keys()).collect();

    let mut changes = Map::new();
    for field in fields {
        if is_denylisted(field) {
            continue;
        }

        let from = prev_map.get(field).cloned().unwrap_or(JsonValue::Null);
        let to = next_map.get(field).cloned().unwrap_or(JsonValue::Null);
        if from != to {
            changes.insert(field.clone(), json!({"from": from, "to": to}));
        }
    }

    changes
}
