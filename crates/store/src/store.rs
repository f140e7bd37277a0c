//! Record store contract.
//!
//! A `RecordStore` is a generic keyed-document store: records are JSON
//! documents grouped into named classes, addressable by id, and queryable by
//! field equality. There are no transactions across records; a single-record
//! save is atomic.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Identifier of a record within its class.
///
/// Stored as a string so the store stays agnostic of the id types the domain
/// layers use (UUIDs, role names, session ids).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! impl_record_id_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for RecordId {
                fn from(value: $t) -> Self {
                    Self(value.to_string())
                }
            }
        )*
    };
}

impl_record_id_from!(
    uuid::Uuid,
    tourdesk_core::UserId,
    tourdesk_core::SessionId,
    tourdesk_core::DelegationId,
    tourdesk_core::OverrideId,
    tourdesk_core::AuditEntryId,
);

/// Field-equality query filter.
///
/// Matching is exact equality on top-level fields; a record matches when every
/// clause matches. Range scans and projections are not part of the contract;
/// callers filter further in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, JsonValue)>,
}

impl Filter {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn field(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::empty().and(field, value)
    }

    pub fn and(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Whether a document satisfies every clause.
    pub fn matches(&self, doc: &JsonValue) -> bool {
        self.clauses
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

/// Record store operation error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

impl From<StoreError> for tourdesk_core::AccessError {
    fn from(value: StoreError) -> Self {
        Self::internal(format!("record store: {value}"))
    }
}

/// Generic keyed-record store.
///
/// Object-safe so managers can hold `Arc<dyn RecordStore>`; the typed layer in
/// [`crate::record`] adds serde round-trips on top.
pub trait RecordStore: Send + Sync {
    /// Fetch a single record by class and id.
    fn get(&self, class: &str, id: &RecordId) -> Result<Option<JsonValue>, StoreError>;

    /// Fetch all records of a class matching a field-equality filter.
    fn find(&self, class: &str, filter: &Filter) -> Result<Vec<JsonValue>, StoreError>;

    /// Insert or replace a single record. Atomic at the single-record level.
    fn save(&self, class: &str, id: &RecordId, doc: JsonValue) -> Result<(), StoreError>;

    /// Count records of a class matching a filter.
    fn count(&self, class: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Remove a single record. Returns whether a record was removed.
    fn delete(&self, class: &str, id: &RecordId) -> Result<bool, StoreError>;
}

impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    fn get(&self, class: &str, id: &RecordId) -> Result<Option<JsonValue>, StoreError> {
        (**self).get(class, id)
    }

    fn find(&self, class: &str, filter: &Filter) -> Result<Vec<JsonValue>, StoreError> {
        (**self).find(class, filter)
    }

    fn save(&self, class: &str, id: &RecordId, doc: JsonValue) -> Result<(), StoreError> {
        (**self).save(class, id, doc)
    }

    fn count(&self, class: &str, filter: &Filter) -> Result<u64, StoreError> {
        (**self).count(class, filter)
    }

    fn delete(&self, class: &str, id: &RecordId) -> Result<bool, StoreError> {
        (**self).delete(class, id)
    }
}
