//! In-memory record store.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use crate::store::{Filter, RecordId, RecordStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    class: String,
    id: RecordId,
}

/// In-memory keyed-record store.
///
/// Intended for tests/dev. Single-record saves are atomic under the lock,
/// matching the contract the real backend provides.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<RecordKey, JsonValue>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(class: &str, id: &RecordId) -> RecordKey {
        RecordKey {
            class: class.to_string(),
            id: id.clone(),
        }
    }
}

impl RecordStore for InMemoryRecordStore {
    fn get(&self, class: &str, id: &RecordId) -> Result<Option<JsonValue>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(records.get(&Self::key(class, id)).cloned())
    }

    fn find(&self, class: &str, filter: &Filter) -> Result<Vec<JsonValue>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        Ok(records
            .iter()
            .filter(|(key, doc)| key.class == class && filter.matches(doc))
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    fn save(&self, class: &str, id: &RecordId, doc: JsonValue) -> Result<(), StoreError> {
        if !doc.is_object() {
            return Err(StoreError::NotAnObject);
        }

        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        records.insert(Self::key(class, id), doc);
        Ok(())
    }

    fn count(&self, class: &str, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.find(class, filter)?.len() as u64)
    }

    fn delete(&self, class: &str, id: &RecordId) -> Result<bool, StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(records.remove(&Self::key(class, id)).is_some())
    }
}
