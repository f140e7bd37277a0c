//! Typed layer over the raw record store.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::store::{Filter, RecordId, RecordStore, StoreError};

/// A serde type persisted as a record of a named class.
pub trait Record: Serialize + DeserializeOwned {
    /// Class name the record is stored under (e.g. `"PermissionDelegation"`).
    const CLASS: &'static str;

    /// Identifier of this record within its class.
    fn record_id(&self) -> RecordId;
}

/// Serde round-trip convenience over any [`RecordStore`].
///
/// Blanket-implemented; import the trait to use the typed methods.
pub trait TypedStore: RecordStore {
    fn get_typed<R: Record>(&self, id: &RecordId) -> Result<Option<R>, StoreError> {
        match self.get(R::CLASS, id)? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    fn find_typed<R: Record>(&self, filter: &Filter) -> Result<Vec<R>, StoreError> {
        self.find(R::CLASS, filter)?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
            .collect()
    }

    fn save_typed<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let doc = serde_json::to_value(record)?;
        if !doc.is_object() {
            return Err(StoreError::NotAnObject);
        }
        self.save(R::CLASS, &record.record_id(), doc)
    }

    fn delete_typed<R: Record>(&self, id: &RecordId) -> Result<bool, StoreError> {
        self.delete(R::CLASS, id)
    }
}

impl<S: RecordStore + ?Sized> TypedStore for S {}
