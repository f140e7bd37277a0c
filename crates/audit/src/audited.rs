//! Audited record store decorator.
//!
//! Wraps any [`RecordStore`] with the trigger points of §audit: a before/after
//! pair around saves, a before-trigger on deletes, and a single-read trigger
//! on sensitive classes. The acting user is bound at construction time (one
//! decorator per resolved request), so attribution is explicit rather than
//! ambient.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use tourdesk_store::{Filter, RecordId, RecordStore, StoreError};

use crate::actor::Actor;
use crate::diff::changed_fields;
use crate::entry::RequestMeta;
use crate::recorder::AuditRecorder;

/// A [`RecordStore`] that records the audit trail of everything done through
/// it on behalf of one acting user.
pub struct AuditedStore<S: RecordStore> {
    inner: S,
    recorder: Arc<AuditRecorder>,
    actor: Actor,
    meta: RequestMeta,
}

impl<S: RecordStore> AuditedStore<S> {
    pub fn new(inner: S, recorder: Arc<AuditRecorder>, actor: Actor, meta: RequestMeta) -> Self {
        Self {
            inner,
            recorder,
            actor,
            meta,
        }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: RecordStore> RecordStore for AuditedStore<S> {
    fn get(&self, class: &str, id: &RecordId) -> Result<Option<JsonValue>, StoreError> {
        let result = self.inner.get(class, id)?;

        if let Some(doc) = &result {
            if self.recorder.is_sensitive(class) && !self.recorder.is_excluded(class) {
                self.recorder
                    .record_read(&self.actor, &self.meta, class, id.as_str(), doc);
            }
        }

        Ok(result)
    }

    fn find(&self, class: &str, filter: &Filter) -> Result<Vec<JsonValue>, StoreError> {
        let results = self.inner.find(class, filter)?;

        // Bulk-query exemption: only a query returning exactly one record of a
        // sensitive class is audited.
        if results.len() == 1
            && self.recorder.is_sensitive(class)
            && !self.recorder.is_excluded(class)
        {
            let doc = &results[0];
            let id = doc
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            self.recorder
                .record_read(&self.actor, &self.meta, class, &id, doc);
        }

        Ok(results)
    }

    fn save(&self, class: &str, id: &RecordId, doc: JsonValue) -> Result<(), StoreError> {
        if self.recorder.is_excluded(class) {
            return self.inner.save(class, id, doc);
        }

        // Before: capture the last persisted state for diffing. A record is
        // "new" when it had no identity before this save.
        let prior = self.inner.get(class, id)?;
        let changes = changed_fields(prior.as_ref(), &doc);

        self.inner.save(class, id, doc.clone())?;

        // After a successful save: exactly one entry.
        match prior {
            None => self
                .recorder
                .record_create(&self.actor, &self.meta, class, id.as_str(), &doc),
            Some(_) => self
                .recorder
                .record_update(&self.actor, &self.meta, class, id.as_str(), changes, &doc),
        }

        Ok(())
    }

    fn count(&self, class: &str, filter: &Filter) -> Result<u64, StoreError> {
        self.inner.count(class, filter)
    }

    fn delete(&self, class: &str, id: &RecordId) -> Result<bool, StoreError> {
        if self.recorder.is_excluded(class) {
            return self.inner.delete(class, id);
        }

        // The DELETE entry is recorded against the still-existing record,
        // before removal. It is not rolled back if the delete then fails.
        if let Some(doc) = self.inner.get(class, id)? {
            self.recorder
                .record_delete(&self.actor, &self.meta, class, id.as_str(), &doc);
        }

        self.inner.delete(class, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use tourdesk_store::{InMemoryRecordStore, TypedStore};

    use crate::entry::{AuditAction, AuditLogEntry};
    use crate::recorder::AuditConfig;
    use crate::writer::{AuditWriter, AuditWriterConfig, AuditWriterHandle};

    struct Fixture {
        store: Arc<dyn RecordStore>,
        audited: AuditedStore<Arc<dyn RecordStore>>,
        handle: AuditWriterHandle,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let (writer, handle) = AuditWriter::spawn(store.clone(), AuditWriterConfig::default());
        let recorder = Arc::new(AuditRecorder::new(writer, AuditConfig::default()));
        let audited = AuditedStore::new(
            store.clone(),
            recorder,
            Actor::system(),
            RequestMeta::default(),
        );
        Fixture {
            store,
            audited,
            handle,
        }
    }

    fn trail(fixture: Fixture) -> Vec<AuditLogEntry> {
        fixture.handle.shutdown();
        fixture.store.find_typed(&Filter::empty()).unwrap()
    }

    #[test]
    fn create_then_update_produces_one_entry_each() {
        let f = fixture();
        let id = RecordId::new("t1");

        f.audited
            .save("Tour", &id, json!({"name": "Coastal Loop", "seats": 10}))
            .unwrap();
        f.audited
            .save("Tour", &id, json!({"name": "Coastal Loop", "seats": 12}))
            .unwrap();

        let entries = trail(f);
        assert_eq!(entries.len(), 2);

        let created: Vec<_> = entries.iter().filter(|e| e.action == AuditAction::Create).collect();
        let updated: Vec<_> = entries.iter().filter(|e| e.action == AuditAction::Update).collect();
        assert_eq!(created.len(), 1);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].changes["seats"], json!({"from": 10, "to": 12}));
        assert_eq!(updated[0].entity_id, "t1");
    }

    #[test]
    fn delete_records_full_predeletion_snapshot() {
        let f = fixture();
        let id = RecordId::new("u1");

        f.audited
            .save(
                "User",
                &id,
                json!({"username": "maria", "password_hash": "secret"}),
            )
            .unwrap();
        f.audited.delete("User", &id).unwrap();

        let entries = trail(f);
        let delete = entries
            .iter()
            .find(|e| e.action == AuditAction::Delete)
            .unwrap();
        assert_eq!(delete.changes["username"], json!("maria"));
        assert!(delete.changes.get("password_hash").is_none());
    }

    #[test]
    fn single_sensitive_read_is_audited_bulk_is_not() {
        let f = fixture();

        f.audited
            .save("User", &RecordId::new("u1"), json!({"id": "u1", "username": "a"}))
            .unwrap();
        f.audited
            .save("User", &RecordId::new("u2"), json!({"id": "u2", "username": "b"}))
            .unwrap();

        // Bulk query: two results, never audited.
        let all = f.audited.find("User", &Filter::empty()).unwrap();
        assert_eq!(all.len(), 2);

        // Exactly-one by id: audited.
        f.audited.get("User", &RecordId::new("u1")).unwrap().unwrap();

        // Exactly-one via filter: audited.
        let one = f.audited.find("User", &Filter::field("username", "b")).unwrap();
        assert_eq!(one.len(), 1);

        let entries = trail(f);
        let reads: Vec<_> = entries
            .iter()
            .filter(|e| e.action == AuditAction::Read)
            .collect();
        assert_eq!(reads.len(), 2);
        assert!(reads.iter().all(|e| e.changes == json!({"accessed": true})));
    }

    #[test]
    fn non_sensitive_reads_are_never_audited() {
        let f = fixture();
        let id = RecordId::new("t1");

        f.audited.save("Tour", &id, json!({"name": "x"})).unwrap();
        f.audited.get("Tour", &id).unwrap();

        let entries = trail(f);
        assert!(entries.iter().all(|e| e.action != AuditAction::Read));
    }

    #[test]
    fn excluded_classes_produce_no_entries() {
        let f = fixture();

        f.audited
            .save("Session", &RecordId::new("s1"), json!({"session_token": "x"}))
            .unwrap();
        f.audited.delete("Session", &RecordId::new("s1")).unwrap();

        let entries = trail(f);
        assert!(entries.is_empty());
    }
}
