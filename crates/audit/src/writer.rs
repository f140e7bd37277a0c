//! Background audit writer.
//!
//! Ordinary audit writes are fire-and-forget relative to the triggering
//! operation: entries are handed to a dedicated writer thread over a channel
//! and the caller moves on. The writer persists with its own store handle
//! (system privileges), so the acting user can never suppress their own trail
//! by lacking write access to the log.
//!
//! Critical entries (emergency elevations) bypass the queue via `write_sync`
//! and are confirmed before the triggering call returns.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use tourdesk_store::{RecordStore, StoreError, TypedStore};

use crate::entry::AuditLogEntry;

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct AuditWriterConfig {
    /// How long the worker blocks waiting for an entry before re-checking
    /// for shutdown.
    pub poll_interval: Duration,
    /// Thread name for logging.
    pub name: String,
}

impl Default for AuditWriterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "audit-writer".to_string(),
        }
    }
}

impl AuditWriterConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Writer runtime counters.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WriterStats {
    pub enqueued: u64,
    pub written: u64,
    pub failed: u64,
    /// Entries that could not even be queued (writer gone).
    pub dropped: u64,
}

/// Handle to control the running writer thread.
#[derive(Debug)]
pub struct AuditWriterHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WriterStats>>,
}

impl AuditWriterHandle {
    /// Request graceful shutdown. Queued entries are drained before the
    /// thread exits.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> WriterStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Producer side of the audit pipeline. Cheap to clone.
#[derive(Clone)]
pub struct AuditWriter {
    tx: mpsc::Sender<AuditLogEntry>,
    store: Arc<dyn RecordStore>,
    stats: Arc<Mutex<WriterStats>>,
}

impl AuditWriter {
    /// Spawn the writer thread over its own (system-privileged) store handle.
    pub fn spawn(
        store: Arc<dyn RecordStore>,
        config: AuditWriterConfig,
    ) -> (Self, AuditWriterHandle) {
        let (tx, rx) = mpsc::channel::<AuditLogEntry>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WriterStats::default()));

        let writer = Self {
            tx,
            store: store.clone(),
            stats: stats.clone(),
        };

        let name = config.name.clone();
        let loop_stats = stats.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || writer_loop(store, config, rx, shutdown_rx, loop_stats))
            .expect("failed to spawn audit writer thread");

        let handle = AuditWriterHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        };

        (writer, handle)
    }

    /// Queue an entry without blocking the triggering operation.
    ///
    /// Failure to queue is caught and logged with the entry payload for
    /// forensic recovery; it is never propagated to the caller.
    pub fn enqueue(&self, entry: AuditLogEntry) {
        match self.tx.send(entry) {
            Ok(()) => self.bump(|s| s.enqueued += 1),
            Err(mpsc::SendError(entry)) => {
                self.bump(|s| s.dropped += 1);
                error!(
                    entry = %serialize_for_forensics(&entry),
                    "audit writer unavailable, entry dropped"
                );
            }
        }
    }

    /// Persist an entry immediately, confirming the write before returning.
    ///
    /// Used for critical-severity entries; the caller decides whether a
    /// failure fails the triggering operation.
    pub fn write_sync(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        match self.store.save_typed(entry) {
            Ok(()) => {
                self.bump(|s| s.written += 1);
                Ok(())
            }
            Err(e) => {
                self.bump(|s| s.failed += 1);
                error!(
                    entry = %serialize_for_forensics(entry),
                    error = %e,
                    "synchronous audit write failed"
                );
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> WriterStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn bump(&self, f: impl FnOnce(&mut WriterStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

fn writer_loop(
    store: Arc<dyn RecordStore>,
    config: AuditWriterConfig,
    rx: mpsc::Receiver<AuditLogEntry>,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<WriterStats>>,
) {
    info!(writer = %config.name, "audit writer started");

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        match rx.recv_timeout(config.poll_interval) {
            Ok(entry) => persist(&store, entry, &stats),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    // Drain whatever is still queued so a clean shutdown loses nothing.
    let mut drained = 0usize;
    while let Ok(entry) = rx.try_recv() {
        persist(&store, entry, &stats);
        drained += 1;
    }
    if drained > 0 {
        warn!(writer = %config.name, drained, "audit writer drained queue on shutdown");
    }

    info!(writer = %config.name, "audit writer stopped");
}

fn persist(store: &Arc<dyn RecordStore>, entry: AuditLogEntry, stats: &Arc<Mutex<WriterStats>>) {
    match store.save_typed(&entry) {
        Ok(()) => {
            if let Ok(mut s) = stats.lock() {
                s.written += 1;
            }
        }
        Err(e) => {
            if let Ok(mut s) = stats.lock() {
                s.failed += 1;
            }
            // The failed payload is logged so operators can recover the entry.
            error!(
                entry = %serialize_for_forensics(&entry),
                error = %e,
                "audit write failed"
            );
        }
    }
}

fn serialize_for_forensics(entry: &AuditLogEntry) -> String {
    serde_json::to_string(entry).unwrap_or_else(|_| format!("{entry:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tourdesk_store::{Filter, InMemoryRecordStore};

    use crate::entry::{AUDIT_LOG_CLASS, AuditAction, AuditMetadata, RequestMeta};

    fn entry(action: AuditAction) -> AuditLogEntry {
        AuditLogEntry::new(
            None,
            "system",
            action,
            "Tour",
            "t1",
            json!({"accessed": true}),
            AuditMetadata::from_request(&RequestMeta::default(), Utc::now()),
        )
    }

    #[test]
    fn enqueued_entries_are_persisted() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let (writer, handle) = AuditWriter::spawn(store.clone(), AuditWriterConfig::default());

        writer.enqueue(entry(AuditAction::Read));
        writer.enqueue(entry(AuditAction::Update));
        handle.shutdown();

        assert_eq!(store.count(AUDIT_LOG_CLASS, &Filter::empty()).unwrap(), 2);
        assert_eq!(writer.stats().written, 2);
    }

    #[test]
    fn write_sync_confirms_before_returning() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let (writer, handle) = AuditWriter::spawn(store.clone(), AuditWriterConfig::default());

        writer.write_sync(&entry(AuditAction::EmergencyPermission)).unwrap();

        // Visible immediately, without waiting for the worker.
        assert_eq!(store.count(AUDIT_LOG_CLASS, &Filter::empty()).unwrap(), 1);
        handle.shutdown();
    }

    #[test]
    fn shutdown_drains_queue() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let (writer, handle) = AuditWriter::spawn(store.clone(), AuditWriterConfig::default());

        for _ in 0..10 {
            writer.enqueue(entry(AuditAction::Update));
        }
        handle.shutdown();

        assert_eq!(store.count(AUDIT_LOG_CLASS, &Filter::empty()).unwrap(), 10);
    }
}
