//! `tourdesk-store` — generic keyed-record store boundary.
//!
//! The persistence mechanics behind this boundary are an external concern.
//! This crate defines the contract the rest of the subsystem programs against
//! (`RecordStore`), a typed convenience layer (`Record`/`TypedStore`), and an
//! in-memory implementation for tests/dev.

pub mod memory;
pub mod record;
pub mod store;

pub use memory::InMemoryRecordStore;
pub use record::{Record, TypedStore};
pub use store::{Filter, RecordId, RecordStore, StoreError};
