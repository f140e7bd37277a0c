//! `tourdesk-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers and the access-control error model shared by the
//! authorization and audit crates.

pub mod error;
pub mod id;

pub use error::{AccessError, AccessResult};
pub use id::{AuditEntryId, DelegationId, OverrideId, SessionId, UserId};
