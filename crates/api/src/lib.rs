//! `tourdesk-api` — transport-agnostic service boundary.
//!
//! Exposes the authorization and compliance-audit operations as synchronous
//! request/response calls with serde DTOs. Exact transport (HTTP, RPC) is an
//! external concern; this crate owns stamping the clock, resolving the
//! acting user, and the error-propagation policy.

pub mod dto;
pub mod error;
pub mod service;

pub use error::{ApiError, ApiResult};
pub use service::AccessService;
