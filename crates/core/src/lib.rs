//! `crewdesk-core` — identifiers and the domain error model shared by every crate.
//!
//! No IO, no transport, no storage.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::UserId;
