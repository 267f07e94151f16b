//! Infrastructure layer: user and permission store adapters.
//!
//! Each store comes in two flavours: an in-memory map for tests and local
//! development, and a Postgres adapter over a shared `sqlx` pool.

pub mod grants;
pub mod schema;
pub mod users;

mod sql;

pub use grants::{InMemoryGrantStore, PostgresGrantStore, default_role_grants};
pub use users::{InMemoryUserStore, PostgresUserStore};
