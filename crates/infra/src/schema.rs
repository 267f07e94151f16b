//! Tables read by the Postgres store adapters.
//!
//! The HR application owns these tables and their migrations; this DDL is the
//! subset the auth core depends on, applied idempotently for local setups.

use sqlx::PgPool;

use crewdesk_auth::StoreError;

use crate::sql::map_sqlx_error;

pub const USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id               UUID PRIMARY KEY,
    external_subject TEXT UNIQUE,
    email            TEXT NOT NULL,
    name             TEXT NOT NULL,
    role             TEXT NOT NULL,
    active           BOOLEAN NOT NULL DEFAULT TRUE,
    deleted_at       TIMESTAMPTZ
);
CREATE UNIQUE INDEX IF NOT EXISTS users_email_lower_idx
    ON users (lower(email)) WHERE deleted_at IS NULL;
"#;

pub const ROLE_PERMISSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS role_permissions (
    role       TEXT NOT NULL,
    permission TEXT NOT NULL,
    scope      TEXT NOT NULL DEFAULT 'all',
    PRIMARY KEY (role, permission)
);
"#;

/// Create the tables if they are missing. Safe to run on every start.
pub async fn ensure(pool: &PgPool) -> Result<(), StoreError> {
    for ddl in [USERS_TABLE, ROLE_PERMISSIONS_TABLE] {
        sqlx::raw_sql(ddl)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    }
    tracing::info!("auth tables ensured");
    Ok(())
}
