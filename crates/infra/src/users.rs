//! `UserStore` adapters.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use crewdesk_auth::{Role, StoreError, UserRecord, UserStore};
use crewdesk_core::UserId;

use crate::sql::map_sqlx_error;

/// In-memory user store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    inner: RwLock<HashMap<UserId, UserRecord>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = UserRecord>) -> Self {
        let store = Self::new();
        for user in users {
            // A fresh lock cannot be poisoned.
            let _ = store.insert(user);
        }
        store
    }

    /// Insert or replace an account by id.
    pub fn insert(&self, record: UserRecord) -> Result<(), StoreError> {
        self.write()?.insert(record.id, record);
        Ok(())
    }

    pub fn get(&self, id: UserId) -> Option<UserRecord> {
        self.read().ok()?.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<UserId, UserRecord>>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::backend("user store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<UserId, UserRecord>>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::backend("user store lock poisoned"))
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_by_subject(&self, subject: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .read()?
            .values()
            .find(|u| u.external_subject.as_deref() == Some(subject))
            .cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .read()?
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn rebind_subject(&self, user_id: UserId, subject: &str) -> Result<(), StoreError> {
        let mut users = self.write()?;
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::Backend(format!("user {user_id} not found")))?;
        user.external_subject = Some(subject.to_string());
        Ok(())
    }
}

const SELECT_USER: &str = "SELECT id, external_subject, email, name, role, active FROM users";

/// Postgres-backed user store over the application's `users` table.
///
/// Soft-deleted rows (`deleted_at IS NOT NULL`) are invisible to every query.
#[derive(Debug, Clone)]
pub struct PostgresUserStore {
    pool: Arc<PgPool>,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn fetch_one_where(
        &self,
        operation: &str,
        predicate: &str,
        value: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let sql = format!("{SELECT_USER} WHERE {predicate} AND deleted_at IS NULL LIMIT 1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.map(UserRecord::try_from).transpose()
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    #[instrument(skip(self), err)]
    async fn get_by_subject(&self, subject: &str) -> Result<Option<UserRecord>, StoreError> {
        self.fetch_one_where("get_by_subject", "external_subject = $1", subject)
            .await
    }

    #[instrument(skip_all, err)]
    async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        self.fetch_one_where("get_by_email", "lower(email) = lower($1)", email)
            .await
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn rebind_subject(&self, user_id: UserId, subject: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE users SET external_subject = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id.as_uuid())
        .bind(subject)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("rebind_subject", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("user {user_id} not found")));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct UserRow {
    id: Uuid,
    external_subject: Option<String>,
    email: String,
    name: String,
    role: String,
    active: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for UserRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            external_subject: row.try_get("external_subject")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            role: row.try_get("role")?,
            active: row.try_get("active")?,
        })
    }
}

impl TryFrom<UserRow> for UserRecord {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("user {}: {e}", row.id)))?;
        Ok(UserRecord {
            id: UserId::from_uuid(row.id),
            external_subject: row.external_subject,
            email: row.email,
            display_name: row.name,
            role,
            active: row.active,
        })
    }
}
