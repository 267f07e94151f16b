//! `PermissionStore` adapters.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use crewdesk_auth::{PermissionGrant, PermissionKey, PermissionStore, Role, Scope, StoreError};

use crate::sql::map_sqlx_error;

/// In-memory role → permission table for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    inner: RwLock<HashMap<(Role, PermissionKey), Scope>>,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeded with [`default_role_grants`].
    pub fn with_defaults() -> Self {
        let store = Self::new();
        for grant in default_role_grants() {
            store.grant(grant.role, grant.key, grant.scope);
        }
        store
    }

    /// Add or replace the grant of `key` to `role`.
    pub fn grant(&self, role: Role, key: PermissionKey, scope: Scope) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((role, key), scope);
        }
    }

    pub fn revoke(&self, role: Role, key: &PermissionKey) -> bool {
        match self.inner.write() {
            Ok(mut map) => map.remove(&(role, key.clone())).is_some(),
            Err(_) => false,
        }
    }

    pub fn grants_for(&self, role: Role) -> Vec<PermissionGrant> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        let mut grants: Vec<_> = map
            .iter()
            .filter(|((r, _), _)| *r == role)
            .map(|((role, key), scope)| PermissionGrant {
                role: *role,
                key: key.clone(),
                scope: *scope,
            })
            .collect();
        grants.sort_by_key(|g| g.key.to_string());
        grants
    }
}

#[async_trait]
impl PermissionStore for InMemoryGrantStore {
    async fn find_grant(
        &self,
        role: Role,
        key: &PermissionKey,
    ) -> Result<Option<PermissionGrant>, StoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::backend("grant store lock poisoned"))?;
        Ok(map.get(&(role, key.clone())).map(|scope| PermissionGrant {
            role,
            key: key.clone(),
            scope: *scope,
        }))
    }
}

/// Postgres-backed grants over the `role_permissions` table.
#[derive(Debug, Clone)]
pub struct PostgresGrantStore {
    pool: Arc<PgPool>,
}

impl PostgresGrantStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Insert the default table; existing rows are left untouched.
    pub async fn seed_defaults(&self) -> Result<u64, StoreError> {
        let mut inserted = 0;
        for grant in default_role_grants() {
            let result = sqlx::query(
                "INSERT INTO role_permissions (role, permission, scope) VALUES ($1, $2, $3) \
                 ON CONFLICT (role, permission) DO NOTHING",
            )
            .bind(grant.role.as_str())
            .bind(grant.key.to_string())
            .bind(grant.scope.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("seed_defaults", e))?;
            inserted += result.rows_affected();
        }
        tracing::info!(inserted, "default role grants seeded");
        Ok(inserted)
    }
}

#[async_trait]
impl PermissionStore for PostgresGrantStore {
    #[instrument(skip(self), fields(role = %role, permission = %key), err)]
    async fn find_grant(
        &self,
        role: Role,
        key: &PermissionKey,
    ) -> Result<Option<PermissionGrant>, StoreError> {
        let row = sqlx::query(
            "SELECT scope FROM role_permissions WHERE role = $1 AND permission = $2 LIMIT 1",
        )
        .bind(role.as_str())
        .bind(key.to_string())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_grant", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let scope: String = row
            .try_get("scope")
            .map_err(|e| map_sqlx_error("find_grant", e))?;
        let scope = scope
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("grant {role}/{key}: {e}")))?;

        Ok(Some(PermissionGrant {
            role,
            key: key.clone(),
            scope,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Default Role-to-Permission Mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Default grants for the non-administrative roles.
///
/// Administrative roles never consult the table. Deployments edit
/// `role_permissions` directly; this is the initial content.
pub fn default_role_grants() -> Vec<PermissionGrant> {
    const TABLE: &[(Role, &str, Scope)] = &[
        // Managers see and approve their team's work.
        (Role::Manager, "weekly_report:admin", Scope::Team),
        (Role::Manager, "leave:admin", Scope::Team),
        (Role::Manager, "expense_report:admin", Scope::Team),
        (Role::Manager, "user:read", Scope::Team),
        (Role::Manager, "sales:write", Scope::Team),
        (Role::Manager, "billing:read", Scope::All),
        (Role::Manager, "notification:write", Scope::Team),
        // Engineers manage their own records.
        (Role::Engineer, "weekly_report:write", Scope::Owned),
        (Role::Engineer, "leave:write", Scope::Owned),
        (Role::Engineer, "expense_report:write", Scope::Owned),
        (Role::Engineer, "user:read", Scope::Owned),
    ];

    TABLE
        .iter()
        .filter_map(|(role, key, scope)| {
            Some(PermissionGrant {
                role: *role,
                key: key.parse().ok()?,
                scope: *scope,
            })
        })
        .collect()
}
