use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crewdesk_core::UserId;

use crate::claims::Claims;
use crate::error::{AuthError, StoreError};
use crate::roles::Role;

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
/// The rebind is best-effort and must not hold the request for long.
pub const DEFAULT_REBIND_TIMEOUT: Duration = Duration::from_millis(500);

/// A local user account as persisted by the user store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    /// Provider subject currently bound to this account, if any.
    pub external_subject: Option<String>,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub active: bool,
}

/// The authenticated local identity for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: UserId,
    pub subject: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub active: bool,
}

impl Principal {
    pub fn from_record(record: UserRecord, subject: impl Into<String>) -> Self {
        Self {
            user_id: record.id,
            subject: subject.into(),
            email: record.email,
            display_name: record.display_name,
            role: record.role,
            active: record.active,
        }
    }
}

/// Read access to local accounts, plus the one write the core performs.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_subject(&self, subject: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Case-insensitive email lookup.
    async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Bind `subject` to the account. Must be idempotent.
    async fn rebind_subject(&self, user_id: UserId, subject: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> UserStore for Arc<S>
where
    S: UserStore + ?Sized,
{
    async fn get_by_subject(&self, subject: &str) -> Result<Option<UserRecord>, StoreError> {
        (**self).get_by_subject(subject).await
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        (**self).get_by_email(email).await
    }

    async fn rebind_subject(&self, user_id: UserId, subject: &str) -> Result<(), StoreError> {
        (**self).rebind_subject(user_id, subject).await
    }
}

/// Maps verified claims to a local principal.
pub struct PrincipalResolver<S> {
    store: S,
    lookup_timeout: Duration,
    rebind_timeout: Duration,
}

impl<S: UserStore> PrincipalResolver<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            rebind_timeout: DEFAULT_REBIND_TIMEOUT,
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn with_rebind_timeout(mut self, timeout: Duration) -> Self {
        self.rebind_timeout = timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Subject first, then email with a best-effort subject rebind.
    pub async fn resolve(&self, claims: &Claims) -> Result<Principal, AuthError> {
        let subject = claims.subject();

        let record = match self.bounded(self.store.get_by_subject(subject)).await? {
            Some(record) => record,
            None => self.resolve_by_email(claims).await?,
        };

        if !record.active {
            tracing::info!(user_id = %record.id, "inactive account presented a valid token");
            return Err(AuthError::AccountDisabled);
        }

        Ok(Principal::from_record(record, subject))
    }

    async fn resolve_by_email(&self, claims: &Claims) -> Result<UserRecord, AuthError> {
        let Some(email) = claims.email() else {
            return Err(AuthError::PrincipalNotFound);
        };
        if !claims.email_trusted() {
            tracing::info!("email fallback skipped for unverified email");
            return Err(AuthError::PrincipalNotFound);
        }

        let Some(record) = self.bounded(self.store.get_by_email(email)).await? else {
            return Err(AuthError::PrincipalNotFound);
        };

        if !record.active {
            return Ok(record);
        }

        let subject = claims.subject();
        let rebind = self.store.rebind_subject(record.id, subject);
        match tokio::time::timeout(self.rebind_timeout, rebind).await {
            Ok(Ok(())) => {
                tracing::info!(user_id = %record.id, "bound provider subject to account by email")
            }
            Ok(Err(err)) => {
                tracing::warn!(user_id = %record.id, error = %err, "subject rebind failed")
            }
            Err(_) => tracing::warn!(
                user_id = %record.id,
                timeout_ms = self.rebind_timeout.as_millis() as u64,
                "subject rebind timed out"
            ),
        }

        Ok(record)
    }

    async fn bounded<T>(
        &self,
        lookup: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, AuthError> {
        match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(result) => result.map_err(|err| {
                tracing::error!(error = %err, "user store lookup failed");
                AuthError::from(err)
            }),
            Err(_) => {
                tracing::error!(
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "user store lookup timed out"
                );
                Err(AuthError::StoreUnavailable("user lookup timed out".to_string()))
            }
        }
    }
}
