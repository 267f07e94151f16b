use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{AuthError, StoreError};
use crate::lattice::{GrantPath, PermissionLattice};
use crate::permissions::{PermissionGrant, PermissionKey, Scope};
use crate::roles::Role;

/// Role → permission table lookups.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// The exact grant of `key` to `role`, if any. No implication applied.
    async fn find_grant(
        &self,
        role: Role,
        key: &PermissionKey,
    ) -> Result<Option<PermissionGrant>, StoreError>;

    async fn has_permission(&self, role: Role, key: &PermissionKey) -> Result<bool, StoreError> {
        Ok(self.find_grant(role, key).await?.is_some())
    }
}

#[async_trait]
impl<S> PermissionStore for Arc<S>
where
    S: PermissionStore + ?Sized,
{
    async fn find_grant(
        &self,
        role: Role,
        key: &PermissionKey,
    ) -> Result<Option<PermissionGrant>, StoreError> {
        (**self).find_grant(role, key).await
    }
}

/// Why a permission check succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionPath {
    /// Administrative role; no grant consulted.
    Administrative,
    Granted {
        granted: PermissionKey,
        via: GrantPath,
    },
}

/// A successful authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub required: PermissionKey,
    pub scope: Scope,
    pub path: DecisionPath,
}

/// Resolves `(role, permission)` against the store and the implication lattice.
pub struct PermissionResolver<P> {
    store: P,
    lattice: PermissionLattice,
}

impl<P: PermissionStore> PermissionResolver<P> {
    pub fn new(store: P) -> Self {
        Self::with_lattice(store, PermissionLattice::standard())
    }

    pub fn with_lattice(store: P, lattice: PermissionLattice) -> Self {
        Self { store, lattice }
    }

    pub fn lattice(&self) -> &PermissionLattice {
        &self.lattice
    }

    /// Allow with a scope, or `Forbidden`. Store failures fail closed.
    pub async fn authorize(&self, role: Role, required: &PermissionKey) -> Result<Decision, AuthError> {
        let (decision, _) = self.evaluate(role, required).await?;
        decision.ok_or_else(|| {
            tracing::info!(%role, permission = %required, "permission denied");
            AuthError::forbidden(format!("role {role} lacks {required}"))
        })
    }

    /// Same evaluation as [`authorize`](Self::authorize), reported for audit.
    pub async fn explain(
        &self,
        role: Role,
        required: &PermissionKey,
    ) -> Result<AuthorizationExplanation, AuthError> {
        let (decision, checked) = self.evaluate(role, required).await?;
        let reason = match &decision {
            Some(Decision {
                path: DecisionPath::Administrative,
                ..
            }) => format!("role {role} is administrative and bypasses permission grants"),
            Some(Decision {
                path: DecisionPath::Granted { granted, via },
                scope,
                ..
            }) => match via {
                GrantPath::Exact => format!("role {role} holds {granted} with scope {scope}"),
                GrantPath::Implied { .. } => {
                    format!("role {role} holds {granted}, which implies {required} (scope {scope})")
                }
                GrantPath::DomainUmbrella { domain } => format!(
                    "role {role} holds {granted}, which covers the {domain} domain (scope {scope})"
                ),
            },
            None => format!(
                "role {role} holds none of: {}",
                checked
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        };

        Ok(AuthorizationExplanation {
            required_permission: required.to_string(),
            role,
            granted: decision.is_some(),
            reason,
            scope: decision.as_ref().map(|d| d.scope),
            path: decision.map(|d| d.path),
            checked,
        })
    }

    async fn evaluate(
        &self,
        role: Role,
        required: &PermissionKey,
    ) -> Result<(Option<Decision>, Vec<String>), AuthError> {
        if role.is_administrative() {
            return Ok((
                Some(Decision {
                    required: required.clone(),
                    scope: Scope::All,
                    path: DecisionPath::Administrative,
                }),
                Vec::new(),
            ));
        }

        let mut checked = Vec::new();
        for candidate in self.lattice.candidates(required) {
            checked.push(candidate.key.to_string());
            let grant = self.store.find_grant(role, &candidate.key).await.map_err(|err| {
                tracing::error!(error = %err, permission = %candidate.key, "permission lookup failed");
                AuthError::from(err)
            })?;
            if let Some(grant) = grant {
                return Ok((
                    Some(Decision {
                        required: required.clone(),
                        scope: grant.scope,
                        path: DecisionPath::Granted {
                            granted: candidate.key,
                            via: candidate.path,
                        },
                    }),
                    checked,
                ));
            }
        }

        Ok((None, checked))
    }
}

/// Fail with `Forbidden` unless `actual` is at least `required`.
pub fn require_role(actual: Role, required: Role) -> Result<(), AuthError> {
    if actual.satisfies_at_least(required) {
        Ok(())
    } else {
        Err(AuthError::forbidden(format!("role {actual} below required {required}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required_permission: String,
    pub role: Role,
    pub granted: bool,
    /// Human-readable reason for the decision.
    pub reason: String,
    pub scope: Option<Scope>,
    pub path: Option<DecisionPath>,
    /// Candidate grants consulted, in order.
    pub checked: Vec<String>,
}
