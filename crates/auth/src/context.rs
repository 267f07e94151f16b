use chrono::{DateTime, Utc};
use serde::Serialize;

use crewdesk_core::UserId;

use crate::authorize::Decision;
use crate::claims::TokenUse;
use crate::extract::TokenOrigin;
use crate::permissions::Scope;
use crate::principal::Principal;
use crate::roles::Role;

/// How this request's identity was established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionMetadata {
    pub token_origin: Option<TokenOrigin>,
    pub token_use: Option<TokenUse>,
    pub expires_at: Option<DateTime<Utc>>,
    pub client_addr: Option<String>,
    /// Set when the development bypass supplied the identity.
    pub bypass: bool,
}

/// Per-request authorization result handed to downstream handlers.
///
/// Only constructed after every verification step succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    principal: Principal,
    scope: Option<Scope>,
    session: SessionMetadata,
}

impl AuthContext {
    pub fn bind(principal: Principal, session: SessionMetadata) -> Self {
        Self {
            principal,
            scope: None,
            session,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    pub fn role(&self) -> Role {
        self.principal.role
    }

    /// Scope of the permission decisions attached so far, if any.
    pub fn scope(&self) -> Option<Scope> {
        self.scope
    }

    pub fn session(&self) -> &SessionMetadata {
        &self.session
    }

    /// Attach a permission decision. Repeated decisions keep the narrowest scope.
    pub fn with_scope(mut self, decision: &Decision) -> Self {
        self.scope = Some(match self.scope {
            Some(current) => current.narrowest(decision.scope),
            None => decision.scope,
        });
        self
    }

    pub fn satisfies_at_least(&self, required: Role) -> bool {
        self.role().satisfies_at_least(required)
    }
}
