//! Request authentication: extract → verify → resolve → bind.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crewdesk_core::UserId;

use crate::context::{AuthContext, SessionMetadata};
use crate::error::AuthError;
use crate::extract::{TokenSources, extract_token};
use crate::principal::{Principal, PrincipalResolver, UserStore};
use crate::roles::Role;
use crate::verifier::TokenVerifier;

pub const DEV_USER_ID: UserId = UserId::from_uuid(Uuid::from_u128(1));
pub const DEV_USER_SUBJECT: &str = "dev-user";
pub const DEV_USER_EMAIL: &str = "dev@localhost";

/// Upper bound on verify plus resolve for one request, whatever the stages spend.
pub const DEFAULT_AUTH_DEADLINE: Duration = Duration::from_secs(15);

/// Startup inputs that decide how requests are authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSettings {
    pub verification_enabled: bool,
    pub dev_bypass: bool,
    pub environment: String,
    pub dev_role: Role,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthModeError {
    #[error("development bypass requested in environment '{0}'")]
    BypassInProduction(String),

    #[error("token verification is disabled and no development bypass is configured")]
    VerificationDisabled,

    #[error("token verifier could not be built: {0}")]
    Verifier(String),
}

/// Fixed for the lifetime of the process; nothing on a request can change it.
pub enum AuthMode {
    Verify(TokenVerifier),
    DevelopmentBypass(Principal),
}

impl AuthMode {
    /// Pick the mode from trusted configuration.
    ///
    /// Verification disabled is only allowed together with an explicit bypass
    /// outside production; every other combination without verification is
    /// a startup error.
    pub fn select(
        settings: &ModeSettings,
        verifier: impl FnOnce() -> Result<TokenVerifier, AuthModeError>,
    ) -> Result<Self, AuthModeError> {
        if settings.verification_enabled {
            return verifier().map(Self::Verify);
        }
        if !settings.dev_bypass {
            return Err(AuthModeError::VerificationDisabled);
        }
        Self::development_bypass(&settings.environment, settings.dev_role)
    }

    pub fn development_bypass(environment: &str, role: Role) -> Result<Self, AuthModeError> {
        if is_production(environment) {
            return Err(AuthModeError::BypassInProduction(environment.to_string()));
        }
        tracing::warn!(
            environment,
            %role,
            "authentication bypass enabled; every request runs as the development user"
        );
        Ok(Self::DevelopmentBypass(development_principal(role)))
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, Self::DevelopmentBypass(_))
    }
}

fn is_production(environment: &str) -> bool {
    let env = environment.trim();
    env.eq_ignore_ascii_case("production") || env.eq_ignore_ascii_case("prod")
}

pub fn development_principal(role: Role) -> Principal {
    Principal {
        user_id: DEV_USER_ID,
        subject: DEV_USER_SUBJECT.to_string(),
        email: DEV_USER_EMAIL.to_string(),
        display_name: "Development User".to_string(),
        role,
        active: true,
    }
}

pub struct Authenticator<U> {
    mode: AuthMode,
    principals: PrincipalResolver<U>,
    deadline: Duration,
}

impl<U: UserStore> Authenticator<U> {
    pub fn new(mode: AuthMode, principals: PrincipalResolver<U>) -> Self {
        Self {
            mode,
            principals,
            deadline: DEFAULT_AUTH_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn mode(&self) -> &AuthMode {
        &self.mode
    }

    /// Any failure aborts before a context exists.
    pub async fn authenticate(
        &self,
        sources: &TokenSources<'_>,
        now: DateTime<Utc>,
    ) -> Result<AuthContext, AuthError> {
        let verifier = match &self.mode {
            AuthMode::DevelopmentBypass(principal) => {
                return Ok(AuthContext::bind(
                    principal.clone(),
                    SessionMetadata {
                        token_origin: None,
                        token_use: None,
                        expires_at: None,
                        client_addr: sources.client_addr.map(str::to_string),
                        bypass: true,
                    },
                ));
            }
            AuthMode::Verify(verifier) => verifier,
        };

        let extracted = extract_token(sources)?;
        let pipeline = async {
            let claims = verifier.verify(extracted.token, now).await?;
            let principal = self.principals.resolve(&claims).await?;
            Ok::<_, AuthError>((claims, principal))
        };
        let result = tokio::time::timeout(self.deadline, pipeline)
            .await
            .unwrap_or(Err(AuthError::DeadlineExceeded(self.deadline)));

        let (claims, principal) = result.inspect_err(|err| {
            tracing::warn!(
                error = %err,
                origin = ?extracted.origin,
                client_addr = sources.client_addr.unwrap_or("unknown"),
                "authentication failed"
            );
        })?;

        Ok(AuthContext::bind(
            principal,
            SessionMetadata {
                token_origin: Some(extracted.origin),
                token_use: Some(claims.token_use()),
                expires_at: Some(claims.expires_at()),
                client_addr: sources.client_addr.map(str::to_string),
                bypass: false,
            },
        ))
    }
}
