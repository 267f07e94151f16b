//! Failure taxonomy for the authentication/authorization pipeline.
//!
//! Variants carry internal detail for logs. Transport adapters must render
//! only [`AuthError::code`] and [`AuthError::public_message`] to callers.

use thiserror::Error;

use crate::key_material::KeyMaterialError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No usable token, or a token that cannot be parsed.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("token has expired")]
    Expired,

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("claim invalid: {0}")]
    ClaimInvalid(String),

    #[error("no signing key with kid '{kid}'")]
    KeyNotFound { kid: String },

    /// The provider's key set could not be fetched (transport, status, body, timeout).
    #[error("signing keys unavailable: {0}")]
    KeyUnavailable(String),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(#[from] KeyMaterialError),

    #[error("no local account for the verified identity")]
    PrincipalNotFound,

    #[error("account disabled")]
    AccountDisabled,

    /// A user or permission store failed or timed out.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store returned a record that cannot be decoded. Retrying will not help.
    #[error("store record corrupt: {0}")]
    StoreCorrupt(String),

    /// Authentication as a whole ran past its deadline.
    #[error("authentication deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

/// Coarse classification used by transport adapters to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureKind {
    /// 401
    Authentication,
    /// 403
    Authorization,
    /// 429
    Throttled,
    /// 503
    Unavailable,
    /// 500
    Internal,
}

impl AuthError {
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn claim(msg: impl Into<String>) -> Self {
        Self::ClaimInvalid(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn kind(&self) -> AuthFailureKind {
        match self {
            Self::Unauthenticated(_)
            | Self::Expired
            | Self::SignatureInvalid(_)
            | Self::ClaimInvalid(_)
            | Self::KeyNotFound { .. }
            | Self::InvalidKeyMaterial(_)
            | Self::PrincipalNotFound
            | Self::AccountDisabled => AuthFailureKind::Authentication,
            Self::Forbidden(_) => AuthFailureKind::Authorization,
            Self::RateLimited { .. } => AuthFailureKind::Throttled,
            Self::KeyUnavailable(_) | Self::StoreUnavailable(_) | Self::DeadlineExceeded(_) => {
                AuthFailureKind::Unavailable
            }
            Self::StoreCorrupt(_) => AuthFailureKind::Internal,
        }
    }

    /// Whether the same request may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::KeyUnavailable(_)
                | Self::StoreUnavailable(_)
                | Self::DeadlineExceeded(_)
                | Self::RateLimited { .. }
        )
    }

    /// Stable machine-readable code safe to show to callers.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            AuthFailureKind::Authentication if *self == Self::Expired => "token_expired",
            AuthFailureKind::Authentication => "unauthenticated",
            AuthFailureKind::Authorization => "forbidden",
            AuthFailureKind::Throttled => "rate_limited",
            AuthFailureKind::Unavailable => "auth_unavailable",
            AuthFailureKind::Internal => "internal_error",
        }
    }

    /// Generic caller-facing message. Never includes claim contents or key ids.
    pub fn public_message(&self) -> &'static str {
        match self.kind() {
            AuthFailureKind::Authentication if *self == Self::Expired => "token has expired",
            AuthFailureKind::Authentication => "authentication required",
            AuthFailureKind::Authorization => "insufficient permissions",
            AuthFailureKind::Throttled => "too many requests",
            AuthFailureKind::Unavailable => "authentication temporarily unavailable",
            AuthFailureKind::Internal => "authentication failed",
        }
    }
}

/// Failure reported by a user or permission store adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn backend(err: impl core::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<StoreError> for AuthError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Backend(_) => Self::StoreUnavailable(value.to_string()),
            StoreError::Corrupt(_) => Self::StoreCorrupt(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_the_expected_classes() {
        assert_eq!(AuthError::Expired.kind(), AuthFailureKind::Authentication);
        assert_eq!(AuthError::PrincipalNotFound.kind(), AuthFailureKind::Authentication);
        assert_eq!(
            AuthError::KeyNotFound { kid: "k".into() }.kind(),
            AuthFailureKind::Authentication
        );
        assert_eq!(AuthError::forbidden("x").kind(), AuthFailureKind::Authorization);
        assert_eq!(
            AuthError::RateLimited { retry_after_secs: 3 }.kind(),
            AuthFailureKind::Throttled
        );
        assert_eq!(
            AuthError::KeyUnavailable("down".into()).kind(),
            AuthFailureKind::Unavailable
        );
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(AuthError::KeyUnavailable("timeout".into()).is_retryable());
        assert!(AuthError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(!AuthError::SignatureInvalid("bad".into()).is_retryable());
        assert!(!AuthError::AccountDisabled.is_retryable());
        assert!(!AuthError::KeyNotFound { kid: "k".into() }.is_retryable());
    }

    #[test]
    fn public_surface_does_not_leak_detail() {
        let err = AuthError::KeyNotFound {
            kid: "secret-kid".into(),
        };
        assert_eq!(err.code(), "unauthenticated");
        assert!(!err.public_message().contains("secret-kid"));
        assert_eq!(AuthError::Expired.code(), "token_expired");
    }

    #[test]
    fn store_errors_become_unavailable() {
        let err: AuthError = StoreError::backend("connection reset").into();
        assert!(matches!(err, AuthError::StoreUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn corrupt_records_are_internal_and_final() {
        let err: AuthError = StoreError::Corrupt("user 42: unknown role 'boss'".into()).into();
        assert!(matches!(err, AuthError::StoreCorrupt(_)));
        assert_eq!(err.kind(), AuthFailureKind::Internal);
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "internal_error");
        assert!(!err.public_message().contains("boss"));
    }

    #[test]
    fn deadline_is_transient() {
        let err = AuthError::DeadlineExceeded(std::time::Duration::from_secs(15));
        assert_eq!(err.kind(), AuthFailureKind::Unavailable);
        assert!(err.is_retryable());
    }
}
