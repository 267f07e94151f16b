//! `crewdesk-auth` — verification of provider-issued identity tokens and
//! role/permission resolution.
//!
//! Decoupled from HTTP and storage: transports hand in raw token sources,
//! storage plugs in through [`UserStore`] and [`PermissionStore`], and the
//! provider's key endpoint through [`KeySource`].

pub mod authenticator;
pub mod authorize;
pub mod claims;
pub mod context;
pub mod error;
pub mod extract;
pub mod jwks;
pub mod key_cache;
pub mod key_material;
pub mod lattice;
pub mod permissions;
pub mod principal;
pub mod rate_limit;
pub mod roles;
pub mod verifier;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use authenticator::{AuthMode, AuthModeError, Authenticator, ModeSettings};
pub use authorize::{
    AuthorizationExplanation, Decision, DecisionPath, PermissionResolver, PermissionStore,
    require_role,
};
pub use claims::{ClaimPolicy, Claims, TokenUse, validate_claims};
pub use context::{AuthContext, SessionMetadata};
pub use error::{AuthError, AuthFailureKind, StoreError};
pub use extract::{TokenOrigin, TokenSources};
pub use jwks::{HttpKeySource, JwkSet, KeySource, KeySourceError};
pub use key_cache::{KeyCacheConfig, SigningKeyCache};
pub use key_material::PublicKey;
pub use permissions::{Action, PermissionGrant, PermissionKey, Scope};
pub use principal::{Principal, PrincipalResolver, UserRecord, UserStore};
pub use rate_limit::{RateLimitDecision, RateLimitPolicy, RateLimitTier, RateLimiter};
pub use roles::Role;
pub use verifier::TokenVerifier;
