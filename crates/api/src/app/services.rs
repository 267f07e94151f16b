//! Process-wide service wiring: stores, auth mode, permission resolver, limiter.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crewdesk_auth::{
    AuthMode, AuthModeError, Authenticator, HttpKeySource, PermissionResolver, PermissionStore,
    PrincipalResolver, RateLimitPolicy, RateLimitTier, RateLimiter, SigningKeyCache,
    TokenVerifier, UserStore,
};
use crewdesk_infra::{
    InMemoryGrantStore, InMemoryUserStore, PostgresGrantStore, PostgresUserStore, schema,
};

use crate::config::{ApiConfig, AuthConfig, RateLimitSettings};

pub type SharedUserStore = Arc<dyn UserStore>;
pub type SharedPermissionStore = Arc<dyn PermissionStore>;

pub struct AppServices {
    authenticator: Authenticator<SharedUserStore>,
    permissions: PermissionResolver<SharedPermissionStore>,
    limiter: Arc<RateLimiter>,
    rate_limits: RateLimitSettings,
    cookie_secure: bool,
}

impl AppServices {
    pub fn new(
        authenticator: Authenticator<SharedUserStore>,
        permissions: PermissionResolver<SharedPermissionStore>,
        rate_limits: RateLimitSettings,
        cookie_secure: bool,
    ) -> Self {
        Self {
            authenticator,
            permissions,
            limiter: Arc::new(RateLimiter::new()),
            rate_limits,
            cookie_secure,
        }
    }

    pub fn authenticator(&self) -> &Authenticator<SharedUserStore> {
        &self.authenticator
    }

    pub fn permissions(&self) -> &PermissionResolver<SharedPermissionStore> {
        &self.permissions
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn rate_limit(&self, tier: RateLimitTier) -> RateLimitPolicy {
        self.rate_limits.policy(tier)
    }

    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    /// Prime the signing-key cache so the first request does not pay the fetch.
    /// A failure is logged; requests retry the fetch themselves.
    pub async fn warm_keys(&self) {
        if let AuthMode::Verify(verifier) = self.authenticator.mode() {
            verifier.keys().warm().await;
        }
    }
}

/// Build every service from configuration.
pub async fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    let (users, grants) = match &config.database_url {
        Some(url) => postgres_stores(url, config.seed_default_grants).await?,
        None => in_memory_stores(),
    };

    let mode = AuthMode::select(&config.auth.mode_settings(), || build_verifier(&config.auth))
        .context("selecting authentication mode")?;
    let principals = PrincipalResolver::new(users).with_lookup_timeout(config.auth.lookup_timeout());

    Ok(AppServices::new(
        Authenticator::new(mode, principals).with_deadline(config.auth.request_deadline()),
        PermissionResolver::new(grants),
        config.rate_limits,
        config.cookie_secure,
    ))
}

pub fn build_verifier(auth: &AuthConfig) -> Result<TokenVerifier, AuthModeError> {
    let source = HttpKeySource::new(auth.jwks_url(), auth.key_cache_config().fetch_timeout)
        .map_err(|e| AuthModeError::Verifier(e.to_string()))?;
    let keys = SigningKeyCache::new(Arc::new(source), auth.key_cache_config());
    tracing::info!(
        issuer = %auth.issuer,
        jwks_url = %auth.jwks_url(),
        "token verification enabled"
    );
    Ok(TokenVerifier::new(Arc::new(keys), auth.claim_policy()))
}

fn in_memory_stores() -> (SharedUserStore, SharedPermissionStore) {
    (
        Arc::new(InMemoryUserStore::new()),
        Arc::new(InMemoryGrantStore::with_defaults()),
    )
}

async fn postgres_stores(
    url: &str,
    seed_default_grants: bool,
) -> anyhow::Result<(SharedUserStore, SharedPermissionStore)> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await
        .context("connecting to Postgres")?;

    schema::ensure(&pool).await.context("ensuring auth tables")?;

    let grants = PostgresGrantStore::new(pool.clone());
    if seed_default_grants {
        grants.seed_defaults().await.context("seeding default grants")?;
    }

    Ok((Arc::new(PostgresUserStore::new(pool)), Arc::new(grants)))
}
