//! Startup configuration, read once from the environment.
//!
//! Every struct is also `Deserialize` so the same settings can come from a
//! file; missing fields take the defaults below.

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crewdesk_auth::key_cache::DEFAULT_MIN_REFRESH_INTERVAL;
use crewdesk_auth::{ClaimPolicy, KeyCacheConfig, ModeSettings, RateLimitPolicy, RateLimitTier, Role};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required when authentication is enabled")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub issuer: String,
    pub client_id: String,
    /// Defaults to `{issuer}/.well-known/jwks.json`.
    pub jwks_url: Option<String>,
    pub key_cache_ttl_secs: u64,
    pub key_fetch_timeout_secs: u64,
    pub lookup_timeout_secs: u64,
    /// Bound on the whole authentication of one request.
    pub request_deadline_secs: u64,
    pub dev_bypass: bool,
    pub dev_role: Role,
    pub environment: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            issuer: String::new(),
            client_id: String::new(),
            jwks_url: None,
            key_cache_ttl_secs: 3600,
            key_fetch_timeout_secs: 10,
            lookup_timeout_secs: 5,
            request_deadline_secs: 15,
            dev_bypass: false,
            dev_role: Role::Admin,
            environment: "development".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn jwks_url(&self) -> String {
        match &self.jwks_url {
            Some(url) => url.clone(),
            None => format!("{}/.well-known/jwks.json", self.issuer.trim_end_matches('/')),
        }
    }

    pub fn mode_settings(&self) -> ModeSettings {
        ModeSettings {
            verification_enabled: self.enabled,
            dev_bypass: self.dev_bypass,
            environment: self.environment.clone(),
            dev_role: self.dev_role,
        }
    }

    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy {
            issuer: self.issuer.clone(),
            client_id: self.client_id.clone(),
        }
    }

    pub fn key_cache_config(&self) -> KeyCacheConfig {
        KeyCacheConfig {
            ttl: Duration::from_secs(self.key_cache_ttl_secs),
            fetch_timeout: Duration::from_secs(self.key_fetch_timeout_secs),
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Missing("AUTH_ISSUER"));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("AUTH_CLIENT_ID"));
        }
        Ok(())
    }

    fn warn_insecure(&self) {
        if !self.enabled {
            tracing::warn!(
                environment = %self.environment,
                dev_bypass = self.dev_bypass,
                "token verification is disabled"
            );
            return;
        }
        let jwks_url = self.jwks_url();
        if !jwks_url.starts_with("https://") {
            tracing::warn!(jwks_url = %jwks_url, "signing keys are fetched over plain http");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub general_per_minute: u32,
    pub login_per_minute: u32,
    pub bulk_per_hour: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            general_per_minute: RateLimitTier::General.default_policy().limit,
            login_per_minute: RateLimitTier::Login.default_policy().limit,
            bulk_per_hour: RateLimitTier::Bulk.default_policy().limit,
        }
    }
}

impl RateLimitSettings {
    pub fn policy(&self, tier: RateLimitTier) -> RateLimitPolicy {
        match tier {
            RateLimitTier::General => RateLimitPolicy::per_minute(self.general_per_minute),
            RateLimitTier::Login => RateLimitPolicy::per_minute(self.login_per_minute),
            RateLimitTier::Bulk => RateLimitPolicy::per_hour(self.bulk_per_hour),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    /// Postgres stores when set, in-memory stores otherwise.
    pub database_url: Option<String>,
    pub seed_default_grants: bool,
    /// Adds `Secure` to the session cookie.
    pub cookie_secure: bool,
    pub auth: AuthConfig,
    pub rate_limits: RateLimitSettings,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            seed_default_grants: false,
            cookie_secure: true,
            auth: AuthConfig::default(),
            rate_limits: RateLimitSettings::default(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset or blank means default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = parse(&get, "BIND_ADDR")? {
            config.bind_addr = v;
        }
        config.database_url = get("DATABASE_URL");
        if let Some(v) = parse_bool(&get, "SEED_DEFAULT_GRANTS")? {
            config.seed_default_grants = v;
        }
        if let Some(v) = parse_bool(&get, "COOKIE_SECURE")? {
            config.cookie_secure = v;
        }

        let auth = &mut config.auth;
        if let Some(v) = parse_bool(&get, "AUTH_ENABLED")? {
            auth.enabled = v;
        }
        if let Some(v) = get("AUTH_ISSUER") {
            auth.issuer = v.trim().to_string();
        }
        if let Some(v) = get("AUTH_CLIENT_ID") {
            auth.client_id = v.trim().to_string();
        }
        auth.jwks_url = get("AUTH_JWKS_URL").map(|v| v.trim().to_string());
        if let Some(v) = parse(&get, "AUTH_KEY_CACHE_TTL_SECS")? {
            auth.key_cache_ttl_secs = v;
        }
        if let Some(v) = parse(&get, "AUTH_KEY_FETCH_TIMEOUT_SECS")? {
            auth.key_fetch_timeout_secs = v;
        }
        if let Some(v) = parse(&get, "AUTH_LOOKUP_TIMEOUT_SECS")? {
            auth.lookup_timeout_secs = v;
        }
        if let Some(v) = parse(&get, "AUTH_REQUEST_DEADLINE_SECS")? {
            auth.request_deadline_secs = v;
        }
        if let Some(v) = parse_bool(&get, "AUTH_DEV_BYPASS")? {
            auth.dev_bypass = v;
        }
        if let Some(v) = parse(&get, "AUTH_DEV_ROLE")? {
            auth.dev_role = v;
        }
        if let Some(v) = get("APP_ENV") {
            auth.environment = v.trim().to_string();
        }

        let limits = &mut config.rate_limits;
        if let Some(v) = parse(&get, "RATE_LIMIT_GENERAL_PER_MINUTE")? {
            limits.general_per_minute = v;
        }
        if let Some(v) = parse(&get, "RATE_LIMIT_LOGIN_PER_MINUTE")? {
            limits.login_per_minute = v;
        }
        if let Some(v) = parse(&get, "RATE_LIMIT_BULK_PER_HOUR")? {
            limits.bulk_per_hour = v;
        }

        config.auth.validate()?;
        Ok(config)
    }

    /// Log the settings that weaken security. Call once after tracing is up.
    pub fn warn_insecure(&self) {
        self.auth.warn_insecure();
        if !self.cookie_secure {
            tracing::warn!("session cookie is sent without the Secure attribute");
        }
        if self.database_url.is_none() {
            tracing::warn!("DATABASE_URL not set; using in-memory user and grant stores");
        }
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    get(var)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<bool>, ConfigError> {
    get(var)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var,
                value,
                reason: "expected a boolean".to_string(),
            }),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ApiConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiConfig::from_lookup(|name| vars.get(name).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("AUTH_ISSUER", "https://idp.example.com/pool-1/"),
        ("AUTH_CLIENT_ID", "web"),
    ];

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&REQUIRED).unwrap();
        assert!(config.auth.enabled);
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.auth.key_cache_config().ttl, Duration::from_secs(3600));
        assert_eq!(config.auth.key_cache_config().fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.auth.request_deadline(), Duration::from_secs(15));
        assert_eq!(config.rate_limits.policy(RateLimitTier::Bulk), RateLimitPolicy::per_hour(3));
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn request_deadline_is_configurable() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("AUTH_REQUEST_DEADLINE_SECS", "4"));
        assert_eq!(load(&vars).unwrap().auth.request_deadline(), Duration::from_secs(4));
    }

    #[test]
    fn jwks_url_derives_from_issuer() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(
            config.auth.jwks_url(),
            "https://idp.example.com/pool-1/.well-known/jwks.json"
        );

        let mut vars = REQUIRED.to_vec();
        vars.push(("AUTH_JWKS_URL", "https://keys.example.com/jwks"));
        assert_eq!(load(&vars).unwrap().auth.jwks_url(), "https://keys.example.com/jwks");
    }

    #[test]
    fn enabled_auth_requires_issuer_and_client() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("AUTH_ISSUER"));
        assert_eq!(
            load(&[("AUTH_ISSUER", "https://idp")]).unwrap_err(),
            ConfigError::Missing("AUTH_CLIENT_ID")
        );
    }

    #[test]
    fn disabled_auth_needs_no_issuer() {
        let config = load(&[
            ("AUTH_ENABLED", "false"),
            ("AUTH_DEV_BYPASS", "true"),
            ("AUTH_DEV_ROLE", "manager"),
        ])
        .unwrap();
        let settings = config.auth.mode_settings();
        assert!(!settings.verification_enabled);
        assert!(settings.dev_bypass);
        assert_eq!(settings.dev_role, Role::Manager);
        assert_eq!(settings.environment, "development");
    }

    #[test]
    fn dev_role_accepts_numeric_codes() {
        let config = load(&[("AUTH_ENABLED", "0"), ("AUTH_DEV_ROLE", "4")]).unwrap();
        assert_eq!(config.auth.dev_role, Role::Engineer);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("AUTH_KEY_CACHE_TTL_SECS", "soon"));
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { var: "AUTH_KEY_CACHE_TTL_SECS", .. })
        ));

        assert!(matches!(
            load(&[("AUTH_ENABLED", "maybe")]),
            Err(ConfigError::Invalid { var: "AUTH_ENABLED", .. })
        ));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("BIND_ADDR", "  "));
        vars.push(("DATABASE_URL", ""));
        let config = load(&vars).unwrap();
        assert_eq!(config.bind_addr, ApiConfig::default().bind_addr);
        assert_eq!(config.database_url, None);
    }
}
