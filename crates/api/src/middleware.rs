use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;

use crewdesk_auth::extract::ACCESS_TOKEN_COOKIE;
use crewdesk_auth::{AuthContext, RateLimitTier, TokenSources};

use crate::app::errors::{ApiError, rate_limited};
use crate::app::services::AppServices;

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Authenticate the request and attach its [`AuthContext`].
pub async fn auth_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: Request,
    next: Next,
) -> Response {
    let headers = req.headers();
    let authorization = header_str(headers, header::AUTHORIZATION.as_str());
    let cookie = cookie_value(headers, ACCESS_TOKEN_COOKIE);
    let user_agent = header_str(headers, header::USER_AGENT.as_str());
    let query = Query::<TokenQuery>::try_from_uri(req.uri())
        .map(|Query(q)| q.token)
        .unwrap_or_default();
    let client_addr = client_addr(&req);

    let sources = TokenSources {
        authorization: authorization.as_deref(),
        cookie: cookie.as_deref(),
        query: query.as_deref(),
        client_addr: client_addr.as_deref(),
        user_agent: user_agent.as_deref(),
    };

    let ctx = match services.authenticator().authenticate(&sources, Utc::now()).await {
        Ok(ctx) => ctx,
        Err(err) => return ApiError(err).into_response(),
    };

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

/// General tier, keyed by the authenticated user.
pub async fn general_rate_limit(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    let caller = caller_key(&req);
    enforce(&services, RateLimitTier::General, &caller, req, next).await
}

/// Login tier, keyed by origin address. Runs before authentication.
pub async fn login_rate_limit(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    let origin = client_addr(&req).unwrap_or_else(|| "unknown".to_string());
    enforce(&services, RateLimitTier::Login, &origin, req, next).await
}

/// Bulk tier, keyed by the authenticated user.
pub async fn bulk_rate_limit(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    let caller = caller_key(&req);
    enforce(&services, RateLimitTier::Bulk, &caller, req, next).await
}

async fn enforce(
    services: &AppServices,
    tier: RateLimitTier,
    caller: &str,
    req: Request,
    next: Next,
) -> Response {
    let decision = services
        .limiter()
        .check(&tier.bucket_key(caller), services.rate_limit(tier));
    if !decision.allowed {
        tracing::warn!(
            tier = tier.as_str(),
            caller,
            limit = decision.limit,
            "rate limit exceeded"
        );
        return rate_limited(&decision);
    }
    next.run(req).await
}

/// User id once authenticated, otherwise the client address.
fn caller_key(req: &Request) -> String {
    match req.extensions().get::<AuthContext>() {
        Some(ctx) => ctx.user_id().to_string(),
        None => client_addr(req).unwrap_or_else(|| "unknown".to_string()),
    }
}

fn client_addr(req: &Request) -> Option<String> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Value of the named cookie across every `Cookie` header.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
}
