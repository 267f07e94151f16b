//! Session endpoints: who am I, exchange a bearer token for a cookie, log out.

use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;

use crewdesk_auth::extract::ACCESS_TOKEN_COOKIE;
use crewdesk_auth::{AuthContext, TokenOrigin};

use crate::app::services::AppServices;

/// GET /auth/me
pub async fn me(Extension(ctx): Extension<AuthContext>) -> impl IntoResponse {
    Json(identity(&ctx))
}

/// POST /auth/session
///
/// A request authenticated by bearer header gets the same token back as an
/// `HttpOnly` cookie, valid until the token expires.
pub async fn create_session(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
) -> Response {
    let session = ctx.session();
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim());

    let cookie = match (session.token_origin, session.expires_at, bearer) {
        (Some(TokenOrigin::AuthorizationHeader), Some(expires_at), Some(token)) => {
            let max_age = (expires_at - Utc::now()).num_seconds().max(0);
            Some(session_cookie(token, max_age, services.cookie_secure()))
        }
        _ => None,
    };

    tracing::info!(
        user_id = %ctx.user_id(),
        cookie_issued = cookie.is_some(),
        "session established"
    );

    let mut response = (StatusCode::OK, Json(identity(&ctx))).into_response();
    if let Some(cookie) = cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

/// POST /auth/logout
pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    tracing::info!(user_id = %ctx.user_id(), "session cleared");
    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Ok(cookie) = HeaderValue::from_str(&session_cookie("", 0, services.cookie_secure())) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

fn identity(ctx: &AuthContext) -> serde_json::Value {
    let principal = ctx.principal();
    let session = ctx.session();
    json!({
        "user_id": principal.user_id.to_string(),
        "email": principal.email,
        "display_name": principal.display_name,
        "role": principal.role.as_str(),
        "role_code": principal.role.code(),
        "token_use": session.token_use,
        "token_origin": session.token_origin,
        "expires_at": session.expires_at,
        "bypass": session.bypass,
    })
}

fn session_cookie(token: &str, max_age: i64, secure: bool) -> String {
    let mut cookie =
        format!("{ACCESS_TOKEN_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_attributes() {
        assert_eq!(
            session_cookie("abc", 60, true),
            "access_token=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=60; Secure"
        );
        assert!(!session_cookie("", 0, false).contains("Secure"));
    }
}
