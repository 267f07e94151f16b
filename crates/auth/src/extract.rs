//! Locating the bearer token on an incoming request.
//!
//! Transport-agnostic: the HTTP adapter hands over the raw header, cookie and
//! query values it found.

use serde::Serialize;

use crate::error::AuthError;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const TOKEN_QUERY_PARAM: &str = "token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenOrigin {
    AuthorizationHeader,
    Cookie,
    QueryParameter,
}

/// Raw request values that may carry a token.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenSources<'a> {
    /// Full `Authorization` header value.
    pub authorization: Option<&'a str>,
    /// Value of the `access_token` cookie.
    pub cookie: Option<&'a str>,
    /// Value of the `token` query parameter.
    pub query: Option<&'a str>,
    /// Remote address, for log lines only.
    pub client_addr: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedToken<'a> {
    pub token: &'a str,
    pub origin: TokenOrigin,
}

/// Pick the token by precedence: bearer header, then cookie, then query.
pub fn extract_token<'a>(sources: &TokenSources<'a>) -> Result<ExtractedToken<'a>, AuthError> {
    if let Some(token) = sources.authorization.and_then(bearer) {
        return Ok(ExtractedToken {
            token,
            origin: TokenOrigin::AuthorizationHeader,
        });
    }

    if let Some(token) = sources.cookie.and_then(non_empty) {
        return Ok(ExtractedToken {
            token,
            origin: TokenOrigin::Cookie,
        });
    }

    if let Some(token) = sources.query.and_then(non_empty) {
        tracing::warn!(
            client_addr = sources.client_addr.unwrap_or("unknown"),
            user_agent = sources.user_agent.unwrap_or("unknown"),
            "token passed as query parameter; this transport is deprecated"
        );
        return Ok(ExtractedToken {
            token,
            origin: TokenOrigin::QueryParameter,
        });
    }

    Err(AuthError::unauthenticated("no token on request"))
}

fn bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    non_empty(token)
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}
