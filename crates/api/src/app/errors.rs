use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crewdesk_auth::{AuthError, AuthFailureKind, RateLimitDecision};

/// Handler error carrying an auth failure. Renders only the public code and
/// message; the detail stays in the logs.
#[derive(Debug)]
pub struct ApiError(pub AuthError);

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        Self(value)
    }
}

pub fn status_for(err: &AuthError) -> StatusCode {
    match err.kind() {
        AuthFailureKind::Authentication => StatusCode::UNAUTHORIZED,
        AuthFailureKind::Authorization => StatusCode::FORBIDDEN,
        AuthFailureKind::Throttled => StatusCode::TOO_MANY_REQUESTS,
        AuthFailureKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        AuthFailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::error!(error = %err, status = status.as_u16(), "auth dependency failed");
        } else {
            tracing::debug!(error = %err, status = status.as_u16(), "request rejected");
        }

        let mut response = json_error(status, err.code(), err.public_message());
        if let AuthError::RateLimited { retry_after_secs } = err {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

/// 429 with the standard rate-limit headers.
pub fn rate_limited(decision: &RateLimitDecision) -> Response {
    let retry_after_secs = decision.retry_after_secs();
    let reset_at = chrono::Utc::now().timestamp() + retry_after_secs as i64;

    let mut response = ApiError(AuthError::RateLimited { retry_after_secs }).into_response();
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset_at));
    response
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
