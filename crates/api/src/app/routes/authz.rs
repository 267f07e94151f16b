//! Authorization audit endpoints: "why was this request denied?"

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use crewdesk_auth::{AuthContext, PermissionKey, Role};

use crate::app::errors::{self, ApiError};
use crate::app::services::AppServices;
use crate::authz;

#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub permission: String,
    /// Role to evaluate; defaults to the caller's own.
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub permission: String,
}

/// GET /authz/explain?permission=leave:read[&role=engineer]
///
/// Managers may explain their own role; other roles need an administrator.
pub async fn explain(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<ExplainQuery>,
) -> Result<Response, ApiError> {
    authz::require_at_least(&ctx, Role::Manager)?;
    let role = query.role.unwrap_or(ctx.role());
    if role != ctx.role() {
        authz::require_at_least(&ctx, Role::Admin)?;
    }

    let permission = match parse_permission(&query.permission) {
        Ok(p) => p,
        Err(resp) => return Ok(resp),
    };

    let explanation = services.permissions().explain(role, &permission).await?;
    Ok((StatusCode::OK, Json(explanation)).into_response())
}

/// GET /authz/check?permission=leave:read
///
/// Runs the same guard a handler would and reports the granted scope.
pub async fn check(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<CheckQuery>,
) -> Result<Response, ApiError> {
    let permission = match parse_permission(&query.permission) {
        Ok(p) => p,
        Err(resp) => return Ok(resp),
    };

    let (ctx, decision) = authz::require_permission(&services, ctx, &permission).await?;
    Ok(Json(json!({
        "allowed": true,
        "permission": permission,
        "role": ctx.role(),
        "scope": ctx.scope(),
        "path": decision.path,
    }))
    .into_response())
}

fn parse_permission(raw: &str) -> Result<PermissionKey, Response> {
    raw.parse().map_err(|e| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_permission",
            format!("permission must look like resource:action ({e})"),
        )
    })
}
