//! Handler-level authorization guards.
//!
//! Authentication happens in middleware; permission checks happen here, in the
//! handler, because only the handler knows which permission it needs.

use crewdesk_auth::{AuthContext, Decision, PermissionKey, Role, require_role};

use crate::app::errors::ApiError;
use crate::app::services::AppServices;

/// Resolve `permission` for the caller and narrow the context to the granted scope.
pub async fn require_permission(
    services: &AppServices,
    ctx: AuthContext,
    permission: &PermissionKey,
) -> Result<(AuthContext, Decision), ApiError> {
    let decision = services
        .permissions()
        .authorize(ctx.role(), permission)
        .await
        .inspect_err(|_| {
            tracing::info!(
                user_id = %ctx.user_id(),
                role = %ctx.role(),
                permission = %permission,
                "permission check failed"
            );
        })?;
    Ok((ctx.with_scope(&decision), decision))
}

/// Fail unless the caller's role is at least `required`.
pub fn require_at_least(ctx: &AuthContext, required: Role) -> Result<(), ApiError> {
    require_role(ctx.role(), required).map_err(ApiError::from)
}
