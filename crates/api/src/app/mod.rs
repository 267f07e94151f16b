//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, auth mode, permission resolver, rate limiter
//! - `routes/`: HTTP handlers, one file per area
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    Extension, Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower::ServiceBuilder;

use crate::middleware;

pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Layer order on protected routes, outermost first: authentication, general
/// rate limit, then any route-specific limit. Session creation is throttled
/// per origin before authentication runs.
pub fn build_app(services: Arc<AppServices>) -> Router {
    let protected = Router::new()
        .route("/auth/me", get(routes::session::me))
        .route("/auth/logout", post(routes::session::logout))
        .route("/authz/explain", get(routes::authz::explain))
        .route("/authz/check", get(routes::authz::check))
        .route(
            "/notifications/reminders",
            post(routes::notifications::send_reminders).layer(from_fn_with_state(
                services.clone(),
                middleware::bulk_rate_limit,
            )),
        )
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(services.clone(), middleware::auth_middleware))
                .layer(from_fn_with_state(services.clone(), middleware::general_rate_limit)),
        );

    let login = Router::new()
        .route("/auth/session", post(routes::session::create_session))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(services.clone(), middleware::login_rate_limit))
                .layer(from_fn_with_state(services.clone(), middleware::auth_middleware)),
        );

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/v1", protected.merge(login))
        .layer(Extension(services))
}
