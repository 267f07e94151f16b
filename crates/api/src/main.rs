use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use crewdesk_api::{app, config::ApiConfig};
use crewdesk_auth::rate_limit::{DEFAULT_BUCKET_RETENTION, DEFAULT_SWEEP_INTERVAL};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    crewdesk_observability::init();

    let config = ApiConfig::from_env().context("loading configuration")?;
    config.warn_insecure();

    let services = Arc::new(app::services::build_services(&config).await?);
    services.warm_keys().await;
    let _sweeper = services
        .limiter()
        .spawn_sweeper(DEFAULT_SWEEP_INTERVAL, DEFAULT_BUCKET_RETENTION);

    let app = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")
}
