use std::time::Duration;

use anyhow::Context;
use trustgate_api::app::{self, services};
use trustgate_infra::TrustgateConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    trustgate_observability::init();

    let config = TrustgateConfig::from_env().context("failed to load configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let state = services::build_state(&config).context("failed to initialise services")?;
    let _maintenance = services::spawn_maintenance(&state, Duration::from_secs(60));
    let app = app::build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
