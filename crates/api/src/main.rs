use anyhow::Context;

use lms_api::config::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lms_observability::init();

    let config = GatewayConfig::from_env()?;
    let app = lms_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
