use anyhow::Context;

use shopledger_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shopledger_observability::init();

    let config = ApiConfig::from_env();
    let app = shopledger_api::app::build_app(&config)
        .await
        .context("failed to build application")?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
