use anyhow::Context;
use stockledger_app::App;
use stockledger_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    stockledger_observability::init_with(&config.log);

    let app = App::start(config).await.context("failed to start")?;
    tracing::info!(backend = ?app.backend(), "stockledger ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    if let Some(audit) = app.shutdown().await.filter(|audit| !audit.drained) {
        tracing::warn!(stats = ?audit.stats, "audit records lost during shutdown");
    }
    Ok(())
}
