//! Process entrypoint: load configuration, start the pipeline, and run until
//! a shutdown signal arrives.

use lidar_core::config::CoreConfig;
use lidar_core::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = CoreConfig::from_env()?;
    tracing::info!(listen_addr = %config.listen_addr, "starting lidar-core");

    let orchestrator = Orchestrator::start(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining tasks");
    orchestrator.shutdown().await;

    Ok(())
}
