use anyhow::Context;
use facegate::{
    utils::{config::Config, logging},
    Application,
};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::new().context("Failed to load configuration")?;
    let _log_guard = logging::init(&config.logging).context("Failed to initialise logging")?;

    info!("Starting facegate v{}", env!("CARGO_PKG_VERSION"));

    let app = Application::new(config).await.map_err(|e| {
        error!("Failed to initialize application: {}", e);
        e
    })?;

    if let Err(e) = app.start().await {
        error!("Failed to start application: {}", e);
        app.shutdown().await?;
        return Err(e.into());
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }

    if let Err(e) = app.shutdown().await {
        error!("Error during shutdown: {}", e);
    }

    Ok(())
}
