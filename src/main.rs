use anyhow::Context;
use credential_provisioner::telemetry::init_tracing;
use credential_provisioner::{Dispatcher, ProvisionerConfig, ProvisionerResult};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing().context("failed to install tracing subscriber")?;

    let dispatcher = start().await.context("credential provisioner failed to start")?;

    tokio::select! {
        () = dispatcher.run() => {},
        result = shutdown_signal() => {
            result?;
            tracing::info!("shutdown signal received, exiting");
        }
    }
    Ok(())
}

/// Reads the environment, builds the dispatcher and readies the queue resources.
async fn start() -> ProvisionerResult<Dispatcher> {
    let config = ProvisionerConfig::from_env()?;
    let dispatcher = Dispatcher::from_config(&config)?;
    dispatcher.prepare().await?;
    Ok(dispatcher)
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => result.context("failed to listen for Ctrl+C"),
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")
    }
}
