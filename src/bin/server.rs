use std::sync::Arc;

use rustrade_core::application::system::Application;
use rustrade_core::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = Config::from_env()?;
    let app = Arc::new(Application::build(config).await?);
    let shutdown = app.shutdown_handle();

    let metrics = app.metrics();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Ok(rendered) = metrics.render() {
                tracing::debug!(metrics = %rendered, "metrics snapshot");
            }
        }
    });

    let run_handle = tokio::spawn(async move { app.start().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    }

    let _ = run_handle.await;
    Ok(())
}
