use anyhow::{Context, Result};
use clap::Parser;
use darktube::{config::Config, state::AppState};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    config.warn_if_insecure();

    info!("Opening database {}", config.database_url);
    let state = AppState::new(config).await?;

    let purge_interval = state.config.session_purge_interval();
    state.sessions.clone().spawn_purge_task(purge_interval);
    info!("Sweeping expired sessions every {} min", purge_interval.as_secs() / 60);

    let listener = TcpListener::bind(&state.config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", state.config.bind))?;

    info!("🚀 DarkTube running on http://{}", listener.local_addr()?);
    info!("📁 Uploads stored in {}", state.files.root().display());

    axum::serve(listener, darktube::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
