use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use zipstream_server::config::Settings;
use zipstream_server::services::{DownloadService, RemoteFetcher};
use zipstream_server::store::{SessionReaper, SessionStore};
use zipstream_server::{build_router, logging, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();

    info!("🚀 Starting zipstream server...");

    // Load configuration
    let settings = Settings::load()?;
    let download_config = settings.download_config();
    info!(
        ttl_secs = download_config.session_ttl.as_secs(),
        download_timeout_secs = download_config.download_timeout.as_secs(),
        "✅ Configuration loaded"
    );

    // Initialize services
    let store = Arc::new(SessionStore::new());
    let fetcher = Arc::new(RemoteFetcher::new(
        download_config.http_timeout,
        &download_config.user_agent,
    )?);
    let downloads = Arc::new(DownloadService::new(
        store.clone(),
        fetcher,
        download_config.clone(),
    ));

    // Expired session cleanup
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = Arc::new(SessionReaper::new(
        store,
        download_config.session_ttl,
        download_config.cleanup_interval,
    ))
    .spawn(shutdown_rx);
    info!("✅ Session reaper started");

    // Server address
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = AppState::new(downloads, addr.to_string());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🎯 Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = reaper.await {
        warn!("Session reaper ended abnormally: {}", e);
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
