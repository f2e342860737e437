//! Keepsake Server
//!
//! A content-addressed file upload server with deduplication and expiring
//! temporary uploads.

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keepsake_server::{build_router, reconcile, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keepsake_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Keepsake Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Permanent uploads: {}", config.storage.permanent_dir.display());
    tracing::info!("Temporary uploads: {}", config.storage.temporary_dir.display());
    tracing::info!("Digest index: {}", config.storage.index_path.display());
    tracing::info!("Temporary upload lifetime: {}s", config.expiry.ttl.as_secs());

    if config.auth.api_keys.is_empty() {
        tracing::warn!("No API keys registered, every upload will be rejected");
    }

    // Create application state
    let app_state = AppState::new(config.clone())
        .await
        .context("Failed to initialize application state")?;

    // Bring index, storage and expiry schedule back into agreement
    reconcile::run_startup(
        app_state.index(),
        app_state.store(),
        app_state.scheduler(),
        config.adopt_untracked,
    )
    .await
    .context("Startup reconciliation failed")?;

    let sweeper = app_state.scheduler().clone().start_sweeper();

    let app = build_router(app_state);

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.server.host, config.server.port))?;
    tracing::info!("Keepsake Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
